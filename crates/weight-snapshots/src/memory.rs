use std::collections::VecDeque;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use governance_core::time::to_millis;

use crate::backend::{BackendKind, SnapshotBackend, WeightSnapshotRow};

/// Default ring-buffer capacity
pub const MEMORY_SNAPSHOT_CAPACITY: usize = 500;

#[derive(Default)]
struct Ring {
    rows: VecDeque<WeightSnapshotRow>,
    next_id: i64,
}

/// Fallback backend: a bounded ring buffer mutated under one std mutex.
///
/// No await point exists while the lock is held, so every batch is applied
/// as a single uninterrupted unit.
pub struct MemorySnapshotBackend {
    capacity: usize,
    ring: Mutex<Ring>,
}

impl Default for MemorySnapshotBackend {
    fn default() -> Self {
        Self::new(MEMORY_SNAPSHOT_CAPACITY)
    }
}

impl MemorySnapshotBackend {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            ring: Mutex::new(Ring::default()),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Ring>> {
        self.ring
            .lock()
            .map_err(|_| anyhow!("memory snapshot buffer poisoned"))
    }
}

#[async_trait]
impl SnapshotBackend for MemorySnapshotBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    async fn insert_batch(&self, rows: &[WeightSnapshotRow]) -> Result<usize> {
        let mut ring = self.lock()?;
        for row in rows {
            ring.next_id += 1;
            let mut row = row.clone();
            row.id = Some(ring.next_id);
            ring.rows.push_back(row);
        }
        while ring.rows.len() > self.capacity {
            ring.rows.pop_front();
        }
        Ok(rows.len())
    }

    async fn list(&self, strategy: Option<&str>, limit: usize) -> Result<Vec<WeightSnapshotRow>> {
        let ring = self.lock()?;
        // insertion order equals capture order, so the back is newest
        Ok(ring
            .rows
            .iter()
            .rev()
            .filter(|r| strategy.map_or(true, |s| r.strategy == s))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn purge_before(&self, cutoff_ms: i64) -> Result<u64> {
        let mut ring = self.lock()?;
        let before = ring.rows.len();
        ring.rows.retain(|r| to_millis(r.captured_at) >= cutoff_ms);
        Ok((before - ring.rows.len()) as u64)
    }

    async fn latest_captured_at(&self) -> Result<Option<i64>> {
        let ring = self.lock()?;
        Ok(ring.rows.back().map(|r| to_millis(r.captured_at)))
    }

    async fn strategies(&self) -> Result<Vec<String>> {
        let ring = self.lock()?;
        let mut ids: Vec<String> = ring.rows.iter().map(|r| r.strategy.clone()).collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.lock()?.rows.len() as u64)
    }
}
