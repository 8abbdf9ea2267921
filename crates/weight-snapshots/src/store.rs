//! Snapshot store
//!
//! Owns the write path for weight history: monotonic capture timestamps,
//! atomic batches, bounded listing and cutoff-based purging.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use governance_core::time::{from_millis, to_millis};
use governance_core::{GovernanceDb, GovernanceError};
use serde::{Deserialize, Serialize};
use strategy_weights::{StrategyTracker, WeightArtifact};
use tokio::sync::Mutex;

use crate::backend::{BackendKind, SnapshotBackend, WeightSnapshotRow};
use crate::memory::MemorySnapshotBackend;
use crate::sqlite::SqliteSnapshotBackend;

/// Largest page `list_snapshots` will serve
pub const MAX_SNAPSHOT_PAGE: usize = 1000;

/// Outcome of one snapshot write
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotBatch {
    pub captured_at: DateTime<Utc>,
    pub rows: usize,
    pub checksum: f64,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurgeResult {
    pub removed: u64,
    pub cutoff: DateTime<Utc>,
}

pub struct SnapshotStore {
    backend: Arc<dyn SnapshotBackend>,
    tracker: Arc<StrategyTracker>,
    /// Serializes snapshot writes and purges; caches the last capture time
    write_lock: Mutex<Option<i64>>,
}

impl SnapshotStore {
    pub fn new(backend: Arc<dyn SnapshotBackend>, tracker: Arc<StrategyTracker>) -> Self {
        Self {
            backend,
            tracker,
            write_lock: Mutex::new(None),
        }
    }

    pub fn in_memory(tracker: Arc<StrategyTracker>) -> Self {
        Self::new(Arc::new(MemorySnapshotBackend::default()), tracker)
    }

    pub fn sqlite(db: &GovernanceDb, tracker: Arc<StrategyTracker>) -> Self {
        Self::new(Arc::new(SqliteSnapshotBackend::new(db.pool().clone())), tracker)
    }

    /// Durable store on `db` when present, memory otherwise.
    pub fn open(db: Option<&GovernanceDb>, tracker: Arc<StrategyTracker>) -> Self {
        match db {
            Some(db) => Self::sqlite(db, tracker),
            None => Self::in_memory(tracker),
        }
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn tracker(&self) -> &Arc<StrategyTracker> {
        &self.tracker
    }

    /// Persist one row per strategy for `artifact` (or the tracker's current
    /// artifact) as a single atomic batch.
    pub async fn snapshot_current(
        &self,
        artifact: Option<&WeightArtifact>,
        reason: &str,
    ) -> Result<SnapshotBatch> {
        match artifact {
            Some(artifact) => self.snapshot_at(artifact, Utc::now(), reason).await,
            None => {
                let artifact = self.tracker.compute_unified_weights(None)?;
                self.snapshot_at(&artifact, Utc::now(), reason).await
            }
        }
    }

    /// Persist `artifact` captured at `at`.
    ///
    /// The effective capture time is bumped to stay strictly after the
    /// previous batch.
    pub async fn snapshot_at(
        &self,
        artifact: &WeightArtifact,
        at: DateTime<Utc>,
        reason: &str,
    ) -> Result<SnapshotBatch> {
        let mut last_captured = self.write_lock.lock().await;

        let previous = match *last_captured {
            Some(ms) => Some(ms),
            None => self.backend.latest_captured_at().await?,
        };
        let captured_ms = match previous {
            Some(prev) => to_millis(at).max(prev + 1),
            None => to_millis(at),
        };
        let captured_at = from_millis(captured_ms);

        let rows: Vec<WeightSnapshotRow> = artifact
            .strategies
            .iter()
            .map(|w| WeightSnapshotRow::from_weight(w, captured_at, reason, artifact.checksum))
            .collect();

        let written = self.backend.insert_batch(&rows).await?;
        *last_captured = Some(captured_ms);

        tracing::info!(
            "Captured weight snapshot: {} rows at {} ({}, {})",
            written,
            captured_at.to_rfc3339(),
            reason,
            self.backend.kind().as_str()
        );

        Ok(SnapshotBatch {
            captured_at,
            rows: written,
            checksum: artifact.checksum,
            reason: reason.to_string(),
        })
    }

    /// Newest-first history, optionally for one strategy.
    pub async fn list_snapshots(
        &self,
        strategy: Option<&str>,
        limit: usize,
    ) -> Result<Vec<WeightSnapshotRow>> {
        if limit == 0 || limit > MAX_SNAPSHOT_PAGE {
            return Err(GovernanceError::InvalidRange(format!(
                "snapshot limit must be within 1..={}, got {}",
                MAX_SNAPSHOT_PAGE, limit
            ))
            .into());
        }
        self.backend.list(strategy, limit).await
    }

    /// Remove rows captured more than `older_than_days` ago.
    pub async fn purge_old_snapshots(&self, older_than_days: u32) -> Result<PurgeResult> {
        let cutoff = Utc::now() - Duration::days(i64::from(older_than_days));
        self.purge_before(cutoff).await
    }

    /// Remove rows captured strictly before `cutoff`; rows at the cutoff stay.
    pub async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<PurgeResult> {
        let _guard = self.write_lock.lock().await;
        let removed = self.backend.purge_before(to_millis(cutoff)).await?;

        if removed > 0 {
            tracing::info!(
                "Purged {} weight snapshot rows older than {}",
                removed,
                cutoff.to_rfc3339()
            );
        }

        Ok(PurgeResult { removed, cutoff })
    }

    /// Strategies that have snapshot history
    pub async fn strategies(&self) -> Result<Vec<String>> {
        self.backend.strategies().await
    }

    /// Capture time of the newest batch, including history written before
    /// this store was opened.
    pub async fn latest_captured_at(&self) -> Result<Option<DateTime<Utc>>> {
        let cached = *self.write_lock.lock().await;
        let latest = match cached {
            Some(ms) => Some(ms),
            None => self.backend.latest_captured_at().await?,
        };
        Ok(latest.map(from_millis))
    }

    pub async fn count(&self) -> Result<u64> {
        self.backend.count().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strategy_weights::TrackerParams;

    fn tracker() -> Arc<StrategyTracker> {
        let tracker =
            StrategyTracker::new(["STEADY", "EXPEDITE", "BALANCED"], TrackerParams::default()).unwrap();
        for i in 0..10 {
            tracker.update_on_decision("STEADY", Some(7.0), None);
            tracker.update_on_decision("EXPEDITE", Some(if i % 2 == 0 { 9.0 } else { 3.0 }), None);
        }
        Arc::new(tracker)
    }

    async fn stores() -> Vec<SnapshotStore> {
        let db = GovernanceDb::new("sqlite::memory:").await.unwrap();
        vec![SnapshotStore::in_memory(tracker()), SnapshotStore::sqlite(&db, tracker())]
    }

    #[tokio::test]
    async fn test_snapshot_writes_one_row_per_strategy() {
        for store in stores().await {
            let batch = store.snapshot_current(None, "manual").await.unwrap();
            assert_eq!(batch.rows, 3);
            assert!((batch.checksum - 1.0).abs() < 1e-6);
            let rows = store.list_snapshots(None, 10).await.unwrap();
            assert_eq!(rows.len(), 3);
            assert!(rows.iter().all(|r| r.captured_at == batch.captured_at));
        }
    }

    #[tokio::test]
    async fn test_capture_times_are_strictly_monotonic() {
        for store in stores().await {
            let artifact = store.tracker().compute_unified_weights(None).unwrap();
            let at = Utc::now();
            let first = store.snapshot_at(&artifact, at, "a").await.unwrap();
            let second = store.snapshot_at(&artifact, at, "b").await.unwrap();
            let third = store
                .snapshot_at(&artifact, at - Duration::hours(1), "c")
                .await
                .unwrap();
            assert!(second.captured_at > first.captured_at);
            assert!(third.captured_at > second.captured_at);
        }
    }

    #[tokio::test]
    async fn test_list_respects_limit_and_order() {
        for store in stores().await {
            for _ in 0..5 {
                store.snapshot_current(None, "manual").await.unwrap();
            }
            let rows = store.list_snapshots(None, 4).await.unwrap();
            assert!(rows.len() <= 4);
            for pair in rows.windows(2) {
                assert!(pair[0].captured_at >= pair[1].captured_at);
            }
            let steady = store.list_snapshots(Some("STEADY"), 100).await.unwrap();
            assert_eq!(steady.len(), 5);
        }
    }

    #[tokio::test]
    async fn test_open_picks_backend_from_database() {
        let store = SnapshotStore::open(None, tracker());
        assert_eq!(store.backend_kind(), BackendKind::Memory);

        let db = GovernanceDb::connect_optional(Some("sqlite::memory:")).await;
        let store = SnapshotStore::open(db.as_ref(), tracker());
        assert_eq!(store.backend_kind(), BackendKind::Sqlite);
    }

    #[tokio::test]
    async fn test_list_rejects_out_of_bound_limit() {
        let store = SnapshotStore::in_memory(tracker());
        let err = store.list_snapshots(None, 0).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<GovernanceError>(),
            Some(GovernanceError::InvalidRange(_))
        ));
        assert!(store.list_snapshots(None, MAX_SNAPSHOT_PAGE + 1).await.is_err());
    }

    #[tokio::test]
    async fn test_purge_is_idempotent_and_keeps_cutoff_rows() {
        for store in stores().await {
            let artifact = store.tracker().compute_unified_weights(None).unwrap();
            let base = Utc::now() - Duration::days(10);
            store.snapshot_at(&artifact, base, "old").await.unwrap();
            let at_cutoff = store
                .snapshot_at(&artifact, base + Duration::days(2), "edge")
                .await
                .unwrap();
            store
                .snapshot_at(&artifact, base + Duration::days(5), "new")
                .await
                .unwrap();

            let first = store.purge_before(at_cutoff.captured_at).await.unwrap();
            assert_eq!(first.removed, 3);
            let second = store.purge_before(at_cutoff.captured_at).await.unwrap();
            assert_eq!(second.removed, 0);

            let remaining = store.list_snapshots(None, 100).await.unwrap();
            assert_eq!(remaining.len(), 6);
            assert!(remaining.iter().all(|r| r.captured_at >= at_cutoff.captured_at));
        }
    }

    #[tokio::test]
    async fn test_purge_old_snapshots_by_days() {
        for store in stores().await {
            let artifact = store.tracker().compute_unified_weights(None).unwrap();
            store
                .snapshot_at(&artifact, Utc::now() - Duration::days(40), "stale")
                .await
                .unwrap();
            store.snapshot_current(Some(&artifact), "fresh").await.unwrap();

            assert_eq!(store.purge_old_snapshots(30).await.unwrap().removed, 3);
            assert_eq!(store.purge_old_snapshots(30).await.unwrap().removed, 0);
            assert_eq!(store.count().await.unwrap(), 3);
        }
    }

    #[tokio::test]
    async fn test_concurrent_snapshot_and_purge_lose_nothing() {
        let store = Arc::new(SnapshotStore::in_memory(tracker()));
        let mut handles = Vec::new();
        for i in 0..10 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                if i % 2 == 0 {
                    store.snapshot_current(None, "concurrent").await.map(|_| ())
                } else {
                    store
                        .purge_before(Utc::now() - Duration::days(1))
                        .await
                        .map(|_| ())
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(store.count().await.unwrap(), 15);
        assert_eq!(store.strategies().await.unwrap().len(), 3);
    }
}
