//! Decision-driven auto-snapshots
//!
//! Counts decisions and captures a snapshot once enough have accumulated and
//! the debounce window has passed. Concurrent triggers fail fast on the
//! scheduler lock instead of queueing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::store::{SnapshotBatch, SnapshotStore};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchedulerConfig {
    pub enabled: bool,
    /// Decisions required between automatic snapshots
    pub decision_interval: u64,
    pub min_seconds_between_snapshots: u64,
    /// Purge rows older than this many days after each automatic snapshot
    pub purge_days: Option<u32>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            decision_interval: 25,
            min_seconds_between_snapshots: 60,
            purge_days: Some(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    Disabled,
    /// Another trigger holds the scheduler lock
    Locked,
    BelowInterval { decisions: u64, required: u64 },
    Debounced { remaining_secs: i64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AutoSnapshotOutcome {
    Triggered {
        batch: SnapshotBatch,
        purged: Option<u64>,
    },
    Skipped(SkipReason),
}

impl AutoSnapshotOutcome {
    pub fn is_triggered(&self) -> bool {
        matches!(self, AutoSnapshotOutcome::Triggered { .. })
    }
}

#[derive(Default)]
struct TriggerState {
    last_snapshot_at: Option<DateTime<Utc>>,
    /// `last_snapshot_at` has been loaded from persisted history
    seeded: bool,
}

pub struct AutoSnapshotScheduler {
    config: SchedulerConfig,
    store: Arc<SnapshotStore>,
    decisions_since: AtomicU64,
    /// Held for the whole fire sequence
    state: Mutex<TriggerState>,
}

impl AutoSnapshotScheduler {
    pub fn new(config: SchedulerConfig, store: Arc<SnapshotStore>) -> Self {
        Self {
            config,
            store,
            decisions_since: AtomicU64::new(0),
            state: Mutex::new(TriggerState::default()),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<SnapshotStore> {
        &self.store
    }

    /// Count one decision; returns the new counter value.
    pub fn note_decision(&self) -> u64 {
        self.decisions_since.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn decisions_since_last_snapshot(&self) -> u64 {
        self.decisions_since.load(Ordering::SeqCst)
    }

    pub async fn last_snapshot_at(&self) -> Option<DateTime<Utc>> {
        self.state.lock().await.last_snapshot_at
    }

    /// Take a snapshot if every trigger condition holds.
    ///
    /// Skipped calls have no side effects. The counter is reduced by the count
    /// observed at fire time so decisions arriving mid-snapshot carry over.
    /// The debounce starts from the newest stored batch, so it survives a
    /// restart on a durable store.
    pub async fn maybe_auto_snapshot(&self, reason: Option<&str>) -> Result<AutoSnapshotOutcome> {
        if !self.config.enabled {
            return Ok(AutoSnapshotOutcome::Skipped(SkipReason::Disabled));
        }

        let Ok(mut state) = self.state.try_lock() else {
            tracing::debug!("Auto-snapshot already in progress, skipping");
            return Ok(AutoSnapshotOutcome::Skipped(SkipReason::Locked));
        };

        let observed = self.decisions_since.load(Ordering::SeqCst);
        if observed < self.config.decision_interval {
            return Ok(AutoSnapshotOutcome::Skipped(SkipReason::BelowInterval {
                decisions: observed,
                required: self.config.decision_interval,
            }));
        }

        if !state.seeded {
            state.last_snapshot_at = self.store.latest_captured_at().await?;
            state.seeded = true;
        }

        let now = Utc::now();
        if let Some(last) = state.last_snapshot_at {
            let elapsed = (now - last).num_seconds();
            let required = self.config.min_seconds_between_snapshots as i64;
            if elapsed < required {
                return Ok(AutoSnapshotOutcome::Skipped(SkipReason::Debounced {
                    remaining_secs: required - elapsed,
                }));
            }
        }

        let reason = reason.unwrap_or("auto");
        let batch = self.store.snapshot_current(None, reason).await?;

        let purged = match self.config.purge_days {
            Some(days) => match self.store.purge_old_snapshots(days).await {
                Ok(result) => Some(result.removed),
                Err(e) => {
                    tracing::warn!("Auto-snapshot purge failed: {}", e);
                    None
                }
            },
            None => None,
        };

        self.decisions_since.fetch_sub(observed, Ordering::SeqCst);
        state.last_snapshot_at = Some(batch.captured_at);

        tracing::info!(
            "Auto-snapshot after {} decisions ({} rows)",
            observed,
            batch.rows
        );

        Ok(AutoSnapshotOutcome::Triggered { batch, purged })
    }
}
