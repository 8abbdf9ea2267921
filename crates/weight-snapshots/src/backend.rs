use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strategy_weights::StrategyWeight;

/// Which storage a component ended up on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Sqlite,
    Memory,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Sqlite => "sqlite",
            BackendKind::Memory => "memory",
        }
    }
}

/// Persisted copy of one strategy's artifact entry at a capture time
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WeightSnapshotRow {
    /// Assigned by the backend on insert
    pub id: Option<i64>,
    pub strategy: String,
    pub captured_at: DateTime<Utc>,
    pub reason: String,
    pub samples: usize,
    pub decay_score: f64,
    pub avg_effectiveness: f64,
    pub p90_effectiveness: f64,
    pub spread: f64,
    pub early_gated: bool,
    pub base_score: f64,
    pub adjusted_score: f64,
    pub final_weight: f64,
    /// Checksum of the artifact this row was taken from
    pub checksum: f64,
    pub rationale: Vec<String>,
}

impl WeightSnapshotRow {
    pub fn from_weight(
        weight: &StrategyWeight,
        captured_at: DateTime<Utc>,
        reason: &str,
        checksum: f64,
    ) -> Self {
        Self {
            id: None,
            strategy: weight.strategy.clone(),
            captured_at,
            reason: reason.to_string(),
            samples: weight.samples,
            decay_score: weight.decay_score,
            avg_effectiveness: weight.avg_effectiveness,
            p90_effectiveness: weight.p90_effectiveness,
            spread: weight.spread,
            early_gated: weight.early_gated,
            base_score: weight.base_score,
            adjusted_score: weight.score,
            final_weight: weight.final_weight,
            checksum,
            rationale: weight.rationale.clone(),
        }
    }
}

/// Storage seam for snapshot rows; implementations are chosen once at startup.
///
/// `insert_batch` and `purge_before` are atomic: all rows land or none do.
#[async_trait]
pub trait SnapshotBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    async fn insert_batch(&self, rows: &[WeightSnapshotRow]) -> Result<usize>;

    /// Newest first, at most `limit` rows
    async fn list(&self, strategy: Option<&str>, limit: usize) -> Result<Vec<WeightSnapshotRow>>;

    /// Delete rows captured strictly before `cutoff_ms`
    async fn purge_before(&self, cutoff_ms: i64) -> Result<u64>;

    async fn latest_captured_at(&self) -> Result<Option<i64>>;

    /// Distinct strategy ids with at least one row, sorted
    async fn strategies(&self) -> Result<Vec<String>>;

    async fn count(&self) -> Result<u64>;
}
