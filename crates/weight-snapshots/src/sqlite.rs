use anyhow::Result;
use async_trait::async_trait;
use governance_core::time::{from_millis, to_millis};
use sqlx::{FromRow, SqlitePool};

use crate::backend::{BackendKind, SnapshotBackend, WeightSnapshotRow};

#[derive(Debug, FromRow)]
struct SnapshotRecord {
    id: i64,
    strategy: String,
    captured_at: i64,
    reason: String,
    samples: i64,
    decay_score: f64,
    avg_effectiveness: f64,
    p90_effectiveness: f64,
    spread: f64,
    early_gated: bool,
    base_score: f64,
    adjusted_score: f64,
    final_weight: f64,
    checksum: f64,
    rationale: String,
}

impl SnapshotRecord {
    fn into_row(self) -> WeightSnapshotRow {
        WeightSnapshotRow {
            id: Some(self.id),
            strategy: self.strategy,
            captured_at: from_millis(self.captured_at),
            reason: self.reason,
            samples: self.samples.max(0) as usize,
            decay_score: self.decay_score,
            avg_effectiveness: self.avg_effectiveness,
            p90_effectiveness: self.p90_effectiveness,
            spread: self.spread,
            early_gated: self.early_gated,
            base_score: self.base_score,
            adjusted_score: self.adjusted_score,
            final_weight: self.final_weight,
            checksum: self.checksum,
            rationale: serde_json::from_str(&self.rationale).unwrap_or_default(),
        }
    }
}

/// Durable backend; every batch and purge runs in one transaction.
#[derive(Clone)]
pub struct SqliteSnapshotBackend {
    pool: SqlitePool,
}

impl SqliteSnapshotBackend {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SnapshotBackend for SqliteSnapshotBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    async fn insert_batch(&self, rows: &[WeightSnapshotRow]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;

        for row in rows {
            let rationale = serde_json::to_string(&row.rationale)?;
            sqlx::query(
                "INSERT INTO weight_snapshots (
                    strategy, captured_at, reason, samples, decay_score,
                    avg_effectiveness, p90_effectiveness, spread, early_gated,
                    base_score, adjusted_score, final_weight, checksum, rationale
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&row.strategy)
            .bind(to_millis(row.captured_at))
            .bind(&row.reason)
            .bind(row.samples as i64)
            .bind(row.decay_score)
            .bind(row.avg_effectiveness)
            .bind(row.p90_effectiveness)
            .bind(row.spread)
            .bind(row.early_gated)
            .bind(row.base_score)
            .bind(row.adjusted_score)
            .bind(row.final_weight)
            .bind(row.checksum)
            .bind(&rationale)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(rows.len())
    }

    async fn list(&self, strategy: Option<&str>, limit: usize) -> Result<Vec<WeightSnapshotRow>> {
        let records: Vec<SnapshotRecord> = sqlx::query_as(
            "SELECT id, strategy, captured_at, reason, samples, decay_score,
                    avg_effectiveness, p90_effectiveness, spread, early_gated,
                    base_score, adjusted_score, final_weight, checksum, rationale
             FROM weight_snapshots
             WHERE (?1 IS NULL OR strategy = ?1)
             ORDER BY captured_at DESC, id DESC
             LIMIT ?2",
        )
        .bind(strategy)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(records.into_iter().map(SnapshotRecord::into_row).collect())
    }

    async fn purge_before(&self, cutoff_ms: i64) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query("DELETE FROM weight_snapshots WHERE captured_at < ?")
            .bind(cutoff_ms)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected())
    }

    async fn latest_captured_at(&self) -> Result<Option<i64>> {
        let (latest,): (Option<i64>,) = sqlx::query_as("SELECT MAX(captured_at) FROM weight_snapshots")
            .fetch_one(&self.pool)
            .await?;
        Ok(latest)
    }

    async fn strategies(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT DISTINCT strategy FROM weight_snapshots ORDER BY strategy")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(s,)| s).collect())
    }

    async fn count(&self) -> Result<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM weight_snapshots")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }
}
