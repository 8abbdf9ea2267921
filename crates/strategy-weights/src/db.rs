use anyhow::Result;
use governance_core::time::{from_millis, to_millis};
use sqlx::{FromRow, SqlitePool};

use crate::tracker::StrategyPerformanceRecord;

#[derive(Debug, FromRow)]
struct RecordRow {
    strategy: String,
    window_label: String,
    decisions_count: i64,
    samples: i64,
    avg_effectiveness: f64,
    p90_effectiveness: f64,
    decay_weighted_score: f64,
    last_weight: Option<f64>,
    updated_at: i64,
}

impl RecordRow {
    fn into_record(self) -> StrategyPerformanceRecord {
        StrategyPerformanceRecord {
            strategy: self.strategy,
            window: self.window_label,
            decisions_count: self.decisions_count.max(0) as u64,
            samples: self.samples.max(0) as usize,
            avg_effectiveness: self.avg_effectiveness,
            p90_effectiveness: self.p90_effectiveness,
            decay_weighted_score: self.decay_weighted_score,
            last_weight: self.last_weight,
            updated_at: from_millis(self.updated_at),
        }
    }
}

/// Upsert-by-(strategy, window) persistence for performance aggregates.
#[derive(Clone)]
pub struct PerformanceRecordDb {
    pool: SqlitePool,
}

impl PerformanceRecordDb {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Write all records in one transaction. Rows are never deleted.
    pub async fn upsert_records(&self, records: &[StrategyPerformanceRecord]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;

        for record in records {
            sqlx::query(
                "INSERT INTO strategy_performance_records
                 (strategy, window_label, decisions_count, samples, avg_effectiveness,
                  p90_effectiveness, decay_weighted_score, last_weight, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(strategy, window_label) DO UPDATE SET
                    decisions_count = excluded.decisions_count,
                    samples = excluded.samples,
                    avg_effectiveness = excluded.avg_effectiveness,
                    p90_effectiveness = excluded.p90_effectiveness,
                    decay_weighted_score = excluded.decay_weighted_score,
                    last_weight = COALESCE(excluded.last_weight, strategy_performance_records.last_weight),
                    updated_at = excluded.updated_at",
            )
            .bind(&record.strategy)
            .bind(&record.window)
            .bind(record.decisions_count as i64)
            .bind(record.samples as i64)
            .bind(record.avg_effectiveness)
            .bind(record.p90_effectiveness)
            .bind(record.decay_weighted_score)
            .bind(record.last_weight)
            .bind(to_millis(record.updated_at))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(records.len())
    }

    /// Load all persisted records, ordered by strategy then window
    pub async fn load_records(&self) -> Result<Vec<StrategyPerformanceRecord>> {
        let rows: Vec<RecordRow> = sqlx::query_as(
            "SELECT strategy, window_label, decisions_count, samples, avg_effectiveness,
                    p90_effectiveness, decay_weighted_score, last_weight, updated_at
             FROM strategy_performance_records
             ORDER BY strategy, window_label",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(RecordRow::into_record).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::{StrategyTracker, TrackerParams};
    use governance_core::GovernanceDb;

    #[tokio::test]
    async fn test_upsert_keeps_one_row_per_key() {
        let db = GovernanceDb::new("sqlite::memory:").await.unwrap();
        let records_db = PerformanceRecordDb::new(db.pool().clone());
        let tracker = StrategyTracker::new(["STEADY", "EXPEDITE"], TrackerParams::default()).unwrap();

        tracker.update_on_decision("STEADY", Some(7.0), None);
        records_db.upsert_records(&tracker.records()).await.unwrap();

        tracker.update_on_decision("STEADY", Some(5.0), None);
        records_db.upsert_records(&tracker.records()).await.unwrap();

        let loaded = records_db.load_records().await.unwrap();
        assert_eq!(loaded.len(), 2);
        let steady = loaded.iter().find(|r| r.strategy == "STEADY").unwrap();
        assert_eq!(steady.decisions_count, 2);
        assert_eq!(steady.samples, 2);
        assert!((steady.avg_effectiveness - 6.0).abs() < 1e-12);
        assert_eq!(steady.window, "rolling_50");
    }

    #[tokio::test]
    async fn test_last_weight_survives_records_without_weight() {
        let db = GovernanceDb::new("sqlite::memory:").await.unwrap();
        let records_db = PerformanceRecordDb::new(db.pool().clone());
        let tracker = StrategyTracker::new(["STEADY"], TrackerParams::default()).unwrap();

        tracker.select_strategy(Some(1)).unwrap();
        records_db.upsert_records(&tracker.records()).await.unwrap();

        let mut fresh = tracker.records();
        fresh[0].last_weight = None;
        records_db.upsert_records(&fresh).await.unwrap();

        let loaded = records_db.load_records().await.unwrap();
        assert_eq!(loaded[0].last_weight, Some(1.0));
    }
}
