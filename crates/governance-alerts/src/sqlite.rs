use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use governance_core::time::{from_millis, to_millis};
use sqlx::{FromRow, SqlitePool};
use weight_snapshots::BackendKind;

use crate::backend::{AlertBackend, AlertPurgeCounts, KeysetQuery};
use crate::model::{AlertKind, DetectionRecord, GovernanceAlert, Severity};
use crate::query::SortOrder;

#[derive(Debug, FromRow)]
struct AlertRecord {
    id: i64,
    strategy: String,
    alert_kind: String,
    severity: String,
    observed: f64,
    threshold: f64,
    rationale: String,
    created_at: i64,
}

impl TryFrom<AlertRecord> for GovernanceAlert {
    type Error = anyhow::Error;

    fn try_from(record: AlertRecord) -> Result<Self> {
        let kind = AlertKind::parse(&record.alert_kind)
            .ok_or_else(|| anyhow!("unknown alert kind in row {}: {}", record.id, record.alert_kind))?;
        let severity = Severity::parse(&record.severity)
            .ok_or_else(|| anyhow!("unknown severity in row {}: {}", record.id, record.severity))?;

        Ok(GovernanceAlert {
            id: Some(record.id),
            strategy: record.strategy,
            kind,
            severity,
            observed: record.observed,
            threshold: record.threshold,
            rationale: record.rationale,
            created_at: from_millis(record.created_at),
        })
    }
}

const ASC_QUERY: &str = "SELECT id, strategy, alert_kind, severity, observed, threshold, rationale, created_at
     FROM governance_alerts
     WHERE (?1 IS NULL OR strategy = ?1)
       AND (?2 IS NULL OR alert_kind = ?2)
       AND (?3 IS NULL OR severity = ?3)
       AND created_at >= ?4 AND created_at <= ?5
       AND (?6 IS NULL OR created_at > ?6 OR (created_at = ?6 AND id > ?7))
     ORDER BY created_at ASC, id ASC
     LIMIT ?8";

const DESC_QUERY: &str = "SELECT id, strategy, alert_kind, severity, observed, threshold, rationale, created_at
     FROM governance_alerts
     WHERE (?1 IS NULL OR strategy = ?1)
       AND (?2 IS NULL OR alert_kind = ?2)
       AND (?3 IS NULL OR severity = ?3)
       AND created_at >= ?4 AND created_at <= ?5
       AND (?6 IS NULL OR created_at < ?6 OR (created_at = ?6 AND id < ?7))
     ORDER BY created_at DESC, id DESC
     LIMIT ?8";

/// Durable alert storage on the shared governance database
#[derive(Clone)]
pub struct SqliteAlertBackend {
    pool: SqlitePool,
}

impl SqliteAlertBackend {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AlertBackend for SqliteAlertBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    async fn persist(
        &self,
        alerts: &[GovernanceAlert],
        detections: &[DetectionRecord],
    ) -> Result<Vec<i64>> {
        let mut tx = self.pool.begin().await?;
        let mut ids = Vec::with_capacity(alerts.len());

        for alert in alerts {
            let (id,): (i64,) = sqlx::query_as(
                "INSERT INTO governance_alerts
                 (strategy, alert_kind, severity, observed, threshold, rationale, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)
                 RETURNING id",
            )
            .bind(&alert.strategy)
            .bind(alert.kind.as_str())
            .bind(alert.severity.as_str())
            .bind(alert.observed)
            .bind(alert.threshold)
            .bind(&alert.rationale)
            .bind(to_millis(alert.created_at))
            .fetch_one(&mut *tx)
            .await?;
            ids.push(id);
        }

        for detection in detections {
            sqlx::query(
                "INSERT INTO governance_detections
                 (strategy, alert_kind, severity, persisted, detected_at)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&detection.strategy)
            .bind(detection.kind.as_str())
            .bind(detection.severity.as_str())
            .bind(detection.persisted)
            .bind(to_millis(detection.detected_at))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(ids)
    }

    async fn latest_for(&self, strategy: &str, kind: AlertKind) -> Result<Option<DateTime<Utc>>> {
        let latest: Option<i64> = sqlx::query_scalar(
            "SELECT MAX(created_at) FROM governance_alerts WHERE strategy = ? AND alert_kind = ?",
        )
        .bind(strategy)
        .bind(kind.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(latest.map(from_millis))
    }

    async fn query(&self, query: &KeysetQuery) -> Result<Vec<GovernanceAlert>> {
        let sql = match query.order {
            SortOrder::Asc => ASC_QUERY,
            SortOrder::Desc => DESC_QUERY,
        };

        let records: Vec<AlertRecord> = sqlx::query_as(sql)
            .bind(query.strategy.as_deref())
            .bind(query.kind.map(|k| k.as_str()))
            .bind(query.severity.map(|s| s.as_str()))
            .bind(query.since_ms)
            .bind(query.until_ms)
            .bind(query.after.map(|(ts, _)| ts))
            .bind(query.after.map(|(_, id)| id))
            .bind(query.limit as i64)
            .fetch_all(&self.pool)
            .await?;

        records.into_iter().map(GovernanceAlert::try_from).collect()
    }

    async fn persisted_counts(
        &self,
        since_ms: i64,
        until_ms: i64,
    ) -> Result<Vec<(AlertKind, Severity, u64)>> {
        let rows: Vec<(String, String, i64)> = sqlx::query_as(
            "SELECT alert_kind, severity, COUNT(*)
             FROM governance_alerts
             WHERE created_at >= ? AND created_at <= ?
             GROUP BY alert_kind, severity",
        )
        .bind(since_ms)
        .bind(until_ms)
        .fetch_all(&self.pool)
        .await?;

        let mut counts = Vec::with_capacity(rows.len());
        for (kind, severity, n) in rows {
            match (AlertKind::parse(&kind), Severity::parse(&severity)) {
                (Some(kind), Some(severity)) => counts.push((kind, severity, n.max(0) as u64)),
                _ => tracing::warn!("Skipping unknown alert bucket {}/{}", kind, severity),
            }
        }

        Ok(counts)
    }

    async fn detection_counts(&self, since_ms: i64, until_ms: i64) -> Result<(u64, u64)> {
        let (detected, suppressed): (i64, Option<i64>) = sqlx::query_as(
            "SELECT COUNT(*), SUM(CASE WHEN persisted = 0 THEN 1 ELSE 0 END)
             FROM governance_detections
             WHERE detected_at >= ? AND detected_at <= ?",
        )
        .bind(since_ms)
        .bind(until_ms)
        .fetch_one(&self.pool)
        .await?;

        Ok((detected.max(0) as u64, suppressed.unwrap_or(0).max(0) as u64))
    }

    async fn purge_before(&self, cutoff_ms: i64) -> Result<AlertPurgeCounts> {
        let mut tx = self.pool.begin().await?;
        let alerts = sqlx::query("DELETE FROM governance_alerts WHERE created_at < ?")
            .bind(cutoff_ms)
            .execute(&mut *tx)
            .await?;
        let detections = sqlx::query("DELETE FROM governance_detections WHERE detected_at < ?")
            .bind(cutoff_ms)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(AlertPurgeCounts {
            alerts: alerts.rows_affected(),
            detections: detections.rows_affected(),
        })
    }
}
