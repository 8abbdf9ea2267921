//! Governance alert engine
//!
//! Calibrates thresholds, evaluates the alert rules for every strategy and,
//! on the persisting path, writes alerts subject to a per-(strategy, kind)
//! cooldown. Every raw detection is logged so analytics can report how much
//! the cooldown suppressed.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use governance_core::time::{from_millis, now_millis, to_millis};
use governance_core::{GovernanceDb, GovernanceError};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use trend_analysis::{
    AdaptiveThresholds, CalibrationParams, ThresholdCalibrator, TrendAnalyzer, TrendMetrics,
    TrendParams,
};
use weight_snapshots::{BackendKind, SnapshotStore};

use crate::backend::{AlertBackend, KeysetQuery, MemoryAlertBackend};
use crate::model::{DetectionRecord, GovernanceAlert};
use crate::query::{
    AlertAnalytics, AlertCursor, AlertFilter, AlertPage, SortOrder, TimeRange, MAX_ALERT_PAGE,
};
use crate::rules::evaluate_rules;
use crate::sqlite::SqliteAlertBackend;

/// Default re-persistence cooldown (30 minutes)
pub const DEFAULT_COOLDOWN_MS: i64 = 30 * 60 * 1000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GovernanceParams {
    pub trend: TrendParams,
    pub calibration: CalibrationParams,
    /// Restrict evaluation to one strategy
    pub strategy: Option<String>,
    pub cooldown_ms: i64,
}

impl Default for GovernanceParams {
    fn default() -> Self {
        Self {
            trend: TrendParams::default(),
            calibration: CalibrationParams::default(),
            strategy: None,
            cooldown_ms: DEFAULT_COOLDOWN_MS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernanceEvaluation {
    pub thresholds: AdaptiveThresholds,
    pub trends: Vec<TrendMetrics>,
    pub alerts: Vec<GovernanceAlert>,
    pub evaluated_at: DateTime<Utc>,
}

/// Split of detected alerts into written and cooldown-suppressed
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistOutcome {
    pub persisted: Vec<GovernanceAlert>,
    pub suppressed: Vec<GovernanceAlert>,
}

/// Outcome of one alert retention pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertPurgeResult {
    pub alerts: u64,
    pub detections: u64,
    pub cutoff: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedEvaluation {
    pub evaluation: GovernanceEvaluation,
    pub persisted: Vec<GovernanceAlert>,
    pub suppressed: Vec<GovernanceAlert>,
}

pub struct GovernanceAlertEngine {
    backend: Arc<dyn AlertBackend>,
    analyzer: TrendAnalyzer,
    calibrator: ThresholdCalibrator,
    /// Serializes cooldown check-and-insert
    write_lock: Mutex<()>,
}

impl GovernanceAlertEngine {
    pub fn new(backend: Arc<dyn AlertBackend>, store: Arc<SnapshotStore>) -> Self {
        Self {
            backend,
            analyzer: TrendAnalyzer::new(Arc::clone(&store)),
            calibrator: ThresholdCalibrator::new(store),
            write_lock: Mutex::new(()),
        }
    }

    pub fn in_memory(store: Arc<SnapshotStore>) -> Self {
        Self::new(Arc::new(MemoryAlertBackend::new()), store)
    }

    pub fn sqlite(db: &GovernanceDb, store: Arc<SnapshotStore>) -> Self {
        Self::new(Arc::new(SqliteAlertBackend::new(db.pool().clone())), store)
    }

    /// Durable alert log on `db` when present, memory otherwise.
    pub fn open(db: Option<&GovernanceDb>, store: Arc<SnapshotStore>) -> Self {
        match db {
            Some(db) => Self::sqlite(db, store),
            None => Self::in_memory(store),
        }
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// Detection only; nothing is written.
    pub async fn evaluate_governance(&self, params: &GovernanceParams) -> Result<GovernanceEvaluation> {
        let strategy = params.strategy.as_deref();

        let thresholds = self
            .calibrator
            .compute_adaptive_thresholds(&params.calibration, &params.trend, strategy)
            .await?;
        let report = self.analyzer.compute_trends(&params.trend, strategy).await?;

        // ms precision so both backends order identically
        let now = from_millis(now_millis());
        let alerts: Vec<GovernanceAlert> = report
            .strategies
            .iter()
            .flat_map(|m| evaluate_rules(m, &thresholds, params.trend.recent_anomaly_window, now))
            .collect();

        tracing::debug!(
            "Governance evaluation: {} alerts across {} strategies",
            alerts.len(),
            report.strategies.len()
        );

        Ok(GovernanceEvaluation {
            thresholds,
            trends: report.strategies,
            alerts,
            evaluated_at: now,
        })
    }

    /// Detect, then persist alerts outside their (strategy, kind) cooldown.
    pub async fn evaluate_governance_with_persistence(
        &self,
        params: &GovernanceParams,
    ) -> Result<PersistedEvaluation> {
        let evaluation = self.evaluate_governance(params).await?;
        let outcome = self.record_alerts(&evaluation.alerts, params.cooldown_ms).await?;

        Ok(PersistedEvaluation {
            evaluation,
            persisted: outcome.persisted,
            suppressed: outcome.suppressed,
        })
    }

    /// Persist `alerts` unless an alert with the same (strategy, kind) was
    /// persisted less than `cooldown_ms` earlier. Severity is not part of the
    /// dedup key, so an escalation inside the cooldown is suppressed too.
    pub async fn record_alerts(
        &self,
        alerts: &[GovernanceAlert],
        cooldown_ms: i64,
    ) -> Result<PersistOutcome> {
        if cooldown_ms < 0 {
            return Err(GovernanceError::InvalidConfig(format!(
                "cooldown must not be negative, got {}ms",
                cooldown_ms
            ))
            .into());
        }

        let _guard = self.write_lock.lock().await;

        let mut to_persist: Vec<GovernanceAlert> = Vec::new();
        let mut suppressed = Vec::new();
        let mut detections = Vec::with_capacity(alerts.len());

        for alert in alerts {
            let last = match to_persist
                .iter()
                .rev()
                .find(|a| a.strategy == alert.strategy && a.kind == alert.kind)
            {
                Some(pending) => Some(pending.created_at),
                None => self.backend.latest_for(&alert.strategy, alert.kind).await?,
            };

            let cooling = last.is_some_and(|t| to_millis(alert.created_at) - to_millis(t) < cooldown_ms);
            detections.push(DetectionRecord::from_alert(alert, !cooling));

            if cooling {
                tracing::debug!(
                    "Suppressed {} {} for {} inside cooldown",
                    alert.severity,
                    alert.kind,
                    alert.strategy
                );
                suppressed.push(alert.clone());
            } else {
                to_persist.push(alert.clone());
            }
        }

        let ids = self.backend.persist(&to_persist, &detections).await?;
        for (alert, id) in to_persist.iter_mut().zip(ids) {
            alert.id = Some(id);
            tracing::info!(
                "Governance alert {} [{}] for {}: {}",
                alert.kind,
                alert.severity,
                alert.strategy,
                alert.rationale
            );
        }

        Ok(PersistOutcome {
            persisted: to_persist,
            suppressed,
        })
    }

    /// Drop alerts and detections older than `older_than_days`. The cutoff
    /// never moves inside `cooldown_ms`, so the newest alert each dedup
    /// check needs is kept.
    pub async fn purge_older_than(
        &self,
        older_than_days: u32,
        cooldown_ms: i64,
    ) -> Result<AlertPurgeResult> {
        if cooldown_ms < 0 {
            return Err(GovernanceError::InvalidConfig(format!(
                "cooldown must not be negative, got {}ms",
                cooldown_ms
            ))
            .into());
        }

        let retention_ms = i64::from(older_than_days) * 86_400_000;
        let cutoff_ms = now_millis() - retention_ms.max(cooldown_ms);

        let _guard = self.write_lock.lock().await;
        let removed = self.backend.purge_before(cutoff_ms).await?;
        let cutoff = from_millis(cutoff_ms);

        if removed.alerts > 0 || removed.detections > 0 {
            tracing::info!(
                "Purged {} governance alerts and {} detections older than {}",
                removed.alerts,
                removed.detections,
                cutoff.to_rfc3339()
            );
        }

        Ok(AlertPurgeResult {
            alerts: removed.alerts,
            detections: removed.detections,
            cutoff,
        })
    }

    /// One page of persisted alerts in (created_at, id) order.
    pub async fn list(
        &self,
        filter: &AlertFilter,
        cursor: Option<&str>,
        limit: usize,
        order: SortOrder,
    ) -> Result<AlertPage> {
        if limit == 0 || limit > MAX_ALERT_PAGE {
            return Err(GovernanceError::InvalidRange(format!(
                "alert limit must be within 1..={}, got {}",
                MAX_ALERT_PAGE, limit
            ))
            .into());
        }

        let after = cursor.map(AlertCursor::decode).transpose()?;
        let range = TimeRange::resolve(filter.since, filter.until, Utc::now())?;

        let query = KeysetQuery {
            strategy: filter.strategy.clone(),
            kind: filter.kind,
            severity: filter.severity,
            since_ms: to_millis(range.since),
            until_ms: to_millis(range.until),
            after: after.map(|c| (c.created_at_ms, c.id)),
            order,
            limit: limit + 1,
        };

        let mut alerts = self.backend.query(&query).await?;
        let has_more = alerts.len() > limit;
        alerts.truncate(limit);

        let next_cursor = if has_more {
            alerts
                .last()
                .and_then(AlertCursor::for_alert)
                .map(|c| c.encode())
        } else {
            None
        };

        Ok(AlertPage {
            alerts,
            next_cursor,
            range,
            order,
        })
    }

    /// Severity and kind counts plus dedup effectiveness over a trailing window.
    pub async fn analytics(&self, window_ms: i64) -> Result<AlertAnalytics> {
        let range = TimeRange::trailing(window_ms, Utc::now())?;
        let since_ms = to_millis(range.since);
        let until_ms = to_millis(range.until);

        let counts = self.backend.persisted_counts(since_ms, until_ms).await?;
        let (detections, suppressed) = self.backend.detection_counts(since_ms, until_ms).await?;

        let mut analytics = AlertAnalytics {
            range,
            total_persisted: 0,
            by_severity: Default::default(),
            by_kind: Default::default(),
            detections,
            suppressed,
            dedup_ratio: if detections == 0 {
                0.0
            } else {
                suppressed as f64 / detections as f64
            },
        };

        for (kind, severity, n) in counts {
            analytics.total_persisted += n;
            *analytics.by_severity.entry(severity).or_insert(0) += n;
            *analytics.by_kind.entry(kind).or_insert(0) += n;
        }

        Ok(analytics)
    }
}
