//! Explicit wiring of every governance component behind one handle.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use governance_alerts::{
    AlertAnalytics, AlertFilter, AlertPage, AlertPurgeResult, GovernanceAlertEngine,
    GovernanceEvaluation, PersistedEvaluation, SortOrder,
};
use governance_core::GovernanceDb;
use serde::{Deserialize, Serialize};
use strategy_weights::{
    PerformanceRecordDb, StrategyPerformanceRecord, StrategySelection, StrategyTracker,
    WeightArtifact,
};
use trend_analysis::{AdaptiveThresholds, ThresholdCalibrator, TrendAnalyzer, TrendReport};
use weight_snapshots::{
    AutoSnapshotOutcome, AutoSnapshotScheduler, BackendKind, PurgeResult, SnapshotBatch,
    SnapshotStore, WeightSnapshotRow,
};

use crate::config::GovernanceConfig;

/// One decision result reported by a caller
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DecisionOutcome {
    pub strategy: String,
    /// 0–10; absent means the decision carried no effectiveness signal
    #[serde(default)]
    pub effectiveness: Option<f64>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionReceipt {
    /// False when the strategy id is unknown
    pub accepted: bool,
    pub auto_snapshot: Option<AutoSnapshotOutcome>,
}

/// Rows removed by one retention pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionOutcome {
    pub snapshots: PurgeResult,
    pub alerts: AlertPurgeResult,
}

pub struct GovernancePipeline {
    config: GovernanceConfig,
    tracker: Arc<StrategyTracker>,
    store: Arc<SnapshotStore>,
    scheduler: AutoSnapshotScheduler,
    analyzer: TrendAnalyzer,
    calibrator: ThresholdCalibrator,
    alerts: GovernanceAlertEngine,
    records: Option<PerformanceRecordDb>,
}

impl GovernancePipeline {
    /// Build every component. An absent or unreachable database falls back to
    /// in-memory storage for snapshots and alerts.
    pub async fn connect(config: GovernanceConfig) -> Result<Self> {
        config.validate()?;
        let tracker = Arc::new(StrategyTracker::new(
            config.strategies.iter().cloned(),
            config.tracker_params(),
        )?);

        let db = GovernanceDb::connect_optional(config.database_url.as_deref()).await;
        let store = Arc::new(SnapshotStore::open(db.as_ref(), Arc::clone(&tracker)));
        let alerts = GovernanceAlertEngine::open(db.as_ref(), Arc::clone(&store));
        let records = db.map(|db| PerformanceRecordDb::new(db.pool().clone()));

        tracing::info!(
            "Governance pipeline ready: {} strategies, {} storage",
            tracker.strategies().len(),
            store.backend_kind().as_str()
        );

        Ok(Self {
            scheduler: AutoSnapshotScheduler::new(config.scheduler_config(), Arc::clone(&store)),
            analyzer: TrendAnalyzer::new(Arc::clone(&store)),
            calibrator: ThresholdCalibrator::new(Arc::clone(&store)),
            config,
            tracker,
            store,
            alerts,
            records,
        })
    }

    pub fn config(&self) -> &GovernanceConfig {
        &self.config
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.store.backend_kind()
    }

    pub fn tracker(&self) -> &Arc<StrategyTracker> {
        &self.tracker
    }

    pub fn scheduler(&self) -> &AutoSnapshotScheduler {
        &self.scheduler
    }

    /// Feed one outcome through the tracker, then give the scheduler a chance
    /// to snapshot. Snapshot and record persistence failures are logged, not
    /// returned.
    pub async fn record_decision(&self, outcome: &DecisionOutcome) -> DecisionReceipt {
        let accepted =
            self.tracker
                .update_on_decision(&outcome.strategy, outcome.effectiveness, outcome.timestamp);
        if !accepted {
            return DecisionReceipt {
                accepted,
                auto_snapshot: None,
            };
        }

        self.scheduler.note_decision();
        let auto_snapshot = match self.scheduler.maybe_auto_snapshot(None).await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                tracing::warn!("Auto-snapshot failed: {}", e);
                None
            }
        };

        if let Some(record) = self.tracker.record(&outcome.strategy) {
            self.persist_records(&[record]).await;
        }

        DecisionReceipt {
            accepted,
            auto_snapshot,
        }
    }

    pub fn get_weights(&self) -> Result<BTreeMap<String, f64>> {
        Ok(self.tracker.get_weights()?)
    }

    pub fn get_weight_details(&self) -> Result<WeightArtifact> {
        Ok(self.tracker.get_weight_details()?)
    }

    pub async fn select_strategy(&self, seed: Option<u64>) -> Result<StrategySelection> {
        let selection = self.tracker.select_strategy(seed)?;
        self.persist_records(&self.tracker.records()).await;
        Ok(selection)
    }

    /// Persisted records when durable, the tracker's live view otherwise
    pub async fn performance_records(&self) -> Result<Vec<StrategyPerformanceRecord>> {
        match &self.records {
            Some(db) => db.load_records().await,
            None => Ok(self.tracker.records()),
        }
    }

    pub async fn snapshot_now(&self, reason: &str) -> Result<SnapshotBatch> {
        self.store.snapshot_current(None, reason).await
    }

    pub async fn list_snapshots(
        &self,
        strategy: Option<&str>,
        limit: usize,
    ) -> Result<Vec<WeightSnapshotRow>> {
        self.store.list_snapshots(strategy, limit).await
    }

    pub async fn compute_trends(&self, strategy: Option<&str>) -> Result<TrendReport> {
        self.analyzer
            .compute_trends(&self.config.trend_params(), strategy)
            .await
    }

    pub async fn compute_adaptive_thresholds(&self, strategy: Option<&str>) -> Result<AdaptiveThresholds> {
        self.calibrator
            .compute_adaptive_thresholds(
                &self.config.calibration_params(),
                &self.config.trend_params(),
                strategy,
            )
            .await
    }

    pub async fn evaluate_governance(&self) -> Result<GovernanceEvaluation> {
        self.alerts
            .evaluate_governance(&self.config.governance_params())
            .await
    }

    /// Evaluate with persistence and log the outcome.
    pub async fn run_governance_cycle(&self) -> Result<PersistedEvaluation> {
        let result = self
            .alerts
            .evaluate_governance_with_persistence(&self.config.governance_params())
            .await?;

        tracing::info!(
            "Governance cycle: {} detected, {} persisted, {} suppressed (fallback thresholds: {})",
            result.evaluation.alerts.len(),
            result.persisted.len(),
            result.suppressed.len(),
            result.evaluation.thresholds.fallback
        );

        Ok(result)
    }

    pub async fn list_alerts(
        &self,
        filter: &AlertFilter,
        cursor: Option<&str>,
        limit: usize,
        order: SortOrder,
    ) -> Result<AlertPage> {
        self.alerts.list(filter, cursor, limit, order).await
    }

    pub async fn alert_analytics(&self, window_ms: i64) -> Result<AlertAnalytics> {
        self.alerts.analytics(window_ms).await
    }

    /// Apply the configured retention to snapshots and the alert log;
    /// `None` when purging is disabled.
    pub async fn purge(&self) -> Result<Option<RetentionOutcome>> {
        let Some(days) = self.config.purge_days else {
            return Ok(None);
        };

        let snapshots = self.store.purge_old_snapshots(days).await?;
        let alerts = self
            .alerts
            .purge_older_than(days, self.config.cooldown_ms)
            .await?;

        Ok(Some(RetentionOutcome { snapshots, alerts }))
    }

    async fn persist_records(&self, records: &[StrategyPerformanceRecord]) {
        let Some(db) = &self.records else {
            return;
        };
        if let Err(e) = db.upsert_records(records).await {
            tracing::warn!("Failed to persist performance records: {}", e);
        }
    }
}
