use std::collections::VecDeque;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use governance_core::time::to_millis;
use serde::{Deserialize, Serialize};
use weight_snapshots::BackendKind;

use crate::model::{AlertKind, DetectionRecord, GovernanceAlert, Severity};
use crate::query::SortOrder;

/// Alerts kept by the in-memory backend before the oldest are dropped
pub const MEMORY_ALERT_CAPACITY: usize = 500;

/// Detection log entries kept by the in-memory backend
pub const MEMORY_DETECTION_CAPACITY: usize = 5000;

/// Rows removed by one retention pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertPurgeCounts {
    pub alerts: u64,
    pub detections: u64,
}

/// Resolved keyset query handed to a backend
#[derive(Debug, Clone, PartialEq)]
pub struct KeysetQuery {
    pub strategy: Option<String>,
    pub kind: Option<AlertKind>,
    pub severity: Option<Severity>,
    /// Inclusive bounds on `created_at`, epoch ms
    pub since_ms: i64,
    pub until_ms: i64,
    /// Position (created_at ms, id) of the last row already served
    pub after: Option<(i64, i64)>,
    pub order: SortOrder,
    pub limit: usize,
}

/// Storage seam for persisted alerts and the detection log
#[async_trait]
pub trait AlertBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Persist `alerts` and log `detections` atomically; returns the new alert ids.
    async fn persist(&self, alerts: &[GovernanceAlert], detections: &[DetectionRecord])
        -> Result<Vec<i64>>;

    /// Creation time of the newest persisted alert for (strategy, kind)
    async fn latest_for(&self, strategy: &str, kind: AlertKind) -> Result<Option<DateTime<Utc>>>;

    async fn query(&self, query: &KeysetQuery) -> Result<Vec<GovernanceAlert>>;

    /// Persisted alert counts per (kind, severity) inside [since, until]
    async fn persisted_counts(
        &self,
        since_ms: i64,
        until_ms: i64,
    ) -> Result<Vec<(AlertKind, Severity, u64)>>;

    /// (detections, suppressed detections) inside [since, until]
    async fn detection_counts(&self, since_ms: i64, until_ms: i64) -> Result<(u64, u64)>;

    /// Atomically drop alerts and detections strictly older than `cutoff_ms`.
    async fn purge_before(&self, cutoff_ms: i64) -> Result<AlertPurgeCounts>;
}

#[derive(Default)]
struct AlertLog {
    alerts: VecDeque<GovernanceAlert>,
    detections: VecDeque<DetectionRecord>,
    next_id: i64,
}

/// In-process fallback; alerts are kept in insertion (id) order and both
/// logs are bounded rings that drop their oldest entries first.
pub struct MemoryAlertBackend {
    alert_capacity: usize,
    detection_capacity: usize,
    log: Mutex<AlertLog>,
}

impl Default for MemoryAlertBackend {
    fn default() -> Self {
        Self::with_capacity(MEMORY_ALERT_CAPACITY, MEMORY_DETECTION_CAPACITY)
    }
}

impl MemoryAlertBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(alert_capacity: usize, detection_capacity: usize) -> Self {
        Self {
            alert_capacity: alert_capacity.max(1),
            detection_capacity: detection_capacity.max(1),
            log: Mutex::new(AlertLog::default()),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, AlertLog>> {
        self.log.lock().map_err(|_| anyhow!("alert log mutex poisoned"))
    }
}

fn key(alert: &GovernanceAlert) -> (i64, i64) {
    (to_millis(alert.created_at), alert.id.unwrap_or_default())
}

#[async_trait]
impl AlertBackend for MemoryAlertBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    async fn persist(
        &self,
        alerts: &[GovernanceAlert],
        detections: &[DetectionRecord],
    ) -> Result<Vec<i64>> {
        let mut log = self.lock()?;
        let mut ids = Vec::with_capacity(alerts.len());

        for alert in alerts {
            log.next_id += 1;
            let id = log.next_id;
            log.alerts.push_back(GovernanceAlert {
                id: Some(id),
                ..alert.clone()
            });
            ids.push(id);
        }
        log.detections.extend(detections.iter().cloned());

        while log.alerts.len() > self.alert_capacity {
            log.alerts.pop_front();
        }
        while log.detections.len() > self.detection_capacity {
            log.detections.pop_front();
        }

        Ok(ids)
    }

    async fn latest_for(&self, strategy: &str, kind: AlertKind) -> Result<Option<DateTime<Utc>>> {
        let log = self.lock()?;
        Ok(log
            .alerts
            .iter()
            .filter(|a| a.strategy == strategy && a.kind == kind)
            .map(|a| a.created_at)
            .max())
    }

    async fn query(&self, query: &KeysetQuery) -> Result<Vec<GovernanceAlert>> {
        let log = self.lock()?;

        let mut matched: Vec<&GovernanceAlert> = log
            .alerts
            .iter()
            .filter(|a| query.strategy.as_deref().map_or(true, |s| a.strategy == s))
            .filter(|a| query.kind.map_or(true, |k| a.kind == k))
            .filter(|a| query.severity.map_or(true, |s| a.severity == s))
            .filter(|a| {
                let ts = to_millis(a.created_at);
                ts >= query.since_ms && ts <= query.until_ms
            })
            .filter(|a| match (query.after, query.order) {
                (None, _) => true,
                (Some(after), SortOrder::Asc) => key(a) > after,
                (Some(after), SortOrder::Desc) => key(a) < after,
            })
            .collect();

        matched.sort_by_key(|a| key(a));
        if query.order == SortOrder::Desc {
            matched.reverse();
        }

        Ok(matched.into_iter().take(query.limit).cloned().collect())
    }

    async fn persisted_counts(
        &self,
        since_ms: i64,
        until_ms: i64,
    ) -> Result<Vec<(AlertKind, Severity, u64)>> {
        let log = self.lock()?;
        let mut counts: std::collections::BTreeMap<(AlertKind, Severity), u64> =
            std::collections::BTreeMap::new();

        for alert in &log.alerts {
            let ts = to_millis(alert.created_at);
            if ts >= since_ms && ts <= until_ms {
                *counts.entry((alert.kind, alert.severity)).or_insert(0) += 1;
            }
        }

        Ok(counts.into_iter().map(|((k, s), n)| (k, s, n)).collect())
    }

    async fn detection_counts(&self, since_ms: i64, until_ms: i64) -> Result<(u64, u64)> {
        let log = self.lock()?;
        let mut detected = 0;
        let mut suppressed = 0;

        for detection in &log.detections {
            let ts = to_millis(detection.detected_at);
            if ts >= since_ms && ts <= until_ms {
                detected += 1;
                if !detection.persisted {
                    suppressed += 1;
                }
            }
        }

        Ok((detected, suppressed))
    }

    async fn purge_before(&self, cutoff_ms: i64) -> Result<AlertPurgeCounts> {
        let mut log = self.lock()?;
        let alerts_before = log.alerts.len();
        let detections_before = log.detections.len();

        log.alerts.retain(|a| to_millis(a.created_at) >= cutoff_ms);
        log.detections.retain(|d| to_millis(d.detected_at) >= cutoff_ms);

        Ok(AlertPurgeCounts {
            alerts: (alerts_before - log.alerts.len()) as u64,
            detections: (detections_before - log.detections.len()) as u64,
        })
    }
}
