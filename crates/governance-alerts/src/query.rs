//! Alert query surface: filters, opaque cursors, time-range resolution and
//! analytics result types.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use governance_core::time::{from_millis, to_millis};
use governance_core::GovernanceError;
use serde::{Deserialize, Serialize};

use crate::model::{AlertKind, GovernanceAlert, Severity};

/// Largest page `list` will serve
pub const MAX_ALERT_PAGE: usize = 500;

/// Longest time span a query or analytics window may cover (14 days)
pub const MAX_QUERY_SPAN_MS: i64 = 14 * 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertFilter {
    pub strategy: Option<String>,
    pub kind: Option<AlertKind>,
    pub severity: Option<Severity>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

/// Keyset position after the last served alert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertCursor {
    pub created_at_ms: i64,
    pub id: i64,
}

impl AlertCursor {
    pub fn for_alert(alert: &GovernanceAlert) -> Option<Self> {
        alert.id.map(|id| Self {
            created_at_ms: to_millis(alert.created_at),
            id,
        })
    }

    pub fn encode(&self) -> String {
        hex::encode(format!("{}_{}", self.created_at_ms, self.id))
    }

    pub fn decode(token: &str) -> Result<Self, GovernanceError> {
        let invalid = || GovernanceError::InvalidCursor(token.to_string());

        let bytes = hex::decode(token).map_err(|_| invalid())?;
        let text = String::from_utf8(bytes).map_err(|_| invalid())?;
        let (ts, id) = text.split_once('_').ok_or_else(invalid)?;

        let created_at_ms = ts.parse::<i64>().map_err(|_| invalid())?;
        let id = id.parse::<i64>().map_err(|_| invalid())?;
        if id <= 0 {
            return Err(invalid());
        }

        Ok(Self { created_at_ms, id })
    }
}

/// Effective inclusive time range after defaults and clamping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
    /// The requested span exceeded the maximum and was shortened
    pub clamped: bool,
}

impl TimeRange {
    /// Resolve a filter's bounds. Missing `until` means now; missing `since`
    /// means the maximum span before `until`.
    pub fn resolve(
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Self, GovernanceError> {
        let until = until.unwrap_or(now);
        let max_span = Duration::milliseconds(MAX_QUERY_SPAN_MS);
        let earliest = || {
            until.checked_sub_signed(max_span).ok_or_else(|| {
                GovernanceError::InvalidRange(format!(
                    "until {} leaves no room for the default span",
                    until.to_rfc3339()
                ))
            })
        };
        let since = match since {
            Some(since) => since,
            None => earliest()?,
        };

        if until < since {
            return Err(GovernanceError::InvalidRange(format!(
                "until {} precedes since {}",
                until.to_rfc3339(),
                since.to_rfc3339()
            )));
        }

        if until - since > max_span {
            Ok(Self {
                since: earliest()?,
                until,
                clamped: true,
            })
        } else {
            Ok(Self {
                since,
                until,
                clamped: false,
            })
        }
    }

    /// Trailing window of `window_ms` ending at `now`
    pub fn trailing(window_ms: i64, now: DateTime<Utc>) -> Result<Self, GovernanceError> {
        if window_ms <= 0 {
            return Err(GovernanceError::InvalidRange(format!(
                "analytics window must be positive, got {}ms",
                window_ms
            )));
        }
        let clamped = window_ms > MAX_QUERY_SPAN_MS;
        let span = window_ms.min(MAX_QUERY_SPAN_MS);
        Ok(Self {
            since: from_millis(to_millis(now) - span),
            until: now,
            clamped,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertPage {
    pub alerts: Vec<GovernanceAlert>,
    /// Present when more rows follow in the requested order
    pub next_cursor: Option<String>,
    pub range: TimeRange,
    pub order: SortOrder,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertAnalytics {
    pub range: TimeRange,
    pub total_persisted: u64,
    pub by_severity: BTreeMap<Severity, u64>,
    pub by_kind: BTreeMap<AlertKind, u64>,
    pub detections: u64,
    pub suppressed: u64,
    /// suppressed / detections (0 when nothing was detected)
    pub dedup_ratio: f64,
}
