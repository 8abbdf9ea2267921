use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    TrendBreakout,
    VolatilitySurge,
    AnomalyCluster,
    StabilityPlateau,
    ReversalRisk,
}

impl AlertKind {
    pub const ALL: [AlertKind; 5] = [
        AlertKind::TrendBreakout,
        AlertKind::VolatilitySurge,
        AlertKind::AnomalyCluster,
        AlertKind::StabilityPlateau,
        AlertKind::ReversalRisk,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::TrendBreakout => "trend_breakout",
            AlertKind::VolatilitySurge => "volatility_surge",
            AlertKind::AnomalyCluster => "anomaly_cluster",
            AlertKind::StabilityPlateau => "stability_plateau",
            AlertKind::ReversalRisk => "reversal_risk",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == value)
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 3] = [Severity::Info, Severity::Warning, Severity::Critical];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == value)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A detected (and possibly persisted) governance alert
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GovernanceAlert {
    /// Row id once persisted
    pub id: Option<i64>,
    pub strategy: String,
    pub kind: AlertKind,
    pub severity: Severity,
    pub observed: f64,
    pub threshold: f64,
    pub rationale: String,
    pub created_at: DateTime<Utc>,
}

/// One raw detection, logged whether or not it was persisted
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DetectionRecord {
    pub strategy: String,
    pub kind: AlertKind,
    pub severity: Severity,
    pub persisted: bool,
    pub detected_at: DateTime<Utc>,
}

impl DetectionRecord {
    pub fn from_alert(alert: &GovernanceAlert, persisted: bool) -> Self {
        Self {
            strategy: alert.strategy.clone(),
            kind: alert.kind,
            severity: alert.severity,
            persisted,
            detected_at: alert.created_at,
        }
    }
}
