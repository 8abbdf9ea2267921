use std::env;
use std::str::FromStr;

use anyhow::{Context, Result};
use governance_alerts::GovernanceParams;
use governance_core::GovernanceError;
use serde::{Deserialize, Serialize};
use strategy_weights::TrackerParams;
use trend_analysis::{CalibrationParams, TrendParams};
use weight_snapshots::SchedulerConfig;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GovernanceConfig {
    // Storage (unset → in-memory)
    pub database_url: Option<String>,
    pub strategies: Vec<String>,

    // Auto-snapshot
    pub auto_snapshot_enabled: bool,
    pub decision_interval: u64,               // 25 decisions
    pub min_seconds_between_snapshots: u64,   // 60s
    pub purge_days: Option<u32>,              // 30, 0 disables

    // Alerting
    pub cooldown_ms: i64,                     // 30 minutes

    // Calibration
    pub calibration_window: usize,            // 50 snapshots
    pub trim_pct: f64,                        // 0.10
    pub min_samples: usize,                   // 10 snapshots

    // Trends
    pub trend_window: usize,                  // 30 snapshots
    pub ma_window: usize,                     // 3
    pub anomaly_threshold: f64,               // |z| > 2.0
    pub anomaly_baseline_window: usize,       // 8

    // Background jobs
    pub purge_interval_secs: u64,             // 3600
    pub evaluation_interval_secs: u64,        // 300
    pub job_jitter_pct: f64,                  // 0.10
}

impl GovernanceConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; missing keys take their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let purge_days: u32 = parse(&lookup, "PURGE_DAYS", "30")?;

        let config = Self {
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            strategies: get("STRATEGIES", "STEADY,EXPEDITE,BALANCED")
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),

            auto_snapshot_enabled: parse(&lookup, "AUTO_SNAPSHOT_ENABLED", "true")?,
            decision_interval: parse(&lookup, "DECISION_INTERVAL", "25")?,
            min_seconds_between_snapshots: parse(&lookup, "MIN_SECONDS_BETWEEN_SNAPSHOTS", "60")?,
            purge_days: (purge_days > 0).then_some(purge_days),

            cooldown_ms: parse(&lookup, "COOLDOWN_MS", "1800000")?,

            calibration_window: parse(&lookup, "CALIBRATION_WINDOW", "50")?,
            trim_pct: parse(&lookup, "TRIM_PCT", "0.1")?,
            min_samples: parse(&lookup, "MIN_SAMPLES", "10")?,

            trend_window: parse(&lookup, "TREND_WINDOW", "30")?,
            ma_window: parse(&lookup, "MA_WINDOW", "3")?,
            anomaly_threshold: parse(&lookup, "ANOMALY_THRESHOLD", "2.0")?,
            anomaly_baseline_window: parse(&lookup, "ANOMALY_BASELINE_WINDOW", "8")?,

            purge_interval_secs: parse(&lookup, "PURGE_INTERVAL_SECS", "3600")?,
            evaluation_interval_secs: parse(&lookup, "EVALUATION_INTERVAL_SECS", "300")?,
            job_jitter_pct: parse(&lookup, "JOB_JITTER_PCT", "0.1")?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), GovernanceError> {
        let invalid = |msg: String| Err(GovernanceError::InvalidConfig(msg));

        if self.strategies.is_empty() {
            return invalid("STRATEGIES must name at least one strategy".to_string());
        }
        if self.decision_interval == 0 {
            return invalid("DECISION_INTERVAL must be positive".to_string());
        }
        if self.cooldown_ms < 0 {
            return invalid(format!("COOLDOWN_MS must not be negative, got {}", self.cooldown_ms));
        }
        if !(0.0..0.5).contains(&self.trim_pct) {
            return invalid(format!("TRIM_PCT must be within [0, 0.5), got {}", self.trim_pct));
        }
        if self.calibration_window == 0 || self.trend_window == 0 || self.ma_window == 0 {
            return invalid("CALIBRATION_WINDOW, TREND_WINDOW and MA_WINDOW must be positive".to_string());
        }
        if self.calibration_window > weight_snapshots::MAX_SNAPSHOT_PAGE
            || self.trend_window > weight_snapshots::MAX_SNAPSHOT_PAGE
        {
            return invalid(format!(
                "snapshot windows are capped at {}",
                weight_snapshots::MAX_SNAPSHOT_PAGE
            ));
        }
        if !(self.anomaly_threshold.is_finite() && self.anomaly_threshold > 0.0) {
            return invalid(format!(
                "ANOMALY_THRESHOLD must be positive, got {}",
                self.anomaly_threshold
            ));
        }
        if self.anomaly_baseline_window < 2 {
            return invalid("ANOMALY_BASELINE_WINDOW must be at least 2".to_string());
        }
        if self.purge_interval_secs == 0 || self.evaluation_interval_secs == 0 {
            return invalid("job intervals must be positive".to_string());
        }
        if !(0.0..1.0).contains(&self.job_jitter_pct) {
            return invalid(format!(
                "JOB_JITTER_PCT must be within [0, 1), got {}",
                self.job_jitter_pct
            ));
        }

        Ok(())
    }

    pub fn tracker_params(&self) -> TrackerParams {
        TrackerParams::default()
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            enabled: self.auto_snapshot_enabled,
            decision_interval: self.decision_interval,
            min_seconds_between_snapshots: self.min_seconds_between_snapshots,
            purge_days: self.purge_days,
        }
    }

    pub fn trend_params(&self) -> TrendParams {
        TrendParams {
            window: self.trend_window,
            ma_window: self.ma_window,
            anomaly_threshold: self.anomaly_threshold,
            anomaly_baseline_window: self.anomaly_baseline_window,
            ..TrendParams::default()
        }
    }

    pub fn calibration_params(&self) -> CalibrationParams {
        CalibrationParams {
            calibration_window: self.calibration_window,
            trim_pct: self.trim_pct,
            min_samples: self.min_samples,
        }
    }

    pub fn governance_params(&self) -> GovernanceParams {
        GovernanceParams {
            trend: self.trend_params(),
            calibration: self.calibration_params(),
            strategy: None,
            cooldown_ms: self.cooldown_ms,
        }
    }
}

fn parse<T, F>(lookup: &F, key: &str, default: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key).unwrap_or_else(|| default.to_string());
    raw.trim()
        .parse()
        .with_context(|| format!("invalid value for {}: {:?}", key, raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = GovernanceConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.database_url, None);
        assert_eq!(config.strategies, vec!["STEADY", "EXPEDITE", "BALANCED"]);
        assert_eq!(config.decision_interval, 25);
        assert_eq!(config.min_seconds_between_snapshots, 60);
        assert_eq!(config.purge_days, Some(30));
        assert_eq!(config.cooldown_ms, 1_800_000);
        assert_eq!(config.calibration_params(), CalibrationParams::default());
        assert_eq!(config.trend_params(), TrendParams::default());
    }

    #[test]
    fn test_overrides() {
        let config = GovernanceConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "sqlite::memory:"),
            ("STRATEGIES", " STEADY , EXPEDITE ,"),
            ("PURGE_DAYS", "0"),
            ("AUTO_SNAPSHOT_ENABLED", "false"),
            ("TRIM_PCT", "0.2"),
        ]))
        .unwrap();

        assert_eq!(config.database_url.as_deref(), Some("sqlite::memory:"));
        assert_eq!(config.strategies, vec!["STEADY", "EXPEDITE"]);
        assert_eq!(config.purge_days, None);
        assert!(!config.scheduler_config().enabled);
        assert_eq!(config.calibration_params().trim_pct, 0.2);
    }

    #[test]
    fn test_rejects_unparseable_and_out_of_range() {
        assert!(GovernanceConfig::from_lookup(lookup(&[("DECISION_INTERVAL", "soon")])).is_err());
        assert!(GovernanceConfig::from_lookup(lookup(&[("DECISION_INTERVAL", "0")])).is_err());
        assert!(GovernanceConfig::from_lookup(lookup(&[("TRIM_PCT", "0.5")])).is_err());
        assert!(GovernanceConfig::from_lookup(lookup(&[("STRATEGIES", " , ")])).is_err());
        assert!(GovernanceConfig::from_lookup(lookup(&[("COOLDOWN_MS", "-5")])).is_err());
        assert!(GovernanceConfig::from_lookup(lookup(&[("JOB_JITTER_PCT", "1.5")])).is_err());

        let err = GovernanceConfig::from_lookup(lookup(&[("MA_WINDOW", "0")])).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<GovernanceError>(),
            Some(GovernanceError::InvalidConfig(_))
        ));
    }
}
