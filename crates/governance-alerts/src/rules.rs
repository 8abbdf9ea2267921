//! Alert rules
//!
//! Each rule inspects one strategy's trend metrics against the calibrated
//! thresholds and fires independently of the others.

use chrono::{DateTime, Utc};
use trend_analysis::{recent_anomaly_count, AdaptiveThresholds, TrendMetrics};

use crate::model::{AlertKind, GovernanceAlert, Severity};

const SURGE_CRITICAL_MULTIPLIER: f64 = 1.5;
const CLUSTER_CRITICAL_EXTRA: u32 = 2;
const REVERSAL_CRITICAL_MULTIPLIER: f64 = 2.0;
/// Plateau requires momentum under this share of the surge threshold
const PLATEAU_MOMENTUM_SHARE: f64 = 0.5;

/// Run every rule for one strategy.
pub fn evaluate_rules(
    metrics: &TrendMetrics,
    thresholds: &AdaptiveThresholds,
    recent_anomaly_window: usize,
    now: DateTime<Utc>,
) -> Vec<GovernanceAlert> {
    let alert = |kind, severity, observed, threshold, rationale: String| GovernanceAlert {
        id: None,
        strategy: metrics.strategy.clone(),
        kind,
        severity,
        observed,
        threshold,
        rationale,
        created_at: now,
    };

    let mut alerts = Vec::new();

    if let Some(lr) = metrics.lr_slope {
        let magnitude = lr.abs();
        if magnitude >= thresholds.slope_critical {
            alerts.push(alert(
                AlertKind::TrendBreakout,
                Severity::Critical,
                lr,
                thresholds.slope_critical,
                format!("|slope| {:.5} >= critical {:.5}", magnitude, thresholds.slope_critical),
            ));
        } else if magnitude >= thresholds.slope_warn {
            alerts.push(alert(
                AlertKind::TrendBreakout,
                Severity::Warning,
                lr,
                thresholds.slope_warn,
                format!("|slope| {:.5} >= warn {:.5}", magnitude, thresholds.slope_warn),
            ));
        }
    }

    if let Some(momentum) = metrics.volatility_momentum {
        let critical = thresholds.vol_momentum * SURGE_CRITICAL_MULTIPLIER;
        if momentum >= critical {
            alerts.push(alert(
                AlertKind::VolatilitySurge,
                Severity::Critical,
                momentum,
                critical,
                format!("spread momentum {:.3} >= {:.3}", momentum, critical),
            ));
        } else if momentum >= thresholds.vol_momentum {
            alerts.push(alert(
                AlertKind::VolatilitySurge,
                Severity::Warning,
                momentum,
                thresholds.vol_momentum,
                format!("spread momentum {:.3} >= {:.3}", momentum, thresholds.vol_momentum),
            ));
        }
    }

    let anomalies = recent_anomaly_count(metrics, recent_anomaly_window) as u32;
    let k = thresholds.anomaly_cluster_k;
    if anomalies >= k + CLUSTER_CRITICAL_EXTRA {
        alerts.push(alert(
            AlertKind::AnomalyCluster,
            Severity::Critical,
            f64::from(anomalies),
            f64::from(k + CLUSTER_CRITICAL_EXTRA),
            format!("{} anomalies in last {} samples", anomalies, recent_anomaly_window),
        ));
    } else if anomalies >= k {
        alerts.push(alert(
            AlertKind::AnomalyCluster,
            Severity::Warning,
            f64::from(anomalies),
            f64::from(k),
            format!("{} anomalies in last {} samples", anomalies, recent_anomaly_window),
        ));
    }

    if let Some(lr) = metrics.lr_slope {
        let calm = metrics.volatility_momentum.unwrap_or(0.0)
            < thresholds.vol_momentum * PLATEAU_MOMENTUM_SHARE;
        if lr.abs() < thresholds.plateau_tiny_slope
            && metrics.smoothing_reduction_ratio > thresholds.smoothing_high
            && metrics.sample_count >= thresholds.min_samples
            && calm
        {
            alerts.push(alert(
                AlertKind::StabilityPlateau,
                Severity::Info,
                lr,
                thresholds.plateau_tiny_slope,
                format!(
                    "flat slope {:.5} with smoothing ratio {:.2}",
                    lr, metrics.smoothing_reduction_ratio
                ),
            ));
        }
    }

    if let (Some(delta), Some(lr)) = (metrics.delta_weight, metrics.lr_slope) {
        let opposed = delta * lr < 0.0;
        let magnitude = delta.abs();
        let critical = thresholds.reversal_delta_min * REVERSAL_CRITICAL_MULTIPLIER;
        if opposed && magnitude >= thresholds.reversal_delta_min {
            let (severity, threshold) = if magnitude >= critical {
                (Severity::Critical, critical)
            } else {
                (Severity::Warning, thresholds.reversal_delta_min)
            };
            alerts.push(alert(
                AlertKind::ReversalRisk,
                severity,
                delta,
                threshold,
                format!("latest move {:+.4} against trend {:+.5}", delta, lr),
            ));
        }
    }

    alerts
}

#[cfg(test)]
mod tests {
    use super::*;
    use trend_analysis::Anomaly;

    fn metrics() -> TrendMetrics {
        TrendMetrics {
            strategy: "STEADY".to_string(),
            sample_count: 30,
            simple_slope: Some(0.0),
            lr_slope: Some(0.0),
            delta_weight: Some(0.0),
            delta_spread: Some(0.0),
            volatility_momentum: Some(0.0),
            smoothing_reduction_ratio: 0.0,
            anomalies: Vec::new(),
            latest_weight: Some(0.4),
        }
    }

    fn thresholds() -> AdaptiveThresholds {
        AdaptiveThresholds::fallback(10)
    }

    fn kinds(alerts: &[GovernanceAlert]) -> Vec<(AlertKind, Severity)> {
        alerts.iter().map(|a| (a.kind, a.severity)).collect()
    }

    #[test]
    fn test_quiet_series_raises_nothing() {
        let alerts = evaluate_rules(&metrics(), &thresholds(), 10, Utc::now());
        assert!(alerts.is_empty());
    }

    #[test]
    fn test_trend_breakout_severity() {
        let mut m = metrics();
        m.lr_slope = Some(-0.015);
        m.delta_weight = Some(-0.001);
        assert_eq!(
            kinds(&evaluate_rules(&m, &thresholds(), 10, Utc::now())),
            vec![(AlertKind::TrendBreakout, Severity::Warning)]
        );

        m.lr_slope = Some(0.03);
        m.delta_weight = Some(0.001);
        assert_eq!(
            kinds(&evaluate_rules(&m, &thresholds(), 10, Utc::now())),
            vec![(AlertKind::TrendBreakout, Severity::Critical)]
        );
    }

    #[test]
    fn test_volatility_surge_severity() {
        let mut m = metrics();
        m.volatility_momentum = Some(0.6);
        assert_eq!(
            kinds(&evaluate_rules(&m, &thresholds(), 10, Utc::now())),
            vec![(AlertKind::VolatilitySurge, Severity::Warning)]
        );
        m.volatility_momentum = Some(0.75);
        assert_eq!(
            kinds(&evaluate_rules(&m, &thresholds(), 10, Utc::now())),
            vec![(AlertKind::VolatilitySurge, Severity::Critical)]
        );
    }

    #[test]
    fn test_anomaly_cluster_counts_recent_only() {
        let mut m = metrics();
        let anomaly = |index| Anomaly {
            index,
            weight: 0.6,
            z_score: None,
            timestamp: Utc::now(),
        };
        // two old anomalies outside the recent window do not count
        m.anomalies = vec![anomaly(2), anomaly(3), anomaly(21), anomaly(25), anomaly(29)];
        assert_eq!(
            kinds(&evaluate_rules(&m, &thresholds(), 10, Utc::now())),
            vec![(AlertKind::AnomalyCluster, Severity::Warning)]
        );

        m.anomalies = (22..27).map(anomaly).collect();
        assert_eq!(
            kinds(&evaluate_rules(&m, &thresholds(), 10, Utc::now())),
            vec![(AlertKind::AnomalyCluster, Severity::Critical)]
        );
    }

    #[test]
    fn test_stability_plateau_needs_every_condition() {
        let mut m = metrics();
        m.lr_slope = Some(0.0005);
        m.smoothing_reduction_ratio = 0.7;
        m.volatility_momentum = Some(0.1);
        assert_eq!(
            kinds(&evaluate_rules(&m, &thresholds(), 10, Utc::now())),
            vec![(AlertKind::StabilityPlateau, Severity::Info)]
        );

        let mut restless = m.clone();
        restless.volatility_momentum = Some(0.3);
        assert!(evaluate_rules(&restless, &thresholds(), 10, Utc::now()).is_empty());

        let mut short = m.clone();
        short.sample_count = 5;
        assert!(evaluate_rules(&short, &thresholds(), 10, Utc::now()).is_empty());
    }

    #[test]
    fn test_reversal_risk_requires_opposing_move() {
        let mut m = metrics();
        m.lr_slope = Some(0.006);
        m.delta_weight = Some(-0.04);
        assert_eq!(
            kinds(&evaluate_rules(&m, &thresholds(), 10, Utc::now())),
            vec![(AlertKind::ReversalRisk, Severity::Warning)]
        );

        m.delta_weight = Some(-0.07);
        assert_eq!(
            kinds(&evaluate_rules(&m, &thresholds(), 10, Utc::now())),
            vec![(AlertKind::ReversalRisk, Severity::Critical)]
        );

        m.delta_weight = Some(0.07);
        assert!(evaluate_rules(&m, &thresholds(), 10, Utc::now()).is_empty());
    }
}
