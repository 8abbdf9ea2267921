//! Adaptive threshold calibration
//!
//! Pools trend signals across strategies with enough history and derives
//! alerting thresholds from trimmed quantiles of the pooled distribution.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use governance_core::stats::{quantile_sorted, trim_symmetric};
use governance_core::GovernanceError;
use serde::{Deserialize, Serialize};
use weight_snapshots::SnapshotStore;

use crate::trends::{recent_anomaly_count, TrendAnalyzer, TrendMetrics, TrendParams};

const MIN_SLOPE_WARN: f64 = 0.005;
const CRITICAL_OVER_WARN: f64 = 1.3;
const MIN_VOL_MOMENTUM: f64 = 0.25;
const REVERSAL_BOUNDS: (f64, f64) = (0.005, 0.25);
const PLATEAU_SLOPE_SCALE: f64 = 0.6;
const PLATEAU_BOUNDS: (f64, f64) = (0.0005, 0.01);
const SMOOTHING_BOUNDS: (f64, f64) = (0.10, 0.90);
const ANOMALY_K_BOUNDS: (u32, u32) = (2, 5);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CalibrationParams {
    /// Snapshots per strategy fed into calibration
    pub calibration_window: usize,
    /// Fraction trimmed from each end of every pooled signal
    pub trim_pct: f64,
    /// Snapshots a strategy needs to contribute
    pub min_samples: usize,
}

impl Default for CalibrationParams {
    fn default() -> Self {
        Self {
            calibration_window: 50,
            trim_pct: 0.1,
            min_samples: 10,
        }
    }
}

impl CalibrationParams {
    pub fn validate(&self) -> Result<(), GovernanceError> {
        if !(0.0..0.5).contains(&self.trim_pct) {
            return Err(GovernanceError::InvalidRange(format!(
                "trim_pct must be within [0, 0.5), got {}",
                self.trim_pct
            )));
        }
        if self.calibration_window == 0 {
            return Err(GovernanceError::InvalidRange(
                "calibration window must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AdaptiveThresholds {
    pub slope_warn: f64,
    pub slope_critical: f64,
    pub vol_momentum: f64,
    pub reversal_delta_min: f64,
    pub plateau_tiny_slope: f64,
    pub smoothing_high: f64,
    pub anomaly_cluster_k: u32,
    /// Defaults were used because no strategy qualified
    pub fallback: bool,
    pub qualifying_strategies: usize,
    /// Sample requirement the thresholds were calibrated with
    pub min_samples: usize,
    pub computed_at: DateTime<Utc>,
}

impl AdaptiveThresholds {
    pub fn fallback(min_samples: usize) -> Self {
        Self {
            slope_warn: 0.01,
            slope_critical: 0.02,
            vol_momentum: 0.5,
            reversal_delta_min: 0.03,
            plateau_tiny_slope: 0.002,
            smoothing_high: 0.5,
            anomaly_cluster_k: 3,
            fallback: true,
            qualifying_strategies: 0,
            min_samples,
            computed_at: Utc::now(),
        }
    }
}

/// Derive thresholds from already-computed trend metrics.
pub fn calibrate(
    metrics: &[TrendMetrics],
    params: &CalibrationParams,
    recent_anomaly_window: usize,
) -> AdaptiveThresholds {
    let qualifying: Vec<&TrendMetrics> = metrics
        .iter()
        .filter(|m| m.sample_count >= params.min_samples)
        .collect();

    if qualifying.is_empty() {
        tracing::debug!("No strategy has {} snapshots, using fallback thresholds", params.min_samples);
        return AdaptiveThresholds::fallback(params.min_samples);
    }

    let abs_slopes: Vec<f64> = qualifying.iter().filter_map(|m| m.lr_slope).map(f64::abs).collect();
    let momentum: Vec<f64> = qualifying
        .iter()
        .filter_map(|m| m.volatility_momentum)
        .filter(|v| *v > 0.0)
        .collect();
    let abs_deltas: Vec<f64> = qualifying.iter().filter_map(|m| m.delta_weight).map(f64::abs).collect();
    let smoothing: Vec<f64> = qualifying.iter().map(|m| m.smoothing_reduction_ratio).collect();
    let anomalies: Vec<f64> = qualifying
        .iter()
        .map(|m| recent_anomaly_count(m, recent_anomaly_window) as f64)
        .collect();

    let q = |values: &[f64], quantile: f64| quantile_sorted(&trim_symmetric(values, params.trim_pct), quantile);

    let slope_warn = q(&abs_slopes, 0.8).max(MIN_SLOPE_WARN);
    let slope_critical = q(&abs_slopes, 0.9).max(slope_warn * CRITICAL_OVER_WARN);
    let vol_momentum = q(&momentum, 0.8).max(MIN_VOL_MOMENTUM);
    let reversal_delta_min = q(&abs_deltas, 0.7).clamp(REVERSAL_BOUNDS.0, REVERSAL_BOUNDS.1);
    let plateau_tiny_slope =
        (q(&abs_slopes, 0.4) * PLATEAU_SLOPE_SCALE).clamp(PLATEAU_BOUNDS.0, PLATEAU_BOUNDS.1);
    let smoothing_high = q(&smoothing, 0.8).clamp(SMOOTHING_BOUNDS.0, SMOOTHING_BOUNDS.1);
    let anomaly_cluster_k =
        (q(&anomalies, 0.8).round() as u32).clamp(ANOMALY_K_BOUNDS.0, ANOMALY_K_BOUNDS.1);

    AdaptiveThresholds {
        slope_warn,
        slope_critical,
        vol_momentum,
        reversal_delta_min,
        plateau_tiny_slope,
        smoothing_high,
        anomaly_cluster_k,
        fallback: false,
        qualifying_strategies: qualifying.len(),
        min_samples: params.min_samples,
        computed_at: Utc::now(),
    }
}

pub struct ThresholdCalibrator {
    analyzer: TrendAnalyzer,
}

impl ThresholdCalibrator {
    pub fn new(store: Arc<SnapshotStore>) -> Self {
        Self {
            analyzer: TrendAnalyzer::new(store),
        }
    }

    /// Calibrate from the last `calibration_window` snapshots of each strategy
    /// (or only `strategy`).
    pub async fn compute_adaptive_thresholds(
        &self,
        params: &CalibrationParams,
        trend_params: &TrendParams,
        strategy: Option<&str>,
    ) -> Result<AdaptiveThresholds> {
        params.validate()?;

        let calibration_trends = TrendParams {
            window: params.calibration_window,
            ..trend_params.clone()
        };
        let report = self.analyzer.compute_trends(&calibration_trends, strategy).await?;

        let thresholds = calibrate(&report.strategies, params, trend_params.recent_anomaly_window);
        tracing::debug!(
            "Calibrated thresholds from {} strategies (fallback: {})",
            thresholds.qualifying_strategies,
            thresholds.fallback
        );

        Ok(thresholds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trends::{analyze_series, SeriesPoint};
    use chrono::Duration;
    use strategy_weights::{StrategyTracker, TrackerParams};
    use weight_snapshots::{MemorySnapshotBackend, SnapshotBackend, WeightSnapshotRow};

    /// Deterministic noise in [-0.5, 0.5)
    fn wobble(seed: usize, i: usize) -> f64 {
        ((seed * 7919 + i * 104_729) % 1000) as f64 / 1000.0 - 0.5
    }

    fn metrics_for(strategy: &str, seed: usize, n: usize, slope: f64) -> TrendMetrics {
        let start = Utc::now();
        let points: Vec<SeriesPoint> = (0..n)
            .map(|i| SeriesPoint {
                weight: 0.3 + slope * i as f64 + wobble(seed, i) * 0.02,
                spread: 1.0 + wobble(seed + 1, i),
                timestamp: start + Duration::minutes(i as i64),
            })
            .collect();
        analyze_series(strategy, &points, &TrendParams::default())
    }

    #[test]
    fn test_no_qualifying_strategy_falls_back() {
        let short = metrics_for("STEADY", 1, 5, 0.01);
        let thresholds = calibrate(&[short], &CalibrationParams::default(), 10);
        assert!(thresholds.fallback);
        assert_eq!(thresholds.slope_warn, 0.01);
        assert_eq!(thresholds.slope_critical, 0.02);
        assert_eq!(thresholds.vol_momentum, 0.5);
        assert_eq!(thresholds.reversal_delta_min, 0.03);
        assert_eq!(thresholds.plateau_tiny_slope, 0.002);
        assert_eq!(thresholds.smoothing_high, 0.5);
        assert_eq!(thresholds.anomaly_cluster_k, 3);

        let empty = calibrate(&[], &CalibrationParams::default(), 10);
        assert!(empty.fallback);
        assert_eq!(empty.qualifying_strategies, 0);
    }

    #[test]
    fn test_critical_never_below_warn() {
        for seed in 0..25 {
            let metrics: Vec<TrendMetrics> = (0..4)
                .map(|s| metrics_for(&format!("S{}", s), seed * 4 + s, 30, (s as f64 - 1.5) * 0.004))
                .collect();
            let thresholds = calibrate(&metrics, &CalibrationParams::default(), 10);
            assert!(!thresholds.fallback);
            assert!(thresholds.slope_critical >= thresholds.slope_warn);
            assert!(thresholds.slope_warn >= MIN_SLOPE_WARN);
        }
    }

    #[test]
    fn test_thresholds_respect_bounds() {
        let flat = metrics_for("FLAT", 3, 30, 0.0);
        let thresholds = calibrate(&[flat], &CalibrationParams::default(), 10);

        assert_eq!(thresholds.qualifying_strategies, 1);
        assert!(thresholds.vol_momentum >= MIN_VOL_MOMENTUM);
        assert!((REVERSAL_BOUNDS.0..=REVERSAL_BOUNDS.1).contains(&thresholds.reversal_delta_min));
        assert!((PLATEAU_BOUNDS.0..=PLATEAU_BOUNDS.1).contains(&thresholds.plateau_tiny_slope));
        assert!((SMOOTHING_BOUNDS.0..=SMOOTHING_BOUNDS.1).contains(&thresholds.smoothing_high));
        assert!((2..=5).contains(&thresholds.anomaly_cluster_k));
    }

    #[test]
    fn test_steep_slopes_raise_warn_threshold() {
        let metrics: Vec<TrendMetrics> = (0..5)
            .map(|s| metrics_for(&format!("S{}", s), s, 30, 0.02))
            .collect();
        let thresholds = calibrate(&metrics, &CalibrationParams { trim_pct: 0.0, ..Default::default() }, 10);
        assert!(thresholds.slope_warn > 0.015);
        assert!(thresholds.slope_critical >= thresholds.slope_warn * CRITICAL_OVER_WARN - 1e-12);
    }

    #[test]
    fn test_invalid_trim_rejected() {
        let params = CalibrationParams { trim_pct: 0.6, ..Default::default() };
        assert!(matches!(params.validate(), Err(GovernanceError::InvalidRange(_))));
    }

    #[tokio::test]
    async fn test_calibrator_uses_store_history() {
        let tracker = StrategyTracker::new(["STEADY"], TrackerParams::default()).unwrap();
        let backend = Arc::new(MemorySnapshotBackend::default());
        let store = Arc::new(SnapshotStore::new(backend.clone(), Arc::new(tracker)));
        let calibrator = ThresholdCalibrator::new(store);

        let empty = calibrator
            .compute_adaptive_thresholds(&CalibrationParams::default(), &TrendParams::default(), None)
            .await
            .unwrap();
        assert!(empty.fallback);

        let start = Utc::now() - Duration::hours(1);
        let rows: Vec<WeightSnapshotRow> = (0..12)
            .map(|i| WeightSnapshotRow {
                id: None,
                strategy: "STEADY".to_string(),
                captured_at: start + Duration::seconds(i),
                reason: "test".to_string(),
                samples: 10,
                decay_score: 0.5,
                avg_effectiveness: 7.0,
                p90_effectiveness: 7.0,
                spread: 0.0,
                early_gated: false,
                base_score: 0.5,
                adjusted_score: 0.5,
                final_weight: 0.4 + i as f64 * 0.01,
                checksum: 1.0,
                rationale: Vec::new(),
            })
            .collect();
        backend.insert_batch(&rows).await.unwrap();

        let calibrated = calibrator
            .compute_adaptive_thresholds(&CalibrationParams::default(), &TrendParams::default(), None)
            .await
            .unwrap();
        assert!(!calibrated.fallback);
        assert_eq!(calibrated.qualifying_strategies, 1);
        assert!((calibrated.slope_warn - 0.01).abs() < 1e-9);
        assert!(calibrated.slope_critical >= calibrated.slope_warn);
    }
}
