//! Trend Analyzer
//!
//! Turns a strategy's snapshot history (oldest to newest) into slope,
//! momentum, smoothing and anomaly signals.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use governance_core::stats::{mean, ols_slope, population_std_dev, trailing_moving_average};
use governance_core::GovernanceError;
use serde::{Deserialize, Serialize};
use weight_snapshots::{SnapshotStore, WeightSnapshotRow, MAX_SNAPSHOT_PAGE};

/// Deviation from a flat baseline that counts as anomalous
const FLAT_BASELINE_DEVIATION: f64 = 0.05;

/// Standard deviations below this are treated as zero
const VARIANCE_EPSILON: f64 = 1e-12;

/// Values before the latest one used for delta baselines
const DELTA_LOOKBACK: usize = 3;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrendParams {
    /// Most recent snapshots read per strategy
    pub window: usize,
    pub ma_window: usize,
    /// |z| above this marks an anomaly
    pub anomaly_threshold: f64,
    /// Trailing samples forming each point's baseline
    pub anomaly_baseline_window: usize,
    /// Samples counted by `recent_anomaly_count`
    pub recent_anomaly_window: usize,
}

impl Default for TrendParams {
    fn default() -> Self {
        Self {
            window: 30,
            ma_window: 3,
            anomaly_threshold: 2.0,
            anomaly_baseline_window: 8,
            recent_anomaly_window: 10,
        }
    }
}

impl TrendParams {
    pub fn validate(&self) -> Result<(), GovernanceError> {
        if self.window == 0 || self.window > MAX_SNAPSHOT_PAGE {
            return Err(GovernanceError::InvalidRange(format!(
                "trend window must be within 1..={}, got {}",
                MAX_SNAPSHOT_PAGE, self.window
            )));
        }
        if self.ma_window == 0 {
            return Err(GovernanceError::InvalidRange(
                "moving-average window must be positive".to_string(),
            ));
        }
        if self.anomaly_baseline_window < 2 {
            return Err(GovernanceError::InvalidRange(
                "anomaly baseline needs at least 2 samples".to_string(),
            ));
        }
        if !(self.anomaly_threshold.is_finite() && self.anomaly_threshold > 0.0) {
            return Err(GovernanceError::InvalidRange(format!(
                "anomaly threshold must be positive, got {}",
                self.anomaly_threshold
            )));
        }
        Ok(())
    }
}

/// One point of a weight series
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SeriesPoint {
    pub weight: f64,
    pub spread: f64,
    pub timestamp: DateTime<Utc>,
}

impl From<&WeightSnapshotRow> for SeriesPoint {
    fn from(row: &WeightSnapshotRow) -> Self {
        Self {
            weight: row.final_weight,
            spread: row.spread,
            timestamp: row.captured_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Anomaly {
    pub index: usize,
    pub weight: f64,
    /// `None` when the baseline had no variance
    pub z_score: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrendMetrics {
    pub strategy: String,
    pub sample_count: usize,
    pub simple_slope: Option<f64>,
    pub lr_slope: Option<f64>,
    pub delta_weight: Option<f64>,
    pub delta_spread: Option<f64>,
    pub volatility_momentum: Option<f64>,
    pub smoothing_reduction_ratio: f64,
    pub anomalies: Vec<Anomaly>,
    pub latest_weight: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendReport {
    pub params: TrendParams,
    pub strategies: Vec<TrendMetrics>,
    pub computed_at: DateTime<Utc>,
}

impl TrendReport {
    pub fn get(&self, strategy: &str) -> Option<&TrendMetrics> {
        self.strategies.iter().find(|m| m.strategy == strategy)
    }
}

/// Compute trend metrics for one strategy's series (oldest first).
pub fn analyze_series(strategy: &str, points: &[SeriesPoint], params: &TrendParams) -> TrendMetrics {
    let n = points.len();
    let weights: Vec<f64> = points.iter().map(|p| p.weight).collect();
    let spreads: Vec<f64> = points.iter().map(|p| p.spread).collect();

    let (simple_slope, lr_slope) = if n >= 2 {
        (
            Some((weights[n - 1] - weights[0]) / (n - 1) as f64),
            Some(ols_slope(&weights)),
        )
    } else {
        (None, None)
    };

    let volatility_momentum = if n >= 2 {
        let (first, second) = spreads.split_at(n / 2);
        Some(mean(second) - mean(first))
    } else {
        None
    };

    TrendMetrics {
        strategy: strategy.to_string(),
        sample_count: n,
        simple_slope,
        lr_slope,
        delta_weight: delta_from_recent(&weights),
        delta_spread: delta_from_recent(&spreads),
        volatility_momentum,
        smoothing_reduction_ratio: smoothing_reduction(&weights, params.ma_window),
        anomalies: detect_anomalies(points, params),
        latest_weight: weights.last().copied(),
    }
}

/// Anomalies inside the last `window` samples of the series
pub fn recent_anomaly_count(metrics: &TrendMetrics, window: usize) -> usize {
    let start = metrics.sample_count.saturating_sub(window);
    metrics.anomalies.iter().filter(|a| a.index >= start).count()
}

/// Latest value minus the mean of up to three values before it
fn delta_from_recent(values: &[f64]) -> Option<f64> {
    let (last, prior) = values.split_last()?;
    if prior.is_empty() {
        return None;
    }
    let lookback = &prior[prior.len().saturating_sub(DELTA_LOOKBACK)..];
    Some(last - mean(lookback))
}

fn smoothing_reduction(weights: &[f64], ma_window: usize) -> f64 {
    let raw_std = population_std_dev(weights);
    if raw_std <= VARIANCE_EPSILON {
        return 0.0;
    }
    let smoothed = trailing_moving_average(weights, ma_window);
    if smoothed.len() < 2 {
        return 0.0;
    }
    1.0 - population_std_dev(&smoothed) / raw_std
}

fn detect_anomalies(points: &[SeriesPoint], params: &TrendParams) -> Vec<Anomaly> {
    let mut anomalies = Vec::new();

    for (i, point) in points.iter().enumerate() {
        let start = i.saturating_sub(params.anomaly_baseline_window);
        let baseline: Vec<f64> = points[start..i].iter().map(|p| p.weight).collect();
        if baseline.len() < 2 {
            continue;
        }

        let base_mean = mean(&baseline);
        let base_std = population_std_dev(&baseline);

        let z_score = if base_std > VARIANCE_EPSILON {
            let z = (point.weight - base_mean) / base_std;
            if z.abs() <= params.anomaly_threshold {
                continue;
            }
            Some(z)
        } else {
            if (point.weight - base_mean).abs() <= FLAT_BASELINE_DEVIATION {
                continue;
            }
            None
        };

        anomalies.push(Anomaly {
            index: i,
            weight: point.weight,
            z_score,
            timestamp: point.timestamp,
        });
    }

    anomalies
}

/// Reads snapshot history and applies `analyze_series` per strategy
pub struct TrendAnalyzer {
    store: Arc<SnapshotStore>,
}

impl TrendAnalyzer {
    pub fn new(store: Arc<SnapshotStore>) -> Self {
        Self { store }
    }

    /// Trends for `strategy`, or for every strategy with history.
    pub async fn compute_trends(
        &self,
        params: &TrendParams,
        strategy: Option<&str>,
    ) -> Result<TrendReport> {
        params.validate()?;

        let strategies = match strategy {
            Some(s) => vec![s.to_string()],
            None => self.store.strategies().await?,
        };

        let mut metrics = Vec::with_capacity(strategies.len());
        for strategy in &strategies {
            let mut rows = self.store.list_snapshots(Some(strategy), params.window).await?;
            rows.reverse();
            let points: Vec<SeriesPoint> = rows.iter().map(SeriesPoint::from).collect();
            metrics.push(analyze_series(strategy, &points, params));
        }

        tracing::debug!("Computed trends for {} strategies", metrics.len());

        Ok(TrendReport {
            params: params.clone(),
            strategies: metrics,
            computed_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use strategy_weights::{StrategyTracker, TrackerParams};
    use weight_snapshots::{MemorySnapshotBackend, SnapshotBackend};

    fn series(weights: &[f64]) -> Vec<SeriesPoint> {
        let start = Utc::now() - Duration::hours(weights.len() as i64);
        weights
            .iter()
            .enumerate()
            .map(|(i, w)| SeriesPoint {
                weight: *w,
                spread: 1.0,
                timestamp: start + Duration::hours(i as i64),
            })
            .collect()
    }

    fn row(strategy: &str, captured_at: DateTime<Utc>, weight: f64, spread: f64) -> WeightSnapshotRow {
        WeightSnapshotRow {
            id: None,
            strategy: strategy.to_string(),
            captured_at,
            reason: "test".to_string(),
            samples: 10,
            decay_score: weight,
            avg_effectiveness: 5.0,
            p90_effectiveness: 5.0 + spread,
            spread,
            early_gated: false,
            base_score: weight,
            adjusted_score: weight,
            final_weight: weight,
            checksum: 1.0,
            rationale: Vec::new(),
        }
    }

    #[test]
    fn test_flat_series_then_spike_is_anomalous() {
        let mut weights = vec![0.3; 20];
        weights.push(0.6);
        let metrics = analyze_series("STEADY", &series(&weights), &TrendParams::default());

        assert_eq!(metrics.anomalies.len(), 1);
        let anomaly = &metrics.anomalies[0];
        assert_eq!(anomaly.index, 20);
        assert_eq!(anomaly.z_score, None);
        assert_eq!(recent_anomaly_count(&metrics, 10), 1);
    }

    #[test]
    fn test_spike_in_noisy_series_has_z_score() {
        let mut weights: Vec<f64> = (0..20).map(|i| if i % 2 == 0 { 0.30 } else { 0.32 }).collect();
        weights.push(0.5);
        let metrics = analyze_series("STEADY", &series(&weights), &TrendParams::default());

        let last = metrics.anomalies.last().unwrap();
        assert_eq!(last.index, 20);
        assert!(last.z_score.unwrap() > 2.0);
    }

    #[test]
    fn test_slopes_and_deltas() {
        let weights: Vec<f64> = (0..10).map(|i| 0.2 + i as f64 * 0.01).collect();
        let metrics = analyze_series("EXPEDITE", &series(&weights), &TrendParams::default());

        assert!((metrics.simple_slope.unwrap() - 0.01).abs() < 1e-9);
        assert!((metrics.lr_slope.unwrap() - 0.01).abs() < 1e-9);
        // 0.29 - mean(0.26, 0.27, 0.28)
        assert!((metrics.delta_weight.unwrap() - 0.02).abs() < 1e-9);
        assert_eq!(metrics.delta_spread, Some(0.0));
        assert_eq!(metrics.volatility_momentum, Some(0.0));
        assert!(metrics.smoothing_reduction_ratio > 0.0);
        assert!((metrics.latest_weight.unwrap() - 0.29).abs() < 1e-12);
    }

    #[test]
    fn test_short_series_has_no_slopes() {
        let metrics = analyze_series("STEADY", &series(&[0.4]), &TrendParams::default());
        assert_eq!(metrics.sample_count, 1);
        assert_eq!(metrics.simple_slope, None);
        assert_eq!(metrics.lr_slope, None);
        assert_eq!(metrics.delta_weight, None);
        assert_eq!(metrics.volatility_momentum, None);
        assert_eq!(metrics.smoothing_reduction_ratio, 0.0);
        assert!(metrics.anomalies.is_empty());

        let empty = analyze_series("STEADY", &[], &TrendParams::default());
        assert_eq!(empty.latest_weight, None);
    }

    #[test]
    fn test_volatility_momentum_compares_halves() {
        let start = Utc::now();
        let points: Vec<SeriesPoint> = (0..6)
            .map(|i| SeriesPoint {
                weight: 0.3,
                spread: if i < 3 { 1.0 } else { 3.0 },
                timestamp: start + Duration::minutes(i),
            })
            .collect();
        let metrics = analyze_series("X", &points, &TrendParams::default());
        assert_eq!(metrics.volatility_momentum, Some(2.0));
        assert_eq!(metrics.smoothing_reduction_ratio, 0.0);
    }

    #[test]
    fn test_params_validation() {
        assert!(TrendParams::default().validate().is_ok());
        let bad = TrendParams { window: 0, ..Default::default() };
        assert!(matches!(bad.validate(), Err(GovernanceError::InvalidRange(_))));
        let bad = TrendParams { ma_window: 0, ..Default::default() };
        assert!(bad.validate().is_err());
    }

    #[tokio::test]
    async fn test_compute_trends_reads_history_oldest_first() {
        let backend = Arc::new(MemorySnapshotBackend::default());
        let start = Utc::now() - Duration::hours(1);
        let rows: Vec<WeightSnapshotRow> = (0..40)
            .flat_map(|i| {
                let at = start + Duration::seconds(i);
                vec![
                    row("STEADY", at, 0.5 + i as f64 * 0.001, 1.0),
                    row("EXPEDITE", at, 0.5 - i as f64 * 0.001, 5.0),
                ]
            })
            .collect();
        backend.insert_batch(&rows).await.unwrap();

        let tracker = StrategyTracker::new(["STEADY", "EXPEDITE"], TrackerParams::default()).unwrap();
        let store = Arc::new(SnapshotStore::new(backend, Arc::new(tracker)));
        let analyzer = TrendAnalyzer::new(store);

        let report = analyzer.compute_trends(&TrendParams::default(), None).await.unwrap();
        assert_eq!(report.strategies.len(), 2);

        let steady = report.get("STEADY").unwrap();
        assert_eq!(steady.sample_count, 30);
        assert!(steady.lr_slope.unwrap() > 0.0);
        assert!((steady.latest_weight.unwrap() - 0.539).abs() < 1e-9);

        let expedite = report.get("EXPEDITE").unwrap();
        assert!(expedite.lr_slope.unwrap() < 0.0);

        let single = analyzer
            .compute_trends(&TrendParams::default(), Some("EXPEDITE"))
            .await
            .unwrap();
        assert_eq!(single.strategies.len(), 1);
    }
}
