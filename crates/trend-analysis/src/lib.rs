//! Trend Analysis
//!
//! Derives slope, volatility momentum, smoothing and anomaly signals from
//! weight snapshot history, and calibrates alerting thresholds from the
//! distribution of those signals.

pub mod thresholds;
pub mod trends;

pub use thresholds::{calibrate, AdaptiveThresholds, CalibrationParams, ThresholdCalibrator};
pub use trends::{
    analyze_series, recent_anomaly_count, Anomaly, SeriesPoint, TrendAnalyzer, TrendMetrics,
    TrendParams, TrendReport,
};
