//! Strategy Weighting
//!
//! Tracks decision outcomes per strategy and turns the decayed/rolling
//! aggregates into a normalized, explainable weight distribution.

pub mod db;
pub mod selection;
pub mod tracker;
pub mod weights;

pub use db::PerformanceRecordDb;
pub use selection::StrategySelection;
pub use tracker::{StrategyAggregate, StrategyPerformanceRecord, StrategyTracker, TrackerParams};
pub use weights::{compute_weight_artifact, ArtifactMetadata, StrategyWeight, WeightArtifact, MIN_FLOOR};
