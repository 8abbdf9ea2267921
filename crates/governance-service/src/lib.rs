//! Governance Service
//!
//! Wires the tracker, snapshot store, auto-snapshot scheduler, trend analysis
//! and alert engine into one pipeline, configured from the environment.

pub mod config;
pub mod jobs;
pub mod pipeline;

pub use config::GovernanceConfig;
pub use jobs::{jittered, spawn_background_jobs};
pub use pipeline::{DecisionOutcome, DecisionReceipt, GovernancePipeline, RetentionOutcome};
