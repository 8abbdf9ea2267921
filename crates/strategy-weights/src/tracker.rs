//! Strategy Performance Tracker
//!
//! Ingests decision outcomes and keeps, per known strategy, a bounded rolling
//! buffer of effectiveness scores plus an exponentially decayed score.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use governance_core::stats::{mean, nearest_rank_percentile};
use governance_core::{GovernanceError, NORMALIZATION_TOLERANCE};
use serde::{Deserialize, Serialize};

use crate::selection::{self, StrategySelection};
use crate::weights::{compute_weight_artifact, WeightArtifact, MIN_FLOOR};

/// Tunables for aggregation and weighting
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackerParams {
    /// Decay factor applied to the previous score on every decision
    pub decay_lambda: f64,
    /// Rolling effectiveness buffer size
    pub buffer_capacity: usize,
    /// Effectiveness samples required before heuristics apply
    pub min_samples: usize,
    /// Base score used for early-gated strategies
    pub neutral_base: f64,
    /// Lowest weight any strategy may receive
    pub min_floor: f64,
    /// Score cap for a lone, volatile, sufficiently-sampled strategy
    pub dominance_cap: f64,
}

impl Default for TrackerParams {
    fn default() -> Self {
        Self {
            decay_lambda: 0.93,
            buffer_capacity: 50,
            min_samples: 5,
            neutral_base: 0.25,
            min_floor: MIN_FLOOR,
            dominance_cap: 0.4,
        }
    }
}

impl TrackerParams {
    pub fn window_label(&self) -> String {
        format!("rolling_{}", self.buffer_capacity)
    }
}

/// Persistable aggregate for one (strategy, window) pair
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StrategyPerformanceRecord {
    pub strategy: String,
    pub window: String,
    pub decisions_count: u64,
    pub samples: usize,
    pub avg_effectiveness: f64,
    pub p90_effectiveness: f64,
    pub decay_weighted_score: f64,
    pub last_weight: Option<f64>,
    pub updated_at: DateTime<Utc>,
}

/// Point-in-time view of one strategy used by the weight pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyAggregate {
    pub strategy: String,
    pub samples: usize,
    pub decisions_count: u64,
    pub decay_score: f64,
    pub avg_effectiveness: f64,
    pub p90_effectiveness: f64,
}

#[derive(Debug, Clone, Default)]
struct StrategyState {
    effectiveness: VecDeque<f64>,
    decay_score: f64,
    decisions_count: u64,
    avg_effectiveness: f64,
    p90_effectiveness: f64,
    last_weight: Option<f64>,
    updated_at: Option<DateTime<Utc>>,
}

/// Per-instance tracker; every known strategy has an entry from construction on.
pub struct StrategyTracker {
    params: TrackerParams,
    strategies: Vec<String>,
    state: DashMap<String, StrategyState>,
}

impl StrategyTracker {
    /// Create a tracker for a fixed set of strategy ids.
    pub fn new<I, S>(strategies: I, params: TrackerParams) -> Result<Self, GovernanceError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut ids: Vec<String> = strategies
            .into_iter()
            .map(Into::into)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        ids.sort();
        ids.dedup();

        if ids.is_empty() {
            return Err(GovernanceError::InvalidConfig(
                "at least one strategy id is required".to_string(),
            ));
        }
        if params.buffer_capacity == 0 {
            return Err(GovernanceError::InvalidConfig(
                "buffer_capacity must be positive".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&params.decay_lambda) {
            return Err(GovernanceError::InvalidConfig(format!(
                "decay_lambda must be in [0, 1), got {}",
                params.decay_lambda
            )));
        }

        let state = DashMap::new();
        for id in &ids {
            state.insert(id.clone(), StrategyState::default());
        }

        Ok(Self {
            params,
            strategies: ids,
            state,
        })
    }

    /// Known strategy ids, sorted
    pub fn strategies(&self) -> &[String] {
        &self.strategies
    }

    pub fn params(&self) -> &TrackerParams {
        &self.params
    }

    /// Apply one decision outcome. Returns false when the strategy is unknown.
    ///
    /// Effectiveness is on a 0-10 scale; non-finite values count as absent.
    pub fn update_on_decision(
        &self,
        strategy: &str,
        effectiveness: Option<f64>,
        timestamp: Option<DateTime<Utc>>,
    ) -> bool {
        let Some(mut entry) = self.state.get_mut(strategy) else {
            tracing::debug!("Ignoring decision for unknown strategy {}", strategy);
            return false;
        };

        let effectiveness = effectiveness.filter(|e| e.is_finite());
        let state = entry.value_mut();
        let lambda = self.params.decay_lambda;

        state.decay_score *= lambda;
        if let Some(eff) = effectiveness {
            let eff = eff.clamp(0.0, 10.0);
            state.decay_score += (eff / 10.0) * (1.0 - lambda);

            state.effectiveness.push_back(eff);
            while state.effectiveness.len() > self.params.buffer_capacity {
                state.effectiveness.pop_front();
            }
        }

        state.decisions_count += 1;

        let buffer: Vec<f64> = state.effectiveness.iter().copied().collect();
        state.avg_effectiveness = mean(&buffer);
        state.p90_effectiveness = nearest_rank_percentile(&buffer, 90.0);
        state.updated_at = Some(timestamp.unwrap_or_else(Utc::now));

        true
    }

    /// Consistent per-strategy view in strategy-id order
    pub fn aggregates(&self) -> Vec<StrategyAggregate> {
        self.strategies
            .iter()
            .filter_map(|id| {
                self.state.get(id).map(|s| StrategyAggregate {
                    strategy: id.clone(),
                    samples: s.effectiveness.len(),
                    decisions_count: s.decisions_count,
                    decay_score: s.decay_score,
                    avg_effectiveness: s.avg_effectiveness,
                    p90_effectiveness: s.p90_effectiveness,
                })
            })
            .collect()
    }

    /// Current performance record for one strategy
    pub fn record(&self, strategy: &str) -> Option<StrategyPerformanceRecord> {
        self.state.get(strategy).map(|s| StrategyPerformanceRecord {
            strategy: strategy.to_string(),
            window: self.params.window_label(),
            decisions_count: s.decisions_count,
            samples: s.effectiveness.len(),
            avg_effectiveness: s.avg_effectiveness,
            p90_effectiveness: s.p90_effectiveness,
            decay_weighted_score: s.decay_score,
            last_weight: s.last_weight,
            updated_at: s.updated_at.unwrap_or_default(),
        })
    }

    pub fn records(&self) -> Vec<StrategyPerformanceRecord> {
        self.strategies.iter().filter_map(|id| self.record(id)).collect()
    }

    /// Run the weight pipeline over the current aggregates.
    pub fn compute_unified_weights(&self, seed: Option<u64>) -> Result<WeightArtifact, GovernanceError> {
        compute_weight_artifact(&self.aggregates(), &self.params, seed)
    }

    pub fn get_weights(&self) -> Result<BTreeMap<String, f64>, GovernanceError> {
        Ok(self.compute_unified_weights(None)?.weights())
    }

    pub fn get_weight_details(&self) -> Result<WeightArtifact, GovernanceError> {
        self.compute_unified_weights(None)
    }

    /// Weighted-random pick over the current weights.
    ///
    /// A seed makes the draw deterministic for an unchanged artifact.
    pub fn select_strategy(&self, seed: Option<u64>) -> Result<StrategySelection, GovernanceError> {
        let artifact = self.compute_unified_weights(seed)?;
        let strategy = selection::draw(&artifact, seed).ok_or(GovernanceError::NormalizationDrift {
            checksum: artifact.checksum,
            tolerance: NORMALIZATION_TOLERANCE,
        })?;

        let weights = artifact.weights();
        self.note_applied_weights(&weights);

        Ok(StrategySelection {
            strategy,
            weights,
            artifact,
            seed,
        })
    }

    fn note_applied_weights(&self, weights: &BTreeMap<String, f64>) {
        for (strategy, weight) in weights {
            if let Some(mut s) = self.state.get_mut(strategy) {
                s.last_weight = Some(*weight);
            }
        }
    }
}
