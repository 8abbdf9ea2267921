//! Unified weight pipeline
//!
//! Gating → base score → spread modifier → volatility clamp → dominance cap
//! → floor → normalization. Each stage appends to the per-strategy rationale.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use governance_core::{GovernanceError, NORMALIZATION_TOLERANCE};
use serde::{Deserialize, Serialize};

use crate::tracker::{StrategyAggregate, TrackerParams};

/// Lowest weight any strategy may receive
pub const MIN_FLOOR: f64 = 0.15;

/// Spread below this is treated as stable
pub const STABLE_SPREAD: f64 = 2.0;
/// Spread at or above this is treated as volatile
pub const VOLATILE_SPREAD: f64 = 4.0;

const STABILITY_BOOST: f64 = 1.05;
const VOLATILITY_PENALTY_SLOPE: f64 = 0.08;
const VOLATILITY_PENALTY_MIN: f64 = 0.6;
const VOLATILITY_CLAMP_RATIO: f64 = 0.95;

/// One strategy's entry in the weight artifact
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StrategyWeight {
    pub strategy: String,
    pub samples: usize,
    pub decisions_count: u64,
    pub decay_score: f64,
    pub avg_effectiveness: f64,
    pub p90_effectiveness: f64,
    pub spread: f64,
    pub early_gated: bool,
    /// Score before the spread modifier
    pub base_score: f64,
    /// Score after the spread modifier
    pub modified_score: f64,
    /// Score after clamp, cap and floor, before normalization
    pub score: f64,
    pub volatility_clamped: bool,
    pub dominance_capped: bool,
    pub floored: bool,
    pub final_weight: f64,
    pub rationale: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArtifactMetadata {
    pub gated_strategies: Vec<String>,
    pub parameters: TrackerParams,
    pub seed: Option<u64>,
    pub computed_at: DateTime<Utc>,
}

/// Normalized weight distribution with full explainability
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WeightArtifact {
    /// Entries in strategy-id order
    pub strategies: Vec<StrategyWeight>,
    /// Sum of final weights
    pub checksum: f64,
    pub metadata: ArtifactMetadata,
}

impl WeightArtifact {
    pub fn weights(&self) -> BTreeMap<String, f64> {
        self.strategies
            .iter()
            .map(|w| (w.strategy.clone(), w.final_weight))
            .collect()
    }

    pub fn get(&self, strategy: &str) -> Option<&StrategyWeight> {
        self.strategies.iter().find(|w| w.strategy == strategy)
    }
}

/// Compute the weight artifact from aggregates.
///
/// Deterministic for identical aggregates; `seed` is only recorded in the
/// metadata so a later draw can be reproduced.
pub fn compute_weight_artifact(
    aggregates: &[StrategyAggregate],
    params: &TrackerParams,
    seed: Option<u64>,
) -> Result<WeightArtifact, GovernanceError> {
    let mut entries: Vec<StrategyWeight> = aggregates
        .iter()
        .map(|agg| score_strategy(agg, params))
        .collect();

    apply_volatility_clamp(&mut entries);
    apply_dominance_cap(&mut entries, params.dominance_cap);

    for w in entries.iter_mut() {
        if w.score < params.min_floor {
            w.rationale.push(format!(
                "floor: {:.4} raised to {:.2}",
                w.score, params.min_floor
            ));
            w.score = params.min_floor;
            w.floored = true;
        } else {
            w.rationale.push(format!(
                "floor: not applied, {:.4} >= {:.2}",
                w.score, params.min_floor
            ));
        }
    }

    let scores: Vec<f64> = entries.iter().map(|w| w.score).collect();
    let normalized = normalize_with_floor(&scores, params.min_floor);
    let total: f64 = scores.iter().sum();
    for (w, weight) in entries.iter_mut().zip(normalized) {
        let proportional = if total > 0.0 { w.score / total } else { 0.0 };
        if weight > proportional + 1e-12 && !w.floored {
            w.floored = true;
            w.rationale.push(format!(
                "normalization floor: proportional share {:.4} pinned to {:.4}",
                proportional, weight
            ));
        }
        w.final_weight = weight;
        w.rationale
            .push(format!("normalized: {:.4} / {:.4} -> {:.4}", w.score, total, weight));
    }

    let checksum: f64 = entries.iter().map(|w| w.final_weight).sum();
    if (checksum - 1.0).abs() > NORMALIZATION_TOLERANCE {
        tracing::error!(
            "Weight normalization drift: checksum {} over {} strategies",
            checksum,
            entries.len()
        );
        return Err(GovernanceError::NormalizationDrift {
            checksum,
            tolerance: NORMALIZATION_TOLERANCE,
        });
    }

    let gated_strategies = entries
        .iter()
        .filter(|w| w.early_gated)
        .map(|w| w.strategy.clone())
        .collect();

    Ok(WeightArtifact {
        strategies: entries,
        checksum,
        metadata: ArtifactMetadata {
            gated_strategies,
            parameters: params.clone(),
            seed,
            computed_at: Utc::now(),
        },
    })
}

/// Steps 1-3: gating, base score and spread modifier
fn score_strategy(agg: &StrategyAggregate, params: &TrackerParams) -> StrategyWeight {
    let spread = if agg.samples > 0 {
        agg.p90_effectiveness - agg.avg_effectiveness
    } else {
        0.0
    };

    let mut w = StrategyWeight {
        strategy: agg.strategy.clone(),
        samples: agg.samples,
        decisions_count: agg.decisions_count,
        decay_score: agg.decay_score,
        avg_effectiveness: agg.avg_effectiveness,
        p90_effectiveness: agg.p90_effectiveness,
        spread,
        early_gated: false,
        base_score: 0.0,
        modified_score: 0.0,
        score: 0.0,
        volatility_clamped: false,
        dominance_capped: false,
        floored: false,
        final_weight: 0.0,
        rationale: Vec::new(),
    };

    if agg.samples < params.min_samples {
        w.early_gated = true;
        w.base_score = params.neutral_base;
        w.modified_score = params.neutral_base;
        w.score = params.neutral_base;
        w.rationale.push(format!(
            "early gating: {} of {} samples, neutral base {:.2}",
            agg.samples, params.min_samples, params.neutral_base
        ));
        return w;
    }

    let avg_component = agg.avg_effectiveness / 10.0;
    w.base_score = agg.decay_score.max(avg_component);
    w.rationale.push(format!(
        "base score {:.4} = max(decay {:.4}, avg/10 {:.4})",
        w.base_score, agg.decay_score, avg_component
    ));

    w.modified_score = if spread < STABLE_SPREAD {
        w.rationale.push(format!(
            "stability boost x{:.2} (spread {:.2})",
            STABILITY_BOOST, spread
        ));
        w.base_score * STABILITY_BOOST
    } else if spread >= VOLATILE_SPREAD {
        let factor =
            (1.0 - (spread - VOLATILE_SPREAD) * VOLATILITY_PENALTY_SLOPE).max(VOLATILITY_PENALTY_MIN);
        w.rationale.push(format!(
            "volatility penalty x{:.3} (spread {:.2})",
            factor, spread
        ));
        w.base_score * factor
    } else {
        w.rationale
            .push(format!("neutral spread {:.2}, no modifier", spread));
        w.base_score
    };
    w.score = w.modified_score;

    w
}

fn is_stable(w: &StrategyWeight) -> bool {
    !w.early_gated && w.spread < STABLE_SPREAD
}

fn is_volatile(w: &StrategyWeight) -> bool {
    !w.early_gated && w.spread >= VOLATILE_SPREAD
}

/// Step 4: volatile strategies may not outrank the best stable one
fn apply_volatility_clamp(entries: &mut [StrategyWeight]) {
    let stable_max = entries
        .iter()
        .filter(|w| is_stable(w))
        .map(|w| w.score)
        .fold(None, |acc: Option<f64>, s| Some(acc.map_or(s, |m| m.max(s))));

    for w in entries.iter_mut() {
        let cap = stable_max.map(|m| m * VOLATILITY_CLAMP_RATIO);
        match cap {
            Some(cap) if is_volatile(w) && w.score > cap => {
                w.rationale.push(format!(
                    "volatility clamp: {:.4} capped at {:.4} (0.95 x stable max {:.4})",
                    w.score,
                    cap,
                    cap / VOLATILITY_CLAMP_RATIO
                ));
                w.score = cap;
                w.volatility_clamped = true;
            }
            None => w
                .rationale
                .push("volatility clamp: not applied, no stable strategy".to_string()),
            Some(cap) if is_volatile(w) => w.rationale.push(format!(
                "volatility clamp: not applied, {:.4} within {:.4}",
                w.score, cap
            )),
            Some(_) => w
                .rationale
                .push("volatility clamp: not applied, not volatile".to_string()),
        }
    }
}

/// Step 5: a lone sufficiently-sampled volatile strategy cannot dominate
fn apply_dominance_cap(entries: &mut [StrategyWeight], cap: f64) {
    let sampled = entries.iter().filter(|w| !w.early_gated).count();

    for w in entries.iter_mut() {
        if sampled == 1 && !w.early_gated && w.spread >= VOLATILE_SPREAD && w.score > cap {
            w.rationale.push(format!(
                "dominance cap: sole sampled strategy is volatile, {:.4} capped at {:.2}",
                w.score, cap
            ));
            w.score = cap;
            w.dominance_capped = true;
        } else {
            w.rationale.push(format!(
                "dominance cap: not applied ({} sampled strategies)",
                sampled
            ));
        }
    }
}

/// Proportional normalization that keeps every weight at or above `floor`.
///
/// Strategies whose share would fall below the floor are pinned to it and
/// the remaining mass is redistributed over the rest until stable. When
/// `n * floor > 1` the floor degrades to `1 / n`.
fn normalize_with_floor(scores: &[f64], floor: f64) -> Vec<f64> {
    let n = scores.len();
    if n == 0 {
        return Vec::new();
    }

    let floor = floor.min(1.0 / n as f64);
    let mut pinned = vec![false; n];

    loop {
        let pinned_count = pinned.iter().filter(|p| **p).count();
        let free_mass = 1.0 - floor * pinned_count as f64;
        let free_total: f64 = scores
            .iter()
            .zip(&pinned)
            .filter(|(_, p)| !**p)
            .map(|(s, _)| *s)
            .sum();
        let free_count = n - pinned_count;

        let weights: Vec<f64> = (0..n)
            .map(|i| {
                if pinned[i] {
                    floor
                } else if free_total > 0.0 {
                    scores[i] / free_total * free_mass
                } else {
                    free_mass / free_count as f64
                }
            })
            .collect();

        let mut changed = false;
        for i in 0..n {
            if !pinned[i] && weights[i] < floor - 1e-12 {
                pinned[i] = true;
                changed = true;
            }
        }

        if !changed {
            return weights;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agg(strategy: &str, samples: usize, decay: f64, avg: f64, p90: f64) -> StrategyAggregate {
        StrategyAggregate {
            strategy: strategy.to_string(),
            samples,
            decisions_count: samples as u64,
            decay_score: decay,
            avg_effectiveness: avg,
            p90_effectiveness: p90,
        }
    }

    fn assert_invariants(artifact: &WeightArtifact) {
        let sum: f64 = artifact.strategies.iter().map(|w| w.final_weight).sum();
        assert!((sum - 1.0).abs() <= 1e-6, "sum was {}", sum);
        assert!((artifact.checksum - 1.0).abs() <= 1e-6);
        for w in &artifact.strategies {
            assert!(w.final_weight >= MIN_FLOOR - 1e-12, "{} below floor", w.strategy);
        }
    }

    #[test]
    fn test_all_gated_is_uniform() {
        let aggs = vec![agg("A", 0, 0.0, 0.0, 0.0), agg("B", 2, 0.1, 5.0, 6.0), agg("C", 4, 0.2, 3.0, 3.0)];
        let artifact = compute_weight_artifact(&aggs, &TrackerParams::default(), None).unwrap();
        assert_invariants(&artifact);
        for w in &artifact.strategies {
            assert!(w.early_gated);
            assert!((w.final_weight - 1.0 / 3.0).abs() < 1e-12);
        }
        assert_eq!(artifact.metadata.gated_strategies.len(), 3);
    }

    #[test]
    fn test_base_score_uses_max_of_decay_and_avg() {
        let aggs = vec![agg("A", 10, 0.9, 5.0, 8.0), agg("B", 10, 0.1, 5.0, 8.0)];
        let artifact = compute_weight_artifact(&aggs, &TrackerParams::default(), None).unwrap();
        assert!((artifact.get("A").unwrap().base_score - 0.9).abs() < 1e-12);
        assert!((artifact.get("B").unwrap().base_score - 0.5).abs() < 1e-12);
        assert_invariants(&artifact);
    }

    #[test]
    fn test_spread_modifiers() {
        let aggs = vec![
            agg("STABLE", 10, 0.0, 6.0, 7.0),
            agg("NEUTRAL", 10, 0.0, 6.0, 9.0),
            agg("VOLATILE", 10, 0.0, 4.0, 10.0),
        ];
        let artifact = compute_weight_artifact(&aggs, &TrackerParams::default(), None).unwrap();
        let stable = artifact.get("STABLE").unwrap();
        assert!((stable.modified_score - 0.6 * 1.05).abs() < 1e-12);
        let neutral = artifact.get("NEUTRAL").unwrap();
        assert!((neutral.modified_score - 0.6).abs() < 1e-12);
        let volatile = artifact.get("VOLATILE").unwrap();
        // spread 6 -> factor 1 - 2 * 0.08
        assert!((volatile.modified_score - 0.4 * 0.84).abs() < 1e-12);
        assert!(volatile.rationale.iter().any(|r| r.contains("volatility penalty")));
    }

    #[test]
    fn test_volatility_penalty_bottoms_out() {
        let aggs = vec![agg("WILD", 10, 0.0, 1.0, 10.0), agg("OTHER", 10, 0.0, 5.0, 6.0)];
        let artifact = compute_weight_artifact(&aggs, &TrackerParams::default(), None).unwrap();
        let wild = artifact.get("WILD").unwrap();
        assert!((wild.modified_score - wild.base_score * 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_volatility_clamp_caps_volatile_above_stable() {
        // volatile 0.9 * 0.96 penalty = 0.864 > 0.95 * 0.525
        let aggs = vec![agg("STABLE", 10, 0.0, 5.0, 6.0), agg("VOLATILE", 10, 0.9, 5.0, 9.5)];
        let artifact = compute_weight_artifact(&aggs, &TrackerParams::default(), None).unwrap();
        let volatile = artifact.get("VOLATILE").unwrap();
        assert!(volatile.volatility_clamped);
        assert!((volatile.score - 0.525 * 0.95).abs() < 1e-12);
        assert!(artifact.get("STABLE").unwrap().final_weight > volatile.final_weight);
        assert_invariants(&artifact);
    }

    #[test]
    fn test_dominance_cap_for_lone_volatile_strategy() {
        let aggs = vec![agg("SOLO", 10, 0.8, 5.0, 9.5), agg("NEW", 1, 0.0, 5.0, 5.0)];
        let artifact = compute_weight_artifact(&aggs, &TrackerParams::default(), None).unwrap();
        let solo = artifact.get("SOLO").unwrap();
        assert!(solo.dominance_capped);
        assert!((solo.score - 0.4).abs() < 1e-12);
        assert_invariants(&artifact);
    }

    #[test]
    fn test_dominance_cap_skipped_with_two_sampled() {
        let aggs = vec![agg("A", 10, 0.8, 5.0, 9.5), agg("B", 10, 0.8, 5.0, 9.5)];
        let artifact = compute_weight_artifact(&aggs, &TrackerParams::default(), None).unwrap();
        assert!(artifact.strategies.iter().all(|w| !w.dominance_capped));
    }

    #[test]
    fn test_floor_applies_to_low_scores() {
        let aggs = vec![agg("LOW", 10, 0.0, 0.5, 0.5), agg("HIGH", 10, 0.0, 9.0, 9.0)];
        let artifact = compute_weight_artifact(&aggs, &TrackerParams::default(), None).unwrap();
        let low = artifact.get("LOW").unwrap();
        assert!(low.floored);
        assert_eq!(low.score, MIN_FLOOR);
        assert_invariants(&artifact);
    }

    #[test]
    fn test_normalization_floor_redistributes_mass() {
        let aggs = vec![
            agg("LOW", 10, 0.0, 0.5, 0.5),
            agg("A", 10, 1.0, 9.0, 9.0),
            agg("B", 10, 1.0, 9.0, 9.0),
            agg("C", 10, 1.0, 9.0, 9.0),
        ];
        let artifact = compute_weight_artifact(&aggs, &TrackerParams::default(), None).unwrap();
        assert_invariants(&artifact);
        let low = artifact.get("LOW").unwrap();
        assert!((low.final_weight - MIN_FLOOR).abs() < 1e-12);
        let a = artifact.get("A").unwrap().final_weight;
        assert!((a - (1.0 - MIN_FLOOR) / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_floor_degrades_when_infeasible() {
        let aggs: Vec<StrategyAggregate> = (0..8)
            .map(|i| agg(&format!("S{i}"), 10, 0.1 * i as f64, 5.0, 5.5))
            .collect();
        let artifact = compute_weight_artifact(&aggs, &TrackerParams::default(), None).unwrap();
        let sum: f64 = artifact.strategies.iter().map(|w| w.final_weight).sum();
        assert!((sum - 1.0).abs() < 1e-9);
        for w in &artifact.strategies {
            assert!((w.final_weight - 0.125).abs() < 1e-12);
        }
    }

    #[test]
    fn test_every_stage_leaves_rationale() {
        let aggs = vec![agg("A", 10, 0.5, 7.0, 7.0), agg("B", 0, 0.0, 0.0, 0.0)];
        let artifact = compute_weight_artifact(&aggs, &TrackerParams::default(), Some(9)).unwrap();
        let stages = ["volatility clamp", "dominance cap", "floor", "normalized"];

        let a = artifact.get("A").unwrap();
        assert!(a.rationale.iter().any(|r| r.starts_with("base score")));
        assert!(a.rationale.iter().any(|r| r.starts_with("stability boost")));
        for stage in stages {
            assert!(
                a.rationale.iter().any(|r| r.starts_with(stage)),
                "A missing {} in {:?}",
                stage,
                a.rationale
            );
        }
        assert!(a.rationale.contains(&"volatility clamp: not applied, not volatile".to_string()));

        let b = artifact.get("B").unwrap();
        assert!(b.rationale[0].starts_with("early gating"));
        for stage in stages {
            assert!(b.rationale.iter().any(|r| r.starts_with(stage)), "B missing {}", stage);
        }
        assert!(b.rationale.iter().any(|r| r.starts_with("floor: not applied")));
        assert_eq!(artifact.metadata.seed, Some(9));
    }

    #[test]
    fn test_normalize_with_floor_plain_proportional() {
        let weights = normalize_with_floor(&[1.0, 1.0, 2.0], 0.15);
        assert_eq!(weights, vec![0.25, 0.25, 0.5]);
    }
}
