use std::collections::BTreeMap;

use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::weights::WeightArtifact;

/// Result of a weighted strategy draw
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategySelection {
    pub strategy: String,
    pub weights: BTreeMap<String, f64>,
    pub artifact: WeightArtifact,
    pub seed: Option<u64>,
}

/// Draw a strategy proportionally to its final weight.
///
/// Entries are visited in artifact order, so a seeded draw against the same
/// artifact always lands on the same strategy.
pub fn draw(artifact: &WeightArtifact, seed: Option<u64>) -> Option<String> {
    let dist = WeightedIndex::new(artifact.strategies.iter().map(|w| w.final_weight)).ok()?;

    let idx = match seed {
        Some(seed) => dist.sample(&mut StdRng::seed_from_u64(seed)),
        None => dist.sample(&mut rand::thread_rng()),
    };

    artifact.strategies.get(idx).map(|w| w.strategy.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::{StrategyAggregate, TrackerParams};
    use crate::weights::compute_weight_artifact;

    fn artifact() -> WeightArtifact {
        let aggs: Vec<StrategyAggregate> = ["A", "B", "C"]
            .iter()
            .enumerate()
            .map(|(i, s)| StrategyAggregate {
                strategy: s.to_string(),
                samples: 10,
                decisions_count: 10,
                decay_score: 0.2 * (i + 1) as f64,
                avg_effectiveness: 5.0,
                p90_effectiveness: 5.5,
            })
            .collect();
        compute_weight_artifact(&aggs, &TrackerParams::default(), None).unwrap()
    }

    #[test]
    fn test_same_seed_same_pick() {
        let artifact = artifact();
        for seed in 0..50 {
            assert_eq!(draw(&artifact, Some(seed)), draw(&artifact, Some(seed)));
        }
    }

    #[test]
    fn test_unseeded_draw_returns_known_strategy() {
        let artifact = artifact();
        let pick = draw(&artifact, None).unwrap();
        assert!(artifact.get(&pick).is_some());
    }

    #[test]
    fn test_draw_frequencies_follow_weights() {
        let artifact = artifact();
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for seed in 0..3000 {
            let pick = draw(&artifact, Some(seed)).unwrap();
            *counts.entry(pick).or_default() += 1;
        }
        // every strategy keeps at least the floor share
        for w in &artifact.strategies {
            assert!(counts.get(&w.strategy).copied().unwrap_or(0) > 200);
        }
    }
}
