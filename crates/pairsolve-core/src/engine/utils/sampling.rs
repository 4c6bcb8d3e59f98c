use rand::{distributions::WeightedIndex, prelude::*};
use thiserror::Error;

use crate::core::utils::numeric::EPS_COST;

#[derive(Debug, Error)]
pub enum SamplingError {
    #[error("input weight list is empty, cannot perform sampling")]
    EmptyWeights,

    #[error("requested {requested} picks from only {available} candidates")]
    NotEnoughCandidates { requested: usize, available: usize },

    #[error("failed to create weighted distribution: {source}")]
    Distribution {
        #[from]
        source: rand::distributions::WeightedError,
    },
}

/// Samples one index with probability proportional to its weight.
///
/// A zero total weight degrades to a uniform pick; that happens
/// legitimately when every candidate is equally (un)fit.
pub fn weighted_index(weights: &[f64], rng: &mut impl Rng) -> Result<usize, SamplingError> {
    if weights.is_empty() {
        return Err(SamplingError::EmptyWeights);
    }
    let total: f64 = weights.iter().sum();
    if total <= f64::EPSILON {
        tracing::warn!(
            candidates = weights.len(),
            "total selection weight is near zero, falling back to a uniform pick"
        );
        return Ok(rng.gen_range(0..weights.len()));
    }
    let dist = WeightedIndex::new(weights)?;
    Ok(dist.sample(rng))
}

/// Samples `count` distinct indices without replacement, each draw
/// proportional to the remaining weights.
pub fn weighted_pick(
    weights: &[f64],
    count: usize,
    rng: &mut impl Rng,
) -> Result<Vec<usize>, SamplingError> {
    if count > weights.len() {
        return Err(SamplingError::NotEnoughCandidates {
            requested: count,
            available: weights.len(),
        });
    }
    let mut available: Vec<usize> = (0..weights.len()).collect();
    let mut picks = Vec::with_capacity(count);
    for _ in 0..count {
        let remaining: Vec<f64> = available.iter().map(|&i| weights[i]).collect();
        let at = weighted_index(&remaining, rng)?;
        picks.push(available.remove(at));
    }
    Ok(picks)
}

/// Converts per-atom costs to selection fitnesses.
///
/// Fitness is the reciprocal cost clamped at `1 / EPS_COST`; when every
/// cost is effectively zero the distribution is uniform.
pub fn cost_to_fitness(costs: &[f64]) -> Vec<f64> {
    if costs.is_empty() {
        return Vec::new();
    }
    if costs.iter().all(|&c| c <= EPS_COST) {
        return vec![1.0 / costs.len() as f64; costs.len()];
    }
    costs.iter().map(|&c| 1.0 / c.max(EPS_COST)).collect()
}

/// A random sign, +1 or -1.
pub fn plus_minus(rng: &mut impl Rng) -> f64 {
    if rng.gen::<bool>() {
        1.0
    } else {
        -1.0
    }
}
