use rand::Rng;
use tracing::{debug, instrument, trace};

use crate::core::models::atom::{Atom, TriangulationKind};
use crate::engine::config::TrialCounts;
use crate::engine::error::EngineError;
use crate::engine::relax::relax_worst;
use crate::engine::structure::Cluster;
use crate::engine::triangulation;
use crate::engine::utils::sampling::{cost_to_fitness, weighted_index};

/// Candidate budget of the good-neighbor bootstrap.
const LOOKOUT_TRIALS: usize = 1500;

/// Accepted and attempted candidate counts per triangulation type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvolveOutcome {
    pub accepted: [usize; TriangulationKind::COUNT],
    pub attempted: [usize; TriangulationKind::COUNT],
}

impl EvolveOutcome {
    pub fn total_accepted(&self) -> usize {
        self.accepted.iter().sum()
    }
}

/// Grows the structure by one or more atoms.
///
/// Candidates are triangulated from fitness-weighted anchors, filtered
/// through the atom filters and a moving cost cutoff, and accepted with
/// probability proportional to fitness.  With `promote_jump` the loop
/// keeps accepting until the candidate pool drains or the structure
/// fills up.
#[instrument(skip_all, name = "evolve_task")]
pub fn run<S, R>(
    cluster: &mut S,
    rng: &mut R,
    trials: &TrialCounts,
) -> Result<EvolveOutcome, EngineError>
where
    S: Cluster + ?Sized,
    R: Rng,
{
    let mut outcome = EvolveOutcome::default();
    if cluster.is_full() {
        return Err(EngineError::InvalidStructure(
            "a full structure cannot evolve".into(),
        ));
    }
    let config = cluster.config().clone();
    let atom_count = cluster.count_atoms();

    // trivial case: seed the origin
    if atom_count == 0 {
        cluster.add_at(0.0, 0.0, 0.0)?;
        let linear = TriangulationKind::Linear.index();
        outcome.accepted[linear] = 1;
        outcome.attempted[linear] = 1;
        cluster.normalize();
        return Ok(outcome);
    }

    let lookout = config.lookout_prob > 0.0
        && (1..=2).contains(&atom_count)
        && rng.gen::<f64>() < config.lookout_prob;

    let mut candidates: Vec<Atom> = Vec::new();
    match (atom_count, lookout) {
        (1, true) => {
            triangulation::second_atom_candidates(cluster, rng, LOOKOUT_TRIALS, &mut candidates)?;
        }
        (2, true) => {
            triangulation::third_atom_candidates(cluster, rng, LOOKOUT_TRIALS, &mut candidates)?;
        }
        _ => {
            let fitness = cost_to_fitness(&cluster.atom_costs());
            triangulation::line_candidates(cluster, &fitness, rng, trials.linear, &mut candidates)?;
            triangulation::triangle_candidates(
                cluster,
                &fitness,
                rng,
                trials.planar,
                &mut candidates,
            )?;
            triangulation::pyramid_candidates(
                cluster,
                &fitness,
                rng,
                trials.spatial,
                &mut candidates,
            )?;
        }
    }
    for candidate in &candidates {
        let kind = candidate.origin.expect("triangulated candidates are tagged");
        outcome.attempted[kind.index()] += 1;
    }
    debug!(
        candidates = candidates.len(),
        lookout, "collected trial positions"
    );

    let evolve_range = atom_count as f64 * config.tol_nbad * config.promote_frac;
    let mut hi_abad = f64::INFINITY;
    loop {
        filter_good_atoms(cluster, &mut candidates, evolve_range, hi_abad);
        if candidates.is_empty() {
            break;
        }
        let fitness: Vec<f64> = if lookout {
            let counts = triangulation::good_neighbors_count(cluster, &candidates);
            let max_count = counts.iter().copied().max().unwrap_or(0);
            counts
                .iter()
                .map(|&c| if c < max_count / 2 { 0.0 } else { c as f64 })
                .collect()
        } else {
            cost_to_fitness(&candidates.iter().map(|c| c.badness()).collect::<Vec<_>>())
        };
        let chosen_index = weighted_index(&fitness, rng)?;
        let chosen = candidates.remove(chosen_index);
        let chosen_badness = chosen.badness();
        let kind = chosen.origin.expect("triangulated candidates are tagged");

        cluster.add(chosen)?;
        outcome.accepted[kind.index()] += 1;
        hi_abad = chosen_badness + evolve_range;
        trace!(
            badness = chosen_badness,
            atoms = cluster.count_atoms(),
            "promoted candidate"
        );

        if config.promote_relax {
            relax_worst(cluster)?;
        }
        if cluster.is_full() || !config.promote_jump {
            break;
        }
        for candidate in &mut candidates {
            candidate.reset_badness();
        }
    }
    cluster.normalize();
    Ok(outcome)
}

/// Drops candidates vetoed by the atom filters, then scores the rest
/// against the structure with a moving cutoff: every complete evaluation
/// may lower the cutoff to its cost plus the evolve range, and in the
/// end only candidates at or below the final cutoff survive.
fn filter_good_atoms<S: Cluster + ?Sized>(
    cluster: &S,
    candidates: &mut Vec<Atom>,
    evolve_range: f64,
    hi_abad: f64,
) {
    if !cluster.filters().is_empty() {
        candidates.retain(|candidate| {
            cluster
                .filters()
                .iter()
                .all(|f| f.check(candidate, cluster.atoms()))
        });
    }
    let mut cutoff = hi_abad;
    for candidate in candidates.iter_mut() {
        let (cost, complete) = cluster.candidate_cost(candidate, Some(cutoff));
        candidate.inc_badness(cost);
        if complete && cost + evolve_range < cutoff {
            cutoff = cost + evolve_range;
        }
    }
    candidates.retain(|candidate| candidate.badness() <= cutoff);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::distance_table::DistanceTable;
    use crate::core::utils::numeric::EPS_COST;
    use crate::engine::config::BuildConfig;
    use crate::engine::structure::Molecule;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn empty_structure_evolves_to_a_single_origin_atom() {
        let mut m = Molecule::new(DistanceTable::new(vec![1.0, 1.0, 2.0]).unwrap());
        let mut rng = StdRng::seed_from_u64(21);
        let outcome = run(&mut m, &mut rng, &TrialCounts::default()).unwrap();
        assert_eq!(m.count_atoms(), 1);
        assert_eq!(m.atoms()[0].position, nalgebra::Point3::origin());
        assert_eq!(outcome.accepted, [1, 0, 0]);
        assert_eq!(outcome.attempted, [1, 0, 0]);
    }

    #[test]
    fn full_structure_refuses_to_evolve() {
        let table = DistanceTable::new(vec![1.0, 1.0, 1.0]).unwrap();
        let mut m = Molecule::new(table);
        m.add_at(0.0, 0.0, 0.0).unwrap();
        m.add_at(1.0, 0.0, 0.0).unwrap();
        m.add_at(0.5, 0.75f64.sqrt(), 0.0).unwrap();
        let mut rng = StdRng::seed_from_u64(22);
        assert!(matches!(
            run(&mut m, &mut rng, &TrialCounts::default()),
            Err(EngineError::InvalidStructure(_))
        ));
    }

    #[test]
    fn a_unit_triangle_grows_from_its_distances() {
        // three atoms at mutual distance 1.0 are fully determined
        let table = DistanceTable::new(vec![1.0, 1.0, 1.0]).unwrap();
        let mut m = Molecule::new(table);
        let mut rng = StdRng::seed_from_u64(23);
        let trials = TrialCounts::default();
        for _ in 0..3 {
            run(&mut m, &mut rng, &trials).unwrap();
            if m.is_full() {
                break;
            }
        }
        assert!(m.is_full());
        assert!(m.badness() < 1e-6, "badness {}", m.badness());
    }

    #[test]
    fn promote_jump_accepts_several_atoms_per_call() {
        let table = DistanceTable::new(vec![1.0; 6]).unwrap();
        let mut m = Molecule::new(table);
        m.add_at(0.0, 0.0, 0.0).unwrap();
        let mut rng = StdRng::seed_from_u64(24);
        let outcome = run(&mut m, &mut rng, &TrialCounts::default()).unwrap();
        // the tetrahedron distance set lets evolve chain several perfect
        // placements in one call
        assert!(outcome.total_accepted() >= 1);
        assert_eq!(
            m.count_atoms(),
            1 + outcome.total_accepted(),
            "accepted counts must match growth"
        );
    }

    #[test]
    fn attempted_counts_cover_all_candidate_kinds() {
        let table = DistanceTable::new(vec![1.0; 6]).unwrap();
        let mut m = Molecule::new(table);
        m.add_at(0.0, 0.0, 0.0).unwrap();
        m.add_at(1.0, 0.0, 0.0).unwrap();
        m.add_at(0.5, 0.75f64.sqrt(), 0.0).unwrap();
        let mut rng = StdRng::seed_from_u64(25);
        let outcome = run(&mut m, &mut rng, &TrialCounts::default()).unwrap();
        // with three atoms present all three generators contribute
        assert!(outcome.attempted[0] > 0);
        assert!(outcome.attempted[1] > 0);
        assert!(outcome.attempted[2] > 0);
    }

    #[test]
    fn lookout_bootstrap_enumerates_second_atoms() {
        let mut config = BuildConfig::default();
        config.lookout_prob = 1.0;
        let table = DistanceTable::new(vec![1.0, 1.0, 1.0]).unwrap();
        let mut m = Molecule::with_config(table, config);
        m.add_at(0.0, 0.0, 0.0).unwrap();
        let mut rng = StdRng::seed_from_u64(26);
        let outcome = run(&mut m, &mut rng, &TrialCounts::default()).unwrap();
        assert_eq!(m.count_atoms(), 2);
        assert_eq!(outcome.total_accepted(), 1);
        // the accepted second atom realizes a target distance exactly
        assert!(m.badness() < EPS_COST);
    }
}
