use nalgebra::Point3;
use rand::Rng;
use tracing::{debug, info, instrument};

use crate::engine::config::TrialCounts;
use crate::engine::error::EngineError;
use crate::engine::structure::Cluster;
use crate::engine::tasks::{degenerate, evolve};

/// Knobs of the single-structure reconstruction loop.
#[derive(Debug, Clone)]
pub struct ReconstructSettings {
    /// Evolve/degenerate steps before giving up.
    pub max_steps: usize,
    /// Candidate budget per evolve call.
    pub trials: TrialCounts,
}

impl Default for ReconstructSettings {
    fn default() -> Self {
        ReconstructSettings {
            max_steps: 10_000,
            trials: TrialCounts::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReconstructReport {
    /// Steps actually taken.
    pub steps: usize,
    /// Whether the target cost was reached.
    pub converged: bool,
    /// Best normalized cost seen on a full structure.
    pub best_cost: f64,
    /// Snapshot of the best full structure.
    pub best_positions: Vec<Point3<f64>>,
    pub promotions: usize,
    pub demotions: usize,
}

/// Builds a structure from its distance table by alternating growth and
/// pruning until the normalized cost of a full structure drops below the
/// configured badness tolerance.
///
/// This is the thin single-structure driver; population schedulers can
/// run many of these loops against independent structures.
#[instrument(skip_all, name = "reconstruct")]
pub fn reconstruct<S, R>(
    cluster: &mut S,
    rng: &mut R,
    settings: &ReconstructSettings,
) -> Result<ReconstructReport, EngineError>
where
    S: Cluster + ?Sized,
    R: Rng,
{
    if cluster.max_atom_count() == usize::MAX {
        return Err(EngineError::Config(
            "reconstruction needs an explicit atom count".into(),
        ));
    }
    let target_cost = cluster.config().tol_nbad;
    let mut report = ReconstructReport {
        steps: 0,
        converged: false,
        best_cost: f64::INFINITY,
        best_positions: Vec::new(),
        promotions: 0,
        demotions: 0,
    };
    info!(
        max_atoms = cluster.max_atom_count(),
        target_cost, "starting reconstruction"
    );

    for step in 1..=settings.max_steps {
        report.steps = step;
        if !cluster.is_full() {
            let outcome = evolve::run(cluster, rng, &settings.trials)?;
            report.promotions += outcome.total_accepted();
            if !cluster.is_full() {
                continue;
            }
        }

        let cost = cluster.cost();
        if cost < report.best_cost {
            report.best_cost = cost;
            report.best_positions = cluster.atoms().iter().map(|a| a.position).collect();
            debug!(step, cost, "new best structure");
        }
        if cost < target_cost {
            report.converged = true;
            break;
        }

        // prune a badness-weighted handful and try again
        let prune = 1 + rng.gen_range(0..2usize.min(cluster.count_atoms()));
        report.demotions += degenerate::run(cluster, rng, prune)?;
    }

    info!(
        steps = report.steps,
        converged = report.converged,
        best_cost = report.best_cost,
        "reconstruction finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::distance_table::DistanceTable;
    use crate::engine::structure::{Cluster, Molecule};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn a_triangle_is_reconstructed_from_its_distances() {
        let table = DistanceTable::new(vec![1.0, 1.0, 1.0]).unwrap();
        let mut m = Molecule::new(table);
        let mut rng = StdRng::seed_from_u64(41);
        let report = reconstruct(&mut m, &mut rng, &ReconstructSettings::default()).unwrap();
        assert!(report.converged, "no convergence in {} steps", report.steps);
        assert_eq!(report.best_positions.len(), 3);
        assert!(report.best_cost < m.config().tol_nbad);
        // the winning distances reproduce the target
        let d01 = (report.best_positions[0] - report.best_positions[1]).norm();
        assert!((d01 - 1.0).abs() < 0.1);
    }

    #[test]
    fn a_tetrahedron_is_reconstructed_from_its_distances() {
        let table = DistanceTable::new(vec![1.0; 6]).unwrap();
        let mut m = Molecule::new(table);
        let mut rng = StdRng::seed_from_u64(42);
        let settings = ReconstructSettings {
            max_steps: 2_000,
            ..ReconstructSettings::default()
        };
        let report = reconstruct(&mut m, &mut rng, &settings).unwrap();
        assert!(report.converged, "no convergence in {} steps", report.steps);
        assert_eq!(report.best_positions.len(), 4);
    }

    #[test]
    fn an_unbounded_crystal_is_rejected() {
        use crate::core::models::lattice::Lattice;
        use crate::engine::structure::Crystal;
        let table = DistanceTable::unrestricted(vec![1.0]).unwrap();
        let mut crystal = Crystal::new(&table, Lattice::cubic_unit()).unwrap();
        let mut rng = StdRng::seed_from_u64(43);
        assert!(matches!(
            reconstruct(&mut crystal, &mut rng, &ReconstructSettings::default()),
            Err(EngineError::Config(_))
        ));
    }
}
