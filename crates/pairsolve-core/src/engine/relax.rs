use nalgebra::{Matrix3, Point3, Vector3};
use tracing::{debug, trace};

use crate::core::models::atom::Atom;
use crate::core::utils::numeric::{eps_lt, EPS_COST};
use crate::engine::error::EngineError;
use crate::engine::structure::Cluster;

/// Outer improvement rounds around the least-squares solver.
const MAX_RELAXATIONS: usize = 20;
/// Iteration cap of one damped least-squares minimization.
const MAX_ITERATIONS: usize = 500;

/// Refines the position of an atom that is not part of the structure.
///
/// Each outer round re-evaluates the candidate cost with a fresh distance
/// assignment and runs a damped Gauss-Newton minimization over the three
/// coordinates; the candidate keeps a new position only while the cost
/// strictly decreases.  Free-space structures need at least 3 atoms to
/// pin a position; a periodic structure constrains it through lattice
/// images from the first atom on.
pub fn relax_external_atom<S: Cluster + ?Sized>(cluster: &S, atom: &mut Atom) {
    let enough_anchors = match cluster.lattice() {
        Some(_) => cluster.count_atoms() >= 1,
        None => cluster.count_atoms() >= 3,
    };
    if !enough_anchors {
        return;
    }
    let tol_r = cluster.config().tol_r;

    let mut trial = atom.clone();
    let mut lowest_cost = f64::INFINITY;
    for round in 0..MAX_RELAXATIONS {
        let (cost, _) = cluster.candidate_cost(&trial, None);
        if !eps_lt(cost, lowest_cost) {
            trace!(round, cost, "relaxation stopped improving");
            break;
        }
        lowest_cost = cost;
        atom.position = trial.position;
        if lowest_cost < EPS_COST {
            break;
        }
        trial.position = minimize(cluster, &trial, tol_r);
    }
    debug!(cost = lowest_cost, "relaxed external atom");
}

/// Removes atom `index`, relaxes it against the remaining structure and
/// puts it back.
pub fn relax_atom<S: Cluster + ?Sized>(cluster: &mut S, index: usize) -> Result<(), EngineError> {
    debug_assert!(
        !cluster.atom(index)?.fixed,
        "fixed atoms are never relaxed"
    );
    let mut atom = cluster.pop(index)?;
    relax_external_atom(cluster, &mut atom);
    cluster.add(atom)
}

/// Relaxes the worst non-fixed atom if it carries any badness.
pub fn relax_worst<S: Cluster + ?Sized>(cluster: &mut S) -> Result<(), EngineError> {
    let worst = cluster
        .atoms()
        .iter()
        .enumerate()
        .filter(|(_, a)| !a.fixed)
        .max_by(|(_, a), (_, b)| f64::total_cmp(&a.badness(), &b.badness()))
        .map(|(i, a)| (i, a.badness()));
    if let Some((index, badness)) = worst {
        if badness > EPS_COST {
            relax_atom(cluster, index)?;
        }
    }
    Ok(())
}

/// One damped least-squares descent (Levenberg-Marquardt style) on the
/// candidate coordinates.
///
/// Solves `(J^T J + lambda * diag(J^T J)) step = -J^T r`, shrinking the
/// damping after accepted steps and inflating it after rejected ones.
/// The step tolerance `tol_r` is the convergence control; the gradient
/// floor only short-cuts exactly solved systems.
fn minimize<S: Cluster + ?Sized>(cluster: &S, start: &Atom, tol_r: f64) -> Point3<f64> {
    let mut probe = start.clone();
    let mut lambda = 1e-3;
    let mut system = cluster.lsq_system(&probe);
    let mut cost = system.cost();
    let mut iteration = 0;

    'outer: while iteration < MAX_ITERATIONS {
        let gradient = system.gradient();
        let normal = system.normal_matrix();

        // inflate the damping until a step improves the cost
        loop {
            iteration += 1;
            let damped = normal + Matrix3::from_diagonal(&damping_diagonal(&normal, lambda));
            let Some(inverse) = damped.try_inverse() else {
                lambda *= 10.0;
                if lambda > 1e12 || iteration >= MAX_ITERATIONS {
                    break 'outer;
                }
                continue;
            };
            let step: Vector3<f64> = inverse * (-gradient);
            let mut next = probe.clone();
            next.position += step;
            let next_system = cluster.lsq_system(&next);
            let next_cost = next_system.cost();
            if next_cost < cost {
                probe = next;
                system = next_system;
                cost = next_cost;
                lambda = (lambda * 0.1).max(1e-12);
                if step.norm() <= tol_r * (probe.position.coords.norm() + tol_r)
                    || system.gradient().amax() <= EPS_COST
                {
                    break 'outer;
                }
                // fresh linearization at the accepted point
                break;
            }
            lambda *= 10.0;
            if lambda > 1e12 || iteration >= MAX_ITERATIONS {
                break 'outer;
            }
        }
    }
    trace!(iteration, cost, "least-squares descent finished");
    probe.position
}

/// Marquardt scaling: damp along the curvature diagonal, with a floor so
/// flat directions stay solvable.
fn damping_diagonal(normal: &Matrix3<f64>, lambda: f64) -> Vector3<f64> {
    let d = normal.diagonal();
    Vector3::new(
        lambda * d.x.max(1e-12),
        lambda * d.y.max(1e-12),
        lambda * d.z.max(1e-12),
    )
}
