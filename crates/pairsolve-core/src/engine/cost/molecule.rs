use nalgebra::Point3;

use super::LsqSystem;
use crate::core::models::atom::Atom;
use crate::core::models::distance_table::DistanceTable;
use crate::core::utils::numeric::{penalty, EPS_DISTANCE};

/// One target distance handed to one structure pair during an evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairAssignment {
    pub distance_index: usize,
    pub atom_index: usize,
}

/// Result of scoring a candidate position against a molecule.
#[derive(Debug, Clone, Default)]
pub struct MoleculeEvaluation {
    /// Cost contribution of the pair with each existing atom.
    pub partial_costs: Vec<f64>,
    pub total_cost: f64,
    /// False when the evaluation short-circuited at the cutoff; the
    /// partial data must not be used for bookkeeping in that case.
    pub complete: bool,
    /// Consumed target distances, in atom order; empty with distance
    /// reuse.
    pub assignments: Vec<PairAssignment>,
}

/// Free-space candidate cost.
///
/// Each pair distance is matched greedily against the nearest target
/// distance; without distance reuse a target entry can serve only one
/// pair per evaluation.
#[derive(Debug, Clone)]
pub struct MoleculeCost {
    /// Weight applied to every pair penalty.
    pub scale: f64,
}

impl MoleculeCost {
    pub fn new(scale: f64) -> Self {
        MoleculeCost { scale }
    }

    /// Scores `position` against every atom of the structure.
    ///
    /// With `cutoff` set, the evaluation stops as soon as the running
    /// total exceeds it and returns the partial sum with
    /// `complete == false`.
    pub fn evaluate(
        &self,
        atoms: &[Atom],
        table: &DistanceTable,
        position: &Point3<f64>,
        reuse: bool,
        cutoff: Option<f64>,
    ) -> MoleculeEvaluation {
        let mut eval = MoleculeEvaluation {
            partial_costs: Vec::with_capacity(atoms.len()),
            total_cost: 0.0,
            complete: true,
            assignments: Vec::new(),
        };
        let mut used = vec![false; if reuse { 0 } else { table.len() }];
        for (atom_index, atom) in atoms.iter().enumerate() {
            let d = (position - atom.position).norm();
            let matched = if reuse {
                Some(table.find_nearest(d))
            } else {
                nearest_free(table.values(), &used, d)
            };
            let Some(distance_index) = matched else {
                // more pairs than remaining target distances
                break;
            };
            let cost = self.scale * penalty(d - table.get(distance_index));
            if !reuse {
                used[distance_index] = true;
                eval.assignments.push(PairAssignment {
                    distance_index,
                    atom_index,
                });
            }
            eval.partial_costs.push(cost);
            eval.total_cost += cost;
            if let Some(limit) = cutoff {
                if eval.total_cost > limit && atom_index + 1 < atoms.len() {
                    eval.complete = false;
                    break;
                }
            }
        }
        eval
    }

    /// Residuals `d - d*` and rows `(r - r_k) / d`, weighted by the
    /// square root of the scale.
    pub fn lsq_system(
        &self,
        atoms: &[Atom],
        table: &DistanceTable,
        position: &Point3<f64>,
        reuse: bool,
    ) -> LsqSystem {
        let weight = self.scale.sqrt();
        let mut system = LsqSystem::default();
        let mut used = vec![false; if reuse { 0 } else { table.len() }];
        for atom in atoms {
            let dr = position - atom.position;
            let d = dr.norm();
            let matched = if reuse {
                Some(table.find_nearest(d))
            } else {
                nearest_free(table.values(), &used, d)
            };
            let Some(distance_index) = matched else {
                break;
            };
            if !reuse {
                used[distance_index] = true;
            }
            let row = if d > EPS_DISTANCE {
                dr / d * weight
            } else {
                nalgebra::Vector3::zeros()
            };
            system.push(weight * (d - table.get(distance_index)), row);
        }
        system
    }
}

/// Index of the unconsumed table entry nearest to `d`; ties toward the
/// smaller index, like `DistanceTable::find_nearest`.
fn nearest_free(values: &[f64], used: &[bool], d: f64) -> Option<usize> {
    let start = values.partition_point(|&v| v < d);
    let above = (start..values.len()).find(|&i| !used[i]);
    let below = (0..start.min(values.len())).rev().find(|&i| !used[i]);
    match (below, above) {
        (None, None) => None,
        (Some(lo), None) => Some(lo),
        (None, Some(hi)) => Some(hi),
        (Some(lo), Some(hi)) => {
            if d - values[lo] <= values[hi] - d {
                Some(lo)
            } else {
                Some(hi)
            }
        }
    }
}
