mod crystal;
mod molecule;

pub use crystal::Crystal;
pub use molecule::Molecule;

use std::sync::Arc;

use nalgebra::{Point3, Vector3};

use crate::core::models::atom::Atom;
use crate::core::models::distance_table::DistanceTable;
use crate::core::models::lattice::Lattice;
use crate::core::utils::geometry::centroid;
use crate::core::utils::numeric::EPS_COST;
use crate::engine::config::BuildConfig;
use crate::engine::cost::LsqSystem;
use crate::engine::error::EngineError;
use crate::engine::filters::AtomFilter;

/// A structure under construction: a molecule in free space or a crystal
/// on a lattice.
///
/// The trait is the seam between the shared search machinery (evolve,
/// degenerate, triangulation, relaxation) and the two cost models.  The
/// badness bookkeeping contract: the structure badness equals the sum of
/// the live pair-grid entries, and each atom holds half of every incident
/// off-diagonal pair cost plus its own diagonal.
pub trait Cluster {
    fn atoms(&self) -> &[Atom];

    /// Mutable access to the atom records.  Positions must only change
    /// through `shift`, `add`/`pop` or the relaxation entry points, or
    /// the cached pair costs go stale.
    fn atoms_mut(&mut self) -> &mut [Atom];

    fn distance_table(&self) -> &DistanceTable;

    fn config(&self) -> &BuildConfig;

    /// The lattice for periodic structures; `None` in free space.
    fn lattice(&self) -> Option<&Lattice>;

    fn badness(&self) -> f64;

    /// Number of scored pairs: `n(n-1)/2` for a molecule, the folded
    /// image-pair count for a crystal.
    fn count_pairs(&self) -> usize;

    fn max_atom_count(&self) -> usize;

    fn dist_reuse(&self) -> bool;

    fn add(&mut self, atom: Atom) -> Result<(), EngineError>;

    fn pop(&mut self, index: usize) -> Result<Atom, EngineError>;

    fn clear(&mut self);

    /// Recomputes all pair costs and badness sums from scratch.
    fn recalculate(&mut self);

    fn shift(&mut self, dr: Vector3<f64>);

    /// Cost of a candidate atom against the whole structure.  With a
    /// cutoff the evaluation may stop early; the flag reports whether it
    /// ran to completion.
    fn candidate_cost(&self, candidate: &Atom, cutoff: Option<f64>) -> (f64, bool);

    /// Residual system of a candidate atom for the relaxation.
    fn lsq_system(&self, candidate: &Atom) -> LsqSystem;

    /// Post-mutation normalization; crystals pin the first atom to the
    /// lattice origin, molecules need nothing.
    fn normalize(&mut self);

    fn filters(&self) -> &[Arc<dyn AtomFilter>];

    // --- provided API ---

    fn count_atoms(&self) -> usize {
        self.atoms().len()
    }

    fn is_full(&self) -> bool {
        self.count_atoms() >= self.max_atom_count()
    }

    /// Badness normalized per scored pair.
    fn cost(&self) -> f64 {
        let pairs = self.count_pairs();
        if pairs > 0 {
            self.badness() / pairs as f64
        } else {
            0.0
        }
    }

    fn atom(&self, index: usize) -> Result<&Atom, EngineError> {
        self.atoms().get(index).ok_or(EngineError::OutOfRange {
            index,
            len: self.count_atoms(),
        })
    }

    fn add_at(&mut self, x: f64, y: f64, z: f64) -> Result<(), EngineError> {
        self.add(Atom::at(x, y, z))
    }

    /// Appends every atom of another structure.
    fn add_cluster(&mut self, other: &dyn Cluster) -> Result<(), EngineError> {
        for atom in other.atoms().to_vec() {
            self.add(atom)?;
        }
        Ok(())
    }

    /// Removes a set of atoms; indices refer to the current order.
    fn pop_many(&mut self, indices: &[usize]) -> Result<Vec<Atom>, EngineError> {
        let mut sorted: Vec<usize> = indices.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        let mut removed = Vec::with_capacity(sorted.len());
        for &index in sorted.iter().rev() {
            removed.push(self.pop(index)?);
        }
        Ok(removed)
    }

    /// Marks an atom immutable; fixed atoms survive degenerate and are
    /// never relaxed.
    fn fix_atom(&mut self, index: usize) -> Result<(), EngineError> {
        let len = self.count_atoms();
        match self.atoms_mut().get_mut(index) {
            Some(atom) => {
                atom.fixed = true;
                Ok(())
            }
            None => Err(EngineError::OutOfRange { index, len }),
        }
    }

    fn count_fixed(&self) -> usize {
        self.atoms().iter().filter(|a| a.fixed).count()
    }

    /// Moves the center of mass to the origin.
    fn center(&mut self) {
        if self.count_atoms() == 0 {
            return;
        }
        let positions: Vec<Point3<f64>> = self.atoms().iter().map(|a| a.position).collect();
        self.shift(-centroid(&positions).coords);
    }

    /// Per-atom badness snapshot for diagnostics.
    fn atom_costs(&self) -> Vec<f64> {
        self.atoms().iter().map(|a| a.badness()).collect()
    }
}

/// Shared badness snap: accumulated removals can leave a tiny negative
/// residue that means zero.
pub(crate) fn snap_badness(badness: &mut f64) {
    if *badness < EPS_COST {
        *badness = 0.0;
    }
}

/// Claims the smallest recycled slot, or the next fresh one.
pub(crate) fn claim_slot(
    free_slots: &mut std::collections::BTreeSet<usize>,
    atom_count: usize,
) -> usize {
    match free_slots.iter().next().copied() {
        Some(slot) => {
            free_slots.remove(&slot);
            slot
        }
        None => atom_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_slot_prefers_the_smallest_free_slot() {
        let mut free = std::collections::BTreeSet::new();
        free.insert(4);
        free.insert(2);
        assert_eq!(claim_slot(&mut free, 7), 2);
        assert_eq!(claim_slot(&mut free, 7), 4);
        assert_eq!(claim_slot(&mut free, 7), 7);
    }

    #[test]
    fn snap_clears_round_off_residue() {
        let mut b = 1e-12;
        snap_badness(&mut b);
        assert_eq!(b, 0.0);
        let mut b = 0.5;
        snap_badness(&mut b);
        assert_eq!(b, 0.5);
    }
}
