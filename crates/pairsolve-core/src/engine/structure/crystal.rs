use std::collections::BTreeSet;
use std::sync::Arc;

use nalgebra::{Point3, Vector3};
use tracing::{debug, trace};

use super::{claim_slot, snap_badness, Cluster};
use crate::core::models::atom::Atom;
use crate::core::models::distance_table::DistanceTable;
use crate::core::models::lattice::Lattice;
use crate::core::utils::numeric::EPS_DISTANCE;
use crate::engine::config::{AtomRadiiTable, BuildConfig};
use crate::engine::cost::crystal::CrystalCost;
use crate::engine::cost::overlap::OverlapCost;
use crate::engine::cost::LsqSystem;
use crate::engine::error::EngineError;
use crate::engine::filters::AtomFilter;
use crate::engine::pair_grid::SymmetricGrid;

/// A periodic structure scored over lattice images.
///
/// The target table is read-only (distance reuse is mandatory): the full
/// table keeps the unique target distances and the working table is its
/// crop to `[0, rmax + eps]`.  The pair grid carries a diagonal for each
/// atom's self-image cost, and the pair-count grid records how many
/// images folded into each entry.  All positions are kept wrapped inside
/// the unit cell, with fractional coordinates snapped to 0 when they sit
/// within epsilon of a cell face.
#[derive(Debug, Clone)]
pub struct Crystal {
    atoms: Vec<Atom>,
    full_table: DistanceTable,
    table: DistanceTable,
    lattice: Lattice,
    rmax: Option<f64>,
    config: BuildConfig,
    max_atom_count: Option<usize>,
    badness: f64,
    partial_costs: SymmetricGrid<f64>,
    pair_counts: SymmetricGrid<u32>,
    free_slots: BTreeSet<usize>,
    count_pairs: usize,
    cost_calc: CrystalCost,
    overlap_calc: OverlapCost,
    radii: AtomRadiiTable,
    formula: Vec<String>,
    filters: Vec<Arc<dyn AtomFilter>>,
}

impl Crystal {
    /// Builds an empty crystal over `lattice`.  The target table is
    /// reduced to its unique distances and cropped to the cutoff.
    pub fn new(target: &DistanceTable, lattice: Lattice) -> Result<Self, EngineError> {
        Crystal::with_config(target, lattice, BuildConfig::default())
    }

    pub fn with_config(
        target: &DistanceTable,
        lattice: Lattice,
        config: BuildConfig,
    ) -> Result<Self, EngineError> {
        let full_table = DistanceTable::unrestricted(target.unique())?;
        let mut crystal = Crystal {
            atoms: Vec::new(),
            table: full_table.clone(),
            full_table,
            lattice,
            rmax: None,
            max_atom_count: None,
            badness: 0.0,
            partial_costs: SymmetricGrid::new(),
            pair_counts: SymmetricGrid::new(),
            free_slots: BTreeSet::new(),
            count_pairs: 0,
            cost_calc: CrystalCost::new(config.cost_weights.distance),
            overlap_calc: OverlapCost::new(config.cost_weights.overlap),
            radii: AtomRadiiTable::new(),
            formula: Vec::new(),
            filters: Vec::new(),
            config,
        };
        crystal.refresh_derived_state()?;
        Ok(crystal)
    }

    pub fn lattice_ref(&self) -> &Lattice {
        &self.lattice
    }

    /// The working cutoff: explicit `rmax`, or the longest target
    /// distance plus epsilon.
    pub fn rmax(&self) -> f64 {
        self.rmax
            .unwrap_or(self.full_table.max_distance() + EPS_DISTANCE)
    }

    pub fn set_rmax(&mut self, rmax: f64) -> Result<(), EngineError> {
        if rmax <= 0.0 {
            return Err(EngineError::Config(format!(
                "rmax must be positive, got {rmax}"
            )));
        }
        self.rmax = Some(rmax);
        self.refresh_derived_state()?;
        self.recalculate();
        Ok(())
    }

    pub fn set_lattice(&mut self, lattice: Lattice) -> Result<(), EngineError> {
        self.lattice = lattice;
        for i in 0..self.atoms.len() {
            let rewrapped = self.wrapped(&self.atoms[i].position);
            self.atoms[i].position = rewrapped;
        }
        self.refresh_derived_state()?;
        self.recalculate();
        Ok(())
    }

    pub fn set_distance_table(&mut self, target: &DistanceTable) -> Result<(), EngineError> {
        self.full_table = DistanceTable::unrestricted(target.unique())?;
        self.refresh_derived_state()?;
        self.recalculate();
        Ok(())
    }

    pub fn set_max_atom_count(&mut self, count: usize) -> Result<(), EngineError> {
        if count < 1 {
            return Err(EngineError::InvalidStructure(format!(
                "invalid max atom count {count}"
            )));
        }
        if count < self.atoms.len() {
            return Err(EngineError::InvalidStructure(
                "structure already larger than the requested capacity".into(),
            ));
        }
        self.max_atom_count = Some(count);
        Ok(())
    }

    /// Fixes the chemical content: atom `k` of the structure carries the
    /// `k`-th species of the expanded formula, and the capacity becomes
    /// the formula size.  Only legal on an empty structure.
    pub fn set_chemical_formula(
        &mut self,
        formula: &[(String, usize)],
    ) -> Result<(), EngineError> {
        if !self.atoms.is_empty() {
            return Err(EngineError::InvalidStructure(
                "the chemical formula cannot change while atoms are present".into(),
            ));
        }
        let mut expanded = Vec::new();
        for (element, count) in formula {
            for _ in 0..*count {
                expanded.push(element.clone());
            }
        }
        if expanded.is_empty() {
            return Err(EngineError::Config("empty chemical formula".into()));
        }
        self.max_atom_count = Some(expanded.len());
        self.formula = expanded;
        Ok(())
    }

    /// Assigns per-species hard-core radii and rescores overlaps.
    pub fn fetch_atom_radii(&mut self, radii: AtomRadiiTable) {
        self.radii = radii;
        for atom in &mut self.atoms {
            atom.radius = self.radii.get(&atom.element).copied().unwrap_or(0.0);
        }
        let max_radius = self.max_radius();
        self.overlap_calc.rebuild(&self.lattice, max_radius);
        self.recalculate();
    }

    pub fn set_filters(&mut self, filters: Vec<Arc<dyn AtomFilter>>) {
        self.filters = filters;
    }

    fn max_radius(&self) -> f64 {
        self.radii.values().copied().fold(0.0, f64::max)
    }

    /// Re-crops the working table and re-enumerates image vectors.
    fn refresh_derived_state(&mut self) -> Result<(), EngineError> {
        let rmax = self.rmax();
        self.table = self.full_table.cropped(rmax + EPS_DISTANCE)?;
        self.cost_calc.rebuild(&self.lattice, 0.0, rmax);
        self.overlap_calc.rebuild(&self.lattice, self.max_radius());
        Ok(())
    }

    /// Wraps a Cartesian position into the unit cell, snapping fractional
    /// coordinates within epsilon of a cell face to 0.
    fn wrapped(&self, position: &Point3<f64>) -> Point3<f64> {
        let lat = &self.lattice;
        let mut ucl = lat.ucv_fractional(lat.fractional(position.coords));
        for i in 0..3 {
            let mut at_zero = ucl;
            at_zero[i] = 0.0;
            let mut at_one = ucl;
            at_one[i] = 1.0;
            if lat.distance(ucl, at_zero) < EPS_DISTANCE || lat.distance(ucl, at_one) < EPS_DISTANCE
            {
                ucl[i] = 0.0;
            }
        }
        Point3::from(lat.cartesian(ucl))
    }

    /// Moves the first atom to the lattice origin.
    fn shift_to_origin(&mut self) {
        let Some(first) = self.atoms.first() else {
            return;
        };
        let r0 = first.position.coords;
        if r0.norm() > EPS_DISTANCE {
            self.shift(-r0);
        }
    }

    fn species_radius(&self, atom: &Atom) -> f64 {
        self.radii.get(&atom.element).copied().unwrap_or(0.0)
    }

    /// Diagonal cost of one atom: shared self-image distance cost plus
    /// its own self-overlap.
    fn diagonal_cost(&self, radius: f64) -> (f64, u32) {
        let (distance_cost, count) = self.cost_calc.self_cost(&self.table);
        (distance_cost + self.overlap_calc.self_cost(radius), count)
    }
}

impl Cluster for Crystal {
    fn atoms(&self) -> &[Atom] {
        &self.atoms
    }

    fn atoms_mut(&mut self) -> &mut [Atom] {
        &mut self.atoms
    }

    fn distance_table(&self) -> &DistanceTable {
        &self.table
    }

    fn config(&self) -> &BuildConfig {
        &self.config
    }

    fn lattice(&self) -> Option<&Lattice> {
        Some(&self.lattice)
    }

    fn badness(&self) -> f64 {
        self.badness
    }

    fn count_pairs(&self) -> usize {
        self.count_pairs
    }

    fn max_atom_count(&self) -> usize {
        // a crystal capacity comes from the driver (atom count or
        // formula); without one the structure never reports full
        self.max_atom_count.unwrap_or(usize::MAX)
    }

    fn dist_reuse(&self) -> bool {
        true
    }

    fn add(&mut self, atom: Atom) -> Result<(), EngineError> {
        if self.is_full() {
            return Err(EngineError::InvalidStructure(
                "cannot add an atom to a full structure".into(),
            ));
        }
        let mut atom = atom;
        atom.reset_badness();
        atom.position = self.wrapped(&atom.position);
        if let Some(element) = self.formula.get(self.atoms.len()) {
            atom.element = element.clone();
        }
        atom.radius = self.species_radius(&atom);
        atom.pair_slot = {
            let slot = claim_slot(&mut self.free_slots, self.atoms.len());
            let cap = self.max_atom_count();
            self.partial_costs.ensure_size(slot + 1, cap);
            self.pair_counts.ensure_size(slot + 1, cap);
            slot
        };

        let eval = self
            .cost_calc
            .evaluate(&self.atoms, &self.table, &atom.position, None);
        debug_assert!(eval.complete);
        let overlaps = self
            .overlap_calc
            .evaluate(&self.atoms, &atom.position, atom.radius);

        for (k, existing) in self.atoms.iter_mut().enumerate() {
            let pair_cost = eval.partial_costs[k] + overlaps[k];
            self.partial_costs
                .set(atom.pair_slot, existing.pair_slot, pair_cost);
            self.pair_counts
                .set(atom.pair_slot, existing.pair_slot, eval.pair_counts[k]);
            existing.inc_badness(pair_cost / 2.0);
            atom.inc_badness(pair_cost / 2.0);
            self.badness += pair_cost;
        }
        self.count_pairs += eval.total_pairs as usize;

        let (diagonal, diagonal_count) = self.diagonal_cost(atom.radius);
        self.partial_costs
            .set(atom.pair_slot, atom.pair_slot, diagonal);
        self.pair_counts
            .set(atom.pair_slot, atom.pair_slot, diagonal_count);
        atom.inc_badness(diagonal);
        self.badness += diagonal;
        self.count_pairs += diagonal_count as usize;

        snap_badness(&mut self.badness);
        trace!(
            cost = eval.total_cost,
            pairs = self.count_pairs,
            "added crystal atom"
        );
        self.atoms.push(atom);
        Ok(())
    }

    fn pop(&mut self, index: usize) -> Result<Atom, EngineError> {
        if index >= self.atoms.len() {
            return Err(EngineError::OutOfRange {
                index,
                len: self.atoms.len(),
            });
        }
        debug_assert!(!self.atoms[index].fixed, "fixed atoms are never removed");
        let slot = self.atoms[index].pair_slot;

        for k in 0..self.atoms.len() {
            let other_slot = self.atoms[k].pair_slot;
            let pair_cost = self.partial_costs.get(slot, other_slot);
            if k == index {
                // the diagonal belongs to this atom alone
                self.atoms[index].dec_badness(pair_cost);
            } else {
                let half = pair_cost / 2.0;
                self.atoms[k].dec_badness(half);
                self.atoms[index].dec_badness(half);
            }
            self.badness -= pair_cost;
            self.count_pairs -= self.pair_counts.get(slot, other_slot) as usize;
        }
        snap_badness(&mut self.badness);
        self.free_slots.insert(slot);
        Ok(self.atoms.remove(index))
    }

    fn clear(&mut self) {
        self.atoms.clear();
        self.free_slots.clear();
        self.badness = 0.0;
        self.count_pairs = 0;
        self.partial_costs.fill(0.0);
        self.pair_counts.fill(0);
    }

    fn recalculate(&mut self) {
        self.badness = 0.0;
        self.count_pairs = 0;
        self.partial_costs.fill(0.0);
        self.pair_counts.fill(0);
        for atom in &mut self.atoms {
            atom.reset_badness();
        }
        let n = self.atoms.len();

        // diagonal self-image terms
        for i in 0..n {
            let radius = self.atoms[i].radius;
            let slot = self.atoms[i].pair_slot;
            let (diagonal, count) = self.diagonal_cost(radius);
            self.partial_costs.set(slot, slot, diagonal);
            self.pair_counts.set(slot, slot, count);
            self.atoms[i].inc_badness(diagonal);
            self.badness += diagonal;
            self.count_pairs += count as usize;
        }

        // off-diagonal image sums
        for i in 0..n {
            for j in (i + 1)..n {
                let dr = self.atoms[j].position - self.atoms[i].position;
                let (distance_cost, count) = self.cost_calc.pair_cost_count(&self.table, dr);
                let overlap = self.overlap_calc.pair_cost(
                    dr,
                    self.atoms[i].radius + self.atoms[j].radius,
                    false,
                );
                let pair_cost = distance_cost + overlap;
                let si = self.atoms[i].pair_slot;
                let sj = self.atoms[j].pair_slot;
                self.partial_costs.set(si, sj, pair_cost);
                self.pair_counts.set(si, sj, count);
                let half = pair_cost / 2.0;
                self.atoms[i].inc_badness(half);
                self.atoms[j].inc_badness(half);
                self.badness += pair_cost;
                self.count_pairs += count as usize;
            }
        }
        snap_badness(&mut self.badness);
        debug!(
            badness = self.badness,
            pairs = self.count_pairs,
            atoms = n,
            "recalculated crystal"
        );
    }

    fn shift(&mut self, dr: Vector3<f64>) {
        for i in 0..self.atoms.len() {
            let moved = self.wrapped(&(self.atoms[i].position + dr));
            self.atoms[i].position = moved;
        }
    }

    fn candidate_cost(&self, candidate: &Atom, cutoff: Option<f64>) -> (f64, bool) {
        let position = self.wrapped(&candidate.position);
        let eval = self
            .cost_calc
            .evaluate(&self.atoms, &self.table, &position, cutoff);
        if !eval.complete {
            return (eval.total_cost, false);
        }
        let radius = self.species_radius(candidate);
        let overlap: f64 = self
            .overlap_calc
            .evaluate(&self.atoms, &position, radius)
            .iter()
            .sum();
        (eval.total_cost + overlap, true)
    }

    fn lsq_system(&self, candidate: &Atom) -> LsqSystem {
        let position = self.wrapped(&candidate.position);
        let mut system = self.cost_calc.lsq_system(&self.atoms, &self.table, &position);
        let radius = self.species_radius(candidate);
        system.extend(self.overlap_calc.lsq_system(&self.atoms, &position, radius));
        system
    }

    fn normalize(&mut self) {
        self.shift_to_origin();
    }

    fn filters(&self) -> &[Arc<dyn AtomFilter>] {
        &self.filters
    }
}

/// Crystals compare by capacity and atom positions, like molecules.
impl PartialEq for Crystal {
    fn eq(&self, other: &Self) -> bool {
        self.max_atom_count == other.max_atom_count && self.atoms == other.atoms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::points_in_sphere::PointsInSphere;
    use crate::core::utils::numeric::EPS_COST;

    /// Unique pair image distances of a periodic motif, the
    /// self-consistent target for reconstruction tests.
    fn crystal_target(
        lattice: &Lattice,
        fractions: &[(f64, f64, f64)],
        rmax: f64,
    ) -> DistanceTable {
        let positions: Vec<Vector3<f64>> = fractions
            .iter()
            .map(|&(x, y, z)| lattice.cartesian(Vector3::new(x, y, z)))
            .collect();
        let images = PointsInSphere::new(0.0, rmax + lattice.uc_max_diagonal_length(), lattice)
            .cartesian_vectors(lattice);
        let mut lengths = Vec::new();
        for i in 0..positions.len() {
            for j in i..positions.len() {
                let dr = positions[j] - positions[i];
                for image in &images {
                    let d = (dr + image).norm();
                    if d > EPS_DISTANCE && d <= rmax {
                        lengths.push(d);
                    }
                }
            }
        }
        lengths.sort_by(|a, b| a.partial_cmp(b).unwrap());
        lengths.dedup_by(|a, b| (*a - *b).abs() < 1e-8);
        DistanceTable::unrestricted(lengths).unwrap()
    }

    fn bcc_crystal() -> Crystal {
        let lattice = Lattice::cubic_unit();
        let target = crystal_target(&lattice, &[(0.0, 0.0, 0.0), (0.5, 0.5, 0.5)], 1.8);
        let mut crystal = Crystal::new(&target, lattice).unwrap();
        crystal.set_rmax(1.8).unwrap();
        crystal.set_max_atom_count(2).unwrap();
        crystal.add_at(0.0, 0.0, 0.0).unwrap();
        crystal.add_at(0.5, 0.5, 0.5).unwrap();
        crystal
    }

    #[test]
    fn perfect_bcc_has_zero_badness() {
        let crystal = bcc_crystal();
        assert!(crystal.badness() < EPS_COST);
        assert!(crystal.count_pairs() > 0);
        assert!(crystal.is_full());
    }

    #[test]
    fn add_then_pop_restores_badness_and_pair_counts() {
        let mut crystal = bcc_crystal();
        crystal.pop(1).unwrap();
        let badness_before = crystal.badness();
        let pairs_before = crystal.count_pairs();

        crystal.add_at(0.4, 0.45, 0.55).unwrap();
        assert!(crystal.badness() > badness_before);
        crystal.pop(1).unwrap();

        assert!((crystal.badness() - badness_before).abs() < EPS_COST);
        assert_eq!(crystal.count_pairs(), pairs_before);
    }

    #[test]
    fn badness_matches_pair_grid_including_diagonal() {
        let mut crystal = bcc_crystal();
        // displace one atom so the costs are non-trivial
        crystal.pop(1).unwrap();
        crystal.add_at(0.45, 0.5, 0.52).unwrap();
        let mut total = 0.0;
        for i in 0..crystal.count_atoms() {
            for j in i..crystal.count_atoms() {
                let pc = crystal
                    .partial_costs
                    .get(crystal.atoms()[i].pair_slot, crystal.atoms()[j].pair_slot);
                assert!(pc >= 0.0);
                total += pc;
            }
        }
        assert!((crystal.badness() - total).abs() < EPS_COST);
    }

    #[test]
    fn positions_stay_wrapped_after_any_shift() {
        let mut crystal = bcc_crystal();
        crystal.shift(Vector3::new(0.7, -1.3, 2.9));
        for atom in crystal.atoms() {
            let frac = crystal.lattice_ref().fractional(atom.position.coords);
            for c in [frac.x, frac.y, frac.z] {
                assert!((0.0..1.0).contains(&c), "fractional coordinate {c}");
            }
        }
        // the image-folded cost is translation invariant
        assert!(crystal.badness() < EPS_COST);
    }

    #[test]
    fn wrapping_snaps_near_cell_faces_to_zero() {
        let crystal = bcc_crystal();
        let snapped = crystal.wrapped(&Point3::new(0.9999999, 0.5, 1e-9));
        assert_eq!(snapped.x, 0.0);
        assert_eq!(snapped.z, 0.0);
        assert!((snapped.y - 0.5).abs() < 1e-12);
    }

    #[test]
    fn normalize_pins_the_first_atom_to_the_origin() {
        let mut crystal = bcc_crystal();
        crystal.shift(Vector3::new(0.3, 0.3, 0.3));
        crystal.normalize();
        assert!(crystal.atoms()[0].position.coords.norm() < EPS_DISTANCE);
    }

    #[test]
    fn recalculate_is_idempotent() {
        let mut crystal = bcc_crystal();
        crystal.pop(1).unwrap();
        crystal.add_at(0.42, 0.5, 0.5).unwrap();
        crystal.recalculate();
        let first = crystal.badness();
        let pairs = crystal.count_pairs();
        assert!(first > 0.0);
        crystal.recalculate();
        assert!((crystal.badness() - first).abs() < EPS_COST);
        assert_eq!(crystal.count_pairs(), pairs);
    }

    #[test]
    fn shrinking_rmax_drops_far_pairs() {
        let mut crystal = bcc_crystal();
        let pairs_before = crystal.count_pairs();
        crystal.set_rmax(1.0).unwrap();
        assert!(crystal.count_pairs() < pairs_before);
        // a perfect structure stays perfect under a shorter cutoff
        assert!(crystal.badness() < EPS_COST);
    }

    #[test]
    fn overlap_radii_raise_the_cost_of_close_packing() {
        let mut crystal = bcc_crystal();
        assert!(crystal.badness() < EPS_COST);
        let mut radii = AtomRadiiTable::new();
        // nearest-neighbor distance is sqrt(3)/2 ~ 0.866; radius 0.5
        // makes every such contact overlap
        radii.insert(String::new(), 0.5);
        crystal.fetch_atom_radii(radii);
        assert!(crystal.badness() > EPS_COST);
        // disabling the radii restores the perfect score
        crystal.fetch_atom_radii(AtomRadiiTable::new());
        assert!(crystal.badness() < EPS_COST);
    }

    #[test]
    fn chemical_formula_labels_atoms_and_sets_capacity() {
        let lattice = Lattice::cubic_unit();
        let target = crystal_target(&lattice, &[(0.0, 0.0, 0.0), (0.5, 0.5, 0.5)], 1.8);
        let mut crystal = Crystal::new(&target, lattice).unwrap();
        crystal
            .set_chemical_formula(&[("Na".to_string(), 1), ("Cl".to_string(), 1)])
            .unwrap();
        assert_eq!(crystal.max_atom_count(), 2);
        crystal.add_at(0.0, 0.0, 0.0).unwrap();
        crystal.add_at(0.5, 0.5, 0.5).unwrap();
        assert_eq!(crystal.atoms()[0].element, "Na");
        assert_eq!(crystal.atoms()[1].element, "Cl");
        // changing the formula under live atoms is rejected
        assert!(crystal
            .set_chemical_formula(&[("K".to_string(), 2)])
            .is_err());
    }

    #[test]
    fn distance_reuse_is_mandatory() {
        let crystal = bcc_crystal();
        assert!(crystal.dist_reuse());
    }

    #[test]
    fn changing_the_lattice_rescores_the_structure() {
        let mut crystal = bcc_crystal();
        assert!(crystal.badness() < EPS_COST);
        // stretch the cell; the same fractional sites no longer realize
        // the target distances
        let stretched = Lattice::from_parameters(1.2, 1.0, 1.0, 90.0, 90.0, 90.0).unwrap();
        crystal.set_lattice(stretched).unwrap();
        assert!(crystal.badness() > EPS_COST);
    }

    #[test]
    fn swapping_the_target_table_rescores_the_structure() {
        let mut crystal = bcc_crystal();
        let wrong = DistanceTable::unrestricted(vec![0.7, 1.1]).unwrap();
        crystal.set_distance_table(&wrong).unwrap();
        assert!(crystal.badness() > EPS_COST);
    }

    #[test]
    fn copies_compare_equal() {
        let crystal = bcc_crystal();
        let copy = crystal.clone();
        assert_eq!(crystal, copy);
        assert!((crystal.badness() - copy.badness()).abs() < EPS_COST);
    }
}
