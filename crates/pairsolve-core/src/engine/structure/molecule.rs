use std::collections::BTreeSet;
use std::sync::Arc;

use nalgebra::{Point3, Vector3};
use tracing::{debug, trace};

use super::{claim_slot, snap_badness, Cluster};
use crate::core::models::atom::Atom;
use crate::core::models::distance_table::DistanceTable;
use crate::core::models::lattice::Lattice;
use crate::core::utils::numeric::penalty;
use crate::engine::config::BuildConfig;
use crate::engine::cost::molecule::MoleculeCost;
use crate::engine::cost::LsqSystem;
use crate::engine::error::EngineError;
use crate::engine::filters::AtomFilter;
use crate::engine::pair_grid::SymmetricGrid;

/// A finite cluster scored against a consumable distance table.
///
/// Without distance reuse every assigned target distance is removed from
/// the table while its pair is alive and returned when the pair breaks;
/// with reuse the table is read-only.
#[derive(Debug, Clone)]
pub struct Molecule {
    atoms: Vec<Atom>,
    table: DistanceTable,
    config: BuildConfig,
    distreuse: bool,
    max_atom_count: Option<usize>,
    badness: f64,
    partial_costs: SymmetricGrid<f64>,
    used_distances: SymmetricGrid<f64>,
    free_slots: BTreeSet<usize>,
    cost_calc: MoleculeCost,
    filters: Vec<Arc<dyn AtomFilter>>,
}

impl Molecule {
    pub fn new(table: DistanceTable) -> Self {
        Molecule::with_config(table, BuildConfig::default())
    }

    pub fn with_config(table: DistanceTable, config: BuildConfig) -> Self {
        let scale = config.cost_weights.distance;
        Molecule {
            atoms: Vec::new(),
            table,
            config,
            distreuse: false,
            max_atom_count: None,
            badness: 0.0,
            partial_costs: SymmetricGrid::new(),
            used_distances: SymmetricGrid::new(),
            free_slots: BTreeSet::new(),
            cost_calc: MoleculeCost::new(scale),
            filters: Vec::new(),
        }
    }

    pub fn from_positions(
        table: DistanceTable,
        positions: &[Point3<f64>],
    ) -> Result<Self, EngineError> {
        let mut molecule = Molecule::new(table);
        for &p in positions {
            molecule.add(Atom::new("", p))?;
        }
        Ok(molecule)
    }

    /// Switches distance-reuse mode; only legal on an empty structure,
    /// because the table bookkeeping differs between the modes.
    pub fn set_dist_reuse(&mut self, reuse: bool) -> Result<(), EngineError> {
        if !self.atoms.is_empty() {
            return Err(EngineError::InvalidStructure(
                "distance reuse cannot change while atoms are present".into(),
            ));
        }
        self.distreuse = reuse;
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
        if !self.distreuse && count > self.table.est_num_atoms() {
            return Err(EngineError::InvalidStructure(format!(
                "not enough distances for max atom count {count}; \
                 did you mean to enable distance reuse?"
            )));
        }
        self.max_atom_count = Some(count);
        Ok(())
    }

    pub fn set_filters(&mut self, filters: Vec<Arc<dyn AtomFilter>>) {
        self.filters = filters;
    }

    pub fn max_table_distance(&self) -> f64 {
        self.table.max_distance()
    }

    /// Resorts used distances to actual pair distances in rank order.
    ///
    /// The greedy per-atom assignment is order dependent; matching the
    /// sorted pair distances to the sorted used distances never increases
    /// the total badness (up to round-off).
    pub fn reassign_pairs(&mut self) {
        if self.distreuse {
            return;
        }
        let old_badness = self.badness;
        let n = self.atoms.len();
        let mut elements: Vec<(f64, usize, usize)> = Vec::with_capacity(n * (n - 1) / 2);
        let mut used: Vec<f64> = Vec::with_capacity(n * (n - 1) / 2);
        for i in 0..n {
            for j in (i + 1)..n {
                let si = self.atoms[i].pair_slot;
                let sj = self.atoms[j].pair_slot;
                let d = (self.atoms[i].position - self.atoms[j].position).norm();
                elements.push((d, si, sj));
                used.push(self.used_distances.get(si, sj));
            }
        }
        elements.sort_by(|a, b| f64::total_cmp(&a.0, &b.0));
        used.sort_by(f64::total_cmp);
        for (&(_, si, sj), &target) in elements.iter().zip(&used) {
            self.used_distances.set(si, sj, target);
        }
        self.recalculate();
        debug_assert!(
            self.badness < (1.0 + 1e-6) * old_badness + 1e-6,
            "pair reassignment must not worsen badness: {} -> {}",
            old_badness,
            self.badness
        );
        trace!(
            old = old_badness,
            new = self.badness,
            "reassigned pair distances"
        );
    }

    fn claim_grid_slot(&mut self) -> usize {
        let slot = claim_slot(&mut self.free_slots, self.atoms.len());
        let cap = self.max_atom_count();
        self.partial_costs.ensure_size(slot + 1, cap);
        if !self.distreuse {
            self.used_distances.ensure_size(slot + 1, cap);
        }
        slot
    }
}

impl Cluster for Molecule {
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
        None
    }

    fn badness(&self) -> f64 {
        self.badness
    }

    fn count_pairs(&self) -> usize {
        let n = self.atoms.len();
        n * (n - 1) / 2
    }

    fn max_atom_count(&self) -> usize {
        self.max_atom_count
            .unwrap_or_else(|| self.table.est_num_atoms())
    }

    fn dist_reuse(&self) -> bool {
        self.distreuse
    }

    fn add(&mut self, atom: Atom) -> Result<(), EngineError> {
        if self.is_full() {
            return Err(EngineError::InvalidStructure(
                "cannot add an atom to a full structure".into(),
            ));
        }
        let mut atom = atom;
        atom.reset_badness();
        atom.pair_slot = self.claim_grid_slot();

        let eval = self
            .cost_calc
            .evaluate(&self.atoms, &self.table, &atom.position, self.distreuse, None);
        debug_assert!(eval.complete);
        debug_assert_eq!(eval.partial_costs.len(), self.atoms.len());

        for (k, existing) in self.atoms.iter_mut().enumerate() {
            let pair_cost = eval.partial_costs[k];
            self.partial_costs
                .set(atom.pair_slot, existing.pair_slot, pair_cost);
            existing.inc_badness(pair_cost / 2.0);
            atom.inc_badness(pair_cost / 2.0);
        }
        self.badness += eval.total_cost;
        snap_badness(&mut self.badness);

        if !self.distreuse {
            for assignment in &eval.assignments {
                let other_slot = self.atoms[assignment.atom_index].pair_slot;
                self.used_distances.set(
                    atom.pair_slot,
                    other_slot,
                    self.table.get(assignment.distance_index),
                );
            }
            let mut consumed: Vec<usize> = eval
                .assignments
                .iter()
                .map(|a| a.distance_index)
                .collect();
            consumed.sort_unstable();
            for &index in consumed.iter().rev() {
                self.table.remove(index);
            }
        }

        trace!(
            cost = eval.total_cost,
            atoms = self.atoms.len() + 1,
            "added atom"
        );
        self.atoms.push(atom);
        if self.is_full() {
            self.reassign_pairs();
        }
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
            if k == index {
                continue;
            }
            let pair_cost = self.partial_costs.get(slot, self.atoms[k].pair_slot);
            let half = pair_cost / 2.0;
            self.atoms[k].dec_badness(half);
            self.atoms[index].dec_badness(half);
            self.badness -= pair_cost;
        }
        if !self.distreuse {
            for k in 0..self.atoms.len() {
                if k == index {
                    continue;
                }
                let other_slot = self.atoms[k].pair_slot;
                let used = self.used_distances.get(slot, other_slot);
                if used > 0.0 {
                    self.table.return_back(used);
                }
                self.used_distances.set(slot, other_slot, 0.0);
            }
        }
        snap_badness(&mut self.badness);
        self.free_slots.insert(slot);
        Ok(self.atoms.remove(index))
    }

    fn clear(&mut self) {
        if !self.distreuse {
            let n = self.atoms.len();
            for i in 0..n {
                for j in (i + 1)..n {
                    let si = self.atoms[i].pair_slot;
                    let sj = self.atoms[j].pair_slot;
                    let used = self.used_distances.get(si, sj);
                    if used > 0.0 {
                        self.table.return_back(used);
                    }
                    self.used_distances.set(si, sj, 0.0);
                }
            }
        }
        self.atoms.clear();
        self.free_slots.clear();
        self.badness = 0.0;
    }

    fn recalculate(&mut self) {
        let n = self.atoms.len();
        let mut entries: Vec<(usize, usize, f64)> = Vec::with_capacity(n * (n - 1) / 2);
        for i in 0..n {
            for j in (i + 1)..n {
                let si = self.atoms[i].pair_slot;
                let sj = self.atoms[j].pair_slot;
                let d = (self.atoms[i].position - self.atoms[j].position).norm();
                let pair_cost = if self.distreuse {
                    let target = self.table.get(self.table.find_nearest(d));
                    self.cost_calc.scale * penalty(d - target)
                } else {
                    let target = self.used_distances.get(si, sj);
                    if target > 0.0 {
                        self.cost_calc.scale * penalty(d - target)
                    } else {
                        0.0
                    }
                };
                self.partial_costs.set(si, sj, pair_cost);
                entries.push((i, j, pair_cost));
            }
        }
        self.badness = 0.0;
        for atom in &mut self.atoms {
            atom.reset_badness();
        }
        for (i, j, pair_cost) in entries {
            let half = pair_cost / 2.0;
            self.atoms[i].inc_badness(half);
            self.atoms[j].inc_badness(half);
            self.badness += pair_cost;
        }
        snap_badness(&mut self.badness);
        debug!(badness = self.badness, atoms = n, "recalculated molecule");
    }

    fn shift(&mut self, dr: Vector3<f64>) {
        for atom in &mut self.atoms {
            atom.translate(dr);
        }
    }

    fn candidate_cost(&self, candidate: &Atom, cutoff: Option<f64>) -> (f64, bool) {
        let eval = self.cost_calc.evaluate(
            &self.atoms,
            &self.table,
            &candidate.position,
            self.distreuse,
            cutoff,
        );
        (eval.total_cost, eval.complete)
    }

    fn lsq_system(&self, candidate: &Atom) -> LsqSystem {
        self.cost_calc
            .lsq_system(&self.atoms, &self.table, &candidate.position, self.distreuse)
    }

    fn normalize(&mut self) {}

    fn filters(&self) -> &[Arc<dyn AtomFilter>] {
        &self.filters
    }
}

/// Structures compare by capacity and atom positions, in order.
impl PartialEq for Molecule {
    fn eq(&self, other: &Self) -> bool {
        self.max_atom_count() == other.max_atom_count() && self.atoms == other.atoms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::utils::numeric::{EPS_COST, EPS_DISTANCE};

    fn triangle_table() -> DistanceTable {
        DistanceTable::new(vec![1.0, 1.0, 1.0]).unwrap()
    }

    fn unit_triangle() -> Molecule {
        let mut m = Molecule::new(triangle_table());
        m.add_at(0.0, 0.0, 0.0).unwrap();
        m.add_at(1.0, 0.0, 0.0).unwrap();
        m.add_at(0.5, 0.75f64.sqrt(), 0.0).unwrap();
        m
    }

    #[test]
    fn perfect_triangle_has_zero_badness() {
        let m = unit_triangle();
        assert!(m.badness() < EPS_COST);
        assert!(m.is_full());
        assert!(m.distance_table().is_empty());
    }

    #[test]
    fn assigned_distances_leave_the_table() {
        let mut m = Molecule::new(triangle_table());
        m.add_at(0.0, 0.0, 0.0).unwrap();
        assert_eq!(m.distance_table().len(), 3);
        m.add_at(1.0, 0.0, 0.0).unwrap();
        // one pair assigned, one distance consumed
        assert_eq!(m.distance_table().len(), 2);
    }

    #[test]
    fn add_then_pop_restores_badness_and_distances() {
        let mut m = Molecule::new(triangle_table());
        m.add_at(0.0, 0.0, 0.0).unwrap();
        m.add_at(1.0, 0.0, 0.0).unwrap();
        let badness_before = m.badness();
        let table_before = m.distance_table().values().to_vec();

        // a deliberately bad position
        m.add_at(0.3, 0.1, 0.0).unwrap();
        assert!(m.badness() > badness_before);
        m.pop(2).unwrap();

        assert!((m.badness() - badness_before).abs() < EPS_COST);
        assert_eq!(m.distance_table().values(), table_before.as_slice());
    }

    #[test]
    fn pop_rejects_out_of_range_indices() {
        let mut m = Molecule::new(triangle_table());
        m.add_at(0.0, 0.0, 0.0).unwrap();
        assert!(matches!(
            m.pop(5),
            Err(EngineError::OutOfRange { index: 5, len: 1 })
        ));
    }

    #[test]
    fn capacity_is_enforced() {
        let mut m = unit_triangle();
        assert!(matches!(
            m.add_at(9.0, 9.0, 9.0),
            Err(EngineError::InvalidStructure(_))
        ));
    }

    #[test]
    fn max_atom_count_requires_enough_distances() {
        let mut m = Molecule::new(triangle_table());
        assert_eq!(m.max_atom_count(), 3);
        assert!(m.set_max_atom_count(4).is_err());
        m.set_dist_reuse(true).unwrap();
        assert!(m.set_max_atom_count(4).is_ok());
    }

    #[test]
    fn recalculate_is_idempotent() {
        let mut m = unit_triangle();
        m.atoms_mut()[1].position.x = 1.1; // perturb through the back door
        m.recalculate();
        let first = m.badness();
        assert!(first > 0.0);
        m.recalculate();
        assert!((m.badness() - first).abs() < EPS_COST);
    }

    #[test]
    fn badness_matches_pair_grid_sum() {
        let mut m = Molecule::new(triangle_table());
        m.add_at(0.0, 0.0, 0.0).unwrap();
        m.add_at(0.9, 0.0, 0.0).unwrap();
        m.add_at(0.4, 0.8, 0.0).unwrap();
        let n = m.count_atoms();
        let mut total = 0.0;
        for i in 0..n {
            for j in (i + 1)..n {
                let pc = m
                    .partial_costs
                    .get(m.atoms()[i].pair_slot, m.atoms()[j].pair_slot);
                assert!(pc >= 0.0);
                total += pc;
            }
        }
        assert!((m.badness() - total).abs() < EPS_COST);
        // per-atom badness is half the incident pair costs
        let atom_sum: f64 = m.atoms().iter().map(|a| a.badness()).sum();
        assert!((atom_sum - total).abs() < EPS_COST);
    }

    #[test]
    fn used_distances_are_absent_from_the_table() {
        let mut m = Molecule::new(triangle_table());
        m.add_at(0.0, 0.0, 0.0).unwrap();
        m.add_at(1.05, 0.0, 0.0).unwrap();
        let used = m.used_distances.get(m.atoms()[0].pair_slot, m.atoms()[1].pair_slot);
        assert!(used > 0.0);
        // exactly one 1.0 was consumed
        assert_eq!(m.distance_table().values(), &[1.0, 1.0]);
    }

    #[test]
    fn reassign_pairs_never_worsens_badness() {
        let mut m = Molecule::new(DistanceTable::new(vec![1.0, 1.0, 1.0, 1.4, 1.4, 2.0]).unwrap());
        m.add_at(0.0, 0.0, 0.0).unwrap();
        m.add_at(1.38, 0.0, 0.0).unwrap();
        m.add_at(0.7, 0.9, 0.0).unwrap();
        m.add_at(0.7, 0.3, 0.8).unwrap();
        let before = m.badness();
        m.reassign_pairs();
        assert!(m.badness() <= (1.0 + 1e-6) * before + 1e-6);
    }

    #[test]
    fn clear_returns_all_distances() {
        let mut m = unit_triangle();
        assert!(m.distance_table().is_empty());
        m.clear();
        assert_eq!(m.count_atoms(), 0);
        assert_eq!(m.badness(), 0.0);
        assert_eq!(m.distance_table().len(), 3);
    }

    #[test]
    fn shift_round_trip_restores_coordinates() {
        let mut m = unit_triangle();
        let original: Vec<_> = m.atoms().iter().map(|a| a.position).collect();
        let dv = Vector3::new(0.3, -1.2, 2.5);
        m.shift(dv);
        m.shift(-dv);
        for (a, o) in m.atoms().iter().zip(&original) {
            assert!((a.position - o).norm() < EPS_DISTANCE);
        }
        // translation leaves the cost untouched
        assert!(m.badness() < EPS_COST);
    }

    #[test]
    fn center_moves_the_centroid_to_the_origin() {
        let mut m = unit_triangle();
        m.shift(Vector3::new(5.0, 5.0, 5.0));
        m.center();
        let centroid: Vector3<f64> = m
            .atoms()
            .iter()
            .fold(Vector3::zeros(), |acc, a| acc + a.position.coords)
            / m.count_atoms() as f64;
        assert!(centroid.norm() < EPS_DISTANCE);
    }

    #[test]
    fn copies_compare_equal_and_share_badness() {
        let m = unit_triangle();
        let copy = m.clone();
        assert_eq!(m, copy);
        assert!((m.badness() - copy.badness()).abs() < EPS_COST);
    }

    #[test]
    fn slot_recycling_hands_out_the_smallest_slot() {
        let mut m = Molecule::new(DistanceTable::new(vec![1.0; 6]).unwrap());
        m.add_at(0.0, 0.0, 0.0).unwrap();
        m.add_at(1.0, 0.0, 0.0).unwrap();
        m.add_at(0.5, 0.8, 0.0).unwrap();
        let freed = m.atoms()[1].pair_slot;
        m.pop(1).unwrap();
        m.add_at(1.0, 0.0, 0.1).unwrap();
        assert_eq!(m.atoms().last().unwrap().pair_slot, freed);
    }

    #[test]
    fn add_cluster_appends_every_atom() {
        let mut target = Molecule::new(DistanceTable::new(vec![1.0; 6]).unwrap());
        target.add_at(0.0, 0.0, 0.0).unwrap();

        let donor = {
            let mut m = Molecule::new(DistanceTable::new(vec![1.0]).unwrap());
            m.set_dist_reuse(true).unwrap();
            m.set_max_atom_count(2).unwrap();
            m.add_at(1.0, 0.0, 0.0).unwrap();
            m.add_at(0.5, 0.75f64.sqrt(), 0.0).unwrap();
            m
        };
        target.add_cluster(&donor).unwrap();
        assert_eq!(target.count_atoms(), 3);
        assert!(target.badness() < EPS_COST);
    }

    #[test]
    fn fixed_atoms_are_counted() {
        let mut m = unit_triangle();
        assert_eq!(m.count_fixed(), 0);
        m.fix_atom(0).unwrap();
        assert_eq!(m.count_fixed(), 1);
        assert!(m.fix_atom(7).is_err());
    }
}
