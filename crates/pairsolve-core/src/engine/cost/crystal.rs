use nalgebra::{Point3, Vector3};

use super::LsqSystem;
use crate::core::models::atom::Atom;
use crate::core::models::distance_table::DistanceTable;
use crate::core::models::lattice::Lattice;
use crate::core::models::points_in_sphere::PointsInSphere;
use crate::core::utils::numeric::{penalty, EPS_DISTANCE};

/// Result of scoring a candidate position against a crystal.
#[derive(Debug, Clone, Default)]
pub struct CrystalEvaluation {
    /// Cost folded over all lattice images of the pair with each atom.
    pub partial_costs: Vec<f64>,
    /// Number of in-range images per pair.
    pub pair_counts: Vec<u32>,
    pub total_cost: f64,
    pub total_pairs: u32,
    /// False when the evaluation short-circuited at the cutoff.
    pub complete: bool,
}

/// Periodic candidate cost.
///
/// A pair of atoms separated by `dr` interacts through every lattice
/// image `dr + L` whose length falls in `[rmin + eps, rmax]`; each image
/// distance is matched against the cropped target table.  The image
/// vectors are enumerated once out to `rmax` plus the longest cell
/// diagonal (in-cell separations can reach a full diagonal) and reused
/// for every evaluation until the lattice or the cutoff changes.
#[derive(Debug, Clone)]
pub struct CrystalCost {
    /// Weight applied to every image penalty.
    pub scale: f64,
    rmin: f64,
    rmax: f64,
    images: Vec<Vector3<f64>>,
}

impl CrystalCost {
    pub fn new(scale: f64) -> Self {
        CrystalCost {
            scale,
            rmin: 0.0,
            rmax: 0.0,
            images: Vec::new(),
        }
    }

    /// Re-enumerates the image vectors for a lattice and cutoff interval.
    pub fn rebuild(&mut self, lattice: &Lattice, rmin: f64, rmax: f64) {
        self.rmin = rmin;
        self.rmax = rmax;
        let extent = rmax + lattice.uc_max_diagonal_length();
        self.images = PointsInSphere::new(0.0, extent, lattice).cartesian_vectors(lattice);
    }

    pub fn rmax(&self) -> f64 {
        self.rmax
    }

    /// Cost and image count for one pair displacement.
    pub fn pair_cost_count(&self, table: &DistanceTable, dr: Vector3<f64>) -> (f64, u32) {
        let mut cost = 0.0;
        let mut count = 0;
        for image in &self.images {
            let d = (dr + image).norm();
            if d < self.rmin + EPS_DISTANCE || d > self.rmax {
                continue;
            }
            let dd = table.get(table.find_nearest(d)) - d;
            cost += self.scale * penalty(dd);
            count += 1;
        }
        (cost, count)
    }

    /// Cost and count of an atom against its own non-zero lattice images.
    ///
    /// Image lengths do not depend on the atom position, so this value is
    /// shared by every atom of the structure.
    pub fn self_cost(&self, table: &DistanceTable) -> (f64, u32) {
        self.pair_cost_count(table, Vector3::zeros())
    }

    /// Scores `position` against every atom; off-diagonal terms only.
    pub fn evaluate(
        &self,
        atoms: &[Atom],
        table: &DistanceTable,
        position: &Point3<f64>,
        cutoff: Option<f64>,
    ) -> CrystalEvaluation {
        let mut eval = CrystalEvaluation {
            partial_costs: Vec::with_capacity(atoms.len()),
            pair_counts: Vec::with_capacity(atoms.len()),
            total_cost: 0.0,
            total_pairs: 0,
            complete: true,
        };
        for (index, atom) in atoms.iter().enumerate() {
            let (cost, count) = self.pair_cost_count(table, position - atom.position);
            eval.partial_costs.push(cost);
            eval.pair_counts.push(count);
            eval.total_cost += cost;
            eval.total_pairs += count;
            if let Some(limit) = cutoff {
                if eval.total_cost > limit && index + 1 < atoms.len() {
                    eval.complete = false;
                    break;
                }
            }
        }
        eval
    }

    /// Residuals over every in-range image pair with every atom.
    ///
    /// Self images are omitted: their lengths are position-independent
    /// and contribute no gradient.
    pub fn lsq_system(
        &self,
        atoms: &[Atom],
        table: &DistanceTable,
        position: &Point3<f64>,
    ) -> LsqSystem {
        let weight = self.scale.sqrt();
        let mut system = LsqSystem::default();
        for atom in atoms {
            let dr = position - atom.position;
            for image in &self.images {
                let rv = dr + image;
                let d = rv.norm();
                if d < self.rmin + EPS_DISTANCE || d > self.rmax {
                    continue;
                }
                let target = table.get(table.find_nearest(d));
                system.push(weight * (d - target), rv / d * weight);
            }
        }
        system
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cubic_table(lattice: &Lattice, rmax: f64) -> DistanceTable {
        // unique image lengths of a single-atom cubic crystal
        let mut lengths: Vec<f64> = PointsInSphere::new(1e-6, rmax, lattice)
            .cartesian_vectors(lattice)
            .iter()
            .map(|v| v.norm())
            .collect();
        lengths.sort_by(|a, b| a.partial_cmp(b).unwrap());
        lengths.dedup_by(|a, b| (*a - *b).abs() < 1e-8);
        DistanceTable::unrestricted(lengths).unwrap()
    }

    #[test]
    fn perfect_lattice_has_zero_self_cost() {
        let lattice = Lattice::cubic_unit();
        let table = cubic_table(&lattice, 1.6);
        let mut cost = CrystalCost::new(1.0);
        cost.rebuild(&lattice, 0.0, 1.6);
        let (value, count) = cost.self_cost(&table);
        assert!(value < 1e-12);
        // 6 unit neighbors + 12 face diagonals within 1.6
        assert_eq!(count, 18);
    }

    #[test]
    fn pair_count_tracks_the_cutoff() {
        let lattice = Lattice::cubic_unit();
        let table = cubic_table(&lattice, 2.0);
        let mut cost = CrystalCost::new(1.0);
        cost.rebuild(&lattice, 0.0, 1.1);
        let (_, shorter) = cost.self_cost(&table);
        cost.rebuild(&lattice, 0.0, 1.5);
        let (_, longer) = cost.self_cost(&table);
        assert_eq!(shorter, 6);
        assert_eq!(longer, 18);
    }

    #[test]
    fn displaced_pair_is_penalized() {
        let lattice = Lattice::cubic_unit();
        let table = cubic_table(&lattice, 1.4);
        let mut cost = CrystalCost::new(1.0);
        cost.rebuild(&lattice, 0.0, 1.4);
        let atoms = vec![Atom::at(0.0, 0.0, 0.0)];
        let centered = cost.evaluate(&atoms, &table, &Point3::new(0.5, 0.0, 0.0), None);
        // a (0.5, 0, 0) partner has images at 0.5 and 1.118.., neither in
        // the cubic table
        assert!(centered.total_cost > 1e-4);
        assert!(centered.complete);
    }

    #[test]
    fn zero_scale_silences_the_cost_but_not_the_counts() {
        let lattice = Lattice::cubic_unit();
        let table = cubic_table(&lattice, 1.4);
        let mut cost = CrystalCost::new(0.0);
        cost.rebuild(&lattice, 0.0, 1.4);
        let (value, count) = cost.self_cost(&table);
        assert_eq!(value, 0.0);
        assert_eq!(count, 6);
    }

    #[test]
    fn lsq_gradient_vanishes_on_the_perfect_site() {
        let lattice = Lattice::cubic_unit();
        let table = cubic_table(&lattice, 1.6);
        let mut cost = CrystalCost::new(1.0);
        cost.rebuild(&lattice, 0.0, 1.6);
        let atoms = vec![Atom::at(0.0, 0.0, 0.0)];
        let system = cost.lsq_system(&atoms, &table, &Point3::new(1.0, 0.0, 0.0));
        assert!(system.cost() < 1e-12);
        assert!(system.gradient().norm() < 1e-9);
    }
}
