use nalgebra::{Point3, Vector3};

use super::LsqSystem;
use crate::core::models::atom::Atom;
use crate::core::models::lattice::Lattice;
use crate::core::models::points_in_sphere::PointsInSphere;
use crate::core::utils::numeric::{penalty, EPS_DISTANCE};

/// Hard-core repulsion between atom spheres in a crystal.
///
/// A pair of atoms with radii `r0`, `r1` at image distance `d` is
/// penalized by `(r0 + r1 - d)^2` whenever the spheres intersect.  Only
/// images shorter than twice the largest radius can contribute, which
/// bounds the enumeration.  A zero scale disables the term entirely.
#[derive(Debug, Clone)]
pub struct OverlapCost {
    pub scale: f64,
    rmax: f64,
    images: Vec<Vector3<f64>>,
}

impl OverlapCost {
    pub fn new(scale: f64) -> Self {
        OverlapCost {
            scale,
            rmax: 0.0,
            images: Vec::new(),
        }
    }

    /// Re-enumerates image vectors for a lattice and the largest atom
    /// radius present in the structure.
    pub fn rebuild(&mut self, lattice: &Lattice, max_radius: f64) {
        self.rmax = 2.0 * max_radius;
        let extent = self.rmax + lattice.uc_max_diagonal_length();
        self.images = PointsInSphere::new(0.0, extent, lattice).cartesian_vectors(lattice);
    }

    /// Overlap cost folded over the images of one pair displacement.
    ///
    /// `skip_zero` drops the zero-length image; self pairs use it so an
    /// atom does not overlap itself.
    pub fn pair_cost(&self, dr: Vector3<f64>, radius_sum: f64, skip_zero: bool) -> f64 {
        if self.scale == 0.0 || radius_sum <= 0.0 {
            return 0.0;
        }
        let mut cost = 0.0;
        for image in &self.images {
            let d = (dr + image).norm();
            if skip_zero && d < EPS_DISTANCE {
                continue;
            }
            if d < radius_sum {
                cost += self.scale * penalty(radius_sum - d);
            }
        }
        cost
    }

    /// Overlap of `position` with every atom of the structure.
    pub fn evaluate(&self, atoms: &[Atom], position: &Point3<f64>, radius: f64) -> Vec<f64> {
        atoms
            .iter()
            .map(|atom| self.pair_cost(position - atom.position, radius + atom.radius, false))
            .collect()
    }

    /// Overlap of an atom with its own non-zero images.
    pub fn self_cost(&self, radius: f64) -> f64 {
        self.pair_cost(Vector3::zeros(), 2.0 * radius, true)
    }

    /// Residual contributions for the relaxation; `r0 + r1 - d` per
    /// intersecting image.
    pub fn lsq_system(&self, atoms: &[Atom], position: &Point3<f64>, radius: f64) -> LsqSystem {
        let mut system = LsqSystem::default();
        if self.scale == 0.0 {
            return system;
        }
        let weight = self.scale.sqrt();
        for atom in atoms {
            let radius_sum = radius + atom.radius;
            if radius_sum <= 0.0 {
                continue;
            }
            let dr = position - atom.position;
            for image in &self.images {
                let rv = dr + image;
                let d = rv.norm();
                if d >= radius_sum {
                    continue;
                }
                let row = if d > EPS_DISTANCE {
                    -rv / d * weight
                } else {
                    Vector3::zeros()
                };
                system.push(weight * (radius_sum - d), row);
            }
        }
        system
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calculator(max_radius: f64) -> OverlapCost {
        let mut overlap = OverlapCost::new(1.0);
        overlap.rebuild(&Lattice::cubic_unit(), max_radius);
        overlap
    }

    #[test]
    fn separated_spheres_cost_nothing() {
        let overlap = calculator(0.2);
        let cost = overlap.pair_cost(Vector3::new(0.5, 0.0, 0.0), 0.4, false);
        assert_eq!(cost, 0.0);
    }

    #[test]
    fn intersecting_spheres_pay_the_squared_depth() {
        let overlap = calculator(0.2);
        // in a unit cell, a 0.5 separation also has a 0.5 image on the
        // other side; both intersect at radius sum 0.6
        let cost = overlap.pair_cost(Vector3::new(0.5, 0.0, 0.0), 0.6, false);
        assert!((cost - 2.0 * 0.1 * 0.1).abs() < 1e-12);
    }

    #[test]
    fn zero_scale_disables_the_term() {
        let mut overlap = OverlapCost::new(0.0);
        overlap.rebuild(&Lattice::cubic_unit(), 0.5);
        assert_eq!(overlap.pair_cost(Vector3::new(0.1, 0.0, 0.0), 1.0, false), 0.0);
    }

    #[test]
    fn self_overlap_skips_the_zero_image() {
        // radius 0.3: images at distance 1 stay clear of 2 * 0.3
        let overlap = calculator(0.3);
        assert_eq!(overlap.self_cost(0.3), 0.0);
        // radius 0.6: the six unit-cell neighbors intersect 2 * 0.6 = 1.2
        let overlap = calculator(0.6);
        let cost = overlap.self_cost(0.6);
        assert!((cost - 6.0 * 0.2 * 0.2).abs() < 1e-12);
    }

    #[test]
    fn gradient_pushes_overlapping_atoms_apart() {
        let overlap = calculator(0.4);
        let atoms = vec![Atom::at(0.0, 0.0, 0.0)];
        let mut atoms = atoms;
        atoms[0].radius = 0.4;
        let system = overlap.lsq_system(&atoms, &Point3::new(0.3, 0.0, 0.0), 0.4);
        // descending the squared residual moves the candidate along +x,
        // away from the nearer image of the neighbor at the origin
        assert!(!system.is_empty());
        assert!(system.gradient().x < 0.0);
    }
}
