use nalgebra::Vector3;

use super::lattice::Lattice;

/// Enumerates every lattice vector `m*a + n*b + o*c` whose Cartesian
/// length lies in `[rmin, rmax]`.
///
/// The integer search box is bounded per axis by `rmax * |a*_i|`: the i-th
/// fractional index of a vector of length `r` can be at most `r` times the
/// corresponding reciprocal vector length.  Everything inside the box is
/// checked against the norm interval, so the enumeration is finite and
/// exhaustive; the order is unspecified.
#[derive(Debug, Clone)]
pub struct PointsInSphere {
    points: Vec<(i32, i32, i32)>,
}

impl PointsInSphere {
    pub fn new(rmin: f64, rmax: f64, lattice: &Lattice) -> Self {
        let mut points = Vec::new();
        if rmax < rmin || rmax < 0.0 {
            return PointsInSphere { points };
        }
        let [ar, br, cr] = lattice.reciprocal_lengths();
        let mhi = (rmax * ar).floor() as i32;
        let nhi = (rmax * br).floor() as i32;
        let ohi = (rmax * cr).floor() as i32;
        for m in -mhi..=mhi {
            for n in -nhi..=nhi {
                for o in -ohi..=ohi {
                    let r = lattice
                        .cartesian(Vector3::new(f64::from(m), f64::from(n), f64::from(o)))
                        .norm();
                    if r >= rmin && r <= rmax {
                        points.push((m, n, o));
                    }
                }
            }
        }
        PointsInSphere { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (i32, i32, i32)> + '_ {
        self.points.iter().copied()
    }

    /// The enumerated points as Cartesian lattice vectors.
    pub fn cartesian_vectors(&self, lattice: &Lattice) -> Vec<Vector3<f64>> {
        self.points
            .iter()
            .map(|&(m, n, o)| {
                lattice.cartesian(Vector3::new(f64::from(m), f64::from(n), f64::from(o)))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cubic_shell_counts_match_brute_force() {
        let lat = Lattice::cubic_unit();
        // |r| <= 1 on the unit cubic lattice: origin plus 6 unit steps
        let sphere = PointsInSphere::new(0.0, 1.0, &lat);
        assert_eq!(sphere.len(), 7);
        // 1 <= |r| <= sqrt(2): 6 unit steps plus 12 face diagonals
        let shell = PointsInSphere::new(1.0, f64::sqrt(2.0) + 1e-9, &lat);
        assert_eq!(shell.len(), 18);
    }

    #[test]
    fn excluding_the_origin_with_a_positive_rmin() {
        let lat = Lattice::cubic_unit();
        let sphere = PointsInSphere::new(1e-6, 1.0, &lat);
        assert_eq!(sphere.len(), 6);
        assert!(sphere.iter().all(|p| p != (0, 0, 0)));
    }

    #[test]
    fn empty_interval_yields_no_points() {
        let lat = Lattice::cubic_unit();
        assert!(PointsInSphere::new(2.0, 1.0, &lat).is_empty());
    }

    #[test]
    fn triclinic_enumeration_is_exhaustive() {
        let lat = Lattice::from_parameters(1.0, 1.3, 0.9, 80.0, 95.0, 104.0).unwrap();
        let rmax = 2.5;
        let sphere = PointsInSphere::new(0.0, rmax, &lat);
        // brute force over a generous box
        let mut count = 0;
        for m in -10i32..=10 {
            for n in -10i32..=10 {
                for o in -10i32..=10 {
                    let r = lat
                        .cartesian(Vector3::new(f64::from(m), f64::from(n), f64::from(o)))
                        .norm();
                    if r <= rmax {
                        count += 1;
                    }
                }
            }
        }
        assert_eq!(sphere.len(), count);
    }
}
