pub mod crystal;
pub mod molecule;
pub mod overlap;

use nalgebra::{Matrix3, Vector3};

/// Residuals and Jacobian rows of a candidate position, consumed by the
/// least-squares relaxation.  Each residual is a weighted distance
/// mismatch; each Jacobian row is its derivative with respect to the
/// three Cartesian coordinates.
#[derive(Debug, Clone, Default)]
pub struct LsqSystem {
    pub residuals: Vec<f64>,
    pub jacobian: Vec<Vector3<f64>>,
}

impl LsqSystem {
    pub fn push(&mut self, residual: f64, row: Vector3<f64>) {
        self.residuals.push(residual);
        self.jacobian.push(row);
    }

    pub fn extend(&mut self, other: LsqSystem) {
        self.residuals.extend(other.residuals);
        self.jacobian.extend(other.jacobian);
    }

    pub fn len(&self) -> usize {
        self.residuals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.residuals.is_empty()
    }

    /// Sum of squared residuals.
    pub fn cost(&self) -> f64 {
        self.residuals.iter().map(|r| r * r).sum()
    }

    /// Gradient `J^T r` of half the squared-residual sum.
    pub fn gradient(&self) -> Vector3<f64> {
        self.residuals
            .iter()
            .zip(&self.jacobian)
            .fold(Vector3::zeros(), |g, (&r, row)| g + row * r)
    }

    /// Normal matrix `J^T J`.
    pub fn normal_matrix(&self) -> Matrix3<f64> {
        self.jacobian
            .iter()
            .fold(Matrix3::zeros(), |h, row| h + row * row.transpose())
    }
}
