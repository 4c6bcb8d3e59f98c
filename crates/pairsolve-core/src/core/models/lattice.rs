use nalgebra::{Matrix3, Vector3};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LatticeError {
    #[error("invalid lattice parameters: {0}")]
    BadParameters(String),

    #[error("lattice vectors are singular or left-handed")]
    DegenerateBase,
}

/// A crystal lattice defined by six parameters or three basis vectors.
///
/// The basis matrix stores the lattice vectors as columns in the standard
/// crystallographic placement: `a` along the x axis, `b` in the xy plane.
/// When constructed from arbitrary vectors, the rotation from the standard
/// placement to the given vectors is kept as `base_rot` (determinant +1
/// for a right-handed triple).
///
/// Fractional coordinates `u` relate to Cartesian coordinates `r` through
/// the basis: `r = base * u`, `u = recbase * r`.
#[derive(Debug, Clone, PartialEq)]
pub struct Lattice {
    a: f64,
    b: f64,
    c: f64,
    alpha: f64, // degrees
    beta: f64,
    gamma: f64,
    base: Matrix3<f64>,
    recbase: Matrix3<f64>,
    base_rot: Matrix3<f64>,
}

impl Lattice {
    /// Builds a lattice from the six parameters, angles in degrees.
    pub fn from_parameters(
        a: f64,
        b: f64,
        c: f64,
        alpha: f64,
        beta: f64,
        gamma: f64,
    ) -> Result<Self, LatticeError> {
        let base = standard_base(a, b, c, alpha, beta, gamma)?;
        let recbase = base
            .try_inverse()
            .ok_or(LatticeError::DegenerateBase)?;
        Ok(Lattice {
            a,
            b,
            c,
            alpha,
            beta,
            gamma,
            base,
            recbase,
            base_rot: Matrix3::identity(),
        })
    }

    /// Builds a lattice from three explicit, right-handed lattice vectors.
    pub fn from_vectors(
        va: Vector3<f64>,
        vb: Vector3<f64>,
        vc: Vector3<f64>,
    ) -> Result<Self, LatticeError> {
        let base = Matrix3::from_columns(&[va, vb, vc]);
        if base.determinant() <= f64::EPSILON {
            return Err(LatticeError::DegenerateBase);
        }
        let a = va.norm();
        let b = vb.norm();
        let c = vc.norm();
        let alpha = angle_between(&vb, &vc);
        let beta = angle_between(&va, &vc);
        let gamma = angle_between(&va, &vb);
        let standard = standard_base(a, b, c, alpha, beta, gamma)?;
        let standard_inv = standard
            .try_inverse()
            .ok_or(LatticeError::DegenerateBase)?;
        let recbase = base
            .try_inverse()
            .ok_or(LatticeError::DegenerateBase)?;
        Ok(Lattice {
            a,
            b,
            c,
            alpha,
            beta,
            gamma,
            base,
            recbase,
            base_rot: base * standard_inv,
        })
    }

    /// The unit cube, which makes fractional and Cartesian coordinates
    /// agree exactly.
    pub fn cubic_unit() -> Self {
        Lattice::from_vectors(Vector3::x(), Vector3::y(), Vector3::z())
            .expect("unit cube vectors are valid")
    }

    pub fn a(&self) -> f64 {
        self.a
    }

    pub fn b(&self) -> f64 {
        self.b
    }

    pub fn c(&self) -> f64 {
        self.c
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn beta(&self) -> f64 {
        self.beta
    }

    pub fn gamma(&self) -> f64 {
        self.gamma
    }

    pub fn parameters(&self) -> [f64; 6] {
        [self.a, self.b, self.c, self.alpha, self.beta, self.gamma]
    }

    pub fn va(&self) -> Vector3<f64> {
        self.base.column(0).clone_owned()
    }

    pub fn vb(&self) -> Vector3<f64> {
        self.base.column(1).clone_owned()
    }

    pub fn vc(&self) -> Vector3<f64> {
        self.base.column(2).clone_owned()
    }

    /// Basis matrix; columns are the lattice vectors.
    pub fn base(&self) -> &Matrix3<f64> {
        &self.base
    }

    /// Inverse basis; rows are the reciprocal lattice vectors.
    pub fn recbase(&self) -> &Matrix3<f64> {
        &self.recbase
    }

    /// Rotation from the standard placement to the stored basis.
    pub fn base_rot(&self) -> &Matrix3<f64> {
        &self.base_rot
    }

    /// Reciprocal lattice vector lengths `(a*, b*, c*)`.
    pub fn reciprocal_lengths(&self) -> [f64; 3] {
        [
            self.recbase.row(0).norm(),
            self.recbase.row(1).norm(),
            self.recbase.row(2).norm(),
        ]
    }

    /// Reciprocal lattice angles `(alpha*, beta*, gamma*)` in degrees.
    pub fn reciprocal_angles(&self) -> [f64; 3] {
        let ar: Vector3<f64> = self.recbase.row(0).transpose();
        let br: Vector3<f64> = self.recbase.row(1).transpose();
        let cr: Vector3<f64> = self.recbase.row(2).transpose();
        [
            angle_between(&br, &cr),
            angle_between(&ar, &cr),
            angle_between(&ar, &br),
        ]
    }

    /// Cartesian coordinates of a fractional vector.
    pub fn cartesian(&self, u: Vector3<f64>) -> Vector3<f64> {
        self.base * u
    }

    /// Fractional coordinates of a Cartesian vector.
    pub fn fractional(&self, r: Vector3<f64>) -> Vector3<f64> {
        self.recbase * r
    }

    /// Wraps fractional coordinates into the unit cell, `0 <= u_i < 1`.
    pub fn ucv_fractional(&self, u: Vector3<f64>) -> Vector3<f64> {
        Vector3::new(
            u.x - u.x.floor(),
            u.y - u.y.floor(),
            u.z - u.z.floor(),
        )
    }

    /// Distance between two points given in fractional coordinates.
    pub fn distance(&self, ua: Vector3<f64>, ub: Vector3<f64>) -> f64 {
        self.cartesian(ua - ub).norm()
    }

    /// Angle in degrees between two directions given in fractional
    /// coordinates.
    pub fn angle_deg(&self, ua: Vector3<f64>, ub: Vector3<f64>) -> f64 {
        angle_between(&self.cartesian(ua), &self.cartesian(ub))
    }

    /// Length of the longest main diagonal of the primitive cell.
    ///
    /// Wrapped coordinates can differ from their image by up to a full
    /// cell diagonal, so range extensions use this bound.
    pub fn uc_max_diagonal_length(&self) -> f64 {
        let diagonals = [
            Vector3::new(1.0, 1.0, 1.0),
            Vector3::new(-1.0, 1.0, 1.0),
            Vector3::new(1.0, -1.0, 1.0),
            Vector3::new(1.0, 1.0, -1.0),
        ];
        diagonals
            .iter()
            .map(|&u| self.cartesian(u).norm())
            .fold(0.0, f64::max)
    }

    pub fn volume(&self) -> f64 {
        self.base.determinant().abs()
    }
}

/// Standard-placement basis matrix: `a` along x, `b` in the xy plane.
fn standard_base(
    a: f64,
    b: f64,
    c: f64,
    alpha: f64,
    beta: f64,
    gamma: f64,
) -> Result<Matrix3<f64>, LatticeError> {
    if a <= 0.0 || b <= 0.0 || c <= 0.0 {
        return Err(LatticeError::BadParameters(format!(
            "cell lengths must be positive, got ({a}, {b}, {c})"
        )));
    }
    for angle in [alpha, beta, gamma] {
        if !(0.0..180.0).contains(&angle) || angle == 0.0 {
            return Err(LatticeError::BadParameters(format!(
                "cell angles must lie in (0, 180) degrees, got {angle}"
            )));
        }
    }
    let cos_alpha = alpha.to_radians().cos();
    let cos_beta = beta.to_radians().cos();
    let (sin_gamma, cos_gamma) = gamma.to_radians().sin_cos();

    let bx = b * cos_gamma;
    let by = b * sin_gamma;

    let cx = c * cos_beta;
    let cy = c * (cos_alpha - cos_beta * cos_gamma) / sin_gamma;
    let cz2 = c * c - cx * cx - cy * cy;
    if cz2 <= 0.0 {
        return Err(LatticeError::BadParameters(format!(
            "angles ({alpha}, {beta}, {gamma}) do not close a cell"
        )));
    }
    let cz = cz2.sqrt();

    Ok(Matrix3::new(
        a, bx, cx, //
        0.0, by, cy, //
        0.0, 0.0, cz,
    ))
}

fn angle_between(u: &Vector3<f64>, v: &Vector3<f64>) -> f64 {
    let cosine = (u.dot(v) / (u.norm() * v.norm())).clamp(-1.0, 1.0);
    cosine.acos().to_degrees()
}
