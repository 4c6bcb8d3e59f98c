use nalgebra::{Point3, Vector3};

/// How a candidate atom position was constructed.
///
/// `Linear` candidates come from one anchor and one target distance,
/// `Planar` from a triangle over two anchors, `Spatial` from a pyramid
/// over three anchors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriangulationKind {
    Linear,
    Planar,
    Spatial,
}

impl TriangulationKind {
    pub const COUNT: usize = 3;

    pub const ALL: [TriangulationKind; Self::COUNT] = [
        TriangulationKind::Linear,
        TriangulationKind::Planar,
        TriangulationKind::Spatial,
    ];

    pub fn index(self) -> usize {
        match self {
            TriangulationKind::Linear => 0,
            TriangulationKind::Planar => 1,
            TriangulationKind::Spatial => 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Atom {
    // --- Identity ---
    pub element: String,       // species label, may be empty
    pub position: Point3<f64>, // Cartesian coordinates

    // --- Search state ---
    pub fixed: bool,                         // immutable once set
    pub origin: Option<TriangulationKind>,   // how the position was proposed
    pub radius: f64,                         // hard-core radius for overlap costs
    pub(crate) pair_slot: usize,             // slot in the owning structure's pair grid

    badness: f64, // running sum of half pair costs, owned by the structure
}

impl Atom {
    pub fn new(element: impl Into<String>, position: Point3<f64>) -> Self {
        Atom {
            element: element.into(),
            position,
            fixed: false,
            origin: None,
            radius: 0.0,
            pair_slot: 0,
            badness: 0.0,
        }
    }

    /// Unlabeled atom at the given Cartesian coordinates.
    pub fn at(x: f64, y: f64, z: f64) -> Self {
        Atom::new("", Point3::new(x, y, z))
    }

    pub fn badness(&self) -> f64 {
        self.badness
    }

    pub fn inc_badness(&mut self, db: f64) {
        self.badness += db;
    }

    pub fn dec_badness(&mut self, db: f64) {
        self.badness -= db;
    }

    pub fn reset_badness(&mut self) {
        self.badness = 0.0;
    }

    pub fn translate(&mut self, dr: Vector3<f64>) {
        self.position += dr;
    }
}

// Structural identity is positional; badness and slot are search state.
impl PartialEq for Atom {
    fn eq(&self, other: &Self) -> bool {
        self.position == other.position
    }
}
