use std::collections::HashMap;

/// Per-species hard-core radii for the overlap cost; species missing from
/// the table contribute no overlap.
pub type AtomRadiiTable = HashMap<String, f64>;

/// Relative weights of the cost components.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostWeights {
    /// Weight of the pair-distance mismatch cost.
    pub distance: f64,
    /// Weight of the hard-core overlap cost (crystal only).
    pub overlap: f64,
}

impl Default for CostWeights {
    fn default() -> Self {
        CostWeights {
            distance: 1.0,
            overlap: 1.0,
        }
    }
}

/// Tunable parameters of the structure builder.
///
/// These were process-wide settings in earlier incarnations of the
/// algorithm; every structure now carries its own copy.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildConfig {
    /// Per-atom badness tolerance; the normalized-cost convergence target.
    pub tol_nbad: f64,
    /// Position tolerance of the atom relaxation.
    pub tol_r: f64,
    /// Fraction of the badness tolerance band accepted during evolve.
    pub promote_frac: f64,
    /// Allow several atom additions in a single evolve call.
    pub promote_jump: bool,
    /// Relax the worst non-fixed atom after each promotion.
    pub promote_relax: bool,
    /// Relax the worst non-fixed atom after each demotion.
    pub demote_relax: bool,
    /// Probability of the good-neighbor bootstrap at 1-2 atoms.
    pub lookout_prob: f64,
    /// Component weights of the total cost.
    pub cost_weights: CostWeights,
}

impl Default for BuildConfig {
    fn default() -> Self {
        BuildConfig {
            tol_nbad: 0.05 * 0.05,
            tol_r: 1.0e-8,
            promote_frac: 0.1,
            promote_jump: true,
            promote_relax: false,
            demote_relax: false,
            lookout_prob: 0.0,
            cost_weights: CostWeights::default(),
        }
    }
}

/// How many candidate positions each triangulation type proposes per
/// evolve call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrialCounts {
    pub linear: usize,
    pub planar: usize,
    pub spatial: usize,
}

impl Default for TrialCounts {
    fn default() -> Self {
        TrialCounts {
            linear: 10,
            planar: 20,
            spatial: 1000,
        }
    }
}
