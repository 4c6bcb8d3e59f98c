/// Cost values below this threshold are treated as exact zero.
pub const EPS_COST: f64 = 1e-10;

/// Distances below this threshold are treated as coincident.
pub const EPS_DISTANCE: f64 = 1e-6;

/// Penalty for a distance mismatch `dd = d - d_target`.
#[inline]
pub fn penalty(dd: f64) -> f64 {
    dd * dd
}

/// `a < b` with a margin of `EPS_COST`.
#[inline]
pub fn eps_lt(a: f64, b: f64) -> bool {
    a < b - EPS_COST
}

/// `a > b` with a margin of `EPS_COST`.
#[inline]
pub fn eps_gt(a: f64, b: f64) -> bool {
    a > b + EPS_COST
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn penalty_is_squared_mismatch() {
        assert_eq!(penalty(0.5), 0.25);
        assert_eq!(penalty(-0.5), 0.25);
        assert_eq!(penalty(0.0), 0.0);
    }

    #[test]
    fn eps_comparisons_ignore_round_off() {
        assert!(!eps_lt(1.0, 1.0 + EPS_COST / 2.0));
        assert!(eps_lt(1.0, 1.0 + 2.0 * EPS_COST));
        assert!(!eps_gt(1.0 + EPS_COST / 2.0, 1.0));
    }
}
