use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DistanceTableError {
    #[error("target distance table is empty")]
    Empty,

    #[error("non-positive entry in distance table: {0}")]
    NonPositive(f64),

    #[error("distance table length {len} does not equal n(n-1)/2 for any atom count")]
    NonTriangular { len: usize },
}

/// A sorted multiset of target pair distances.
///
/// The table is the ground truth the builder scores against.  For a finite
/// cluster the table shrinks as pairs are assigned and grows back when
/// atoms are removed; for a crystal it is read-only.
///
/// All entries are strictly positive and kept in ascending order.
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceTable {
    values: Vec<f64>,
    resolution: f64,
}

/// Two distances closer than this are treated as the same target value
/// when counting unique entries.
const DEFAULT_RESOLUTION: f64 = 0.01;

impl DistanceTable {
    /// Builds a table for a finite cluster target.
    ///
    /// Rejects empty input, non-positive entries, and any length that is
    /// not `n(n-1)/2` for an integer number of atoms `n`.
    pub fn new(values: Vec<f64>) -> Result<Self, DistanceTableError> {
        let table = DistanceTable::unrestricted(values)?;
        let n = table.est_num_atoms();
        if n * (n - 1) / 2 != table.len() {
            return Err(DistanceTableError::NonTriangular { len: table.len() });
        }
        Ok(table)
    }

    /// Builds a table without the triangular-length check.
    ///
    /// Crystal targets hold unique distances cropped to a cutoff, so their
    /// length carries no atom-count information.
    pub fn unrestricted(mut values: Vec<f64>) -> Result<Self, DistanceTableError> {
        if values.is_empty() {
            return Err(DistanceTableError::Empty);
        }
        values.sort_by(f64::total_cmp);
        if values[0] <= 0.0 {
            return Err(DistanceTableError::NonPositive(values[0]));
        }
        Ok(DistanceTable {
            values,
            resolution: DEFAULT_RESOLUTION,
        })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn get(&self, index: usize) -> f64 {
        self.values[index]
    }

    pub fn resolution(&self) -> f64 {
        self.resolution
    }

    pub fn set_resolution(&mut self, resolution: f64) {
        self.resolution = resolution;
    }

    /// The largest target distance, or 0 for an empty table.
    pub fn max_distance(&self) -> f64 {
        self.values.last().copied().unwrap_or(0.0)
    }

    /// Number of atoms implied by the table length, `len = n(n-1)/2`.
    pub fn est_num_atoms(&self) -> usize {
        let n = 0.5 + (1.0 + 8.0 * self.len() as f64).sqrt() / 2.0;
        n.round() as usize
    }

    /// Index of the entry nearest to `d`; ties go to the smaller index.
    pub fn find_nearest(&self, d: f64) -> usize {
        debug_assert!(!self.values.is_empty());
        let upper = self.values.partition_point(|&v| v < d);
        if upper == self.values.len() {
            return upper - 1;
        }
        if upper > 0 && d - self.values[upper - 1] <= self.values[upper] - d {
            return upper - 1;
        }
        upper
    }

    /// Removes and returns the entry at `index`.
    pub fn remove(&mut self, index: usize) -> f64 {
        self.values.remove(index)
    }

    /// Re-inserts a previously consumed distance, preserving sort order.
    /// Returns the insertion index.
    pub fn return_back(&mut self, d: f64) -> usize {
        let index = self.values.partition_point(|&v| v < d);
        self.values.insert(index, d);
        index
    }

    /// First representative of each run of values closer than the table
    /// resolution.
    pub fn unique(&self) -> Vec<f64> {
        let mut uniques: Vec<f64> = Vec::new();
        for &v in &self.values {
            match uniques.last() {
                Some(&last) if v - last <= self.resolution => {}
                _ => uniques.push(v),
            }
        }
        uniques
    }

    pub fn count_unique(&self) -> usize {
        self.unique().len()
    }

    /// A copy restricted to entries `<= cutoff`.
    pub fn cropped(&self, cutoff: f64) -> Result<Self, DistanceTableError> {
        let hi = self.values.partition_point(|&v| v <= cutoff);
        DistanceTable::unrestricted(self.values[..hi].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_table() {
        assert!(matches!(
            DistanceTable::new(Vec::new()),
            Err(DistanceTableError::Empty)
        ));
    }

    #[test]
    fn rejects_non_positive_entries() {
        assert!(matches!(
            DistanceTable::new(vec![1.0, -2.0, 3.0]),
            Err(DistanceTableError::NonPositive(_))
        ));
        assert!(matches!(
            DistanceTable::new(vec![0.0]),
            Err(DistanceTableError::NonTriangular { .. }) | Err(DistanceTableError::NonPositive(_))
        ));
    }

    #[test]
    fn rejects_non_triangular_length() {
        // 4 distances cannot come from any complete set of atom pairs
        assert!(matches!(
            DistanceTable::new(vec![1.0, 1.0, 1.0, 1.0]),
            Err(DistanceTableError::NonTriangular { len: 4 })
        ));
    }

    #[test]
    fn unrestricted_accepts_any_length() {
        let dt = DistanceTable::unrestricted(vec![2.0, 1.0, 1.5, 0.5]).unwrap();
        assert_eq!(dt.values(), &[0.5, 1.0, 1.5, 2.0]);
    }

    #[test]
    fn basic_invariants_on_three_distances() {
        let dt = DistanceTable::new(vec![1.0, 1.0, 2.0]).unwrap();
        assert_eq!(dt.len(), 3);
        assert_eq!(dt.count_unique(), 2);
        assert_eq!(dt.unique(), vec![1.0, 2.0]);
        assert_eq!(dt.est_num_atoms(), 3);
        assert_eq!(dt.max_distance(), 2.0);
    }

    #[test]
    fn find_nearest_picks_closest_value() {
        let dt = DistanceTable::new(vec![1.0, 1.0, 2.0]).unwrap();
        assert_eq!(dt.get(dt.find_nearest(1.4)), 1.0);
        assert_eq!(dt.get(dt.find_nearest(1.6)), 2.0);
        assert_eq!(dt.get(dt.find_nearest(0.1)), 1.0);
        assert_eq!(dt.get(dt.find_nearest(99.0)), 2.0);
    }

    #[test]
    fn find_nearest_breaks_ties_toward_smaller_index() {
        let dt = DistanceTable::new(vec![1.0, 2.0, 3.0]).unwrap();
        assert_eq!(dt.find_nearest(1.5), 0);
        assert_eq!(dt.find_nearest(2.5), 1);
    }

    #[test]
    fn return_back_preserves_sort_order() {
        let mut dt = DistanceTable::new(vec![1.0, 1.0, 2.0]).unwrap();
        let at = dt.return_back(1.5);
        assert_eq!(at, 2);
        assert_eq!(dt.values(), &[1.0, 1.0, 1.5, 2.0]);
    }

    #[test]
    fn remove_then_return_back_round_trips() {
        let mut dt = DistanceTable::new(vec![1.0, 1.0, 2.0]).unwrap();
        let taken = dt.remove(2);
        assert_eq!(taken, 2.0);
        assert_eq!(dt.len(), 2);
        dt.return_back(taken);
        assert_eq!(dt.values(), &[1.0, 1.0, 2.0]);
    }

    #[test]
    fn cropped_keeps_prefix_below_cutoff() {
        let dt = DistanceTable::unrestricted(vec![0.5, 1.0, 1.5, 2.0, 2.5]).unwrap();
        let cropped = dt.cropped(1.6).unwrap();
        assert_eq!(cropped.values(), &[0.5, 1.0, 1.5]);
    }
}
