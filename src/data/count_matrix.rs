//! Count matrix representation for merged tag clusters

use std::collections::HashSet;

use ndarray::{Array2, ArrayView1, ArrayView2, Axis};

use crate::error::{CageDeError, Result};

/// A feature x sample matrix of tag counts.
///
/// Rows are merged-cluster identifiers (unique), columns are sample
/// identifiers in canonical sample-sheet order. Values are stored as `f64`
/// but are validated to be non-negative integers, so per-sample sums stay
/// exact for any realistic library size.
#[derive(Debug, Clone)]
pub struct CountMatrix {
    counts: Array2<f64>,
    feature_ids: Vec<String>,
    sample_ids: Vec<String>,
}

impl CountMatrix {
    /// Create a new count matrix from raw data
    pub fn new(
        counts: Array2<f64>,
        feature_ids: Vec<String>,
        sample_ids: Vec<String>,
    ) -> Result<Self> {
        let (n_features, n_samples) = counts.dim();

        if feature_ids.len() != n_features {
            return Err(CageDeError::DimensionMismatch {
                expected: format!("{} feature IDs", n_features),
                got: format!("{} feature IDs", feature_ids.len()),
            });
        }

        if sample_ids.len() != n_samples {
            return Err(CageDeError::DimensionMismatch {
                expected: format!("{} sample IDs", n_samples),
                got: format!("{} sample IDs", sample_ids.len()),
            });
        }

        if let Some(&bad) = counts
            .iter()
            .find(|&&x| !x.is_finite() || x < 0.0 || x != x.round())
        {
            return Err(CageDeError::InvalidCountMatrix {
                reason: format!("counts must be non-negative integers, found {}", bad),
            });
        }

        let mut seen = HashSet::with_capacity(n_features);
        for id in &feature_ids {
            if !seen.insert(id.as_str()) {
                return Err(CageDeError::InvalidCountMatrix {
                    reason: format!("duplicate feature identifier '{}'", id),
                });
            }
        }

        let mut seen = HashSet::with_capacity(n_samples);
        for id in &sample_ids {
            if !seen.insert(id.as_str()) {
                return Err(CageDeError::InvalidCountMatrix {
                    reason: format!("duplicate sample identifier '{}'", id),
                });
            }
        }

        Ok(Self {
            counts,
            feature_ids,
            sample_ids,
        })
    }

    /// Create from integer counts
    pub fn from_integers(
        counts: Array2<u64>,
        feature_ids: Vec<String>,
        sample_ids: Vec<String>,
    ) -> Result<Self> {
        Self::new(counts.mapv(|x| x as f64), feature_ids, sample_ids)
    }

    pub fn n_features(&self) -> usize {
        self.counts.nrows()
    }

    pub fn n_samples(&self) -> usize {
        self.counts.ncols()
    }

    /// Get the raw counts as a view
    pub fn counts(&self) -> ArrayView2<'_, f64> {
        self.counts.view()
    }

    pub fn feature_ids(&self) -> &[String] {
        &self.feature_ids
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    /// Counts for a single feature across all samples
    pub fn feature_counts(&self, feature_idx: usize) -> ArrayView1<'_, f64> {
        self.counts.row(feature_idx)
    }

    pub fn feature_index(&self, feature_id: &str) -> Option<usize> {
        self.feature_ids.iter().position(|id| id == feature_id)
    }

    /// Total count per sample (raw library size)
    pub fn library_sizes(&self) -> Vec<f64> {
        self.counts
            .axis_iter(Axis(1))
            .map(|col| col.sum())
            .collect()
    }

    /// Keep only the given rows, preserving column order
    pub fn subset_features(&self, feature_indices: &[usize]) -> Result<Self> {
        let new_counts = self.counts.select(Axis(0), feature_indices);
        let new_ids: Vec<String> = feature_indices
            .iter()
            .map(|&i| self.feature_ids[i].clone())
            .collect();

        Self::new(new_counts, new_ids, self.sample_ids.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn ids(prefix: &str, n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("{}{}", prefix, i)).collect()
    }

    #[test]
    fn test_count_matrix_creation() {
        let counts = array![[10.0, 20.0, 30.0], [5.0, 15.0, 25.0]];
        let matrix = CountMatrix::new(counts, ids("f", 2), ids("s", 3)).unwrap();
        assert_eq!(matrix.n_features(), 2);
        assert_eq!(matrix.n_samples(), 3);
        assert_eq!(matrix.feature_index("f2"), Some(1));
    }

    #[test]
    fn test_negative_and_fractional_counts_rejected() {
        let negative = array![[10.0, -5.0], [5.0, 15.0]];
        assert!(CountMatrix::new(negative, ids("f", 2), ids("s", 2)).is_err());

        let fractional = array![[10.5, 5.0], [5.0, 15.0]];
        assert!(CountMatrix::new(fractional, ids("f", 2), ids("s", 2)).is_err());
    }

    #[test]
    fn test_duplicate_feature_ids_rejected() {
        let counts = array![[1.0, 2.0], [3.0, 4.0]];
        let dup = vec!["f1".to_string(), "f1".to_string()];
        let err = CountMatrix::new(counts, dup, ids("s", 2)).unwrap_err();
        assert!(err.to_string().contains("duplicate feature"));
    }

    #[test]
    fn test_library_sizes_and_subset() {
        let counts = array![[10.0, 20.0], [5.0, 15.0], [1.0, 0.0]];
        let matrix = CountMatrix::new(counts, ids("f", 3), ids("s", 2)).unwrap();
        assert_eq!(matrix.library_sizes(), vec![16.0, 35.0]);

        let sub = matrix.subset_features(&[0, 2]).unwrap();
        assert_eq!(sub.feature_ids(), &["f1".to_string(), "f3".to_string()]);
        assert_eq!(sub.sample_ids(), matrix.sample_ids());
        assert_eq!(sub.library_sizes(), vec![11.0, 20.0]);
    }
}
