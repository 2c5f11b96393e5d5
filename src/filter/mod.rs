//! Expression filtering of merged clusters
//!
//! A feature is kept when its counts-per-million, computed from raw library
//! sizes, reach `cpm_low` in at least `min_samples_low` samples and
//! `cpm_high` in at least `min_samples_high` samples. The predicate looks at
//! one row at a time, so the retained set does not depend on row order.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::data::CountMatrix;
use crate::error::{CageDeError, Result};
use crate::normalization::cpm;

/// Thresholds for the expression filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FilterParams {
    pub cpm_low: f64,
    pub cpm_high: f64,
    pub min_samples_low: usize,
    pub min_samples_high: usize,
}

impl Default for FilterParams {
    fn default() -> Self {
        Self {
            cpm_low: 1.0,
            cpm_high: 3.0,
            min_samples_low: 3,
            min_samples_high: 1,
        }
    }
}

/// Per-row keep/drop decision
pub fn expression_mask(counts: &CountMatrix, params: &FilterParams) -> Result<Vec<bool>> {
    let lib_sizes = counts.library_sizes();
    let cpm = cpm(counts.counts(), &lib_sizes)?;

    let mask = (0..cpm.nrows())
        .into_par_iter()
        .map(|i| {
            let row = cpm.row(i);
            let n_low = row.iter().filter(|&&v| v >= params.cpm_low).count();
            let n_high = row.iter().filter(|&&v| v >= params.cpm_high).count();
            n_low >= params.min_samples_low && n_high >= params.min_samples_high
        })
        .collect();
    Ok(mask)
}

/// Drop rows that are too sparse for stable dispersion and GLM estimation.
pub fn filter_by_expression(counts: &CountMatrix, params: &FilterParams) -> Result<CountMatrix> {
    let mask = expression_mask(counts, params)?;
    let keep: Vec<usize> = mask
        .iter()
        .enumerate()
        .filter(|(_, &k)| k)
        .map(|(i, _)| i)
        .collect();

    if keep.is_empty() {
        return Err(CageDeError::EmptyData {
            reason: "no features passed the expression filter".to_string(),
        });
    }

    log::info!(
        "Expression filter kept {} of {} features",
        keep.len(),
        counts.n_features()
    );

    counts.subset_features(&keep)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn matrix() -> CountMatrix {
        // Library sizes are 1e6 per sample so counts equal CPM.
        let counts = array![
            [2.0, 2.0, 2.0, 3.0],      // passes: >=1 in 4, >=3 in 1
            [1.0, 1.0, 0.0, 2.0],      // fails: >=3 nowhere
            [5.0, 0.0, 0.0, 0.0],      // fails: >=1 in only 1 sample
            [999_992.0, 999_997.0, 999_998.0, 999_995.0],
        ];
        let features = (1..=4).map(|i| format!("f{}", i)).collect();
        let samples = (1..=4).map(|i| format!("s{}", i)).collect();
        CountMatrix::new(counts, features, samples).unwrap()
    }

    #[test]
    fn test_filter_predicate() {
        let mask = expression_mask(&matrix(), &FilterParams::default()).unwrap();
        assert_eq!(mask, vec![true, false, false, true]);
    }

    #[test]
    fn test_filter_is_deterministic_and_keeps_counts() {
        let m = matrix();
        let a = filter_by_expression(&m, &FilterParams::default()).unwrap();
        let b = filter_by_expression(&m, &FilterParams::default()).unwrap();
        assert_eq!(a.feature_ids(), b.feature_ids());
        assert_eq!(a.feature_ids(), &["f1".to_string(), "f4".to_string()]);
        assert_eq!(a.feature_counts(0).to_vec(), vec![2.0, 2.0, 2.0, 3.0]);
        assert_eq!(a.sample_ids(), m.sample_ids());
    }

    #[test]
    fn test_filter_rejects_everything_is_error() {
        let strict = FilterParams {
            cpm_high: 1e7,
            ..Default::default()
        };
        assert!(filter_by_expression(&matrix(), &strict).is_err());
    }
}
