//! Trimmed mean of M-values (TMM) normalization factors
//! (Robinson and Oshlack, 2010)

use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};

use crate::error::{CageDeError, Result};
use crate::stats::{quantile_type7, rank_average};

/// Fractions trimmed from each end before averaging log-ratios
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrimFractions {
    /// Trim applied to log fold-changes (M values)
    pub log_ratio: f64,
    /// Trim applied to average log-abundance (A values)
    pub abundance: f64,
}

impl Default for TrimFractions {
    fn default() -> Self {
        Self {
            log_ratio: 0.3,
            abundance: 0.05,
        }
    }
}

impl TrimFractions {
    pub fn validate(&self) -> Result<()> {
        for (name, v) in [("log_ratio", self.log_ratio), ("abundance", self.abundance)] {
            if !(0.0..0.5).contains(&v) {
                return Err(CageDeError::InvalidConfig {
                    reason: format!("trim fraction {} must lie in [0, 0.5), got {}", name, v),
                });
            }
        }
        Ok(())
    }
}

/// TMM factor of one sample against a reference sample.
///
/// Only features with positive counts in both samples contribute. Each
/// M value is weighted by the inverse of its approximate asymptotic
/// variance `(N_o - y_o)/(N_o y_o) + (N_r - y_r)/(N_r y_r)`.
pub fn tmm_factor(
    obs: &[f64],
    reference: &[f64],
    lib_obs: f64,
    lib_ref: f64,
    trim: &TrimFractions,
) -> f64 {
    let mut log_r = Vec::with_capacity(obs.len());
    let mut abs_e = Vec::with_capacity(obs.len());
    let mut var = Vec::with_capacity(obs.len());

    for (&o, &r) in obs.iter().zip(reference.iter()) {
        let po = o / lib_obs;
        let pr = r / lib_ref;
        let m = (po / pr).log2();
        let a = (po.log2() + pr.log2()) / 2.0;
        if !m.is_finite() || !a.is_finite() {
            continue;
        }
        log_r.push(m);
        abs_e.push(a);
        var.push((lib_obs - o) / lib_obs / o + (lib_ref - r) / lib_ref / r);
    }

    if log_r.is_empty() || log_r.iter().fold(0.0f64, |acc, m| acc.max(m.abs())) < 1e-6 {
        return 1.0;
    }

    let n = log_r.len() as f64;
    let lo_l = (n * trim.log_ratio).floor() + 1.0;
    let hi_l = n + 1.0 - lo_l;
    let lo_s = (n * trim.abundance).floor() + 1.0;
    let hi_s = n + 1.0 - lo_s;

    let rank_r = rank_average(&log_r);
    let rank_e = rank_average(&abs_e);

    let mut num = 0.0;
    let mut den = 0.0;
    for i in 0..log_r.len() {
        let keep = rank_r[i] >= lo_l && rank_r[i] <= hi_l && rank_e[i] >= lo_s && rank_e[i] <= hi_s;
        if keep {
            num += log_r[i] / var[i];
            den += 1.0 / var[i];
        }
    }

    let f = num / den;
    if f.is_finite() {
        2f64.powf(f)
    } else {
        1.0
    }
}

/// Index of the reference sample.
///
/// The sample whose upper-quartile proportion is closest, on the log
/// scale, to the geometric mean of all upper quartiles. When any upper
/// quartile is zero the sample with the largest sum of square-root counts
/// is used instead.
fn reference_sample(counts: ArrayView2<f64>, lib_sizes: &[f64]) -> usize {
    let f75: Vec<f64> = counts
        .columns()
        .into_iter()
        .zip(lib_sizes.iter())
        .map(|(col, &lib)| {
            let props: Vec<f64> = col.iter().map(|&c| c / lib).collect();
            quantile_type7(&props, 0.75)
        })
        .collect();

    let argmax_or_min = |scores: &[f64], maximize: bool| {
        let mut best = 0;
        for (j, &s) in scores.iter().enumerate() {
            if (maximize && s > scores[best]) || (!maximize && s < scores[best]) {
                best = j;
            }
        }
        best
    };

    if f75.iter().any(|&q| !(q > 0.0)) {
        let sqrt_sums: Vec<f64> = counts
            .columns()
            .into_iter()
            .map(|col| col.iter().map(|c| c.sqrt()).sum())
            .collect();
        return argmax_or_min(&sqrt_sums, true);
    }

    let log_q: Vec<f64> = f75.iter().map(|q| q.ln()).collect();
    let centre = log_q.iter().sum::<f64>() / log_q.len() as f64;
    let dist: Vec<f64> = log_q.iter().map(|l| (l - centre).abs()).collect();
    argmax_or_min(&dist, false)
}

/// TMM normalization factors for every sample, scaled to a geometric
/// mean of one.
pub fn calc_norm_factors(counts: ArrayView2<f64>, lib_sizes: &[f64], trim: &TrimFractions) -> Result<Vec<f64>> {
    let (n_features, n_samples) = counts.dim();
    if n_features == 0 || n_samples == 0 {
        return Err(CageDeError::EmptyData {
            reason: "count matrix is empty".to_string(),
        });
    }
    if lib_sizes.len() != n_samples {
        return Err(CageDeError::DimensionMismatch {
            expected: format!("{} library sizes", n_samples),
            got: format!("{} library sizes", lib_sizes.len()),
        });
    }
    if lib_sizes.iter().any(|&l| !(l > 0.0)) {
        return Err(CageDeError::InvalidInput {
            reason: "library sizes must be positive".to_string(),
        });
    }
    trim.validate()?;

    let ref_idx = reference_sample(counts, lib_sizes);
    let reference = counts.column(ref_idx).to_vec();
    log::debug!("TMM reference sample index: {}", ref_idx);

    let factors: Vec<f64> = (0..n_samples)
        .map(|j| {
            let obs = counts.column(j).to_vec();
            tmm_factor(&obs, &reference, lib_sizes[j], lib_sizes[ref_idx], trim)
        })
        .collect();

    let log_mean = factors.iter().map(|f| f.ln()).sum::<f64>() / n_samples as f64;
    let scale = log_mean.exp();
    Ok(factors.iter().map(|f| f / scale).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array2};

    fn lib_sizes(counts: &Array2<f64>) -> Vec<f64> {
        counts.columns().into_iter().map(|c| c.sum()).collect()
    }

    #[test]
    fn test_self_reference_gives_unit_factor() {
        let col = vec![5.0, 10.0, 0.0, 300.0, 42.0];
        let f = tmm_factor(&col, &col, 357.0, 357.0, &TrimFractions::default());
        assert_eq!(f, 1.0);
    }

    #[test]
    fn test_identical_samples_give_unit_factors() {
        let counts = array![[10.0, 10.0, 10.0], [20.0, 20.0, 20.0], [5.0, 5.0, 5.0], [80.0, 80.0, 80.0]];
        let factors = calc_norm_factors(counts.view(), &lib_sizes(&counts), &TrimFractions::default()).unwrap();
        for f in factors {
            assert_abs_diff_eq!(f, 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_factors_centred_on_log_scale() {
        let counts = array![
            [10.0, 25.0, 7.0, 12.0],
            [200.0, 180.0, 260.0, 150.0],
            [33.0, 50.0, 41.0, 20.0],
            [0.0, 3.0, 5.0, 1.0],
            [500.0, 900.0, 450.0, 610.0],
            [72.0, 64.0, 99.0, 70.0],
        ];
        let factors = calc_norm_factors(counts.view(), &lib_sizes(&counts), &TrimFractions::default()).unwrap();
        let log_sum: f64 = factors.iter().map(|f| f.log2()).sum();
        assert_abs_diff_eq!(log_sum, 0.0, epsilon = 1e-10);
        assert!(factors.iter().all(|&f| f > 0.0));
    }

    #[test]
    fn test_composition_shift_detected() {
        // Sample 2 has one feature inflated ten-fold; the others are unchanged.
        let mut base: Vec<[f64; 2]> = (1..=20).map(|i| [i as f64 * 10.0, i as f64 * 10.0]).collect();
        base[19][1] *= 10.0;
        let counts = Array2::from_shape_fn((20, 2), |(i, j)| base[i][j]);
        let factors = calc_norm_factors(counts.view(), &lib_sizes(&counts), &TrimFractions::default()).unwrap();
        // Raw library of sample 2 is inflated by the outlier; TMM compensates.
        assert!(factors[1] < factors[0]);
    }

    #[test]
    fn test_invalid_trim_rejected() {
        let counts = array![[1.0, 2.0]];
        let trim = TrimFractions {
            log_ratio: 0.6,
            abundance: 0.05,
        };
        assert!(calc_norm_factors(counts.view(), &[1.0, 2.0], &trim).is_err());
    }
}
