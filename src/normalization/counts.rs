//! Counts-per-million and log-CPM transformations

use ndarray::{Array2, ArrayView2};

use crate::error::{CageDeError, Result};

/// Prior count added before taking logs of CPM values
pub const PRIOR_COUNT: f64 = 2.0;

/// Raw library sizes and TMM normalization factors for one run.
#[derive(Debug, Clone)]
pub struct LibrarySizes {
    sample_ids: Vec<String>,
    raw: Vec<f64>,
    norm_factors: Vec<f64>,
}

impl LibrarySizes {
    pub fn new(sample_ids: Vec<String>, raw: Vec<f64>, norm_factors: Vec<f64>) -> Result<Self> {
        if raw.len() != sample_ids.len() || norm_factors.len() != sample_ids.len() {
            return Err(CageDeError::DimensionMismatch {
                expected: format!("{} library sizes and factors", sample_ids.len()),
                got: format!("{} sizes, {} factors", raw.len(), norm_factors.len()),
            });
        }
        if raw.iter().chain(norm_factors.iter()).any(|&v| !(v > 0.0) || !v.is_finite()) {
            return Err(CageDeError::InvalidInput {
                reason: "library sizes and normalization factors must be positive".to_string(),
            });
        }
        Ok(Self {
            sample_ids,
            raw,
            norm_factors,
        })
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    pub fn raw(&self) -> &[f64] {
        &self.raw
    }

    pub fn norm_factors(&self) -> &[f64] {
        &self.norm_factors
    }

    /// Raw size times normalization factor
    pub fn effective(&self) -> Vec<f64> {
        self.raw
            .iter()
            .zip(self.norm_factors.iter())
            .map(|(&n, &f)| n * f)
            .collect()
    }

    /// GLM offsets: natural log of effective library sizes
    pub fn offsets(&self) -> Vec<f64> {
        self.effective().iter().map(|&l| l.ln()).collect()
    }
}

/// Counts per million against the given library sizes
pub fn cpm(counts: ArrayView2<f64>, lib_sizes: &[f64]) -> Result<Array2<f64>> {
    let n_samples = counts.ncols();
    if lib_sizes.len() != n_samples {
        return Err(CageDeError::DimensionMismatch {
            expected: format!("{} library sizes", n_samples),
            got: format!("{} library sizes", lib_sizes.len()),
        });
    }

    let mut result = counts.to_owned();
    for (j, mut col) in result.columns_mut().into_iter().enumerate() {
        let lib = lib_sizes[j].max(1.0);
        col.mapv_inplace(|x| x * 1e6 / lib);
    }
    Ok(result)
}

/// Per-sample prior counts and augmented library sizes.
///
/// The prior is scaled in proportion to library size so that it adds the
/// same amount of CPM to every sample.
fn prior_adjusted(lib_sizes: &[f64], prior_count: f64) -> (Vec<f64>, Vec<f64>) {
    let mean_lib = lib_sizes.iter().sum::<f64>() / lib_sizes.len() as f64;
    let priors: Vec<f64> = lib_sizes
        .iter()
        .map(|&l| prior_count * l / mean_lib)
        .collect();
    let adjusted: Vec<f64> = lib_sizes
        .iter()
        .zip(priors.iter())
        .map(|(&l, &p)| l + 2.0 * p)
        .collect();
    (priors, adjusted)
}

/// log2 counts per million with a library-scaled prior count
pub fn log_cpm(counts: ArrayView2<f64>, lib_sizes: &[f64], prior_count: f64) -> Result<Array2<f64>> {
    let n_samples = counts.ncols();
    if lib_sizes.len() != n_samples {
        return Err(CageDeError::DimensionMismatch {
            expected: format!("{} library sizes", n_samples),
            got: format!("{} library sizes", lib_sizes.len()),
        });
    }

    let (priors, adjusted) = prior_adjusted(lib_sizes, prior_count);
    let mut result = counts.to_owned();
    for (j, mut col) in result.columns_mut().into_iter().enumerate() {
        let (p, l) = (priors[j], adjusted[j]);
        col.mapv_inplace(|x| ((x + p) / l * 1e6).log2());
    }
    Ok(result)
}

/// Average abundance of each feature on the log2-CPM scale.
///
/// Computed as the log of the mean prior-augmented CPM, so it stays finite
/// for rows with zeros.
pub fn ave_log_cpm(counts: ArrayView2<f64>, lib_sizes: &[f64], prior_count: f64) -> Result<Vec<f64>> {
    let n_samples = counts.ncols();
    if lib_sizes.len() != n_samples {
        return Err(CageDeError::DimensionMismatch {
            expected: format!("{} library sizes", n_samples),
            got: format!("{} library sizes", lib_sizes.len()),
        });
    }

    let (priors, adjusted) = prior_adjusted(lib_sizes, prior_count);
    Ok(counts
        .rows()
        .into_iter()
        .map(|row| {
            let mean_cpm = row
                .iter()
                .enumerate()
                .map(|(j, &x)| (x + priors[j]) / adjusted[j] * 1e6)
                .sum::<f64>()
                / n_samples as f64;
            mean_cpm.log2()
        })
        .collect())
}
