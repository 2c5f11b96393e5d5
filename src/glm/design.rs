//! Design matrix for the `~0 + group + batch` model

use ndarray::{Array2, ArrayView2};

use super::linalg::{orthogonal_complement, qr_rank};
use crate::data::SampleSheet;
use crate::error::{CageDeError, Result};

/// Sample x coefficient matrix with named columns.
///
/// Group columns are cell-mean indicators (one per level, no intercept).
/// Batch columns use treatment coding against the first batch level, and
/// are absent when every sample shares one batch.
#[derive(Debug, Clone)]
pub struct DesignMatrix {
    matrix: Array2<f64>,
    coef_names: Vec<String>,
    n_group_columns: usize,
    sample_ids: Vec<String>,
}

impl DesignMatrix {
    /// Build `~0 + group + batch` from the sample sheet and check rank.
    pub fn from_sample_sheet(samples: &SampleSheet) -> Result<Self> {
        let groups = samples.group_levels();
        let batches = samples.batch_levels();
        let batch_cols: Vec<&String> = batches.iter().skip(1).collect();
        let n = samples.n_samples();
        let p = groups.len() + batch_cols.len();

        let mut matrix = Array2::zeros((n, p));
        for (i, sample) in samples.samples().iter().enumerate() {
            if let Some(g) = groups.iter().position(|l| *l == sample.group) {
                matrix[[i, g]] = 1.0;
            }
            if let Some(b) = batch_cols.iter().position(|l| **l == sample.batch) {
                matrix[[i, groups.len() + b]] = 1.0;
            }
        }

        let mut coef_names = groups.clone();
        coef_names.extend(batch_cols.iter().map(|b| format!("batch{}", b)));

        let design = Self {
            matrix,
            coef_names,
            n_group_columns: groups.len(),
            sample_ids: samples.sample_ids(),
        };
        design.check_full_rank()?;

        log::info!(
            "Design: {} samples x {} coefficients ({} groups, {} batch terms)",
            n,
            p,
            groups.len(),
            batch_cols.len()
        );
        Ok(design)
    }

    /// Wrap an explicit matrix. Used for custom designs and tests.
    pub fn from_matrix(matrix: Array2<f64>, coef_names: Vec<String>, n_group_columns: usize, sample_ids: Vec<String>) -> Result<Self> {
        if coef_names.len() != matrix.ncols() || sample_ids.len() != matrix.nrows() || n_group_columns > matrix.ncols() {
            return Err(CageDeError::DimensionMismatch {
                expected: format!("{} samples x {} coefficients", sample_ids.len(), coef_names.len()),
                got: format!("{} x {}", matrix.nrows(), matrix.ncols()),
            });
        }
        let design = Self {
            matrix,
            coef_names,
            n_group_columns,
            sample_ids,
        };
        design.check_full_rank()?;
        Ok(design)
    }

    /// Fail with a message that distinguishes empty columns from
    /// linear dependence.
    pub fn check_full_rank(&self) -> Result<()> {
        let (nrow, ncol) = self.matrix.dim();
        if nrow == 0 || ncol == 0 {
            return Err(CageDeError::RankDeficientDesign {
                reason: "design matrix has zero rows or columns".to_string(),
            });
        }

        if qr_rank(self.matrix.view()) < ncol {
            let zero_column = (0..ncol).find(|&j| self.matrix.column(j).iter().all(|&v| v == 0.0));
            let reason = match zero_column {
                Some(j) => format!("column '{}' has no samples", self.coef_names[j]),
                None => "batch terms are linear combinations of group terms \
                    (batch confounded with group)"
                    .to_string(),
            };
            return Err(CageDeError::RankDeficientDesign { reason });
        }
        Ok(())
    }

    pub fn matrix(&self) -> ArrayView2<f64> {
        self.matrix.view()
    }

    pub fn coef_names(&self) -> &[String] {
        &self.coef_names
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    pub fn n_samples(&self) -> usize {
        self.matrix.nrows()
    }

    pub fn n_coefs(&self) -> usize {
        self.matrix.ncols()
    }

    pub fn n_group_columns(&self) -> usize {
        self.n_group_columns
    }

    pub fn coefficient_index(&self, name: &str) -> Option<usize> {
        self.coef_names.iter().position(|c| c == name)
    }

    pub fn residual_df(&self) -> usize {
        self.n_samples().saturating_sub(self.n_coefs())
    }
}

/// Design of the null model for a contrast: `X` restricted to the
/// coefficient directions orthogonal to the contrast weights.
pub fn contrast_null_design(design: ArrayView2<f64>, weights: &[f64]) -> Array2<f64> {
    let basis = orthogonal_complement(weights);
    Array2::from_shape_fn((design.nrows(), basis.len()), |(i, k)| {
        design.row(i).iter().zip(basis[k].iter()).map(|(x, b)| x * b).sum()
    })
}
