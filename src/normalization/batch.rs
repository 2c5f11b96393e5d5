//! Batch-adjusted log-expression for reporting

use ndarray::{Array2, ArrayView2};
use rayon::prelude::*;

use crate::data::SampleSheet;
use crate::error::{CageDeError, Result};
use crate::glm::linalg::{qr_rank, solve_spd, weighted_cross_product};

/// Log-abundance with the fitted batch contribution removed.
///
/// A reporting view only: it has no conversion back into counts and is
/// not accepted by any fitting routine.
#[derive(Debug, Clone)]
pub struct AdjustedLogExpression {
    values: Array2<f64>,
    feature_ids: Vec<String>,
    sample_ids: Vec<String>,
}

impl AdjustedLogExpression {
    pub fn values(&self) -> ArrayView2<f64> {
        self.values.view()
    }

    pub fn feature_ids(&self) -> &[String] {
        &self.feature_ids
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    pub fn n_features(&self) -> usize {
        self.values.nrows()
    }
}

/// Group indicator columns followed by sum-to-zero batch columns.
/// Returns the matrix and the index of the first batch column.
fn projection_design(samples: &SampleSheet) -> (Array2<f64>, usize) {
    let groups = samples.group_levels();
    let batches = samples.batch_levels();
    let n_batch_cols = batches.len().saturating_sub(1);
    let n = samples.n_samples();

    let mut x = Array2::zeros((n, groups.len() + n_batch_cols));
    for (i, sample) in samples.samples().iter().enumerate() {
        if let Some(g) = groups.iter().position(|l| *l == sample.group) {
            x[[i, g]] = 1.0;
        }
        if let Some(b) = batches.iter().position(|l| *l == sample.batch) {
            for k in 0..n_batch_cols {
                x[[i, groups.len() + k]] = if b == k {
                    1.0
                } else if b == batches.len() - 1 {
                    -1.0
                } else {
                    0.0
                };
            }
        }
    }
    (x, groups.len())
}

/// Subtract the least-squares batch effect from each feature's log-CPM.
///
/// Group means are kept in the model so that group differences are not
/// absorbed into the batch coefficients. With a single batch the input is
/// returned unchanged.
pub fn remove_batch_effect(
    log_expr: ArrayView2<f64>,
    feature_ids: &[String],
    samples: &SampleSheet,
) -> Result<AdjustedLogExpression> {
    let (n_features, n_samples) = log_expr.dim();
    if n_samples != samples.n_samples() || feature_ids.len() != n_features {
        return Err(CageDeError::DimensionMismatch {
            expected: format!("{} features x {} samples", feature_ids.len(), samples.n_samples()),
            got: format!("{} x {}", n_features, n_samples),
        });
    }

    let (x, first_batch) = projection_design(samples);
    let p = x.ncols();
    if p == first_batch {
        log::info!("Single batch; log-expression left unadjusted");
        return Ok(AdjustedLogExpression {
            values: log_expr.to_owned(),
            feature_ids: feature_ids.to_vec(),
            sample_ids: samples.sample_ids(),
        });
    }

    let confounded = || CageDeError::RankDeficientDesign {
        reason: "batch is confounded with group; cannot separate batch effect".to_string(),
    };
    if qr_rank(x.view()) < p {
        return Err(confounded());
    }

    let xtx = weighted_cross_product(x.view(), &vec![1.0; n_samples]);
    // Solve for the projection once; every feature shares the design.
    let mut solved_cols = Vec::with_capacity(n_samples);
    for i in 0..n_samples {
        let row: Vec<f64> = x.row(i).to_vec();
        solved_cols.push(solve_spd(&xtx, &row, p).ok_or_else(confounded)?);
    }

    let adjusted_rows: Vec<Vec<f64>> = (0..n_features)
        .into_par_iter()
        .map(|f| {
            let y = log_expr.row(f);
            // beta = (X'X)^-1 X'y, accumulated sample by sample
            let mut beta = vec![0.0; p];
            for (i, col) in solved_cols.iter().enumerate() {
                for k in 0..p {
                    beta[k] += col[k] * y[i];
                }
            }
            (0..n_samples)
                .map(|i| {
                    let batch_part: f64 = (first_batch..p).map(|k| x[[i, k]] * beta[k]).sum();
                    y[i] - batch_part
                })
                .collect()
        })
        .collect();

    let mut values = Array2::zeros((n_features, n_samples));
    for (f, row) in adjusted_rows.into_iter().enumerate() {
        for (j, v) in row.into_iter().enumerate() {
            values[[f, j]] = v;
        }
    }

    log::info!(
        "Removed batch effect ({} batch columns) from {} features",
        p - first_batch,
        n_features
    );
    Ok(AdjustedLogExpression {
        values,
        feature_ids: feature_ids.to_vec(),
        sample_ids: samples.sample_ids(),
    })
}
