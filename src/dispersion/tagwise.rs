//! Empirical Bayes weighting of feature-wise likelihood curves

use ndarray::ArrayView2;
use rayon::prelude::*;

use super::apl::{combine_curves, maximize_on_grid};
use crate::data::CountMatrix;
use crate::error::Result;
use crate::glm::{fit_feature, GlmFitParams};
use crate::stats::squeeze_var;

/// Prior degrees of freedom for the shrinkage of each feature's curve.
///
/// Each feature is fitted at its trended dispersion; the residual
/// deviances per residual df are then moderated against abundance. Features
/// that cannot be fitted receive an infinite prior (they follow the trend).
pub fn prior_degrees_of_freedom(
    counts: &CountMatrix,
    design: ArrayView2<f64>,
    offsets: &[f64],
    trended: &[f64],
    abundance: &[f64],
    df_residual: usize,
    robust: bool,
    params: &GlmFitParams,
) -> Result<Vec<f64>> {
    let df = df_residual as f64;
    let s2: Vec<Option<f64>> = (0..counts.n_features())
        .into_par_iter()
        .map(|i| {
            let fit = fit_feature(counts.feature_counts(i), design, offsets, trended[i], params);
            fit.status.is_usable().then(|| fit.deviance / df)
        })
        .collect();

    let usable: Vec<usize> = (0..s2.len()).filter(|&i| s2[i].is_some()).collect();
    let mut prior = vec![f64::INFINITY; s2.len()];
    if usable.is_empty() {
        return Ok(prior);
    }

    let values: Vec<f64> = usable.iter().filter_map(|&i| s2[i]).collect();
    let covariate: Vec<f64> = usable.iter().map(|&i| abundance[i]).collect();
    let squeezed = squeeze_var(&values, &vec![df; values.len()], Some(covariate.as_slice()), robust)?;
    for (k, &i) in usable.iter().enumerate() {
        prior[i] = squeezed.df_prior[k];
    }
    Ok(prior)
}

/// Maximiser of `own + prior_n * trend`, on the natural-log scale.
///
/// An infinite `prior_n` or a missing own curve returns the trend maximum.
pub fn tagwise_log_dispersion(own: Option<&[f64]>, trend: &[f64], prior_n: f64, log_grid: &[f64]) -> f64 {
    match own {
        Some(curve) if prior_n.is_finite() => {
            maximize_on_grid(log_grid, &combine_curves(curve, trend, prior_n))
        }
        _ => maximize_on_grid(log_grid, trend),
    }
}
