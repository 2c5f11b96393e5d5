//! Per-feature negative binomial GLM fitting by iteratively reweighted
//! least squares (IRLS)

use ndarray::{ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

use super::linalg::{invert_spd, log_det_spd, solve_spd, weighted_cross_product};
use super::negative_binomial::{nb_log_likelihood, nb_mean, nb_pearson_sq, nb_unit_deviance, nb_weight, MIN_MU};
use crate::error::{CageDeError, Result};

/// Ridge added to X'WX while iterating, for numerical stability
const RIDGE: f64 = 1e-8;

/// Average prior count added before computing reported fold changes
pub const PRIOR_FC_COUNT: f64 = 0.125;

/// Configurable parameters for GLM fitting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GlmFitParams {
    /// Maximum IRLS iterations
    pub maxit: usize,
    /// Relative deviance change below which the fit has converged
    pub tol: f64,
}

impl Default for GlmFitParams {
    fn default() -> Self {
        Self { maxit: 50, tol: 1e-6 }
    }
}

impl GlmFitParams {
    pub fn validate(&self) -> Result<()> {
        if self.maxit == 0 || !(self.tol > 0.0) {
            return Err(CageDeError::InvalidConfig {
                reason: format!("GLM fit needs maxit >= 1 and tol > 0 (got {}, {})", self.maxit, self.tol),
            });
        }
        Ok(())
    }
}

/// Outcome of a single feature's fit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FitStatus {
    Converged,
    /// Iteration cap reached or the iterates became non-finite
    NotConverged,
    /// Every sample has the same count; no variation to model
    ZeroVariance,
}

impl FitStatus {
    pub fn is_usable(&self) -> bool {
        matches!(self, FitStatus::Converged)
    }
}

#[derive(Debug, Clone)]
pub struct FeatureFit {
    /// Natural-log scale coefficients
    pub coefficients: Vec<f64>,
    pub mu: Vec<f64>,
    pub deviance: f64,
    /// Pearson chi-square statistic
    pub pearson: f64,
    /// Unscaled covariance `(X'WX)^-1`, flat row-major
    pub covariance: Vec<f64>,
    pub iterations: usize,
    pub status: FitStatus,
}

impl FeatureFit {
    fn unavailable(n_samples: usize, n_coefs: usize, status: FitStatus) -> Self {
        Self {
            coefficients: vec![f64::NAN; n_coefs],
            mu: vec![f64::NAN; n_samples],
            deviance: f64::NAN,
            pearson: f64::NAN,
            covariance: vec![f64::NAN; n_coefs * n_coefs],
            iterations: 0,
            status,
        }
    }
}

fn linear_predictor(design: ArrayView2<f64>, beta: &[f64], i: usize) -> f64 {
    design.row(i).iter().zip(beta.iter()).map(|(x, b)| x * b).sum()
}

fn fitted_means(design: ArrayView2<f64>, beta: &[f64], offsets: &[f64]) -> Vec<f64> {
    (0..design.nrows())
        .map(|i| nb_mean(linear_predictor(design, beta, i), offsets[i]).max(MIN_MU))
        .collect()
}

/// Weighted least squares step: (X'WX + ridge)^-1 X'Wz
fn weighted_least_squares(design: ArrayView2<f64>, weights: &[f64], response: &[f64]) -> Option<Vec<f64>> {
    let p = design.ncols();
    let mut xtwx = weighted_cross_product(design, weights);
    for j in 0..p {
        xtwx[j * p + j] += RIDGE;
    }
    let mut xtwz = vec![0.0; p];
    for i in 0..design.nrows() {
        for j in 0..p {
            xtwz[j] += weights[i] * design[[i, j]] * response[i];
        }
    }
    solve_spd(&xtwx, &xtwz, p)
}

/// Starting coefficients from least squares on log counts per unit offset
fn initial_beta(counts: ArrayView1<f64>, design: ArrayView2<f64>, offsets: &[f64]) -> Vec<f64> {
    let n = counts.len();
    let p = design.ncols();
    let response: Vec<f64> = (0..n).map(|i| (counts[i] + 0.1).ln() - offsets[i]).collect();
    match weighted_least_squares(design, &vec![1.0; n], &response) {
        Some(beta) if beta.iter().all(|b| b.is_finite()) => beta,
        _ => {
            let mean = response.iter().sum::<f64>() / n as f64;
            vec![mean; p]
        }
    }
}

/// Fit one feature's log-linear NB model with fixed dispersion `phi`.
///
/// `offsets` are natural-log effective library sizes. Convergence is
/// declared when `|dev - dev_old| / (|dev| + 0.1) < tol`.
pub fn fit_feature(
    counts: ArrayView1<f64>,
    design: ArrayView2<f64>,
    offsets: &[f64],
    phi: f64,
    params: &GlmFitParams,
) -> FeatureFit {
    let n = counts.len();
    let p = design.ncols();

    if counts.iter().all(|&y| y == counts[0]) {
        return FeatureFit::unavailable(n, p, FitStatus::ZeroVariance);
    }

    let mut beta = initial_beta(counts, design, offsets);
    let mut mu = fitted_means(design, &beta, offsets);
    let mut dev_old = f64::NAN;
    let mut status = FitStatus::NotConverged;
    let mut iterations = 0;

    let mut weights = vec![0.0; n];
    let mut working = vec![0.0; n];
    for iter in 0..params.maxit {
        iterations = iter + 1;
        for i in 0..n {
            let eta = linear_predictor(design, &beta, i);
            weights[i] = nb_weight(mu[i], phi);
            working[i] = eta + (counts[i] - mu[i]) / mu[i];
        }

        beta = match weighted_least_squares(design, &weights, &working) {
            Some(b) if b.iter().all(|v| v.is_finite()) => b,
            _ => break,
        };
        mu = fitted_means(design, &beta, offsets);

        let dev: f64 = (0..n).map(|i| nb_unit_deviance(counts[i], mu[i], phi)).sum();
        if !dev.is_finite() {
            break;
        }
        if iter > 0 && (dev - dev_old).abs() / (dev.abs() + 0.1) < params.tol {
            status = FitStatus::Converged;
            break;
        }
        dev_old = dev;
    }

    if status != FitStatus::Converged {
        let mut unavailable = FeatureFit::unavailable(n, p, status);
        unavailable.iterations = iterations;
        return unavailable;
    }

    let final_weights: Vec<f64> = mu.iter().map(|&m| nb_weight(m, phi)).collect();
    let xtwx = weighted_cross_product(design, &final_weights);
    let covariance = match invert_spd(&xtwx, p) {
        Some(c) => c,
        None => {
            let mut ridged = xtwx.clone();
            for j in 0..p {
                ridged[j * p + j] += RIDGE;
            }
            invert_spd(&ridged, p).unwrap_or_else(|| vec![f64::NAN; p * p])
        }
    };

    FeatureFit {
        deviance: (0..n).map(|i| nb_unit_deviance(counts[i], mu[i], phi)).sum(),
        pearson: (0..n).map(|i| nb_pearson_sq(counts[i], mu[i], phi)).sum(),
        coefficients: beta,
        mu,
        covariance,
        iterations,
        status,
    }
}

/// Counts and offsets with a library-proportional prior count added.
///
/// Sample `i` gets `prior_count * lib_i / mean(lib)` added to its count
/// and twice that to its library size, where `lib_i = exp(offsets[i])`.
/// A group of all-zero counts then has a finite fitted rate.
pub fn add_prior_count(counts: ArrayView1<f64>, offsets: &[f64], prior_count: f64) -> (Vec<f64>, Vec<f64>) {
    let libs: Vec<f64> = offsets.iter().map(|o| o.exp()).collect();
    let mean_lib = libs.iter().sum::<f64>() / libs.len() as f64;
    let priors: Vec<f64> = libs.iter().map(|l| prior_count * l / mean_lib).collect();
    let augmented = counts.iter().zip(priors.iter()).map(|(y, a)| y + a).collect();
    let augmented_offsets = libs.iter().zip(priors.iter()).map(|(l, a)| (l + 2.0 * a).ln()).collect();
    (augmented, augmented_offsets)
}

/// Cox-Reid adjusted profile log-likelihood at dispersion `phi`:
/// `l(beta_hat; phi) - 0.5 * log det(X'WX)`.
///
/// Returns `None` when the fit at this dispersion is unusable.
pub fn adjusted_profile_likelihood(
    counts: ArrayView1<f64>,
    design: ArrayView2<f64>,
    offsets: &[f64],
    phi: f64,
    params: &GlmFitParams,
) -> Option<f64> {
    let fit = fit_feature(counts, design, offsets, phi, params);
    if !fit.status.is_usable() {
        return None;
    }
    let ll: f64 = counts
        .iter()
        .zip(fit.mu.iter())
        .map(|(&y, &m)| nb_log_likelihood(y, m, phi))
        .sum();
    let weights: Vec<f64> = fit.mu.iter().map(|&m| nb_weight(m, phi)).collect();
    let log_det = log_det_spd(&weighted_cross_product(design, &weights), design.ncols())?;
    Some(ll - 0.5 * log_det)
}
