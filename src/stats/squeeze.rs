//! Empirical Bayes moderation of feature-wise variances
//!
//! Fits a scaled F distribution to a set of variance estimates by matching
//! moments of their logs, then shrinks each estimate toward the fitted prior.
//! Moment estimation of the scaled-F prior follows Smyth (2004); the robust
//! variant follows Phipson et al. (2016).

use statrs::distribution::{ChiSquared, ContinuousCDF, FisherSnedecor};

use super::{digamma, lowess, mean, median, quantile_type7, trigamma, trigamma_inverse};
use crate::error::{CageDeError, Result};
use crate::testing::benjamini_hochberg;

/// Span used when the prior scale follows a covariate trend
const TREND_SPAN: f64 = 0.5;
/// Winsorization tails for the robust fit (lower, upper)
const WINSOR_TAIL: (f64, f64) = (0.05, 0.1);
/// Adjusted p-value below which a variance is treated as an outlier
const OUTLIER_FDR: f64 = 0.05;

/// Fitted prior: a scale per feature (constant without a covariate) and
/// one prior degrees of freedom.
#[derive(Debug, Clone)]
pub struct FDistFit {
    pub scale: Vec<f64>,
    pub df2: f64,
}

#[derive(Debug, Clone)]
pub struct SqueezedVariances {
    /// Prior degrees of freedom per feature; zero for robust outliers
    pub df_prior: Vec<f64>,
    pub s2_prior: Vec<f64>,
    pub s2_post: Vec<f64>,
}

/// Floor non-positive variances at a small fraction of the median
fn floor_variances(s2: &[f64]) -> Vec<f64> {
    let clipped: Vec<f64> = s2.iter().map(|&v| if v.is_finite() { v.max(0.0) } else { 0.0 }).collect();
    let mut m = median(&clipped);
    if !(m > 0.0) {
        m = 1.0;
    }
    clipped.iter().map(|&v| v.max(1e-5 * m)).collect()
}

/// Centre of the log-variances: a lowess trend on the covariate or a constant
fn log_centre(e: &[f64], covariate: Option<&[f64]>) -> (Vec<f64>, usize) {
    match covariate {
        Some(cov) if e.len() >= 4 => (lowess(cov, e, TREND_SPAN, 2), 2),
        _ => (vec![mean(e); e.len()], 1),
    }
}

fn winsorize(values: &[f64], tails: (f64, f64)) -> Vec<f64> {
    let lo = quantile_type7(values, tails.0);
    let hi = quantile_type7(values, 1.0 - tails.1);
    values.iter().map(|&v| v.clamp(lo, hi)).collect()
}

fn fit_moments(s2: &[f64], df: &[f64], covariate: Option<&[f64]>, robust: bool) -> FDistFit {
    let n = s2.len();
    let s2 = floor_variances(s2);

    let e: Vec<f64> = s2
        .iter()
        .zip(df.iter())
        .map(|(&v, &d)| v.ln() - digamma(d / 2.0) + (d / 2.0).ln())
        .collect();
    let (emean, n_params) = log_centre(&e, covariate);

    if n <= n_params {
        // Too few features to estimate the spread: no moderation.
        return FDistFit {
            scale: s2,
            df2: 0.0,
        };
    }

    let residuals: Vec<f64> = e.iter().zip(emean.iter()).map(|(a, b)| a - b).collect();
    let residuals = if robust { winsorize(&residuals, WINSOR_TAIL) } else { residuals };

    let ss: f64 = residuals.iter().map(|r| r * r).sum();
    let mut evar = ss / (n - n_params) as f64;
    let trigamma_mean = mean(&df.iter().map(|&d| trigamma(d / 2.0)).collect::<Vec<_>>());
    evar -= trigamma_mean;

    if evar > 0.0 {
        let df2 = 2.0 * trigamma_inverse(evar);
        let shift = digamma(df2 / 2.0) - (df2 / 2.0).ln();
        FDistFit {
            scale: emean.iter().map(|&m| (m + shift).exp()).collect(),
            df2,
        }
    } else {
        FDistFit {
            scale: emean.iter().map(|&m| m.exp()).collect(),
            df2: f64::INFINITY,
        }
    }
}

/// Moment-matching fit of a scaled F distribution to variance estimates.
///
/// `df` are the residual degrees of freedom of each estimate. With a
/// covariate, the prior scale follows a lowess trend of the log-variances.
pub fn fit_f_dist(s2: &[f64], df: &[f64], covariate: Option<&[f64]>) -> Result<FDistFit> {
    validate_inputs(s2, df, covariate)?;
    Ok(fit_moments(s2, df, covariate, false))
}

fn validate_inputs(s2: &[f64], df: &[f64], covariate: Option<&[f64]>) -> Result<()> {
    if s2.is_empty() {
        return Err(CageDeError::EmptyData {
            reason: "no variances to moderate".to_string(),
        });
    }
    if df.len() != s2.len() || covariate.is_some_and(|c| c.len() != s2.len()) {
        return Err(CageDeError::DimensionMismatch {
            expected: format!("{} variances, degrees of freedom and covariates", s2.len()),
            got: format!(
                "{} degrees of freedom, {} covariates",
                df.len(),
                covariate.map_or(0, |c| c.len())
            ),
        });
    }
    if df.iter().any(|&d| !(d > 0.0)) {
        return Err(CageDeError::InvalidInput {
            reason: "residual degrees of freedom must be positive".to_string(),
        });
    }
    Ok(())
}

/// Upper-tail probability of s2 / s0 under F(df1, df2)
fn f_upper_tail(ratio: f64, df1: f64, df2: f64) -> f64 {
    if df2.is_infinite() {
        return match ChiSquared::new(df1) {
            Ok(chi) => chi.sf(ratio * df1),
            Err(_) => f64::NAN,
        };
    }
    match FisherSnedecor::new(df1, df2) {
        Ok(f) => f.sf(ratio),
        Err(_) => f64::NAN,
    }
}

/// Squeeze variance estimates toward a (possibly trended) prior.
///
/// In robust mode the prior is fitted on winsorized log-variances and
/// features whose variance is significantly larger than the prior
/// (BH-adjusted upper-tail p <= 0.05) are left unmoderated.
pub fn squeeze_var(
    s2: &[f64],
    df: &[f64],
    covariate: Option<&[f64]>,
    robust: bool,
) -> Result<SqueezedVariances> {
    validate_inputs(s2, df, covariate)?;
    let fit = fit_moments(s2, df, covariate, robust);
    let n = s2.len();

    let mut df_prior = vec![fit.df2; n];
    if robust && fit.df2 > 0.0 {
        let pvalues: Vec<f64> = (0..n)
            .map(|i| f_upper_tail(s2[i] / fit.scale[i], df[i], fit.df2))
            .collect();
        let padj = benjamini_hochberg(&pvalues);
        let mut n_outliers = 0;
        for (d, q) in df_prior.iter_mut().zip(padj.iter()) {
            if *q <= OUTLIER_FDR {
                *d = 0.0;
                n_outliers += 1;
            }
        }
        if n_outliers > 0 {
            log::debug!("{} features flagged as variance outliers", n_outliers);
        }
    }

    let s2_post: Vec<f64> = (0..n)
        .map(|i| {
            let d0 = df_prior[i];
            if d0.is_infinite() {
                fit.scale[i]
            } else if d0 == 0.0 {
                s2[i]
            } else {
                (d0 * fit.scale[i] + df[i] * s2[i]) / (d0 + df[i])
            }
        })
        .collect();

    Ok(SqueezedVariances {
        df_prior,
        s2_prior: fit.scale,
        s2_post,
    })
}
