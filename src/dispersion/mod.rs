//! Dispersion estimation for negative binomial models
//!
//! Every feature's Cox-Reid adjusted profile likelihood is evaluated on a
//! fixed grid of dispersions. The common dispersion maximises the summed
//! curves, the trend maximises locally averaged curves along abundance,
//! and tagwise values maximise each feature's curve plus a weighted trend
//! curve.

mod apl;
mod tagwise;
mod trend;

pub use apl::{apl_curves, log_dispersion_grid, maximize_on_grid};
pub use tagwise::{prior_degrees_of_freedom, tagwise_log_dispersion};
pub use trend::TrendCurves;

use serde::{Deserialize, Serialize};

use crate::data::{ensure_sample_order, CountMatrix};
use crate::error::{CageDeError, Result};
use crate::glm::{DesignMatrix, GlmFitParams};
use crate::normalization::{ave_log_cpm, LibrarySizes, PRIOR_COUNT};

/// Which dispersion the quasi-likelihood fit uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispersionChoice {
    Common,
    Trended,
    Tagwise,
}

/// Configurable parameters for dispersion estimation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DispersionParams {
    /// Grid points are `grid_base * 2^k` for k in `[grid_min_pow, grid_max_pow]`
    pub grid_base: f64,
    pub grid_min_pow: i32,
    pub grid_max_pow: i32,
    /// Fraction of features in each local average of the trend
    pub trend_span: f64,
    /// Robust prior estimation; outlier features are excluded from the trend
    pub robust: bool,
    /// Dispersion used by the quasi-likelihood GLM fit
    pub fit_dispersion: DispersionChoice,
}

impl Default for DispersionParams {
    fn default() -> Self {
        Self {
            grid_base: 0.1,
            grid_min_pow: -10,
            grid_max_pow: 10,
            trend_span: 0.3,
            robust: true,
            fit_dispersion: DispersionChoice::Trended,
        }
    }
}

impl DispersionParams {
    pub fn validate(&self) -> Result<()> {
        if !(self.grid_base > 0.0) || self.grid_min_pow + 2 > self.grid_max_pow {
            return Err(CageDeError::InvalidConfig {
                reason: "dispersion grid needs a positive base and at least 3 points".to_string(),
            });
        }
        if !(self.trend_span > 0.0 && self.trend_span <= 1.0) {
            return Err(CageDeError::InvalidConfig {
                reason: format!("trend span must lie in (0, 1], got {}", self.trend_span),
            });
        }
        Ok(())
    }
}

/// Common, trended and tagwise dispersions for one run.
///
/// Read-only once estimated.
#[derive(Debug, Clone)]
pub struct DispersionModel {
    feature_ids: Vec<String>,
    ave_log_cpm: Vec<f64>,
    common: f64,
    trended: Vec<f64>,
    tagwise: Vec<f64>,
    prior_df: Vec<f64>,
    df_residual: usize,
}

impl DispersionModel {
    pub fn feature_ids(&self) -> &[String] {
        &self.feature_ids
    }

    pub fn ave_log_cpm(&self) -> &[f64] {
        &self.ave_log_cpm
    }

    pub fn common(&self) -> f64 {
        self.common
    }

    /// Biological coefficient of variation, `sqrt(common dispersion)`
    pub fn bcv(&self) -> f64 {
        self.common.sqrt()
    }

    pub fn trended(&self) -> &[f64] {
        &self.trended
    }

    pub fn tagwise(&self) -> &[f64] {
        &self.tagwise
    }

    pub fn prior_df(&self) -> &[f64] {
        &self.prior_df
    }

    pub fn df_residual(&self) -> usize {
        self.df_residual
    }

    pub fn values(&self, choice: DispersionChoice) -> Vec<f64> {
        match choice {
            DispersionChoice::Common => vec![self.common; self.trended.len()],
            DispersionChoice::Trended => self.trended.clone(),
            DispersionChoice::Tagwise => self.tagwise.clone(),
        }
    }
}

/// Estimate common, trended and tagwise dispersions.
pub fn estimate_dispersions(
    counts: &CountMatrix,
    design: &DesignMatrix,
    libs: &LibrarySizes,
    params: &DispersionParams,
    glm_params: &GlmFitParams,
) -> Result<DispersionModel> {
    params.validate()?;
    ensure_sample_order("dispersion (design)", design.sample_ids(), counts.sample_ids())?;
    ensure_sample_order("dispersion (library sizes)", libs.sample_ids(), counts.sample_ids())?;

    let df_residual = design.residual_df();
    if df_residual < 2 {
        return Err(CageDeError::InsufficientResidualDf { df: df_residual });
    }

    let offsets = libs.offsets();
    let abundance = ave_log_cpm(counts.counts(), &libs.effective(), PRIOR_COUNT)?;
    let grid = log_dispersion_grid(params.grid_base, params.grid_min_pow, params.grid_max_pow);

    log::info!(
        "Evaluating adjusted profile likelihood for {} features on {} dispersion grid points",
        counts.n_features(),
        grid.len()
    );
    let curves = apl_curves(counts, design.matrix(), &offsets, &grid, glm_params);

    let valid: Vec<bool> = curves.iter().map(Option::is_some).collect();
    let n_valid = valid.iter().filter(|&&v| v).count();
    if n_valid == 0 {
        return Err(CageDeError::EmptyData {
            reason: "no feature has a usable likelihood curve for dispersion estimation".to_string(),
        });
    }
    if n_valid < curves.len() {
        log::warn!(
            "{} features have no usable likelihood curve and follow the trend",
            curves.len() - n_valid
        );
    }

    // Common dispersion
    let mut summed = vec![0.0; grid.len()];
    for curve in curves.iter().flatten() {
        for (acc, v) in summed.iter_mut().zip(curve.iter()) {
            *acc += v;
        }
    }
    let common = maximize_on_grid(&grid, &summed).exp();
    log::info!("Common dispersion: {:.6} (BCV {:.4})", common, common.sqrt());

    // Trend, then prior degrees of freedom at the trend
    let trend_from = |include: &[bool]| -> Result<(TrendCurves, Vec<f64>)> {
        let trend = TrendCurves::fit(&abundance, &curves, include, params.trend_span).ok_or_else(|| {
            CageDeError::EmptyData {
                reason: "no features available for the dispersion trend".to_string(),
            }
        })?;
        let trended = abundance
            .iter()
            .map(|&a| maximize_on_grid(&grid, &trend.curve_at(a)).exp())
            .collect();
        Ok((trend, trended))
    };

    let (mut trend, mut trended) = trend_from(&valid)?;
    let prior_df = prior_degrees_of_freedom(
        counts,
        design.matrix(),
        &offsets,
        &trended,
        &abundance,
        df_residual,
        params.robust,
        glm_params,
    )?;

    if params.robust {
        let include: Vec<bool> = valid
            .iter()
            .zip(prior_df.iter())
            .map(|(&v, &d)| v && d > 0.0)
            .collect();
        let n_outliers = n_valid - include.iter().filter(|&&v| v).count();
        if n_outliers > 0 && n_outliers < n_valid {
            log::info!("Refitting dispersion trend without {} outlier features", n_outliers);
            (trend, trended) = trend_from(&include)?;
        }
    }

    let finite_prior: Vec<f64> = prior_df.iter().copied().filter(|d| d.is_finite()).collect();
    if finite_prior.is_empty() {
        log::debug!("Prior df is infinite: tagwise dispersions equal the trend");
    } else {
        log::debug!(
            "Prior df: median {:.3} over {} features",
            crate::stats::median(&finite_prior),
            finite_prior.len()
        );
    }

    let tagwise: Vec<f64> = (0..curves.len())
        .map(|i| {
            let prior_n = prior_df[i] / df_residual as f64;
            let trend_curve = trend.curve_at(abundance[i]);
            tagwise_log_dispersion(curves[i].as_deref(), &trend_curve, prior_n, &grid).exp()
        })
        .collect();

    Ok(DispersionModel {
        feature_ids: counts.feature_ids().to_vec(),
        ave_log_cpm: abundance,
        common,
        trended,
        tagwise,
        prior_df,
        df_residual,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Sample, SampleSheet};
    use ndarray::Array2;

    fn setup(n_per_group: usize) -> (CountMatrix, DesignMatrix, LibrarySizes) {
        let n_samples = 2 * n_per_group;
        let n_features = 40;
        // Deterministic within-group scatter of roughly +-30 %.
        let counts = Array2::from_shape_fn((n_features, n_samples), |(i, j)| {
            let base = 20.0 + 15.0 * i as f64;
            let wiggle = [0.7, 1.3, 1.0, 0.85, 1.15, 0.95][(i + j) % 6];
            (base * wiggle).round()
        });
        let samples: Vec<Sample> = (0..n_samples)
            .map(|j| {
                let g = if j < n_per_group { "A" } else { "B" };
                Sample::new(&format!("s{}", j), g, "L1")
            })
            .collect();
        let sheet = SampleSheet::new(samples).unwrap();
        let ids: Vec<String> = (0..n_features).map(|i| format!("f{}", i)).collect();
        let matrix = CountMatrix::new(counts, ids, sheet.sample_ids()).unwrap();
        let design = DesignMatrix::from_sample_sheet(&sheet).unwrap();
        let libs = LibrarySizes::new(sheet.sample_ids(), matrix.library_sizes(), vec![1.0; n_samples]).unwrap();
        (matrix, design, libs)
    }

    #[test]
    fn test_estimates_are_positive_and_bounded() {
        let (counts, design, libs) = setup(3);
        let model =
            estimate_dispersions(&counts, &design, &libs, &DispersionParams::default(), &GlmFitParams::default())
                .unwrap();
        let (lo, hi) = (0.1 / 1024.0, 102.4);
        assert!(model.common() >= lo * 0.99 && model.common() <= hi * 1.01);
        assert!(model.common() > 0.01, "scatter of 30% implies a clearly non-Poisson dispersion");
        for d in model.trended().iter().chain(model.tagwise().iter()) {
            assert!(*d >= lo * 0.99 && *d <= hi * 1.01);
        }
        assert_eq!(model.values(DispersionChoice::Common).len(), 40);
        assert_eq!(model.df_residual(), 4);
    }

    #[test]
    fn test_insufficient_residual_df_is_fatal() {
        let (counts, _, _) = setup(1);
        let sheet = SampleSheet::new(vec![Sample::new("s0", "A", "L1"), Sample::new("s1", "B", "L1")]).unwrap();
        let design = DesignMatrix::from_sample_sheet(&sheet).unwrap();
        let libs = LibrarySizes::new(sheet.sample_ids(), counts.library_sizes(), vec![1.0; 2]).unwrap();
        let err = estimate_dispersions(&counts, &design, &libs, &DispersionParams::default(), &GlmFitParams::default())
            .unwrap_err();
        assert!(matches!(err, CageDeError::InsufficientResidualDf { df: 0 }));
    }

    #[test]
    fn test_sample_order_checked() {
        let (counts, _, libs) = setup(2);
        let sheet = SampleSheet::new(vec![
            Sample::new("s1", "A", "L1"),
            Sample::new("s0", "A", "L1"),
            Sample::new("s2", "B", "L1"),
            Sample::new("s3", "B", "L1"),
        ])
        .unwrap();
        let design = DesignMatrix::from_sample_sheet(&sheet).unwrap();
        let err = estimate_dispersions(&counts, &design, &libs, &DispersionParams::default(), &GlmFitParams::default())
            .unwrap_err();
        assert!(matches!(err, CageDeError::SampleOrderMismatch { .. }));
    }
}
