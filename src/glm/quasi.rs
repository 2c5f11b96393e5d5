//! Quasi-likelihood GLM fit across all features
//!
//! Lund et al. (2012); Lun, Chen and Smyth (2016).

use std::fmt;

use ndarray::{Array2, ArrayView1, ArrayView2};
use rayon::prelude::*;

use super::design::DesignMatrix;
use super::fitting::{add_prior_count, fit_feature, FeatureFit, FitStatus, GlmFitParams, PRIOR_FC_COUNT};
use super::linalg::quadratic_form;
use crate::data::{ensure_sample_order, CountMatrix};
use crate::dispersion::{DispersionModel, DispersionParams};
use crate::error::{CageDeError, Result};
use crate::normalization::LibrarySizes;
use crate::stats::squeeze_var;

/// Counts of per-feature fit outcomes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FitSummary {
    pub n_features: usize,
    pub n_converged: usize,
    pub n_not_converged: usize,
    pub n_zero_variance: usize,
}

impl FitSummary {
    pub fn n_unavailable(&self) -> usize {
        self.n_not_converged + self.n_zero_variance
    }

    pub fn unavailable_fraction(&self) -> f64 {
        if self.n_features == 0 {
            0.0
        } else {
            self.n_unavailable() as f64 / self.n_features as f64
        }
    }
}

impl fmt::Display for FitSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "features fitted   : {}", self.n_features)?;
        writeln!(f, "converged         : {}", self.n_converged)?;
        writeln!(f, "not converged     : {}", self.n_not_converged)?;
        write!(
            f,
            "zero variance     : {} ({:.2}% unavailable)",
            self.n_zero_variance,
            100.0 * self.unavailable_fraction()
        )
    }
}

/// Per-feature GLM fits with moderated quasi-likelihood scales.
///
/// Immutable after `fit_ql` returns; contrasts borrow it read-only, so one
/// model can serve any number of concurrent tests.
#[derive(Debug)]
pub struct FittedModel {
    feature_ids: Vec<String>,
    sample_ids: Vec<String>,
    coef_names: Vec<String>,
    counts: Array2<f64>,
    design: Array2<f64>,
    offsets: Vec<f64>,
    glm_params: GlmFitParams,
    coefficients: Array2<f64>,
    prior_coefficients: Array2<f64>,
    fitted: Array2<f64>,
    covariances: Vec<Vec<f64>>,
    dispersion: Vec<f64>,
    deviance: Vec<f64>,
    ave_log_cpm: Vec<f64>,
    s2: Vec<f64>,
    s2_prior: Vec<f64>,
    s2_post: Vec<f64>,
    df_prior: Vec<f64>,
    df_residual: usize,
    status: Vec<FitStatus>,
    n_usable: usize,
}

impl FittedModel {
    pub fn feature_ids(&self) -> &[String] {
        &self.feature_ids
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    pub fn coef_names(&self) -> &[String] {
        &self.coef_names
    }

    pub fn n_features(&self) -> usize {
        self.feature_ids.len()
    }

    pub fn n_coefs(&self) -> usize {
        self.coef_names.len()
    }

    /// Natural-log coefficients of one feature
    pub fn coefficients(&self, feature: usize) -> ArrayView1<f64> {
        self.coefficients.row(feature)
    }

    /// Coefficients refitted with a prior count of `PRIOR_FC_COUNT`.
    ///
    /// Finite even when a group has only zero counts; reported fold
    /// changes come from these.
    pub fn prior_coefficients(&self, feature: usize) -> ArrayView1<f64> {
        self.prior_coefficients.row(feature)
    }

    pub fn coefficient_matrix(&self) -> ArrayView2<f64> {
        self.coefficients.view()
    }

    pub fn design(&self) -> ArrayView2<f64> {
        self.design.view()
    }

    pub fn fitted_values(&self) -> ArrayView2<f64> {
        self.fitted.view()
    }

    pub fn dispersion(&self) -> &[f64] {
        &self.dispersion
    }

    pub fn deviance(&self) -> &[f64] {
        &self.deviance
    }

    pub fn ave_log_cpm(&self) -> &[f64] {
        &self.ave_log_cpm
    }

    /// Raw quasi-likelihood scales (Pearson chi-square / residual df)
    pub fn s2(&self) -> &[f64] {
        &self.s2
    }

    pub fn s2_prior(&self) -> &[f64] {
        &self.s2_prior
    }

    pub fn s2_post(&self) -> &[f64] {
        &self.s2_post
    }

    pub fn df_prior(&self) -> &[f64] {
        &self.df_prior
    }

    pub fn df_residual(&self) -> usize {
        self.df_residual
    }

    /// Residual plus prior df, capped at the pooled residual df.
    pub fn df_total(&self, feature: usize) -> f64 {
        let df_res = self.df_residual as f64;
        let cap = df_res * self.n_usable.max(1) as f64;
        (df_res + self.df_prior[feature]).min(cap)
    }

    /// Deviance of the feature refitted on `null_design` at the same
    /// dispersion, or `None` if that fit is unusable.
    pub fn null_deviance(&self, feature: usize, null_design: ArrayView2<f64>) -> Option<f64> {
        let fit = fit_feature(
            self.counts.row(feature),
            null_design,
            &self.offsets,
            self.dispersion[feature],
            &self.glm_params,
        );
        fit.status.is_usable().then_some(fit.deviance)
    }

    /// Standard error of `c' beta` for contrast weights `weights`.
    ///
    /// Taken from the quasi-likelihood F statistic of the contrast,
    /// `se = |c' beta| / sqrt(LR / s2_post)`, which stays informative when
    /// a group's counts are all zero and the Wald variance diverges. Falls
    /// back to the Wald form `sqrt(s2_post * c' V c)` when the likelihood
    /// ratio carries no information.
    pub fn contrast_standard_error(&self, feature: usize, weights: &[f64], null_design: ArrayView2<f64>) -> f64 {
        let s2_post = self.s2_post[feature];
        let estimate = weights
            .iter()
            .zip(self.coefficients.row(feature).iter())
            .map(|(w, b)| w * b)
            .sum::<f64>();

        if let Some(null_dev) = self.null_deviance(feature, null_design) {
            let lr = (null_dev - self.deviance[feature]).max(0.0);
            let f_stat = lr / s2_post;
            if f_stat > 0.0 && f_stat.is_finite() && estimate.is_finite() && estimate != 0.0 {
                return estimate.abs() / f_stat.sqrt();
            }
        }
        (s2_post * quadratic_form(&self.covariances[feature], weights)).sqrt()
    }

    pub fn status(&self, feature: usize) -> FitStatus {
        self.status[feature]
    }

    pub fn is_usable(&self, feature: usize) -> bool {
        self.status[feature].is_usable()
    }

    pub fn summary(&self) -> FitSummary {
        let mut summary = FitSummary {
            n_features: self.status.len(),
            ..Default::default()
        };
        for status in &self.status {
            match status {
                FitStatus::Converged => summary.n_converged += 1,
                FitStatus::NotConverged => summary.n_not_converged += 1,
                FitStatus::ZeroVariance => summary.n_zero_variance += 1,
            }
        }
        summary
    }
}

/// Fit every feature at its chosen dispersion, then moderate the
/// quasi-likelihood scales against average abundance.
///
/// Non-converged and zero-variance features are kept with NaN estimates;
/// only a broken design or sample order aborts.
pub fn fit_ql(
    counts: &CountMatrix,
    design: &DesignMatrix,
    libs: &LibrarySizes,
    dispersions: &DispersionModel,
    dispersion_params: &DispersionParams,
    glm_params: &GlmFitParams,
) -> Result<FittedModel> {
    glm_params.validate()?;
    design.check_full_rank()?;
    ensure_sample_order("fit (design)", design.sample_ids(), counts.sample_ids())?;
    ensure_sample_order("fit (library sizes)", libs.sample_ids(), counts.sample_ids())?;
    if dispersions.feature_ids() != counts.feature_ids() {
        return Err(CageDeError::DimensionMismatch {
            expected: format!("dispersions for the {} fitted features", counts.n_features()),
            got: format!("dispersions for {} features", dispersions.feature_ids().len()),
        });
    }

    let df_residual = design.residual_df();
    if df_residual == 0 {
        return Err(CageDeError::InsufficientResidualDf { df: 0 });
    }

    let phi = dispersions.values(dispersion_params.fit_dispersion);
    let offsets = libs.offsets();
    let (n_features, n_samples) = counts.counts().dim();
    let n_coefs = design.n_coefs();

    log::info!(
        "Fitting quasi-likelihood GLM for {} features ({:?} dispersion)",
        n_features,
        dispersion_params.fit_dispersion
    );
    let fits: Vec<(FeatureFit, Vec<f64>)> = (0..n_features)
        .into_par_iter()
        .map(|i| {
            let y = counts.feature_counts(i);
            let fit = fit_feature(y, design.matrix(), &offsets, phi[i], glm_params);
            if !fit.status.is_usable() {
                return (fit, vec![f64::NAN; n_coefs]);
            }
            let (augmented, augmented_offsets) = add_prior_count(y, &offsets, PRIOR_FC_COUNT);
            let prior_fit = fit_feature(
                ArrayView1::from(&augmented),
                design.matrix(),
                &augmented_offsets,
                phi[i],
                glm_params,
            );
            let prior_beta = if prior_fit.status.is_usable() {
                prior_fit.coefficients
            } else {
                fit.coefficients.clone()
            };
            (fit, prior_beta)
        })
        .collect();

    let df = df_residual as f64;
    let s2: Vec<f64> = fits.iter().map(|(f, _)| f.pearson / df).collect();

    let usable: Vec<usize> = (0..n_features).filter(|&i| fits[i].0.status.is_usable()).collect();
    if usable.is_empty() {
        return Err(CageDeError::EmptyData {
            reason: "no feature could be fitted".to_string(),
        });
    }

    let usable_s2: Vec<f64> = usable.iter().map(|&i| s2[i]).collect();
    let usable_cov: Vec<f64> = usable.iter().map(|&i| dispersions.ave_log_cpm()[i]).collect();
    let squeezed = squeeze_var(&usable_s2, &vec![df; usable.len()], Some(usable_cov.as_slice()), dispersion_params.robust)?;

    let mut s2_prior = vec![f64::NAN; n_features];
    let mut s2_post = vec![f64::NAN; n_features];
    let mut df_prior = vec![f64::NAN; n_features];
    for (k, &i) in usable.iter().enumerate() {
        s2_prior[i] = squeezed.s2_prior[k];
        s2_post[i] = squeezed.s2_post[k];
        df_prior[i] = squeezed.df_prior[k];
    }

    let mut coefficients = Array2::from_elem((n_features, n_coefs), f64::NAN);
    let mut prior_coefficients = Array2::from_elem((n_features, n_coefs), f64::NAN);
    let mut fitted = Array2::from_elem((n_features, n_samples), f64::NAN);
    let mut covariances = Vec::with_capacity(n_features);
    let mut deviance = Vec::with_capacity(n_features);
    let mut status = Vec::with_capacity(n_features);
    for (i, (fit, prior_beta)) in fits.into_iter().enumerate() {
        for (j, &b) in fit.coefficients.iter().enumerate() {
            coefficients[[i, j]] = b;
        }
        for (j, &b) in prior_beta.iter().enumerate() {
            prior_coefficients[[i, j]] = b;
        }
        for (j, &m) in fit.mu.iter().enumerate() {
            fitted[[i, j]] = m;
        }
        covariances.push(fit.covariance);
        deviance.push(fit.deviance);
        status.push(fit.status);
    }

    let model = FittedModel {
        feature_ids: counts.feature_ids().to_vec(),
        sample_ids: counts.sample_ids().to_vec(),
        coef_names: design.coef_names().to_vec(),
        counts: counts.counts().to_owned(),
        design: design.matrix().to_owned(),
        offsets,
        glm_params: glm_params.clone(),
        coefficients,
        prior_coefficients,
        fitted,
        covariances,
        dispersion: phi,
        deviance,
        ave_log_cpm: dispersions.ave_log_cpm().to_vec(),
        s2,
        s2_prior,
        s2_post,
        df_prior,
        df_residual,
        status,
        n_usable: usable.len(),
    };

    let summary = model.summary();
    if summary.n_unavailable() > 0 {
        log::warn!(
            "{} of {} features have no usable fit ({:.2}%): {} not converged, {} zero variance",
            summary.n_unavailable(),
            summary.n_features,
            100.0 * summary.unavailable_fraction(),
            summary.n_not_converged,
            summary.n_zero_variance
        );
    }
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Sample, SampleSheet};
    use crate::dispersion::estimate_dispersions;
    use ndarray::Array2;

    fn fixture() -> (CountMatrix, DesignMatrix, LibrarySizes) {
        let sheet = SampleSheet::new(
            (0..6)
                .map(|j| Sample::new(&format!("s{}", j), if j < 3 { "A" } else { "B" }, "L1"))
                .collect(),
        )
        .unwrap();
        let counts = Array2::from_shape_fn((30, 6), |(i, j)| {
            let base = 30.0 + 10.0 * i as f64;
            let shift = if i % 5 == 0 && j >= 3 { 4.0 } else { 1.0 };
            let wiggle = [0.8, 1.2, 1.0, 0.9, 1.1, 1.05][(i + 2 * j) % 6];
            (base * shift * wiggle).round()
        });
        let mut counts = counts;
        // One constant row.
        for j in 0..6 {
            counts[[29, j]] = 7.0;
        }
        let ids = (0..30).map(|i| format!("f{}", i)).collect();
        let matrix = CountMatrix::new(counts, ids, sheet.sample_ids()).unwrap();
        let design = DesignMatrix::from_sample_sheet(&sheet).unwrap();
        let libs = LibrarySizes::new(sheet.sample_ids(), matrix.library_sizes(), vec![1.0; 6]).unwrap();
        (matrix, design, libs)
    }

    #[test]
    fn test_fit_ql_produces_moderated_scales() {
        let (counts, design, libs) = fixture();
        let disp_params = DispersionParams::default();
        let glm_params = GlmFitParams::default();
        let disp = estimate_dispersions(&counts, &design, &libs, &disp_params, &glm_params).unwrap();
        let model = fit_ql(&counts, &design, &libs, &disp, &disp_params, &glm_params).unwrap();

        assert_eq!(model.n_coefs(), 2);
        assert_eq!(model.df_residual(), 4);
        assert_eq!(model.status(29), FitStatus::ZeroVariance);
        assert!(model.s2_post()[29].is_nan());

        let summary = model.summary();
        assert_eq!(summary.n_zero_variance, 1);
        assert_eq!(summary.n_converged + summary.n_not_converged, 29);
        for i in 0..29 {
            if model.is_usable(i) {
                assert!(model.s2_post()[i] > 0.0);
                assert!(model.df_total(i) >= 4.0);
            }
        }
        // Feature 0 carries a four-fold B effect.
        let b = model.coefficients(0);
        assert!((b[1] - b[0]) / std::f64::consts::LN_2 > 1.5);
    }

    #[test]
    fn test_all_zero_group_keeps_finite_fold_change_and_error() {
        let (counts, design, libs) = fixture();
        let mut values = counts.counts().to_owned();
        for (j, v) in [0.0, 0.0, 0.0, 300.0, 310.0, 305.0].into_iter().enumerate() {
            values[[28, j]] = v;
        }
        let counts = CountMatrix::new(values, counts.feature_ids().to_vec(), counts.sample_ids().to_vec()).unwrap();
        let disp_params = DispersionParams::default();
        let glm_params = GlmFitParams::default();
        let disp = estimate_dispersions(&counts, &design, &libs, &disp_params, &glm_params).unwrap();
        let model = fit_ql(&counts, &design, &libs, &disp, &disp_params, &glm_params).unwrap();

        assert!(model.is_usable(28));
        let prior = model.prior_coefficients(28);
        let lfc = (prior[1] - prior[0]) / std::f64::consts::LN_2;
        assert!(lfc.is_finite() && lfc > 5.0 && lfc < 20.0);

        let weights = [-1.0, 1.0];
        let null = crate::glm::contrast_null_design(model.design(), &weights);
        let beta = model.coefficients(28);
        let estimate = beta[1] - beta[0];
        let se = model.contrast_standard_error(28, &weights, null.view());
        assert!(se.is_finite() && se > 0.0);
        assert!(estimate / se > 4.0);
    }

    #[test]
    fn test_summary_display() {
        let summary = FitSummary {
            n_features: 10,
            n_converged: 8,
            n_not_converged: 1,
            n_zero_variance: 1,
        };
        let text = summary.to_string();
        assert!(text.contains("20.00% unavailable"));
    }
}
