//! Quasi-likelihood test relative to a fold-change threshold
//! (McCarthy and Smyth, 2009)

use std::cmp::Ordering;
use std::fmt;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::contrast::Contrast;
use super::fdr::benjamini_hochberg;
use super::pvalue::treat_pvalue;
use crate::error::{CageDeError, Result};
use crate::glm::{contrast_null_design, FittedModel};

/// Calling policy for one or more contrasts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TestParams {
    /// Minimum |log2 fold change| tested against
    pub min_log_fold_change: f64,
    /// q-value at or below which a feature is significant
    pub max_fdr: f64,
    /// Keep only significant rows in the result table
    pub significant_only: bool,
}

impl Default for TestParams {
    fn default() -> Self {
        Self {
            min_log_fold_change: 0.5,
            max_fdr: 0.05,
            significant_only: false,
        }
    }
}

impl TestParams {
    pub fn validate(&self) -> Result<()> {
        if !(self.min_log_fold_change >= 0.0) || !self.min_log_fold_change.is_finite() {
            return Err(CageDeError::InvalidConfig {
                reason: format!("min_log_fold_change must be >= 0, got {}", self.min_log_fold_change),
            });
        }
        if !(self.max_fdr > 0.0 && self.max_fdr <= 1.0) {
            return Err(CageDeError::InvalidConfig {
                reason: format!("max_fdr must lie in (0, 1], got {}", self.max_fdr),
            });
        }
        Ok(())
    }
}

/// One feature's result for one contrast
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeRow {
    pub feature_id: String,
    /// log2 fold change of the prior-count fit
    pub log_fc: f64,
    /// Average log2 CPM
    pub log_cpm: f64,
    pub pvalue: f64,
    pub fdr: f64,
    pub significant: bool,
}

impl DeRow {
    pub fn is_available(&self) -> bool {
        !self.pvalue.is_nan()
    }
}

/// Result table of one contrast, sorted by ascending p-value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeResult {
    pub contrast: String,
    pub params: TestParams,
    pub rows: Vec<DeRow>,
    /// Features with a p-value (before any significant-only restriction)
    pub n_tested: usize,
    /// Features without a usable fit
    pub n_unavailable: usize,
}

impl DeResult {
    pub fn significant_rows(&self) -> impl Iterator<Item = &DeRow> {
        self.rows.iter().filter(|r| r.significant)
    }

    pub fn n_significant(&self) -> usize {
        self.significant_rows().count()
    }

    pub fn is_empty_call(&self) -> bool {
        self.n_significant() == 0
    }

    pub fn up_ids(&self) -> Vec<&str> {
        self.significant_rows()
            .filter(|r| r.log_fc > 0.0)
            .map(|r| r.feature_id.as_str())
            .collect()
    }

    pub fn down_ids(&self) -> Vec<&str> {
        self.significant_rows()
            .filter(|r| r.log_fc < 0.0)
            .map(|r| r.feature_id.as_str())
            .collect()
    }

    pub fn row(&self, feature_id: &str) -> Option<&DeRow> {
        self.rows.iter().find(|r| r.feature_id == feature_id)
    }

    pub fn summary(&self) -> DeSummary {
        DeSummary {
            contrast: self.contrast.clone(),
            tested: self.n_tested,
            significant: self.n_significant(),
            up: self.up_ids().len(),
            down: self.down_ids().len(),
            unavailable: self.n_unavailable,
            max_fdr: self.params.max_fdr,
            min_log_fold_change: self.params.min_log_fold_change,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeSummary {
    pub contrast: String,
    pub tested: usize,
    pub significant: usize,
    pub up: usize,
    pub down: usize,
    pub unavailable: usize,
    pub max_fdr: f64,
    pub min_log_fold_change: f64,
}

impl fmt::Display for DeSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Contrast {}", self.contrast)?;
        writeln!(f, "  Features tested: {}", self.tested)?;
        writeln!(
            f,
            "  Significant (FDR <= {}, |logFC| > {}): {}",
            self.max_fdr, self.min_log_fold_change, self.significant
        )?;
        writeln!(f, "    Up: {}", self.up)?;
        writeln!(f, "    Down: {}", self.down)?;
        write!(f, "  Unavailable: {}", self.unavailable)
    }
}

/// Test one contrast against the fold-change threshold.
///
/// The statistic uses the unshrunk estimate `c' beta` with the
/// likelihood-ratio standard error of [`FittedModel::contrast_standard_error`],
/// on `df_total`. Reported fold changes come from the prior-count fit.
/// BH is applied over the available features of this contrast only.
pub fn treat_test(model: &FittedModel, contrast: &Contrast, params: &TestParams) -> Result<DeResult> {
    params.validate()?;
    if contrast.coef_names() != model.coef_names() {
        return Err(CageDeError::InvalidContrast {
            contrast: contrast.name().to_string(),
            reason: format!(
                "built for coefficients [{}] but the model has [{}]",
                contrast.coef_names().join(","),
                model.coef_names().join(",")
            ),
        });
    }

    let tau = params.min_log_fold_change * std::f64::consts::LN_2;
    let weights = contrast.weights();
    let null_design = contrast_null_design(model.design(), weights);

    let estimates: Vec<(f64, f64)> = (0..model.n_features())
        .into_par_iter()
        .map(|i| {
            if !model.is_usable(i) {
                return (f64::NAN, f64::NAN);
            }
            let estimate = contrast.apply(&model.coefficients(i).to_vec());
            let se = model.contrast_standard_error(i, weights, null_design.view());
            let p = treat_pvalue(estimate, se, tau, model.df_total(i));
            let reported = contrast.apply(&model.prior_coefficients(i).to_vec());
            (reported / std::f64::consts::LN_2, p)
        })
        .collect();

    let pvalues: Vec<f64> = estimates.iter().map(|e| e.1).collect();
    let fdr = benjamini_hochberg(&pvalues);

    let mut rows: Vec<DeRow> = model
        .feature_ids()
        .iter()
        .enumerate()
        .map(|(i, id)| DeRow {
            feature_id: id.clone(),
            log_fc: estimates[i].0,
            log_cpm: model.ave_log_cpm()[i],
            pvalue: pvalues[i],
            fdr: fdr[i],
            significant: fdr[i] <= params.max_fdr,
        })
        .collect();

    let n_tested = pvalues.iter().filter(|p| !p.is_nan()).count();
    let n_unavailable = rows.len() - n_tested;

    rows.sort_by(|a, b| match (a.pvalue.is_nan(), b.pvalue.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        _ => a.pvalue.partial_cmp(&b.pvalue).unwrap_or(Ordering::Equal),
    });
    if params.significant_only {
        rows.retain(|r| r.significant);
    }

    let result = DeResult {
        contrast: contrast.name().to_string(),
        params: params.clone(),
        rows,
        n_tested,
        n_unavailable,
    };
    log::info!(
        "{}: {} of {} features significant ({} up, {} down)",
        result.contrast,
        result.n_significant(),
        n_tested,
        result.up_ids().len(),
        result.down_ids().len()
    );
    Ok(result)
}

/// Test several contrasts against one shared model
pub fn treat_contrasts(model: &FittedModel, contrasts: &[Contrast], params: &TestParams) -> Result<Vec<DeResult>> {
    contrasts
        .par_iter()
        .map(|c| treat_test(model, c, params))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(rows: Vec<(&str, f64, f64, bool)>) -> DeResult {
        DeResult {
            contrast: "B.vs.A".to_string(),
            params: TestParams::default(),
            rows: rows
                .into_iter()
                .map(|(id, lfc, p, sig)| DeRow {
                    feature_id: id.to_string(),
                    log_fc: lfc,
                    log_cpm: 5.0,
                    pvalue: p,
                    fdr: p,
                    significant: sig,
                })
                .collect(),
            n_tested: 3,
            n_unavailable: 1,
        }
    }

    #[test]
    fn test_summary_counts_direction() {
        let res = result(vec![
            ("f1", 2.0, 0.001, true),
            ("f2", -1.5, 0.01, true),
            ("f3", 0.1, 0.8, false),
            ("f4", f64::NAN, f64::NAN, false),
        ]);
        let summary = res.summary();
        assert_eq!(summary.significant, 2);
        assert_eq!(summary.up, 1);
        assert_eq!(summary.down, 1);
        assert_eq!(res.up_ids(), vec!["f1"]);
        assert!(!res.rows[3].is_available());
        assert!(summary.to_string().contains("Up: 1"));
    }

    #[test]
    fn test_empty_call() {
        let res = result(vec![("f1", 0.2, 0.5, false)]);
        assert!(res.is_empty_call());
    }

    #[test]
    fn test_params_validation() {
        assert!(TestParams::default().validate().is_ok());
        let bad = TestParams {
            max_fdr: 0.0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        let bad = TestParams {
            min_log_fold_change: -1.0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
