//! Analysis configuration
//!
//! Every field has a default, so a JSON file only needs the values it
//! overrides. Options may be given nested (`{"test": {"max_fdr": 0.01}}`)
//! or under their flat names (`{"max_fdr": 0.01}`); a flat value wins over
//! the nested one. Unknown keys are an error.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::dispersion::DispersionParams;
use crate::error::{CageDeError, Result};
use crate::filter::FilterParams;
use crate::glm::GlmFitParams;
use crate::normalization::TrimFractions;
use crate::testing::TestParams;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "ConfigFile")]
pub struct AnalysisConfig {
    pub filter: FilterParams,
    pub trim: TrimFractions,
    pub dispersion: DispersionParams,
    pub glm: GlmFitParams,
    pub test: TestParams,
    /// Non-sample columns of the raw count table besides id and location
    pub metadata_columns: Vec<String>,
}

/// On-disk layout: the nested sections plus the flat option names.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    filter: FilterParams,
    #[serde(alias = "trim_fractions")]
    trim: TrimFractions,
    dispersion: DispersionParams,
    glm: GlmFitParams,
    test: TestParams,
    metadata_columns: Vec<String>,

    min_log_fold_change: Option<f64>,
    max_fdr: Option<f64>,
    significant_only: Option<bool>,
    filter_cpm_low: Option<f64>,
    filter_cpm_high: Option<f64>,
    filter_min_samples_low: Option<usize>,
    filter_min_samples_high: Option<usize>,
}

impl From<ConfigFile> for AnalysisConfig {
    fn from(file: ConfigFile) -> Self {
        let mut config = AnalysisConfig {
            filter: file.filter,
            trim: file.trim,
            dispersion: file.dispersion,
            glm: file.glm,
            test: file.test,
            metadata_columns: file.metadata_columns,
        };

        if let Some(v) = file.min_log_fold_change {
            config.test.min_log_fold_change = v;
        }
        if let Some(v) = file.max_fdr {
            config.test.max_fdr = v;
        }
        if let Some(v) = file.significant_only {
            config.test.significant_only = v;
        }
        if let Some(v) = file.filter_cpm_low {
            config.filter.cpm_low = v;
        }
        if let Some(v) = file.filter_cpm_high {
            config.filter.cpm_high = v;
        }
        if let Some(v) = file.filter_min_samples_low {
            config.filter.min_samples_low = v;
        }
        if let Some(v) = file.filter_min_samples_high {
            config.filter.min_samples_high = v;
        }
        config
    }
}

impl AnalysisConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let reader = BufReader::new(File::open(path)?);
        let config: Self = serde_json::from_reader(reader)?;
        config.validate()?;
        log::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let f = &self.filter;
        if !(f.cpm_low >= 0.0 && f.cpm_high >= 0.0) {
            return Err(CageDeError::InvalidConfig {
                reason: format!(
                    "filter CPM thresholds must be non-negative (got {} and {})",
                    f.cpm_low, f.cpm_high
                ),
            });
        }
        if let Some(name) = self.metadata_columns.iter().find(|c| c.trim().is_empty()) {
            return Err(CageDeError::InvalidConfig {
                reason: format!("metadata column names must be non-empty (got '{}')", name),
            });
        }
        self.trim.validate()?;
        self.dispersion.validate()?;
        self.glm.validate()?;
        self.test.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispersion::DispersionChoice;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_are_valid() {
        let config = AnalysisConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.test.max_fdr, 0.05);
        assert_eq!(config.filter.min_samples_low, 3);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"test": {{"min_log_fold_change": 1.0}}, "dispersion": {{"fit_dispersion": "tagwise"}}}}"#
        )
        .unwrap();

        let config = AnalysisConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.test.min_log_fold_change, 1.0);
        assert_eq!(config.test.max_fdr, 0.05);
        assert_eq!(config.dispersion.fit_dispersion, DispersionChoice::Tagwise);
        assert_eq!(config.glm, GlmFitParams::default());
    }

    #[test]
    fn test_flat_option_names() {
        let config: AnalysisConfig = serde_json::from_str(
            r#"{"max_fdr": 0.01, "min_log_fold_change": 1.0, "filter_cpm_low": 5,
                "filter_min_samples_high": 2, "significant_only": true,
                "trim_fractions": {"log_ratio": 0.2},
                "metadata_columns": ["gene", "score"]}"#,
        )
        .unwrap();
        assert_eq!(config.test.max_fdr, 0.01);
        assert_eq!(config.test.min_log_fold_change, 1.0);
        assert!(config.test.significant_only);
        assert_eq!(config.filter.cpm_low, 5.0);
        assert_eq!(config.filter.cpm_high, 3.0);
        assert_eq!(config.filter.min_samples_high, 2);
        assert_eq!(config.trim.log_ratio, 0.2);
        assert_eq!(config.trim.abundance, 0.05);
        assert_eq!(config.metadata_columns, vec!["gene", "score"]);

        // flat beats nested
        let config: AnalysisConfig =
            serde_json::from_str(r#"{"test": {"max_fdr": 0.2}, "max_fdr": 0.1}"#).unwrap();
        assert_eq!(config.test.max_fdr, 0.1);
    }

    #[test]
    fn test_unknown_keys_rejected() {
        assert!(serde_json::from_str::<AnalysisConfig>(r#"{"max_fdrr": 0.01}"#).is_err());
        assert!(serde_json::from_str::<AnalysisConfig>(r#"{"test": {"fdr": 0.01}}"#).is_err());

        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"filter_cpm_lo": 2}}"#).unwrap();
        assert!(matches!(
            AnalysisConfig::from_json_file(file.path()),
            Err(CageDeError::JsonError(_))
        ));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = AnalysisConfig::default();
        config.trim.log_ratio = 0.5;
        assert!(config.validate().is_err());

        let mut config = AnalysisConfig::default();
        config.test.max_fdr = 0.0;
        assert!(config.validate().is_err());

        let mut config = AnalysisConfig::default();
        config.filter.cpm_low = -1.0;
        assert!(matches!(config.validate(), Err(CageDeError::InvalidConfig { .. })));

        let config = AnalysisConfig {
            metadata_columns: vec![" ".to_string()],
            ..AnalysisConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
