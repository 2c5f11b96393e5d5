//! Sample records and the canonical sample sheet

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{CageDeError, Result};

/// One sequenced library.
///
/// `group` is the biological condition being compared (a clone, a
/// treatment) and `batch` the technical covariate (library preparation id).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    #[serde(alias = "sample", alias = "sample_id")]
    pub id: String,
    #[serde(alias = "clone", alias = "condition")]
    pub group: String,
    #[serde(alias = "library_id", alias = "library")]
    pub batch: String,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub barcode: Option<String>,
}

fn empty_as_none<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.trim().is_empty()))
}

impl Sample {
    pub fn new(id: &str, group: &str, batch: &str) -> Self {
        Self {
            id: id.to_string(),
            group: group.to_string(),
            batch: batch.to_string(),
            barcode: None,
        }
    }

    pub fn with_barcode(mut self, barcode: &str) -> Self {
        self.barcode = Some(barcode.to_string());
        self
    }
}

/// The ordered, validated set of samples.
///
/// The order of `samples` is the canonical column order for every matrix
/// built downstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleSheet {
    samples: Vec<Sample>,
}

impl SampleSheet {
    pub fn new(samples: Vec<Sample>) -> Result<Self> {
        if samples.is_empty() {
            return Err(CageDeError::EmptyData {
                reason: "sample sheet has no samples".to_string(),
            });
        }

        let mut seen = HashSet::with_capacity(samples.len());
        for sample in &samples {
            if sample.id.trim().is_empty() {
                return Err(CageDeError::InvalidMetadata {
                    reason: "sample with an empty identifier".to_string(),
                });
            }
            if sample.group.trim().is_empty() || sample.batch.trim().is_empty() {
                return Err(CageDeError::InvalidMetadata {
                    reason: format!("sample '{}' has an empty group or batch label", sample.id),
                });
            }
            if !seen.insert(sample.id.as_str()) {
                return Err(CageDeError::InvalidMetadata {
                    reason: format!("duplicate sample identifier '{}'", sample.id),
                });
            }
        }

        Ok(Self { samples })
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn n_samples(&self) -> usize {
        self.samples.len()
    }

    pub fn sample_ids(&self) -> Vec<String> {
        self.samples.iter().map(|s| s.id.clone()).collect()
    }

    pub fn index_of(&self, sample_id: &str) -> Option<usize> {
        self.samples.iter().position(|s| s.id == sample_id)
    }

    /// Sorted unique group labels
    pub fn group_levels(&self) -> Vec<String> {
        sorted_levels(self.samples.iter().map(|s| s.group.as_str()))
    }

    /// Sorted unique batch labels
    pub fn batch_levels(&self) -> Vec<String> {
        sorted_levels(self.samples.iter().map(|s| s.batch.as_str()))
    }

    /// Fail unless `ids` is exactly the canonical sample order
    pub fn ensure_order(&self, stage: &str, ids: &[String]) -> Result<()> {
        let expected = self.sample_ids();
        ensure_sample_order(stage, &expected, ids)
    }

    /// Position in `header` of every sample, in sheet order.
    ///
    /// Every header entry must name a sample and every sample must appear
    /// in the header.
    pub fn column_positions(&self, header: &[String], table: &str) -> Result<Vec<usize>> {
        for column in header {
            if self.index_of(column).is_none() {
                return Err(CageDeError::UnmatchedSample {
                    sample_id: column.clone(),
                    table: table.to_string(),
                });
            }
        }

        self.samples
            .iter()
            .map(|s| {
                header
                    .iter()
                    .position(|h| *h == s.id)
                    .ok_or_else(|| CageDeError::UnmatchedSample {
                        sample_id: s.id.clone(),
                        table: "sample sheet".to_string(),
                    })
            })
            .collect()
    }
}

fn sorted_levels<'a>(values: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut levels: Vec<String> = values.map(str::to_string).collect();
    levels.sort();
    levels.dedup();
    levels
}

/// Assert that a stage received columns in the canonical sample order.
pub fn ensure_sample_order(stage: &str, expected: &[String], got: &[String]) -> Result<()> {
    if expected != got {
        return Err(CageDeError::SampleOrderMismatch {
            stage: stage.to_string(),
            expected: expected.join(","),
            got: got.join(","),
        });
    }
    Ok(())
}
