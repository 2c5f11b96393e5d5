//! Many-to-one identity map from raw clusters to merged clusters

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{CageDeError, Result};

/// Where a single raw cluster ends up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityEntry {
    /// Enhancer group the cluster was assigned to, if any
    pub enhancer_group: Option<String>,
    /// Final merged-cluster identifier
    pub merged_id: String,
}

/// Descriptive fields attached to a merged cluster in output tables.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureAnnotation {
    #[serde(default)]
    pub chrom: Option<String>,
    #[serde(default)]
    pub start: Option<u64>,
    #[serde(default)]
    pub end: Option<u64>,
    #[serde(default)]
    pub strand: Option<String>,
    #[serde(default)]
    pub gene_name: Option<String>,
    #[serde(default)]
    pub gene_class: Option<String>,
    #[serde(default)]
    pub entrez_id: Option<String>,
}

impl FeatureAnnotation {
    /// Column names written ahead of the numeric columns in output tables
    pub const COLUMNS: [&'static str; 7] = [
        "chrom",
        "start",
        "end",
        "strand",
        "gene_name",
        "gene_class",
        "entrez_id",
    ];

    pub fn fields(&self) -> [String; 7] {
        let text = |v: &Option<String>| v.clone().unwrap_or_default();
        let num = |v: &Option<u64>| v.map(|x| x.to_string()).unwrap_or_default();
        [
            text(&self.chrom),
            num(&self.start),
            num(&self.end),
            text(&self.strand),
            text(&self.gene_name),
            text(&self.gene_class),
            text(&self.entrez_id),
        ]
    }
}

/// Equivalence classes over raw clusters.
///
/// Invariant: every enhancer group resolves to exactly one merged id, so a
/// raw cluster's merged id is the same whether it is reached directly or
/// through its enhancer group.
#[derive(Debug, Clone, Default)]
pub struct IdentityMap {
    entries: HashMap<String, IdentityEntry>,
    group_targets: HashMap<String, String>,
    annotations: HashMap<String, FeatureAnnotation>,
}

impl IdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one raw cluster.
    ///
    /// Re-registering the same raw id with the same target is a no-op;
    /// a conflicting target, or an enhancer group split across two merged
    /// ids, is an error.
    pub fn insert(
        &mut self,
        raw_id: &str,
        enhancer_group: Option<&str>,
        merged_id: &str,
    ) -> Result<()> {
        if merged_id.trim().is_empty() {
            return Err(CageDeError::InconsistentIdentityMap {
                reason: format!("raw cluster '{}' has an empty merged identifier", raw_id),
            });
        }

        let entry = IdentityEntry {
            enhancer_group: enhancer_group
                .filter(|g| !g.trim().is_empty())
                .map(str::to_string),
            merged_id: merged_id.to_string(),
        };

        if let Some(group) = &entry.enhancer_group {
            match self.group_targets.get(group) {
                Some(target) if *target != entry.merged_id => {
                    return Err(CageDeError::InconsistentIdentityMap {
                        reason: format!(
                            "enhancer group '{}' maps to both '{}' and '{}'",
                            group, target, entry.merged_id
                        ),
                    });
                }
                Some(_) => {}
                None => {
                    self.group_targets
                        .insert(group.clone(), entry.merged_id.clone());
                }
            }
        }

        match self.entries.get(raw_id) {
            Some(existing) if *existing != entry => Err(CageDeError::InconsistentIdentityMap {
                reason: format!(
                    "raw cluster '{}' is mapped to both '{}' and '{}'",
                    raw_id, existing.merged_id, entry.merged_id
                ),
            }),
            Some(_) => Ok(()),
            None => {
                self.entries.insert(raw_id.to_string(), entry);
                Ok(())
            }
        }
    }

    /// Attach an annotation to a merged id; the first annotation wins.
    pub fn annotate(&mut self, merged_id: &str, annotation: FeatureAnnotation) {
        self.annotations
            .entry(merged_id.to_string())
            .or_insert(annotation);
    }

    pub fn resolve(&self, raw_id: &str) -> Option<&IdentityEntry> {
        self.entries.get(raw_id)
    }

    /// Merged id an enhancer group collapses into
    pub fn group_target(&self, enhancer_group: &str) -> Option<&str> {
        self.group_targets.get(enhancer_group).map(String::as_str)
    }

    pub fn annotation(&self, merged_id: &str) -> Option<&FeatureAnnotation> {
        self.annotations.get(merged_id)
    }

    /// Raw clusters with their targets, ordered by raw id
    pub fn entries(&self) -> Vec<(&str, &IdentityEntry)> {
        let mut entries: Vec<(&str, &IdentityEntry)> =
            self.entries.iter().map(|(k, v)| (k.as_str(), v)).collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries
    }

    pub fn n_entries(&self) -> usize {
        self.entries.len()
    }

    pub fn n_enhancer_groups(&self) -> usize {
        self.group_targets.len()
    }
}
