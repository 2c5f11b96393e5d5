//! Gene-set catalog handed to downstream enrichment tools
//!
//! The universe is every Entrez identifier among the tested features; each
//! contrast contributes the identifiers of its significant up and down
//! features.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::data::IdentityMap;
use crate::error::Result;
use crate::testing::DeResult;

/// Directional gene lists for one contrast
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectionalSets {
    pub up: Vec<String>,
    pub down: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneSetCatalog {
    pub universe: Vec<String>,
    pub contrasts: BTreeMap<String, DirectionalSets>,
}

fn entrez_ids<'a>(map: &IdentityMap, features: impl Iterator<Item = &'a str>) -> Vec<String> {
    let ids: BTreeSet<String> = features
        .filter_map(|f| map.annotation(f))
        .filter_map(|a| a.entrez_id.clone())
        .collect();
    ids.into_iter().collect()
}

impl GeneSetCatalog {
    /// Build from the tested features and the per-contrast results.
    ///
    /// Features without an Entrez identifier are left out of every list.
    pub fn build(feature_ids: &[String], results: &[DeResult], map: &IdentityMap) -> Self {
        let universe = entrez_ids(map, feature_ids.iter().map(String::as_str));
        let contrasts = results
            .iter()
            .map(|r| {
                let sets = DirectionalSets {
                    up: entrez_ids(map, r.up_ids().into_iter()),
                    down: entrez_ids(map, r.down_ids().into_iter()),
                };
                (r.contrast.clone(), sets)
            })
            .collect();
        Self { universe, contrasts }
    }

    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;
        log::info!(
            "Wrote gene-set catalog ({} contrasts, universe of {}) to {}",
            self.contrasts.len(),
            self.universe.len(),
            path.display()
        );
        Ok(())
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}
