//! Raw tag clusters as delivered by the upstream clustering step

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CageDeError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Strand {
    Plus,
    Minus,
    Unknown,
}

impl FromStr for Strand {
    type Err = CageDeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "+" => Ok(Strand::Plus),
            "-" => Ok(Strand::Minus),
            "." | "*" | "" => Ok(Strand::Unknown),
            other => Err(CageDeError::InvalidInput {
                reason: format!("unrecognised strand '{}'", other),
            }),
        }
    }
}

impl fmt::Display for Strand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            Strand::Plus => "+",
            Strand::Minus => "-",
            Strand::Unknown => ".",
        };
        f.write_str(symbol)
    }
}

/// A transcription-start-site tag cluster with one raw count per sample.
#[derive(Debug, Clone, PartialEq)]
pub struct RawCluster {
    pub id: String,
    pub chrom: String,
    pub start: u64,
    pub end: u64,
    pub strand: Strand,
    pub counts: Vec<u64>,
}

/// All raw clusters of a run, with counts in canonical sample order.
#[derive(Debug, Clone)]
pub struct RawClusterTable {
    clusters: Vec<RawCluster>,
    sample_ids: Vec<String>,
}

impl RawClusterTable {
    pub fn new(clusters: Vec<RawCluster>, sample_ids: Vec<String>) -> Result<Self> {
        if clusters.is_empty() {
            return Err(CageDeError::EmptyData {
                reason: "no raw clusters".to_string(),
            });
        }
        for cluster in &clusters {
            if cluster.counts.len() != sample_ids.len() {
                return Err(CageDeError::DimensionMismatch {
                    expected: format!("{} counts for cluster '{}'", sample_ids.len(), cluster.id),
                    got: format!("{} counts", cluster.counts.len()),
                });
            }
        }
        Ok(Self {
            clusters,
            sample_ids,
        })
    }

    pub fn clusters(&self) -> &[RawCluster] {
        &self.clusters
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    pub fn n_clusters(&self) -> usize {
        self.clusters.len()
    }

    /// Total raw count per sample
    pub fn library_sizes(&self) -> Vec<u64> {
        let mut totals = vec![0u64; self.sample_ids.len()];
        for cluster in &self.clusters {
            for (total, &c) in totals.iter_mut().zip(cluster.counts.iter()) {
                *total += c;
            }
        }
        totals
    }
}
