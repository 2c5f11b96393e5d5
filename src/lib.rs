//! rust_cage_de: differential activity of CAGE transcription-start-site clusters
//!
//! Raw tag clusters are collapsed into merged clusters through an identity
//! map, filtered by expression, normalized with TMM and modelled with a
//! quasi-likelihood negative binomial GLM (`~0 + group + batch`). Contrasts
//! are tested against a minimum fold change (TREAT) with Benjamini-Hochberg
//! control of the false discovery rate.
//!
//! # Example
//!
//! ```ignore
//! use rust_cage_de::prelude::*;
//!
//! let samples = read_sample_sheet("samples.tsv")?;
//! let raw = read_raw_clusters("clusters.tsv", &samples, &[])?;
//! let map = read_identity_map("identity.tsv")?;
//!
//! let analysis = run_analysis(&raw, &map, &samples, &AnalysisConfig::default(), &["B.vs.A".to_string()])?;
//! for result in &analysis.results {
//!     println!("{}", result.summary());
//! }
//! write_outputs(&analysis, &map, "results")?;
//! ```

pub mod aggregate;
pub mod cli;
pub mod config;
pub mod data;
pub mod dispersion;
pub mod error;
pub mod filter;
pub mod glm;
pub mod io;
pub mod normalization;
pub mod pipeline;
pub mod rng;
pub mod simulate;
pub mod stats;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::aggregate::aggregate_clusters;
    pub use crate::config::AnalysisConfig;
    pub use crate::data::{CountMatrix, IdentityMap, RawClusterTable, Sample, SampleSheet};
    pub use crate::dispersion::{estimate_dispersions, DispersionChoice, DispersionModel, DispersionParams};
    pub use crate::error::{CageDeError, Result};
    pub use crate::filter::{filter_by_expression, FilterParams};
    pub use crate::glm::{fit_ql, DesignMatrix, FittedModel, GlmFitParams};
    pub use crate::io::{
        read_identity_map, read_raw_clusters, read_sample_sheet, write_count_table, write_de_table,
        write_identity_map, write_log_abundance, write_sample_sheet, GeneSetCatalog,
    };
    pub use crate::normalization::{calc_norm_factors, log_cpm, remove_batch_effect, LibrarySizes, TrimFractions};
    pub use crate::pipeline::{
        analyze_counts, build_contrasts, prepare_counts, project_batch_effect, run_analysis, write_outputs,
        Analysis, PreparedCounts,
    };
    pub use crate::testing::{treat_contrasts, treat_test, Contrast, DeResult, TestParams};
}
