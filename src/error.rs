//! Error types for rust_cage_de

use thiserror::Error;

/// Main error type for the differential-activity pipeline.
///
/// Every variant here aborts the run. Per-feature problems (a GLM that does
/// not converge, a row with no variance) are recorded on the fitted model
/// instead and never surface as an error.
#[derive(Error, Debug)]
pub enum CageDeError {
    #[error("Invalid count matrix: {reason}")]
    InvalidCountMatrix { reason: String },

    #[error("Invalid sample metadata: {reason}")]
    InvalidMetadata { reason: String },

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: String, got: String },

    #[error("Raw cluster '{cluster_id}' is not present in the identity map ({n_unmapped} unmapped clusters in total)")]
    UnmappedCluster { cluster_id: String, n_unmapped: usize },

    #[error("Inconsistent identity map: {reason}")]
    InconsistentIdentityMap { reason: String },

    #[error("Sample '{sample_id}' from the {table} has no match in the sample sheet")]
    UnmatchedSample { sample_id: String, table: String },

    #[error("Sample order mismatch at {stage}: expected [{expected}], got [{got}]")]
    SampleOrderMismatch {
        stage: String,
        expected: String,
        got: String,
    },

    #[error("Design matrix is not full rank: {reason}")]
    RankDeficientDesign { reason: String },

    #[error("Insufficient residual degrees of freedom for dispersion estimation: {df} (need at least 2)")]
    InsufficientResidualDf { df: usize },

    #[error("Contrast '{contrast}' references coefficient '{coefficient}' which is not in the design matrix")]
    UnknownCoefficient { contrast: String, coefficient: String },

    #[error("Invalid contrast '{contrast}': {reason}")]
    InvalidContrast { contrast: String, reason: String },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("Empty data: {reason}")]
    EmptyData { reason: String },

    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, CageDeError>;
