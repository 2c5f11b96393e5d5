//! Data structures for the differential-activity pipeline

mod cluster;
mod count_matrix;
mod identity;
mod sample;

pub use cluster::{RawCluster, RawClusterTable, Strand};
pub use count_matrix::CountMatrix;
pub use identity::{FeatureAnnotation, IdentityEntry, IdentityMap};
pub use sample::{ensure_sample_order, Sample, SampleSheet};
