//! Input and output tables

mod catalog;
mod readers;
mod writers;

pub use catalog::{DirectionalSets, GeneSetCatalog};
pub use readers::{read_identity_map, read_raw_clusters, read_sample_sheet};
pub use writers::{
    contrast_file_name, write_count_table, write_de_table, write_identity_map, write_log_abundance,
    write_sample_sheet,
};
