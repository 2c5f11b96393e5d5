//! Library-size normalization and derived abundance matrices

mod batch;
mod counts;
mod tmm;

pub use batch::{remove_batch_effect, AdjustedLogExpression};
pub use counts::{ave_log_cpm, cpm, log_cpm, LibrarySizes, PRIOR_COUNT};
pub use tmm::{calc_norm_factors, tmm_factor, TrimFractions};
