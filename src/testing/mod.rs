//! Statistical testing for differential activity

mod contrast;
mod fdr;
mod pvalue;
mod treat;

pub use contrast::Contrast;
pub use fdr::benjamini_hochberg;
pub use pvalue::{treat_pvalue, upper_tail_t};
pub use treat::{treat_contrasts, treat_test, DeResult, DeRow, DeSummary, TestParams};
