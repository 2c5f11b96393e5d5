//! Generalized Linear Model fitting for negative binomial data

mod design;
mod fitting;
pub mod linalg;
mod negative_binomial;
mod quasi;

pub use design::{contrast_null_design, DesignMatrix};
pub use fitting::{
    add_prior_count, adjusted_profile_likelihood, fit_feature, FeatureFit, FitStatus, GlmFitParams, PRIOR_FC_COUNT,
};
pub use negative_binomial::{
    nb_log_likelihood, nb_mean, nb_pearson_sq, nb_unit_deviance, nb_variance, nb_weight, MIN_MU,
};
pub use quasi::{fit_ql, FitSummary, FittedModel};
