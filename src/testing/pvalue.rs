//! P-values for tests against a fold-change threshold

use statrs::distribution::{ContinuousCDF, Normal, StudentsT};

/// P(T > t) for a Student t with `df` degrees of freedom; standard normal
/// when `df` is infinite.
pub fn upper_tail_t(t: f64, df: f64) -> f64 {
    if t.is_nan() || !(df > 0.0) {
        return f64::NAN;
    }
    if df.is_infinite() {
        return match Normal::new(0.0, 1.0) {
            Ok(normal) => normal.sf(t),
            Err(_) => f64::NAN,
        };
    }
    match StudentsT::new(0.0, 1.0, df) {
        Ok(dist) => dist.sf(t),
        Err(_) => f64::NAN,
    }
}

/// Two-sided p-value for `|beta| > threshold`.
///
/// Sums the upper tails of `(|beta| - threshold) / se` and
/// `(|beta| + threshold) / se`; with a zero threshold this is the usual
/// two-sided t-test.
pub fn treat_pvalue(estimate: f64, se: f64, threshold: f64, df: f64) -> f64 {
    if !estimate.is_finite() || !(se > 0.0) || !se.is_finite() {
        return f64::NAN;
    }
    let abs_b = estimate.abs();
    let p = upper_tail_t((abs_b - threshold) / se, df) + upper_tail_t((abs_b + threshold) / se, df);
    p.min(1.0)
}
