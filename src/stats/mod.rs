//! Statistical utility functions shared across modules
//!
//! Order statistics, ranks and the polygamma functions needed for
//! moment-matching of log-variances.

mod smooth;
mod squeeze;

pub use smooth::{lowess, tricube_neighbourhood};
pub use squeeze::{fit_f_dist, squeeze_var, FDistFit, SqueezedVariances};

use std::cmp::Ordering;

fn cmp_f64(a: &f64, b: &f64) -> Ordering {
    a.partial_cmp(b).unwrap_or(Ordering::Equal)
}

/// Sample quantile with linear interpolation between order statistics
/// (Hyndman and Fan type 7).
pub fn quantile_type7(x: &[f64], p: f64) -> f64 {
    let mut sorted: Vec<f64> = x.iter().copied().filter(|v| !v.is_nan()).collect();
    if sorted.is_empty() {
        return f64::NAN;
    }
    sorted.sort_by(cmp_f64);

    let h = (sorted.len() - 1) as f64 * p.clamp(0.0, 1.0);
    let lo = h.floor() as usize;
    let hi = h.ceil() as usize;
    sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
}

pub fn median(x: &[f64]) -> f64 {
    quantile_type7(x, 0.5)
}

pub fn mean(x: &[f64]) -> f64 {
    if x.is_empty() {
        return f64::NAN;
    }
    x.iter().sum::<f64>() / x.len() as f64
}

/// 1-based ranks; tied values receive the average of their ranks.
pub fn rank_average(x: &[f64]) -> Vec<f64> {
    let n = x.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| cmp_f64(&x[a], &x[b]));

    let mut ranks = vec![0.0; n];
    let mut i = 0;
    while i < n {
        let mut j = i;
        while j + 1 < n && x[order[j + 1]] == x[order[i]] {
            j += 1;
        }
        // positions i..=j share rank
        let avg = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            ranks[idx] = avg;
        }
        i = j + 1;
    }
    ranks
}

pub fn digamma(x: f64) -> f64 {
    statrs::function::gamma::digamma(x)
}

/// Trigamma function (derivative of digamma), for positive arguments
pub fn trigamma(x: f64) -> f64 {
    if !(x > 0.0) {
        return f64::NAN;
    }
    let mut result = 0.0;
    let mut z = x;
    while z < 8.0 {
        result += 1.0 / (z * z);
        z += 1.0;
    }
    let z2 = z * z;
    result
        + 1.0 / z
        + 0.5 / z2
        + 1.0 / (6.0 * z2 * z)
        - 1.0 / (30.0 * z2 * z2 * z)
        + 1.0 / (42.0 * z2 * z2 * z2 * z)
}

/// Second derivative of digamma, for positive arguments
fn tetragamma(x: f64) -> f64 {
    let mut result = 0.0;
    let mut z = x;
    while z < 8.0 {
        result -= 2.0 / (z * z * z);
        z += 1.0;
    }
    let z2 = z * z;
    result - 1.0 / z2 - 1.0 / (z2 * z) - 0.5 / (z2 * z2) + 1.0 / (6.0 * z2 * z2 * z2)
        - 1.0 / (6.0 * z2 * z2 * z2 * z2)
}

/// Solve trigamma(y) = x for y by Newton iteration on the reciprocal
/// scale (Smyth 2004).
pub fn trigamma_inverse(x: f64) -> f64 {
    if !(x > 0.0) {
        return f64::NAN;
    }
    if x > 1e7 {
        return 1.0 / x.sqrt();
    }
    if x < 1e-6 {
        return 1.0 / x;
    }

    let mut y = 0.5 + 1.0 / x;
    for _ in 0..50 {
        let tri = trigamma(y);
        let dif = tri * (1.0 - tri / x) / tetragamma(y);
        y += dif;
        if -dif / y < 1e-8 {
            break;
        }
    }
    y
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_quantile_type7() {
        let x = vec![4.0, 1.0, 3.0, 2.0];
        assert_relative_eq!(quantile_type7(&x, 0.75), 3.25);
        assert_relative_eq!(quantile_type7(&x, 0.0), 1.0);
        assert_relative_eq!(quantile_type7(&x, 1.0), 4.0);
        assert_relative_eq!(median(&[1.0, 2.0, 3.0, 4.0, 5.0]), 3.0);
    }

    #[test]
    fn test_rank_average_ties() {
        let ranks = rank_average(&[10.0, 20.0, 10.0, 30.0]);
        assert_eq!(ranks, vec![1.5, 3.0, 1.5, 4.0]);
    }

    #[test]
    fn test_trigamma_known_values() {
        // trigamma(1) = pi^2 / 6
        let pi = std::f64::consts::PI;
        assert_relative_eq!(trigamma(1.0), pi * pi / 6.0, epsilon = 1e-10);
        assert_relative_eq!(trigamma(0.5), pi * pi / 2.0, epsilon = 1e-10);
    }

    #[test]
    fn test_trigamma_inverse_roundtrip() {
        for &y in &[0.3, 1.0, 2.5, 10.0, 150.0] {
            let x = trigamma(y);
            assert_relative_eq!(trigamma_inverse(x), y, max_relative = 1e-6);
        }
    }
}
