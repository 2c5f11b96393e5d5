//! Adjusted profile likelihood curves on a fixed dispersion grid

use ndarray::ArrayView2;
use rayon::prelude::*;

use crate::data::CountMatrix;
use crate::glm::{adjusted_profile_likelihood, GlmFitParams};

/// Natural-log dispersions `ln(base * 2^k)` for `k` in `[min_pow, max_pow]`
pub fn log_dispersion_grid(base: f64, min_pow: i32, max_pow: i32) -> Vec<f64> {
    (min_pow..=max_pow)
        .map(|k| (base * 2f64.powi(k)).ln())
        .collect()
}

/// One curve per feature; `None` where any grid point could not be fitted.
pub fn apl_curves(
    counts: &CountMatrix,
    design: ArrayView2<f64>,
    offsets: &[f64],
    log_grid: &[f64],
    params: &GlmFitParams,
) -> Vec<Option<Vec<f64>>> {
    (0..counts.n_features())
        .into_par_iter()
        .map(|i| {
            let y = counts.feature_counts(i);
            log_grid
                .iter()
                .map(|&g| adjusted_profile_likelihood(y, design, offsets, g.exp(), params))
                .collect::<Option<Vec<f64>>>()
        })
        .collect()
}

/// Location of the maximum of a curve sampled on an equally spaced grid,
/// refined by fitting a parabola through the best point and its neighbours.
pub fn maximize_on_grid(grid: &[f64], values: &[f64]) -> f64 {
    let mut best = 0;
    for (k, &v) in values.iter().enumerate() {
        if v > values[best] {
            best = k;
        }
    }
    if best == 0 || best + 1 >= values.len() {
        return grid[best];
    }

    let (left, mid, right) = (values[best - 1], values[best], values[best + 1]);
    let curvature = left - 2.0 * mid + right;
    if !(curvature < 0.0) {
        return grid[best];
    }
    let step = grid[best + 1] - grid[best];
    let offset = 0.5 * (left - right) / curvature;
    grid[best] + offset.clamp(-0.5, 0.5) * step
}

/// `a + weight * b`, element-wise
pub fn combine_curves(a: &[f64], b: &[f64], weight: f64) -> Vec<f64> {
    a.iter().zip(b.iter()).map(|(x, y)| x + weight * y).collect()
}
