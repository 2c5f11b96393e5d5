//! Local regression along a single covariate

use std::cmp::Ordering;

/// Indices and tricube weights of the `span * n` nearest neighbours of `at`.
///
/// `sorted_x` must be ascending. The bandwidth is the distance to the
/// furthest neighbour in the window, widened slightly so that the extreme
/// point keeps a small positive weight.
pub fn tricube_neighbourhood(sorted_x: &[f64], at: f64, span: f64) -> Vec<(usize, f64)> {
    let n = sorted_x.len();
    if n == 0 {
        return Vec::new();
    }
    let k = ((span * n as f64).ceil() as usize).clamp(2.min(n), n);

    // Position of `at` in the sorted order, then grow the window outward.
    let mut lo = sorted_x.partition_point(|&v| v < at);
    let mut hi = lo;
    while hi - lo < k {
        let take_left = if lo == 0 {
            false
        } else if hi == n {
            true
        } else {
            at - sorted_x[lo - 1] <= sorted_x[hi] - at
        };
        if take_left {
            lo -= 1;
        } else {
            hi += 1;
        }
    }

    let max_dist = (at - sorted_x[lo]).abs().max((sorted_x[hi - 1] - at).abs());
    let h = if max_dist > 0.0 { max_dist * 1.0001 } else { 1.0 };

    (lo..hi)
        .map(|i| {
            let u = ((sorted_x[i] - at) / h).abs();
            let w = if u < 1.0 { (1.0 - u * u * u).powi(3) } else { 0.0 };
            (i, w)
        })
        .collect()
}

/// Weighted local linear fit at a single point
fn local_linear(xs: &[f64], ys: &[f64], weights: &[(usize, f64)], robust: &[f64], at: f64) -> f64 {
    let mut sw = 0.0;
    let mut swx = 0.0;
    let mut swy = 0.0;
    for &(i, w) in weights {
        let w = w * robust[i];
        sw += w;
        swx += w * xs[i];
        swy += w * ys[i];
    }
    if sw <= 0.0 {
        return weights.iter().map(|&(i, _)| ys[i]).sum::<f64>() / weights.len().max(1) as f64;
    }
    let xbar = swx / sw;
    let ybar = swy / sw;

    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for &(i, w) in weights {
        let w = w * robust[i];
        let dx = xs[i] - xbar;
        sxx += w * dx * dx;
        sxy += w * dx * (ys[i] - ybar);
    }

    let range = xs[weights[weights.len() - 1].0] - xs[weights[0].0];
    if sxx <= 1e-12 * range.max(1.0).powi(2) {
        ybar
    } else {
        ybar + sxy / sxx * (at - xbar)
    }
}

/// Robust locally weighted linear regression (lowess).
///
/// Returns fitted values in the original order of `x`. `iterations` is the
/// number of bisquare reweighting passes after the initial fit.
pub fn lowess(x: &[f64], y: &[f64], span: f64, iterations: usize) -> Vec<f64> {
    let n = x.len();
    if n == 0 {
        return Vec::new();
    }
    if n < 3 {
        let m = y.iter().sum::<f64>() / n as f64;
        return vec![m; n];
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| x[a].partial_cmp(&x[b]).unwrap_or(Ordering::Equal));
    let xs: Vec<f64> = order.iter().map(|&i| x[i]).collect();
    let ys: Vec<f64> = order.iter().map(|&i| y[i]).collect();

    let neighbourhoods: Vec<Vec<(usize, f64)>> = xs
        .iter()
        .map(|&at| tricube_neighbourhood(&xs, at, span))
        .collect();

    let mut robust = vec![1.0; n];
    let mut fitted = vec![0.0; n];
    for pass in 0..=iterations {
        for i in 0..n {
            fitted[i] = local_linear(&xs, &ys, &neighbourhoods[i], &robust, xs[i]);
        }
        if pass == iterations {
            break;
        }

        let abs_res: Vec<f64> = ys.iter().zip(fitted.iter()).map(|(a, b)| (a - b).abs()).collect();
        let scale = 6.0 * super::median(&abs_res);
        if scale <= 0.0 {
            break;
        }
        for i in 0..n {
            let u = abs_res[i] / scale;
            robust[i] = if u < 1.0 { (1.0 - u * u).powi(2) } else { 0.0 };
        }
    }

    let mut result = vec![0.0; n];
    for (sorted_pos, &orig) in order.iter().enumerate() {
        result[orig] = fitted[sorted_pos];
    }
    result
}
