//! Small dense linear algebra for per-feature GLM fits
//!
//! Matrices are flat row-major `Vec<f64>` of size `n * n`; the systems are
//! only as large as the number of design coefficients.

use ndarray::ArrayView2;

/// `X' W X` for a design `X` (samples x coefficients) and weights `W`
pub fn weighted_cross_product(design: ArrayView2<f64>, weights: &[f64]) -> Vec<f64> {
    let n_coefs = design.ncols();
    let mut xtwx = vec![0.0; n_coefs * n_coefs];
    for i in 0..design.nrows() {
        let w = weights[i];
        for j in 0..n_coefs {
            let xij = design[[i, j]];
            if xij == 0.0 {
                continue;
            }
            for k in 0..n_coefs {
                xtwx[j * n_coefs + k] += w * xij * design[[i, k]];
            }
        }
    }
    xtwx
}

/// Lower-triangular Cholesky factor, or `None` if `a` is not positive definite
pub fn cholesky(a: &[f64], n: usize) -> Option<Vec<f64>> {
    let mut l = vec![0.0; n * n];
    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[i * n + j];
            for k in 0..j {
                sum -= l[i * n + k] * l[j * n + k];
            }
            if i == j {
                if sum <= 0.0 || !sum.is_finite() {
                    return None;
                }
                l[i * n + j] = sum.sqrt();
            } else {
                l[i * n + j] = sum / l[j * n + j];
            }
        }
    }
    Some(l)
}

/// Solve `L L' x = b` given the Cholesky factor `L`
pub fn cholesky_solve(l: &[f64], b: &[f64], n: usize) -> Vec<f64> {
    let mut y = vec![0.0; n];
    for i in 0..n {
        let mut sum = b[i];
        for j in 0..i {
            sum -= l[i * n + j] * y[j];
        }
        y[i] = sum / l[i * n + i];
    }

    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let mut sum = y[i];
        for j in (i + 1)..n {
            sum -= l[j * n + i] * x[j];
        }
        x[i] = sum / l[i * n + i];
    }
    x
}

/// Solve a symmetric positive definite system
pub fn solve_spd(a: &[f64], b: &[f64], n: usize) -> Option<Vec<f64>> {
    cholesky(a, n).map(|l| cholesky_solve(&l, b, n))
}

/// Inverse of a symmetric positive definite matrix
pub fn invert_spd(a: &[f64], n: usize) -> Option<Vec<f64>> {
    let l = cholesky(a, n)?;
    let mut inv = vec![0.0; n * n];
    let mut e = vec![0.0; n];
    for col in 0..n {
        e.iter_mut().for_each(|v| *v = 0.0);
        e[col] = 1.0;
        let x = cholesky_solve(&l, &e, n);
        for row in 0..n {
            inv[row * n + col] = x[row];
        }
    }
    Some(inv)
}

/// `log(det(a))` for a symmetric positive definite matrix
pub fn log_det_spd(a: &[f64], n: usize) -> Option<f64> {
    let l = cholesky(a, n)?;
    Some((0..n).map(|i| 2.0 * l[i * n + i].ln()).sum())
}

/// Quadratic form `c' M c`
pub fn quadratic_form(m: &[f64], c: &[f64]) -> f64 {
    let n = c.len();
    let mut total = 0.0;
    for i in 0..n {
        if c[i] == 0.0 {
            continue;
        }
        for j in 0..n {
            total += c[i] * m[i * n + j] * c[j];
        }
    }
    total
}

/// Basis of the complement orthogonal to `c`, as `c.len() - 1` unit vectors.
///
/// Columns 2..p of the Householder reflection that maps `e1` onto
/// `c / |c|`.
pub fn orthogonal_complement(c: &[f64]) -> Vec<Vec<f64>> {
    let p = c.len();
    let norm = c.iter().map(|v| v * v).sum::<f64>().sqrt();
    let mut v: Vec<f64> = c.iter().map(|x| x / norm).collect();
    v[0] -= 1.0;
    let v_norm_sq: f64 = v.iter().map(|x| x * x).sum();

    (1..p)
        .map(|col| {
            (0..p)
                .map(|row| {
                    let identity = if row == col { 1.0 } else { 0.0 };
                    if v_norm_sq < 1e-24 {
                        identity
                    } else {
                        identity - 2.0 * v[row] * v[col] / v_norm_sq
                    }
                })
                .collect()
        })
        .collect()
}

/// Numerical rank via Householder QR with column pivoting.
///
/// Counts diagonal entries of R above `max(nrow, ncol) * eps * max|diag(R)|`.
pub fn qr_rank(matrix: ArrayView2<f64>) -> usize {
    let nrow = matrix.nrows();
    let ncol = matrix.ncols();
    let k = nrow.min(ncol);
    let mut r = matrix.to_owned();

    let mut col_norms_sq: Vec<f64> = (0..ncol)
        .map(|j| r.column(j).iter().map(|&v| v * v).sum())
        .collect();

    for step in 0..k {
        let best_col = (step..ncol)
            .max_by(|&a, &b| {
                col_norms_sq[a]
                    .partial_cmp(&col_norms_sq[b])
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .unwrap_or(step);

        if best_col != step {
            for i in 0..nrow {
                r.swap([i, step], [i, best_col]);
            }
            col_norms_sq.swap(step, best_col);
        }

        let mut alpha = (step..nrow)
            .map(|i| r[[i, step]] * r[[i, step]])
            .sum::<f64>()
            .sqrt();
        if alpha < f64::EPSILON * 1e3 {
            break;
        }
        if r[[step, step]] > 0.0 {
            alpha = -alpha;
        }

        let v0 = r[[step, step]] - alpha;
        r[[step, step]] = alpha;

        let v_norm_sq = v0 * v0 + ((step + 1)..nrow).map(|i| r[[i, step]] * r[[i, step]]).sum::<f64>();
        if v_norm_sq < f64::MIN_POSITIVE {
            continue;
        }
        let tau = 2.0 / v_norm_sq;

        for j in (step + 1)..ncol {
            let mut dot = v0 * r[[step, j]];
            for i in (step + 1)..nrow {
                dot += r[[i, step]] * r[[i, j]];
            }
            let scale = tau * dot;
            r[[step, j]] -= scale * v0;
            for i in (step + 1)..nrow {
                r[[i, j]] -= scale * r[[i, step]];
            }
        }

        for j in (step + 1)..ncol {
            col_norms_sq[j] = (col_norms_sq[j] - r[[step, j]] * r[[step, j]]).max(0.0);
        }
    }

    let max_abs_diag = (0..k).map(|i| r[[i, i]].abs()).fold(0.0f64, f64::max);
    let tol = nrow.max(ncol) as f64 * f64::EPSILON * max_abs_diag;
    (0..k).filter(|&i| r[[i, i]].abs() > tol).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_solve_and_invert() {
        let a = vec![4.0, 2.0, 2.0, 3.0];
        let x = solve_spd(&a, &[2.0, 1.0], 2).unwrap();
        assert_abs_diff_eq!(x[0], 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(x[1], 0.0, epsilon = 1e-12);

        let inv = invert_spd(&a, 2).unwrap();
        assert_abs_diff_eq!(inv[0], 3.0 / 8.0, epsilon = 1e-12);
        assert_abs_diff_eq!(inv[1], -2.0 / 8.0, epsilon = 1e-12);
        assert_abs_diff_eq!(log_det_spd(&a, 2).unwrap(), 8.0f64.ln(), epsilon = 1e-12);
    }

    #[test]
    fn test_not_positive_definite() {
        assert!(cholesky(&[1.0, 2.0, 2.0, 1.0], 2).is_none());
    }

    #[test]
    fn test_qr_rank() {
        let full = array![[1.0, 0.0], [1.0, 0.0], [1.0, 1.0], [1.0, 1.0]];
        assert_eq!(qr_rank(full.view()), 2);

        let collinear = array![[1.0, 0.0, 1.0], [1.0, 0.0, 1.0], [1.0, 1.0, 2.0], [1.0, 1.0, 2.0]];
        assert_eq!(qr_rank(collinear.view()), 2);
    }

    #[test]
    fn test_orthogonal_complement() {
        let c = [-1.0, 1.0, 0.0];
        let basis = orthogonal_complement(&c);
        assert_eq!(basis.len(), 2);
        for (k, b) in basis.iter().enumerate() {
            let dot: f64 = b.iter().zip(c.iter()).map(|(x, y)| x * y).sum();
            assert_abs_diff_eq!(dot, 0.0, epsilon = 1e-12);
            let norm: f64 = b.iter().map(|x| x * x).sum();
            assert_abs_diff_eq!(norm, 1.0, epsilon = 1e-12);
            for other in &basis[k + 1..] {
                let cross: f64 = b.iter().zip(other.iter()).map(|(x, y)| x * y).sum();
                assert_abs_diff_eq!(cross, 0.0, epsilon = 1e-12);
            }
        }

        // c already along e1
        let basis = orthogonal_complement(&[2.0, 0.0]);
        assert_eq!(basis, vec![vec![0.0, 1.0]]);
    }

    #[test]
    fn test_weighted_cross_product_and_quadratic_form() {
        let x = array![[1.0, 0.0], [1.0, 1.0]];
        let xtwx = weighted_cross_product(x.view(), &[2.0, 3.0]);
        assert_eq!(xtwx, vec![5.0, 3.0, 3.0, 3.0]);
        assert_abs_diff_eq!(quadratic_form(&xtwx, &[1.0, -1.0]), 2.0, epsilon = 1e-12);
    }
}
