//! Multiple testing correction
//! (Benjamini and Hochberg, 1995)

use std::cmp::Ordering;

/// Benjamini-Hochberg step-up adjusted p-values (q-values).
///
/// NaN p-values are excluded from the number of tests and stay NaN.
pub fn benjamini_hochberg(pvalues: &[f64]) -> Vec<f64> {
    let n = pvalues.len();
    if n == 0 {
        return vec![];
    }

    // Ascending p-values, NaN last
    let mut indices: Vec<usize> = (0..n).collect();
    indices.sort_by(|&a, &b| {
        let (pa, pb) = (pvalues[a], pvalues[b]);
        match (pa.is_nan(), pb.is_nan()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            _ => pa.partial_cmp(&pb).unwrap_or(Ordering::Equal),
        }
    });

    let m = pvalues.iter().filter(|p| !p.is_nan()).count();
    let mut padj = vec![f64::NAN; n];
    if m == 0 {
        return padj;
    }

    // Walk from the largest p-value down, keeping the running minimum.
    let mut cummin = f64::INFINITY;
    let mut rank = m;
    for &i in indices.iter().rev() {
        let p = pvalues[i];
        if p.is_nan() {
            continue;
        }
        let adj = (p * m as f64 / rank as f64).min(1.0);
        cummin = cummin.min(adj);
        padj[i] = cummin;
        rank -= 1;
    }

    padj
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_bh_known_values() {
        let padj = benjamini_hochberg(&[0.01, 0.04, 0.03, 0.02]);
        for q in &padj {
            assert_relative_eq!(*q, 0.04, epsilon = 1e-12);
        }

        let padj = benjamini_hochberg(&[0.001, 0.2, 0.5]);
        assert_relative_eq!(padj[0], 0.003, epsilon = 1e-12);
        assert_relative_eq!(padj[1], 0.3, epsilon = 1e-12);
        assert_relative_eq!(padj[2], 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_bh_with_nan() {
        let padj = benjamini_hochberg(&[0.01, f64::NAN, 0.03, 0.02]);
        assert!(padj[1].is_nan());
        assert_relative_eq!(padj[0], 0.03, epsilon = 1e-12);
        assert_relative_eq!(padj[2], 0.03, epsilon = 1e-12);
    }

    #[test]
    fn test_bh_preserves_order() {
        let pvalues = vec![0.001, 0.01, 0.05, 0.1];
        let padj = benjamini_hochberg(&pvalues);
        for i in 0..padj.len() - 1 {
            assert!(padj[i] <= padj[i + 1]);
            assert!(padj[i] >= pvalues[i]);
        }
    }
}
