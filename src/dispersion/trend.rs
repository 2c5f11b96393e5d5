//! Abundance-dependent dispersion trend
//!
//! The trend is the maximiser of a locally averaged likelihood curve: at a
//! set of anchor abundances the feature curves are averaged with tricube
//! weights, and each feature's trend curve is interpolated linearly
//! between the two anchors enclosing its abundance.

use std::cmp::Ordering;

use crate::stats::tricube_neighbourhood;

/// Maximum number of anchor abundances
const MAX_ANCHORS: usize = 200;

#[derive(Debug, Clone)]
pub struct TrendCurves {
    anchors: Vec<f64>,
    curves: Vec<Vec<f64>>,
}

impl TrendCurves {
    /// Fit from the curves of features flagged in `include`.
    ///
    /// Returns `None` if no feature is included.
    pub fn fit(abundance: &[f64], curves: &[Option<Vec<f64>>], include: &[bool], span: f64) -> Option<Self> {
        let mut members: Vec<(f64, &Vec<f64>)> = abundance
            .iter()
            .zip(curves.iter())
            .zip(include.iter())
            .filter_map(|((&a, c), &inc)| match c {
                Some(curve) if inc => Some((a, curve)),
                _ => None,
            })
            .collect();
        if members.is_empty() {
            return None;
        }
        members.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));

        let xs: Vec<f64> = members.iter().map(|m| m.0).collect();
        let n_points = members[0].1.len();

        let n_anchors = xs.len().min(MAX_ANCHORS);
        let mut anchors: Vec<f64> = (0..n_anchors)
            .map(|k| {
                if n_anchors == 1 {
                    xs[0]
                } else {
                    xs[k * (xs.len() - 1) / (n_anchors - 1)]
                }
            })
            .collect();
        anchors.dedup();

        let curves = anchors
            .iter()
            .map(|&a| {
                let weights = tricube_neighbourhood(&xs, a, span);
                let total: f64 = weights.iter().map(|w| w.1).sum();
                let mut avg = vec![0.0; n_points];
                for &(i, w) in &weights {
                    for (acc, v) in avg.iter_mut().zip(members[i].1.iter()) {
                        *acc += w * v / total;
                    }
                }
                avg
            })
            .collect();

        Some(Self { anchors, curves })
    }

    /// Trend curve at an abundance, constant beyond the outermost anchors
    pub fn curve_at(&self, abundance: f64) -> Vec<f64> {
        let n = self.anchors.len();
        if n == 1 || abundance <= self.anchors[0] {
            return self.curves[0].clone();
        }
        if abundance >= self.anchors[n - 1] {
            return self.curves[n - 1].clone();
        }

        let hi = self.anchors.partition_point(|&a| a < abundance);
        let lo = hi - 1;
        let t = (abundance - self.anchors[lo]) / (self.anchors[hi] - self.anchors[lo]);
        self.curves[lo]
            .iter()
            .zip(self.curves[hi].iter())
            .map(|(a, b)| (1.0 - t) * a + t * b)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_single_feature_trend_is_its_curve() {
        let curves = vec![Some(vec![1.0, 3.0, 2.0])];
        let trend = TrendCurves::fit(&[5.0], &curves, &[true], 0.3).unwrap();
        assert_eq!(trend.curve_at(-100.0), vec![1.0, 3.0, 2.0]);
        assert_eq!(trend.curve_at(100.0), vec![1.0, 3.0, 2.0]);
    }

    #[test]
    fn test_excluded_features_ignored() {
        let curves = vec![Some(vec![0.0, 1.0]), Some(vec![100.0, -100.0]), None];
        let trend = TrendCurves::fit(&[1.0, 1.0, 1.0], &curves, &[true, false, true], 0.5).unwrap();
        assert_eq!(trend.curve_at(1.0), vec![0.0, 1.0]);
        assert!(TrendCurves::fit(&[1.0], &[None], &[true], 0.5).is_none());
    }

    #[test]
    fn test_interpolation_between_anchors() {
        let curves: Vec<Option<Vec<f64>>> = (0..10).map(|i| Some(vec![i as f64])).collect();
        let abundance: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let trend = TrendCurves::fit(&abundance, &curves, &[true; 10], 0.2).unwrap();
        let mid = trend.curve_at(4.5)[0];
        assert!(mid > trend.curve_at(4.0)[0] && mid < trend.curve_at(5.0)[0]);
        assert_relative_eq!(trend.curve_at(0.0)[0], trend.curve_at(-1.0)[0]);
    }
}
