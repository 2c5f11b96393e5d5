//! Negative-binomial count simulation
//!
//! Used to calibrate the calling policy: with no true difference between
//! groups, few features should ever pass.

use ndarray::Array2;
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use crate::data::{CountMatrix, IdentityMap, Sample, SampleSheet};
use crate::error::{CageDeError, Result};
use crate::rng::{negative_binomial, MersenneTwister};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationParams {
    pub n_features: usize,
    pub n_groups: usize,
    pub replicates: usize,
    /// Batches are assigned round-robin over replicates
    pub n_batches: usize,
    /// Baseline means are log-normal around this value
    pub mean_abundance: f64,
    /// sd of ln(baseline mean)
    pub abundance_spread: f64,
    pub dispersion: f64,
    /// Fraction of features with a true change in the second group
    pub de_fraction: f64,
    pub log2_fold_change: f64,
    /// log2 shift per batch step, up for odd-numbered features and down
    /// for even ones; batch `L{k}` is shifted `k - 1` steps
    pub batch_log2_shift: f64,
    pub seed: u32,
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self {
            n_features: 2000,
            n_groups: 2,
            replicates: 2,
            n_batches: 1,
            mean_abundance: 100.0,
            abundance_spread: 1.5,
            dispersion: 0.1,
            de_fraction: 0.0,
            log2_fold_change: 2.0,
            batch_log2_shift: 0.0,
            seed: 1,
        }
    }
}

impl SimulationParams {
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| Err(CageDeError::InvalidConfig { reason });
        if self.n_features == 0 || self.n_groups == 0 || self.replicates == 0 || self.n_batches == 0 {
            return invalid("simulation needs at least one feature, group, replicate and batch".to_string());
        }
        if self.n_groups > 26 {
            return invalid(format!("at most 26 groups can be simulated, got {}", self.n_groups));
        }
        if !(self.mean_abundance > 0.0) || !(self.dispersion >= 0.0) || !(self.abundance_spread >= 0.0) {
            return invalid("mean abundance must be positive, spread and dispersion non-negative".to_string());
        }
        if !self.batch_log2_shift.is_finite() {
            return invalid(format!("batch_log2_shift must be finite, got {}", self.batch_log2_shift));
        }
        if !(0.0..=1.0).contains(&self.de_fraction) {
            return invalid(format!("de_fraction must lie in [0, 1], got {}", self.de_fraction));
        }
        Ok(())
    }
}

/// Simulated counts with their sample sheet and the truly changed features
#[derive(Debug, Clone)]
pub struct SimulatedData {
    pub counts: CountMatrix,
    pub samples: SampleSheet,
    /// Each simulated cluster is its own merged feature
    pub identity: IdentityMap,
    pub changed_features: Vec<String>,
}

/// Draw a count matrix.
///
/// Groups are named `A`, `B`, ...; sample `B2` is the second replicate of
/// group `B`. Changed features are the leading `de_fraction` share of rows,
/// shifted up or down in group `B` only.
pub fn simulate_counts(params: &SimulationParams) -> Result<SimulatedData> {
    params.validate()?;
    let mut rng = MersenneTwister::new(params.seed);

    let mut samples = Vec::with_capacity(params.n_groups * params.replicates);
    let mut batch_steps = Vec::with_capacity(params.n_groups * params.replicates);
    for g in 0..params.n_groups {
        let group = char::from(b'A' + g as u8).to_string();
        for r in 0..params.replicates {
            let step = r % params.n_batches;
            let batch = format!("L{}", step + 1);
            samples.push(Sample::new(&format!("{}{}", group, r + 1), &group, &batch));
            batch_steps.push(step as f64);
        }
    }
    let sheet = SampleSheet::new(samples)?;
    let n_samples = sheet.n_samples();

    let library_scale: Vec<f64> = (0..n_samples).map(|_| 0.7 + 0.6 * rng.gen::<f64>()).collect();
    let n_changed = (params.de_fraction * params.n_features as f64).round() as usize;

    let mut counts = Array2::<f64>::zeros((params.n_features, n_samples));
    let mut changed_features = Vec::with_capacity(n_changed);
    let feature_ids: Vec<String> = (1..=params.n_features).map(|i| format!("sim{}", i)).collect();

    for (i, feature_id) in feature_ids.iter().enumerate() {
        let z: f64 = rng.sample(StandardNormal);
        let baseline = params.mean_abundance * (params.abundance_spread * z).exp();
        let shift = if i < n_changed && params.n_groups > 1 {
            changed_features.push(feature_id.clone());
            let sign = if rng.gen::<f64>() < 0.5 { -1.0 } else { 1.0 };
            2f64.powf(sign * params.log2_fold_change)
        } else {
            1.0
        };
        let batch_sign = if i % 2 == 0 { 1.0 } else { -1.0 };

        for (j, sample) in sheet.samples().iter().enumerate() {
            let fold = if sample.group == "B" { shift } else { 1.0 };
            let batch_fold = 2f64.powf(batch_sign * params.batch_log2_shift * batch_steps[j]);
            let mu = baseline * fold * batch_fold * library_scale[j];
            counts[[i, j]] = negative_binomial(&mut rng, mu, params.dispersion) as f64;
        }
    }

    log::info!(
        "Simulated {} features x {} samples ({} changed, dispersion {})",
        params.n_features,
        n_samples,
        changed_features.len(),
        params.dispersion
    );

    let mut identity = IdentityMap::new();
    for feature_id in &feature_ids {
        identity.insert(feature_id, None, feature_id)?;
    }

    Ok(SimulatedData {
        counts: CountMatrix::new(counts, feature_ids, sheet.sample_ids())?,
        samples: sheet,
        identity,
        changed_features,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let params = SimulationParams {
            n_features: 50,
            n_groups: 3,
            replicates: 2,
            n_batches: 2,
            de_fraction: 0.2,
            ..SimulationParams::default()
        };
        let sim = simulate_counts(&params).unwrap();
        assert_eq!(sim.counts.n_features(), 50);
        assert_eq!(sim.samples.sample_ids(), vec!["A1", "A2", "B1", "B2", "C1", "C2"]);
        assert_eq!(sim.samples.batch_levels(), vec!["L1", "L2"]);
        assert_eq!(sim.changed_features.len(), 10);
        assert_eq!(sim.changed_features[0], "sim1");
    }

    #[test]
    fn test_seed_determines_counts() {
        let params = SimulationParams {
            n_features: 100,
            ..SimulationParams::default()
        };
        let a = simulate_counts(&params).unwrap();
        let b = simulate_counts(&params).unwrap();
        let c = simulate_counts(&SimulationParams { seed: 2, ..params }).unwrap();
        assert_eq!(a.counts.counts(), b.counts.counts());
        assert_ne!(a.counts.counts(), c.counts.counts());
    }

    #[test]
    fn test_batch_shift_moves_later_batches() {
        let base = SimulationParams {
            n_features: 400,
            replicates: 4,
            n_batches: 2,
            dispersion: 0.01,
            abundance_spread: 0.5,
            ..SimulationParams::default()
        };
        let shifted = simulate_counts(&SimulationParams {
            batch_log2_shift: 2.0,
            ..base.clone()
        })
        .unwrap();
        let plain = simulate_counts(&base).unwrap();

        // Same draws of baselines and library scales; only L2 samples move.
        let ratio = |sim: &SimulatedData, feature: usize| {
            let row = sim.counts.feature_counts(feature);
            let l1: f64 = [0, 2, 4, 6].iter().map(|&j| row[j]).sum();
            let l2: f64 = [1, 3, 5, 7].iter().map(|&j| row[j]).sum();
            (l2 + 1.0) / (l1 + 1.0)
        };
        let up: f64 = (0..400).step_by(2).map(|i| (ratio(&shifted, i) / ratio(&plain, i)).log2()).sum::<f64>() / 200.0;
        let down: f64 = (1..400).step_by(2).map(|i| (ratio(&shifted, i) / ratio(&plain, i)).log2()).sum::<f64>() / 200.0;
        assert!(up > 1.5, "even features moved {}", up);
        assert!(down < -1.5, "odd features moved {}", down);
        assert_eq!(shifted.identity.n_entries(), 400);
        assert_eq!(shifted.identity.resolve("sim7").unwrap().merged_id, "sim7");
    }

    #[test]
    fn test_invalid_params() {
        let params = SimulationParams {
            de_fraction: 1.5,
            ..SimulationParams::default()
        };
        assert!(matches!(simulate_counts(&params), Err(CageDeError::InvalidConfig { .. })));
    }
}
