//! Seeded Mersenne-Twister generator for count simulation
//!
//! Draws are reproducible for a given seed on every platform; nothing in
//! the statistical pipeline itself is random. The generator plugs into
//! `rand` as an [`RngCore`], so distributions come from `rand_distr`.

use rand::{Error, Rng, RngCore, SeedableRng};
use rand_distr::{Distribution, Gamma, Poisson};

/// MT19937 with linear-congruential seeding
#[derive(Clone)]
pub struct MersenneTwister {
    state: [u32; 624],
    index: usize,
}

impl MersenneTwister {
    const N: usize = 624;
    const M: usize = 397;
    const MATRIX_A: u32 = 0x9908_B0DF;
    const UPPER_MASK: u32 = 0x8000_0000;
    const LOWER_MASK: u32 = 0x7FFF_FFFF;

    pub fn new(seed: u32) -> Self {
        let mut state = [0u32; Self::N];
        // x <- 69069 x + 1, with a warm-up of 51 steps before filling
        let mut x = seed;
        for _ in 0..51 {
            x = x.wrapping_mul(69069).wrapping_add(1);
        }
        for word in state.iter_mut() {
            x = x.wrapping_mul(69069).wrapping_add(1);
            *word = x;
        }

        Self {
            state,
            index: Self::N,
        }
    }

    fn twist(&mut self) {
        for i in 0..Self::N {
            let y = (self.state[i] & Self::UPPER_MASK) | (self.state[(i + 1) % Self::N] & Self::LOWER_MASK);
            let mut next = self.state[(i + Self::M) % Self::N] ^ (y >> 1);
            if y & 1 != 0 {
                next ^= Self::MATRIX_A;
            }
            self.state[i] = next;
        }
        self.index = 0;
    }

    fn tempered(&mut self) -> u32 {
        if self.index >= Self::N {
            self.twist();
        }
        let mut y = self.state[self.index];
        self.index += 1;

        y ^= y >> 11;
        y ^= (y << 7) & 0x9D2C_5680;
        y ^= (y << 15) & 0xEFC6_0000;
        y ^ (y >> 18)
    }
}

impl RngCore for MersenneTwister {
    fn next_u32(&mut self) -> u32 {
        self.tempered()
    }

    fn next_u64(&mut self) -> u64 {
        let hi = u64::from(self.tempered());
        let lo = u64::from(self.tempered());
        (hi << 32) | lo
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for chunk in dest.chunks_mut(4) {
            let bytes = self.tempered().to_le_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

impl SeedableRng for MersenneTwister {
    type Seed = [u8; 4];

    fn from_seed(seed: Self::Seed) -> Self {
        Self::new(u32::from_le_bytes(seed))
    }
}

/// Poisson count with mean `lambda`; zero for a non-positive mean.
pub fn poisson<R: Rng + ?Sized>(rng: &mut R, lambda: f64) -> u64 {
    match Poisson::new(lambda) {
        Ok(dist) => dist.sample(rng) as u64,
        Err(_) => 0,
    }
}

/// Negative-binomial count with mean `mu` and dispersion `phi`
/// (variance `mu + phi mu^2`), as a gamma-Poisson mixture.
pub fn negative_binomial<R: Rng + ?Sized>(rng: &mut R, mu: f64, phi: f64) -> u64 {
    if !(phi > 0.0) {
        return poisson(rng, mu);
    }
    match Gamma::new(1.0 / phi, mu * phi) {
        Ok(gamma) => {
            let lambda = gamma.sample(rng);
            poisson(rng, lambda)
        }
        Err(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand_distr::StandardNormal;

    fn moments(values: &[f64]) -> (f64, f64) {
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
        (mean, var)
    }

    #[test]
    fn test_same_seed_same_stream() {
        let mut a = MersenneTwister::new(42);
        let mut b = MersenneTwister::from_seed(42u32.to_le_bytes());
        let mut c = MersenneTwister::new(43);
        let xs: Vec<u32> = (0..1000).map(|_| a.next_u32()).collect();
        let ys: Vec<u32> = (0..1000).map(|_| b.next_u32()).collect();
        let zs: Vec<u32> = (0..1000).map(|_| c.next_u32()).collect();
        assert_eq!(xs, ys);
        assert_ne!(xs, zs);
    }

    #[test]
    fn test_fill_bytes_matches_words() {
        let mut a = MersenneTwister::new(5);
        let mut b = MersenneTwister::new(5);
        let mut bytes = [0u8; 6];
        a.fill_bytes(&mut bytes);
        let first = b.next_u32().to_le_bytes();
        let second = b.next_u32().to_le_bytes();
        assert_eq!(&bytes[..4], &first);
        assert_eq!(&bytes[4..], &second[..2]);
    }

    #[test]
    fn test_uniform_and_normal_moments() {
        let mut rng = MersenneTwister::new(1);
        let draws: Vec<f64> = (0..20_000).map(|_| rng.gen::<f64>()).collect();
        assert!(draws.iter().all(|&u| (0.0..1.0).contains(&u)));
        let (mean, var) = moments(&draws);
        assert_abs_diff_eq!(mean, 0.5, epsilon = 0.01);
        assert_abs_diff_eq!(var, 1.0 / 12.0, epsilon = 0.005);

        let draws: Vec<f64> = (0..20_000).map(|_| rng.sample(StandardNormal)).collect();
        let (mean, var) = moments(&draws);
        assert_abs_diff_eq!(mean, 0.0, epsilon = 0.03);
        assert_abs_diff_eq!(var, 1.0, epsilon = 0.05);
    }

    #[test]
    fn test_poisson_moments() {
        let mut rng = MersenneTwister::new(11);
        for &lambda in &[3.0, 50.0] {
            let draws: Vec<f64> = (0..40_000).map(|_| poisson(&mut rng, lambda) as f64).collect();
            let (mean, var) = moments(&draws);
            assert_abs_diff_eq!(mean, lambda, epsilon = 0.03 * lambda);
            assert_abs_diff_eq!(var, lambda, epsilon = 0.08 * lambda);
        }
        assert_eq!(poisson(&mut rng, 0.0), 0);
    }

    #[test]
    fn test_negative_binomial_overdispersed() {
        let mut rng = MersenneTwister::new(3);
        let (mu, phi) = (40.0, 0.2);
        let draws: Vec<f64> = (0..40_000).map(|_| negative_binomial(&mut rng, mu, phi) as f64).collect();
        let (mean, var) = moments(&draws);
        assert_abs_diff_eq!(mean, mu, epsilon = 0.05 * mu);
        let expected = mu + phi * mu * mu;
        assert_abs_diff_eq!(var, expected, epsilon = 0.15 * expected);
    }
}
