//! Negative binomial distribution utilities
//!
//! Parameterised by mean `mu` and dispersion `phi`, with variance
//! `mu + phi * mu^2`. Dispersions below `POISSON_PHI` are treated as the
//! Poisson limit.

use statrs::function::gamma::ln_gamma;

/// Floor applied to fitted means inside IRLS
pub const MIN_MU: f64 = 1e-6;

/// Maximum linear predictor to prevent overflow (exp(700) ≈ 1e304)
pub const MAX_ETA: f64 = 700.0;

/// Dispersion below which the Poisson limit is used
pub const POISSON_PHI: f64 = 1e-8;

/// mu = exp(eta + offset)
pub fn nb_mean(eta: f64, offset: f64) -> f64 {
    (eta + offset).clamp(-MAX_ETA, MAX_ETA).exp()
}

/// Var(Y) = mu + phi * mu^2
pub fn nb_variance(mu: f64, phi: f64) -> f64 {
    mu + phi * mu * mu
}

/// IRLS working weight for the log link: W = mu / (1 + phi * mu)
pub fn nb_weight(mu: f64, phi: f64) -> f64 {
    mu / (1.0 + phi * mu)
}

/// Log-density of a single observation
pub fn nb_log_likelihood(y: f64, mu: f64, phi: f64) -> f64 {
    if mu <= 0.0 {
        return if y == 0.0 { 0.0 } else { f64::NEG_INFINITY };
    }
    if phi < POISSON_PHI {
        return y * mu.ln() - mu - ln_gamma(y + 1.0);
    }

    let size = 1.0 / phi;
    ln_gamma(y + size) - ln_gamma(size) - ln_gamma(y + 1.0)
        + size * (size / (size + mu)).ln()
        + y * (mu / (size + mu)).ln()
}

/// Unit deviance `2 * (l(y; y) - l(y; mu))`
pub fn nb_unit_deviance(y: f64, mu: f64, phi: f64) -> f64 {
    let mu = mu.max(MIN_MU);
    let y_term = if y > 0.0 { y * (y / mu).ln() } else { 0.0 };
    let dev = if phi < POISSON_PHI {
        2.0 * (y_term - (y - mu))
    } else {
        2.0 * (y_term - (y + 1.0 / phi) * ((1.0 + phi * y) / (1.0 + phi * mu)).ln())
    };
    dev.max(0.0)
}

/// Squared Pearson residual `(y - mu)^2 / Var(Y)`
pub fn nb_pearson_sq(y: f64, mu: f64, phi: f64) -> f64 {
    let r = y - mu;
    r * r / nb_variance(mu.max(MIN_MU), phi)
}
