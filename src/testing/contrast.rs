//! Linear contrasts of model coefficients

use serde::{Deserialize, Serialize};

use crate::error::{CageDeError, Result};

/// Tolerance on the sum of contrast weights
const SUM_TOL: f64 = 1e-9;

/// A named weight vector over the design coefficients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contrast {
    name: String,
    coef_names: Vec<String>,
    weights: Vec<f64>,
}

impl Contrast {
    /// Contrast from explicit weights, one per coefficient.
    ///
    /// Weights must sum to zero: a contrast compares effects, it does not
    /// estimate a level.
    pub fn from_weights(name: &str, coef_names: &[String], weights: Vec<f64>) -> Result<Self> {
        if weights.len() != coef_names.len() {
            return Err(CageDeError::InvalidContrast {
                contrast: name.to_string(),
                reason: format!("{} weights for {} coefficients", weights.len(), coef_names.len()),
            });
        }
        if weights.iter().any(|w| !w.is_finite()) {
            return Err(CageDeError::InvalidContrast {
                contrast: name.to_string(),
                reason: "weights must be finite".to_string(),
            });
        }
        if weights.iter().all(|&w| w == 0.0) {
            return Err(CageDeError::InvalidContrast {
                contrast: name.to_string(),
                reason: "all weights are zero".to_string(),
            });
        }
        let sum: f64 = weights.iter().sum();
        if sum.abs() > SUM_TOL {
            return Err(CageDeError::InvalidContrast {
                contrast: name.to_string(),
                reason: format!("weights sum to {} instead of 0", sum),
            });
        }
        Ok(Self {
            name: name.to_string(),
            coef_names: coef_names.to_vec(),
            weights,
        })
    }

    /// `numerator - denominator`, named `numerator.vs.denominator`
    pub fn pairwise(coef_names: &[String], numerator: &str, denominator: &str) -> Result<Self> {
        let name = format!("{}.vs.{}", numerator, denominator);
        let mut weights = vec![0.0; coef_names.len()];
        weights[coefficient_position(&name, coef_names, numerator)?] += 1.0;
        weights[coefficient_position(&name, coef_names, denominator)?] -= 1.0;
        Self::from_weights(&name, coef_names, weights)
    }

    /// Arithmetic mean of contrasts over the same coefficients
    pub fn mean_of(name: &str, contrasts: &[Contrast]) -> Result<Self> {
        let first = contrasts.first().ok_or_else(|| CageDeError::InvalidContrast {
            contrast: name.to_string(),
            reason: "mean of zero contrasts".to_string(),
        })?;
        let k = contrasts.len() as f64;
        let mut weights = vec![0.0; first.weights.len()];
        for c in contrasts {
            if c.coef_names != first.coef_names {
                return Err(CageDeError::InvalidContrast {
                    contrast: name.to_string(),
                    reason: format!("'{}' and '{}' use different coefficients", first.name, c.name),
                });
            }
            for (acc, w) in weights.iter_mut().zip(c.weights.iter()) {
                *acc += w / k;
            }
        }
        Self::from_weights(name, &first.coef_names, weights)
    }

    /// Parse `NAME=expr` or a bare `expr`, where `expr` is a signed sum of
    /// optionally scaled coefficient names, e.g. `B-0.5*A-0.5*C`.
    ///
    /// Coefficient names are matched longest-first, so names may contain
    /// characters such as `-` or `.`.
    pub fn parse(text: &str, coef_names: &[String]) -> Result<Self> {
        let (name, expr) = match text.split_once('=') {
            Some((n, e)) => (n.trim().to_string(), e),
            None => (text.trim().to_string(), text),
        };
        let expr: String = expr.chars().filter(|c| !c.is_whitespace()).collect();
        if name.is_empty() || expr.is_empty() {
            return Err(CageDeError::InvalidContrast {
                contrast: text.to_string(),
                reason: "empty contrast expression".to_string(),
            });
        }

        let mut weights = vec![0.0; coef_names.len()];
        let mut rest = expr.as_str();
        while !rest.is_empty() {
            let mut sign = 1.0;
            while let Some(c) = rest.chars().next().filter(|c| *c == '+' || *c == '-') {
                if c == '-' {
                    sign = -sign;
                }
                rest = &rest[1..];
            }

            let mut scale = 1.0;
            if let Some((number, after)) = rest.split_once('*') {
                if let Ok(v) = number.parse::<f64>() {
                    scale = v;
                    rest = after;
                }
            }

            let matched = coef_names
                .iter()
                .enumerate()
                .filter(|(_, c)| !c.is_empty() && rest.starts_with(c.as_str()))
                .max_by_key(|(_, c)| c.len());
            match matched {
                Some((idx, coef)) => {
                    weights[idx] += sign * scale;
                    rest = &rest[coef.len()..];
                }
                None => {
                    let end = rest.find(['+', '-']).unwrap_or(rest.len());
                    let token = if end == 0 { rest } else { &rest[..end] };
                    return Err(CageDeError::UnknownCoefficient {
                        contrast: name,
                        coefficient: token.to_string(),
                    });
                }
            }

            if !rest.is_empty() && !rest.starts_with(['+', '-']) {
                return Err(CageDeError::InvalidContrast {
                    contrast: name,
                    reason: format!("unexpected text '{}'", rest),
                });
            }
        }

        Self::from_weights(&name, coef_names, weights)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn coef_names(&self) -> &[String] {
        &self.coef_names
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// `c' beta`
    pub fn apply(&self, beta: &[f64]) -> f64 {
        self.weights.iter().zip(beta.iter()).map(|(w, b)| w * b).sum()
    }
}

fn coefficient_position(contrast: &str, coef_names: &[String], coef: &str) -> Result<usize> {
    coef_names
        .iter()
        .position(|c| c == coef)
        .ok_or_else(|| CageDeError::UnknownCoefficient {
            contrast: contrast.to_string(),
            coefficient: coef.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coefs() -> Vec<String> {
        ["A", "B", "C", "C-2", "batchL2"].iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_pairwise() {
        let c = Contrast::pairwise(&coefs(), "B", "A").unwrap();
        assert_eq!(c.name(), "B.vs.A");
        assert_eq!(c.weights(), &[-1.0, 1.0, 0.0, 0.0, 0.0]);
        assert_eq!(c.apply(&[1.0, 3.0, 0.0, 0.0, 9.0]), 2.0);
    }

    #[test]
    fn test_unknown_coefficient() {
        let err = Contrast::pairwise(&coefs(), "D", "A").unwrap_err();
        assert!(matches!(err, CageDeError::UnknownCoefficient { ref coefficient, .. } if coefficient == "D"));

        let err = Contrast::parse("X=D-A", &coefs()).unwrap_err();
        assert!(matches!(err, CageDeError::UnknownCoefficient { ref coefficient, .. } if coefficient == "D"));
    }

    #[test]
    fn test_parse_named_expression() {
        let c = Contrast::parse("B.vs.AC = B - 0.5*A - 0.5*C", &coefs()).unwrap();
        assert_eq!(c.name(), "B.vs.AC");
        assert_eq!(c.weights(), &[-0.5, 1.0, -0.5, 0.0, 0.0]);
    }

    #[test]
    fn test_parse_longest_name_wins() {
        let c = Contrast::parse("C-2-C", &coefs()).unwrap();
        assert_eq!(c.name(), "C-2-C");
        assert_eq!(c.weights(), &[0.0, 0.0, -1.0, 1.0, 0.0]);
    }

    #[test]
    fn test_weights_must_sum_to_zero() {
        assert!(Contrast::parse("B", &coefs()).is_err());
        assert!(Contrast::from_weights("x", &coefs(), vec![1.0, 0.0, 0.0, 0.0, 0.0]).is_err());
        assert!(Contrast::from_weights("x", &coefs(), vec![1.0, -1.0]).is_err());
    }

    #[test]
    fn test_mean_of_contrasts() {
        let b = Contrast::pairwise(&coefs(), "B", "A").unwrap();
        let c = Contrast::pairwise(&coefs(), "C", "A").unwrap();
        let mean = Contrast::mean_of("BC.vs.A", &[b, c]).unwrap();
        assert_eq!(mean.weights(), &[-1.0, 0.5, 0.5, 0.0, 0.0]);
    }
}
