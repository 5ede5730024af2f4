//! Prior specifications and log-density helpers for BKMR.

use serde::{Deserialize, Serialize};
use statrs::function::beta::ln_beta;
use statrs::function::gamma::ln_gamma;

use crate::utils::usize_to_f64;

/// Prior on an included bandwidth `r_m`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum BandwidthPrior {
    /// `1 / r_m ~ Uniform(lower, upper)`; `lower = 0` leaves `r_m` unbounded above.
    InverseUniform { lower: f64, upper: f64 },
    /// `r_m ~ Gamma(shape, rate)`.
    Gamma { shape: f64, rate: f64 },
}

impl Default for BandwidthPrior {
    fn default() -> Self {
        Self::InverseUniform {
            lower: 0.0,
            upper: 100.0,
        }
    }
}

impl BandwidthPrior {
    #[must_use]
    pub fn is_valid(self) -> bool {
        match self {
            Self::InverseUniform { lower, upper } => lower >= 0.0 && lower < upper,
            Self::Gamma { shape, rate } => shape > 0.0 && rate > 0.0,
        }
    }

    /// Log prior density of an included bandwidth, up to the normalizing constant
    /// shared by all dimensions.
    #[must_use]
    pub fn log_density(self, value: f64) -> f64 {
        if !(value > 0.0 && value.is_finite()) {
            return f64::NEG_INFINITY;
        }
        match self {
            Self::InverseUniform { lower, upper } => {
                let inverse = 1.0 / value;
                if inverse < lower || inverse > upper {
                    f64::NEG_INFINITY
                } else {
                    -(upper - lower).ln() - 2.0 * value.ln()
                }
            }
            Self::Gamma { shape, rate } => log_gamma_density(value, shape, rate),
        }
    }
}

/// Prior on the linear covariate coefficients.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum CoefficientPrior {
    /// Improper flat prior.
    #[default]
    Flat,
    /// Independent `Normal(0, variance)` prior on every coefficient.
    Normal { variance: f64 },
}

impl CoefficientPrior {
    #[must_use]
    pub fn is_valid(self) -> bool {
        match self {
            Self::Flat => true,
            Self::Normal { variance } => variance > 0.0 && variance.is_finite(),
        }
    }

    /// Prior precision added to the diagonal of the coefficient posterior precision.
    #[must_use]
    pub fn precision(self) -> f64 {
        match self {
            Self::Flat => 0.0,
            Self::Normal { variance } => 1.0 / variance,
        }
    }
}

/// Hyperparameters for the BKMR prior set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BkmrPriorConfig {
    pub bandwidth: BandwidthPrior,
    pub coefficients: CoefficientPrior,
    /// Beta(`inclusion_a`, `inclusion_b`) prior on the common inclusion
    /// probability, integrated out into a beta-binomial prior on the indicators.
    pub inclusion_a: f64,
    pub inclusion_b: f64,
    /// Gamma shape for the variance ratio `lambda = tau / sigma^2`.
    pub lambda_shape: f64,
    /// Gamma rate for `lambda`.
    pub lambda_rate: f64,
    /// Inverse-gamma shape for the noise variance (continuous outcomes).
    pub noise_shape: f64,
    /// Inverse-gamma scale for the noise variance.
    pub noise_scale: f64,
}

impl Default for BkmrPriorConfig {
    fn default() -> Self {
        Self {
            bandwidth: BandwidthPrior::default(),
            coefficients: CoefficientPrior::Flat,
            inclusion_a: 1.0,
            inclusion_b: 1.0,
            lambda_shape: 1.0,
            lambda_rate: 0.1,
            noise_shape: 0.001,
            noise_scale: 0.001,
        }
    }
}

impl BkmrPriorConfig {
    /// Name of the first prior hyperparameter that is out of range, if any.
    #[must_use]
    pub fn invalid_field(self) -> Option<&'static str> {
        let checks = [
            ("prior_config.bandwidth", self.bandwidth.is_valid()),
            ("prior_config.coefficients", self.coefficients.is_valid()),
            ("prior_config.inclusion_a", is_positive(self.inclusion_a)),
            ("prior_config.inclusion_b", is_positive(self.inclusion_b)),
            ("prior_config.lambda_shape", is_positive(self.lambda_shape)),
            ("prior_config.lambda_rate", is_positive(self.lambda_rate)),
            ("prior_config.noise_shape", is_positive(self.noise_shape)),
            ("prior_config.noise_scale", is_positive(self.noise_scale)),
        ];
        checks
            .into_iter()
            .find_map(|(field, valid)| (!valid).then_some(field))
    }

    /// Log beta-binomial prior mass of an indicator vector with `included` of
    /// `dimensions` entries switched on.
    #[must_use]
    pub fn log_inclusion_prior(self, included: usize, dimensions: usize) -> f64 {
        let k = usize_to_f64(included);
        let m = usize_to_f64(dimensions);
        ln_beta(self.inclusion_a + k, self.inclusion_b + m - k)
            - ln_beta(self.inclusion_a, self.inclusion_b)
    }

    #[must_use]
    pub fn log_lambda_prior(self, lambda: f64) -> f64 {
        log_gamma_density(lambda, self.lambda_shape, self.lambda_rate)
    }
}

/// Log-density for a `Gamma(shape, rate)` distribution.
#[must_use]
pub fn log_gamma_density(value: f64, shape: f64, rate: f64) -> f64 {
    if !(value > 0.0 && shape > 0.0 && rate > 0.0 && value.is_finite()) {
        return f64::NEG_INFINITY;
    }
    shape.mul_add(rate.ln(), -ln_gamma(shape)) + (shape - 1.0).mul_add(value.ln(), -rate * value)
}

/// Log-density of the gamma proposal with the given mean and standard deviation.
#[must_use]
pub fn log_gamma_proposal_density(value: f64, mean: f64, sd: f64) -> f64 {
    if !(mean > 0.0 && sd > 0.0) {
        return f64::NEG_INFINITY;
    }
    let (shape, rate) = gamma_shape_rate(mean, sd);
    log_gamma_density(value, shape, rate)
}

/// Shape and rate of the gamma distribution with the given mean and sd.
#[must_use]
pub fn gamma_shape_rate(mean: f64, sd: f64) -> (f64, f64) {
    let variance = sd * sd;
    (mean * mean / variance, mean / variance)
}

fn is_positive(value: f64) -> bool {
    value > 0.0 && value.is_finite()
}
