//! Random variate generators used by the sampler blocks.
//!
//! Everything draws from a caller-owned `StdRng` so a chain is fully
//! determined by its seed.

use rand::RngExt;
use rand::rngs::StdRng;

/// Below this truncation point plain normal rejection is efficient (acceptance >= 1/3).
const NAIVE_REJECTION_LIMIT: f64 = 0.45;

pub fn sample_standard_normal(rng: &mut StdRng) -> f64 {
    let u1 = (1.0_f64 - rng.random::<f64>()).max(f64::MIN_POSITIVE);
    let u2 = rng.random::<f64>();
    (-2.0_f64 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
}

/// Uniform draw on `(0, 1]`, safe to pass to `ln`.
pub fn sample_open_uniform(rng: &mut StdRng) -> f64 {
    (1.0_f64 - rng.random::<f64>()).max(f64::MIN_POSITIVE)
}

pub fn sample_standard_normal_vec(rng: &mut StdRng, len: usize) -> Vec<f64> {
    (0..len).map(|_| sample_standard_normal(rng)).collect()
}

/// Standard normal conditioned on `z > lower`.
///
/// Uses plain rejection when `lower` is below the bulk and Robert's (1995)
/// translated-exponential rejection in the upper tail. Neither branch
/// evaluates the normal CDF, so the draw stays exact for truncation points
/// far beyond where `1 - Phi(lower)` underflows.
pub fn sample_standard_normal_above(rng: &mut StdRng, lower: f64) -> f64 {
    if lower < NAIVE_REJECTION_LIMIT {
        loop {
            let candidate = sample_standard_normal(rng);
            if candidate > lower {
                return candidate;
            }
        }
    }

    let rate = 0.5 * (lower + lower.mul_add(lower, 4.0).sqrt());
    loop {
        let candidate = lower - sample_open_uniform(rng).ln() / rate;
        let offset = candidate - rate;
        if sample_open_uniform(rng).ln() <= -0.5 * offset * offset {
            return candidate;
        }
    }
}

/// `Normal(mean, 1)` truncated to `(0, inf)`.
pub fn sample_positive_normal(rng: &mut StdRng, mean: f64) -> f64 {
    (mean + sample_standard_normal_above(rng, -mean)).max(f64::MIN_POSITIVE)
}

/// `Normal(mean, 1)` truncated to `(-inf, 0]`.
pub fn sample_non_positive_normal(rng: &mut StdRng, mean: f64) -> f64 {
    (mean - sample_standard_normal_above(rng, mean)).min(0.0)
}

/// Marsaglia-Tsang gamma draw with the given shape and scale.
pub fn sample_gamma(rng: &mut StdRng, shape: f64, scale: f64) -> f64 {
    if !(shape > 0.0 && scale > 0.0) {
        return f64::NAN;
    }

    if shape < 1.0 {
        let u = sample_open_uniform(rng);
        return sample_gamma(rng, shape + 1.0, scale) * u.powf(1.0 / shape);
    }

    let shape_minus_third = shape - (1.0 / 3.0);
    let coeff = (1.0 / (9.0 * shape_minus_third)).sqrt();
    loop {
        let standard_normal = sample_standard_normal(rng);
        let one_plus_coeff_noise = coeff.mul_add(standard_normal, 1.0);
        if one_plus_coeff_noise <= 0.0 {
            continue;
        }
        let cubic_term = one_plus_coeff_noise * one_plus_coeff_noise * one_plus_coeff_noise;
        let uniform = rng.random::<f64>();
        if uniform
            < (0.0331 * standard_normal * standard_normal * standard_normal)
                .mul_add(-standard_normal, 1.0)
        {
            return scale * shape_minus_third * cubic_term;
        }
        if uniform.ln()
            < (0.5 * standard_normal).mul_add(
                standard_normal,
                shape_minus_third * (1.0 - cubic_term + cubic_term.ln()),
            )
        {
            return scale * shape_minus_third * cubic_term;
        }
    }
}

/// Gamma draw parameterized by its mean and standard deviation.
pub fn sample_gamma_mean_sd(rng: &mut StdRng, mean: f64, sd: f64) -> f64 {
    let variance = sd * sd;
    sample_gamma(rng, mean * mean / variance, variance / mean)
}

/// Inverse-gamma draw with the given shape and scale.
pub fn sample_inverse_gamma(rng: &mut StdRng, shape: f64, scale: f64) -> f64 {
    1.0 / sample_gamma(rng, shape, 1.0 / scale)
}

pub fn should_accept(log_acceptance: f64, rng: &mut StdRng) -> bool {
    if log_acceptance.is_nan() {
        return false;
    }
    log_acceptance >= 0.0 || rng.random::<f64>().ln() < log_acceptance
}
