//! Gaussian-process block for the exposure-response function `h`.
//!
//! With `h ~ N(0, sigma^2 lambda K)` and `e = y* - X beta = h + eps`,
//! `eps ~ N(0, sigma^2 I)`, integrating out `h` gives
//! `e ~ N(0, sigma^2 V)` where `V = I + lambda K`. The hyperparameter and
//! variable-selection moves work with that marginal, and `h` is drawn from
//!
//! `h | e ~ N(e - V^{-1} e, sigma^2 (I - V^{-1}))`
//!
//! by conditioning a joint prior draw `(u, eps)` on the observed residual:
//! `h = e - eps - V^{-1} (e - u - eps)`.

use faer::Mat;
use rand::rngs::StdRng;

use crate::inference::NumericalError;
use crate::models::matrix_ops::{column_to_vec, vec_to_column};
use crate::utils::{
    JitteredCholesky, add_to_diagonal, cholesky_with_jitter, slice_is_finite, usize_to_f64,
};

use super::random::sample_standard_normal_vec;

/// Cholesky factorization of `V = I + lambda K`.
#[derive(Debug, Clone)]
pub struct MarginalCovariance {
    factor: JitteredCholesky,
    lambda: f64,
}

impl MarginalCovariance {
    /// # Errors
    ///
    /// Returns `NumericalError` if `V` cannot be factorized within the jitter budget.
    pub fn factorize(kernel: &Mat<f64>, lambda: f64) -> Result<Self, NumericalError> {
        if !(lambda > 0.0 && lambda.is_finite()) {
            return Err(NumericalError::NonFinite { quantity: "lambda" });
        }
        Ok(Self {
            factor: cholesky_with_jitter(&marginal_covariance_matrix(kernel, lambda))?,
            lambda,
        })
    }

    #[must_use]
    pub const fn lambda(&self) -> f64 {
        self.lambda
    }

    /// Diagonal jitter that was needed to factorize `V`.
    #[must_use]
    pub const fn jitter(&self) -> f64 {
        self.factor.jitter
    }

    /// `V^{-1} e`.
    #[must_use]
    pub fn solve(&self, residual: &[f64]) -> Vec<f64> {
        column_to_vec(&self.factor.solve(&vec_to_column(residual)))
    }

    /// `e' V^{-1} e`.
    #[must_use]
    pub fn quadratic_form(&self, residual: &[f64]) -> f64 {
        let whitened = self.factor.solve_lower(&vec_to_column(residual));
        (0..whitened.nrows())
            .map(|row| whitened[(row, 0)] * whitened[(row, 0)])
            .sum()
    }

    /// Gaussian log-likelihood of `e ~ N(0, noise_variance V)` without the `2 pi` constant.
    #[must_use]
    pub fn log_likelihood(&self, residual: &[f64], noise_variance: f64) -> f64 {
        let n = usize_to_f64(residual.len());
        let value = -0.5
            * (self.factor.log_determinant()
                + n * noise_variance.ln()
                + self.quadratic_form(residual) / noise_variance);
        if value.is_nan() {
            f64::NEG_INFINITY
        } else {
            value
        }
    }
}

/// Draw `h` from its full conditional given the residual `e = y* - X beta`.
///
/// `kernel` must be the kernel `marginal` was factorized from.
///
/// # Errors
///
/// Returns `NumericalError` if the kernel cannot be factorized or the draw is
/// not finite.
pub fn sample_function_values(
    rng: &mut StdRng,
    kernel: &Mat<f64>,
    marginal: &MarginalCovariance,
    residual: &[f64],
    noise_variance: f64,
) -> Result<Vec<f64>, NumericalError> {
    let n = residual.len();
    let noise_sd = noise_variance.sqrt();
    let prior_factor = cholesky_with_jitter(kernel)?;
    if prior_factor.attempts > 2 {
        log::debug!("kernel factor needed jitter {:.3e}", prior_factor.jitter);
    }

    let prior_scale = (noise_variance * marginal.lambda()).sqrt();
    let prior_draw = prior_factor.lower_times(&sample_standard_normal_vec(rng, n));
    let noise: Vec<f64> = sample_standard_normal_vec(rng, n)
        .into_iter()
        .map(|z| noise_sd * z)
        .collect();

    let unexplained: Vec<f64> = (0..n)
        .map(|i| residual[i] - prior_scale * prior_draw[i] - noise[i])
        .collect();
    let correction = marginal.solve(&unexplained);
    let draw: Vec<f64> = (0..n)
        .map(|i| residual[i] - noise[i] - correction[i])
        .collect();

    if !slice_is_finite(&draw) {
        return Err(NumericalError::NonFinite {
            quantity: "function values",
        });
    }
    Ok(draw)
}

/// Conjugate inverse-gamma parameters for the noise variance with `h` integrated out.
#[must_use]
pub fn noise_variance_posterior(
    marginal: &MarginalCovariance,
    residual: &[f64],
    prior_shape: f64,
    prior_scale: f64,
) -> (f64, f64) {
    let shape = 0.5f64.mul_add(usize_to_f64(residual.len()), prior_shape);
    let scale = 0.5f64.mul_add(marginal.quadratic_form(residual), prior_scale);
    (shape, scale)
}

/// `V = I + lambda K`.
#[must_use]
pub fn marginal_covariance_matrix(kernel: &Mat<f64>, lambda: f64) -> Mat<f64> {
    let scaled = Mat::from_fn(kernel.nrows(), kernel.ncols(), |i, j| lambda * kernel[(i, j)]);
    add_to_diagonal(&scaled, 1.0)
}

#[cfg(test)]
mod tests {
    use faer::prelude::Solve;
    use rand::SeedableRng;

    use super::*;
    use crate::models::bkmr::kernel::{Bandwidth, gaussian_kernel};
    use approx::assert_relative_eq;

    fn idx_to_f64(idx: usize) -> f64 {
        f64::from(u32::try_from(idx).unwrap_or(u32::MAX))
    }

    fn kernel(n: usize) -> Mat<f64> {
        let z = Mat::from_fn(n, 1, |i, _| idx_to_f64(i) / idx_to_f64(n));
        gaussian_kernel(&z, &[Bandwidth::Included(4.0)])
    }

    /// `V^{-1}` by solving against the identity, for checking against.
    fn dense_v_inverse(k: &Mat<f64>, lambda: f64) -> Mat<f64> {
        let v = marginal_covariance_matrix(k, lambda);
        let n = v.nrows();
        v.full_piv_lu()
            .solve(Mat::from_fn(n, n, |i, j| if i == j { 1.0 } else { 0.0 }))
    }

    #[test]
    fn log_likelihood_matches_dense_formula() {
        let k = kernel(5);
        let lambda = 2.5;
        let noise_variance: f64 = 0.7;
        let residual = [0.3, -0.2, 0.9, 0.1, -0.4];
        let marginal = MarginalCovariance::factorize(&k, lambda).expect("V is positive definite");

        let v_inverse = dense_v_inverse(&k, lambda);
        let mut quad = 0.0;
        for i in 0..5 {
            for j in 0..5 {
                quad += residual[i] * v_inverse[(i, j)] * residual[j];
            }
        }
        let log_det = marginal_covariance_matrix(&k, lambda).determinant().ln();
        let expected = -0.5 * (log_det + 5.0 * noise_variance.ln() + quad / noise_variance);
        assert_relative_eq!(
            marginal.log_likelihood(&residual, noise_variance),
            expected,
            epsilon = 1.0e-10
        );
    }

    #[test]
    fn function_draws_match_conditional_moments() {
        let n = 8;
        let lambda = 5.0;
        let noise_variance = 0.1;
        let k = kernel(n);
        let residual: Vec<f64> = (0..n).map(|i| (idx_to_f64(i) * 0.8).sin()).collect();
        let marginal = MarginalCovariance::factorize(&k, lambda).expect("V is positive definite");
        let mut rng = StdRng::seed_from_u64(99);

        let draws = 6_000;
        let samples: Vec<Vec<f64>> = (0..draws)
            .map(|_| {
                sample_function_values(&mut rng, &k, &marginal, &residual, noise_variance)
                    .expect("conditional draw should succeed")
            })
            .collect();

        let v_inverse = dense_v_inverse(&k, lambda);
        for i in 0..n {
            let mean = samples.iter().map(|draw| draw[i]).sum::<f64>() / idx_to_f64(draws);
            let smoothed: f64 = (0..n).map(|j| v_inverse[(i, j)] * residual[j]).sum();
            assert!((mean - (residual[i] - smoothed)).abs() < 0.03);

            let variance = samples
                .iter()
                .map(|draw| (draw[i] - mean) * (draw[i] - mean))
                .sum::<f64>()
                / idx_to_f64(draws - 1);
            let expected = noise_variance * (1.0 - v_inverse[(i, i)]);
            assert!(
                (variance - expected).abs() < 0.1 * expected,
                "row {i}: variance {variance} vs {expected}"
            );
        }
    }

    #[test]
    fn noise_posterior_adds_half_n_to_shape() {
        let k = kernel(4);
        let marginal = MarginalCovariance::factorize(&k, 1.0).expect("V is positive definite");
        let (shape, scale) = noise_variance_posterior(&marginal, &[0.0; 4], 0.5, 0.25);
        assert_relative_eq!(shape, 2.5, epsilon = 1.0e-12);
        assert_relative_eq!(scale, 0.25, epsilon = 1.0e-12);
    }

    #[test]
    fn non_positive_lambda_is_rejected() {
        let err =
            MarginalCovariance::factorize(&kernel(3), 0.0).expect_err("lambda must be positive");
        assert!(matches!(err, NumericalError::NonFinite { .. }));
    }
}
