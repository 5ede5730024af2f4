//! Gibbs block for the linear covariate coefficients.
//!
//! Given `r = y* - h`, the full conditional of `beta` under a flat or
//! independent normal prior is
//! `N(P^{-1} X' r / sigma^2, P^{-1})` with `P = X'X / sigma^2 + tau I`.

use faer::Mat;
use rand::rngs::StdRng;

use crate::inference::NumericalError;
use crate::models::matrix_ops::{column_to_vec, vec_to_column};
use crate::utils::{add_to_diagonal, cholesky_with_jitter, slice_is_finite};

use super::priors::CoefficientPrior;
use super::random::sample_standard_normal_vec;

const STARTING_RIDGE: f64 = 1.0e-6;

/// Draw `beta` from its Gaussian full conditional.
///
/// # Errors
///
/// Returns `NumericalError` if the posterior precision cannot be factorized or
/// the draw is not finite.
pub fn sample_coefficients(
    rng: &mut StdRng,
    covariates: &Mat<f64>,
    partial_residual: &[f64],
    noise_variance: f64,
    prior: CoefficientPrior,
) -> Result<Vec<f64>, NumericalError> {
    let p = covariates.ncols();
    if p == 0 {
        return Ok(Vec::new());
    }

    let gram = covariates.transpose() * covariates;
    let precision = Mat::from_fn(p, p, |i, j| {
        let data = gram[(i, j)] / noise_variance;
        if i == j { data + prior.precision() } else { data }
    });
    let factor = cholesky_with_jitter(&precision)?;

    let residual_column = vec_to_column(partial_residual);
    let cross = covariates.transpose() * &residual_column;
    let scaled_cross = Mat::from_fn(p, 1, |row, _| cross[(row, 0)] / noise_variance);
    let mean = factor.solve(&scaled_cross);

    let noise = vec_to_column(&sample_standard_normal_vec(rng, p));
    let offset = factor.solve_lower_transpose(&noise);
    let draw: Vec<f64> = (0..p).map(|row| mean[(row, 0)] + offset[(row, 0)]).collect();

    if !slice_is_finite(&draw) {
        return Err(NumericalError::NonFinite {
            quantity: "coefficients",
        });
    }
    Ok(draw)
}

/// Lightly ridged least-squares fit used as the default starting point.
///
/// # Errors
///
/// Returns `NumericalError` if `X'X` cannot be factorized.
pub fn least_squares_start(
    covariates: &Mat<f64>,
    response: &[f64],
) -> Result<Vec<f64>, NumericalError> {
    let p = covariates.ncols();
    if p == 0 {
        return Ok(Vec::new());
    }
    let gram = add_to_diagonal(&(covariates.transpose() * covariates), STARTING_RIDGE);
    let factor = cholesky_with_jitter(&gram)?;
    let response_column = vec_to_column(response);
    let cross = covariates.transpose() * &response_column;
    Ok(column_to_vec(&factor.solve(&cross)))
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use super::*;

    fn idx_to_f64(idx: usize) -> f64 {
        f64::from(u32::try_from(idx).unwrap_or(u32::MAX))
    }

    fn design(n: usize) -> Mat<f64> {
        Mat::from_fn(n, 2, |i, j| {
            let t = idx_to_f64(i) / idx_to_f64(n);
            if j == 0 { 1.0 } else { t - 0.5 }
        })
    }

    #[test]
    fn empty_design_yields_empty_draw() {
        let mut rng = StdRng::seed_from_u64(3);
        let draw = sample_coefficients(
            &mut rng,
            &Mat::<f64>::zeros(4, 0),
            &[1.0; 4],
            1.0,
            CoefficientPrior::Flat,
        )
        .expect("empty design is valid");
        assert!(draw.is_empty());
    }

    #[test]
    fn draws_center_on_least_squares_under_flat_prior() {
        let n = 80;
        let x = design(n);
        let response: Vec<f64> = (0..n)
            .map(|i| 0.5 + 2.0 * x[(i, 1)] + 0.05 * (idx_to_f64(i) * 1.3).sin())
            .collect();
        let ols = least_squares_start(&x, &response).expect("design has full rank");
        assert!((ols[0] - 0.5).abs() < 0.05);
        assert!((ols[1] - 2.0).abs() < 0.1);

        let mut rng = StdRng::seed_from_u64(17);
        let draws = 2_000;
        let mut mean = [0.0; 2];
        for _ in 0..draws {
            let draw = sample_coefficients(&mut rng, &x, &response, 0.01, CoefficientPrior::Flat)
                .expect("posterior precision is positive definite");
            mean[0] += draw[0] / idx_to_f64(draws);
            mean[1] += draw[1] / idx_to_f64(draws);
        }
        assert!((mean[0] - ols[0]).abs() < 0.01);
        assert!((mean[1] - ols[1]).abs() < 0.03);
    }

    #[test]
    fn normal_prior_shrinks_toward_zero() {
        let n = 10;
        let x = design(n);
        let response = vec![3.0; n];
        let mut rng = StdRng::seed_from_u64(4);
        let tight = CoefficientPrior::Normal { variance: 1.0e-4 };
        let draw = sample_coefficients(&mut rng, &x, &response, 1.0, tight)
            .expect("prior makes precision positive definite");
        assert!(draw.iter().all(|value| value.abs() < 0.1));
    }
}
