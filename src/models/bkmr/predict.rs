//! Prediction of `h` and of the outcome at new exposure profiles.
//!
//! Each retained draw defines a Gaussian process conditional on its own
//! `h`, `r`, and `tau = lambda * sigma^2`:
//!
//! `h_new | h ~ N(K_no K^-1 h, tau (K_nn - K_no K^-1 K_on))`.
//!
//! Summaries over draws combine the per-draw conditionals with the law of
//! total variance.

use faer::Mat;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use statrs::function::erf::erfc;

use crate::inference::NumericalError;
use crate::models::matrix_ops::{column_values, dot_row, linear_grid, quantile, vec_to_column};
use crate::utils::{add_to_diagonal, cholesky_with_jitter, slice_is_finite, symmetrize, usize_to_f64};

use super::kernel::{cross_kernel, gaussian_kernel};
use super::posterior::BkmrPosteriorDraw;
use super::random::sample_standard_normal_vec;
use super::types::{BkmrError, BkmrFit};

const PREDICTIVE_NUGGET: f64 = 1.0e-8;

/// Which retained draws feed a prediction.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DrawSelection {
    #[default]
    All,
    /// Skip the first `k` retained draws.
    AfterBurnIn(usize),
    /// Explicit positions in the draw log.
    Indices(Vec<usize>),
}

impl DrawSelection {
    /// Positions in the draw log selected out of `draws` retained draws.
    ///
    /// # Errors
    ///
    /// Returns `BkmrError::EmptyPosterior` if nothing is selected and
    /// `BkmrError::DrawIndexOutOfRange` for an explicit index past the log.
    pub fn resolve(&self, draws: usize) -> Result<Vec<usize>, BkmrError> {
        let selected: Vec<usize> = match self {
            Self::All => (0..draws).collect(),
            Self::AfterBurnIn(skip) => (*skip..draws).collect(),
            Self::Indices(indices) => {
                if let Some(index) = indices.iter().copied().find(|index| *index >= draws) {
                    return Err(BkmrError::DrawIndexOutOfRange { index, draws });
                }
                indices.clone()
            }
        };
        if selected.is_empty() {
            return Err(BkmrError::EmptyPosterior);
        }
        Ok(selected)
    }
}

/// Posterior mean and standard error of `h` at each new exposure profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionPrediction {
    pub mean: Vec<f64>,
    pub std_error: Vec<f64>,
    pub draws_used: usize,
}

/// Scale of posterior predictive samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PredictiveScale {
    /// Simulated continuous outcomes `h + x'beta + sigma * eps`.
    Outcome,
    /// Probit success probabilities `Phi(h + x'beta)`.
    Probability,
}

/// One row per selected draw, one column per new exposure profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictiveSamples {
    pub draws: Vec<Vec<f64>>,
    pub scale: PredictiveScale,
}

/// Estimated `h` along a grid for one exposure with the others held fixed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExposureResponse {
    pub exposure_index: usize,
    pub grid: Vec<f64>,
    pub mean: Vec<f64>,
    pub std_error: Vec<f64>,
}

/// Per-draw conditional of `h_new` given the draw's training `h`.
struct DrawConditional {
    mean: Vec<f64>,
    covariance: Mat<f64>,
}

fn conditional_at(
    training: &Mat<f64>,
    new_exposures: &Mat<f64>,
    draw: &BkmrPosteriorDraw,
) -> Result<DrawConditional, NumericalError> {
    let kernel = gaussian_kernel(training, &draw.bandwidths);
    let factor = cholesky_with_jitter(&kernel)?;
    let cross = cross_kernel(training, new_exposures, &draw.bandwidths);
    let new_kernel = gaussian_kernel(new_exposures, &draw.bandwidths);

    let weights = factor.solve(&vec_to_column(&draw.function_values));
    let projected = factor.solve(&cross);
    let mean: Vec<f64> = (0..new_exposures.nrows())
        .map(|row| {
            (0..training.nrows())
                .map(|obs| cross[(obs, row)] * weights[(obs, 0)])
                .sum()
        })
        .collect();
    if !slice_is_finite(&mean) {
        return Err(NumericalError::NonFinite {
            quantity: "predictive mean",
        });
    }

    let tau = draw.function_variance();
    let explained = cross.transpose() * &projected;
    let mut covariance = Mat::from_fn(new_exposures.nrows(), new_exposures.nrows(), |i, j| {
        tau * (new_kernel[(i, j)] - explained[(i, j)])
    });
    symmetrize(&mut covariance);
    Ok(DrawConditional { mean, covariance })
}

fn check_exposure_columns(fit: &BkmrFit, new_exposures: &Mat<f64>) -> Result<(), BkmrError> {
    if new_exposures.ncols() == fit.model.n_exposures {
        Ok(())
    } else {
        Err(BkmrError::ExposureDimensionMismatch {
            expected: fit.model.n_exposures,
            found: new_exposures.ncols(),
        })
    }
}

/// Posterior mean and standard error of `h` at `new_exposures`.
///
/// # Errors
///
/// Returns `BkmrError` if the draw selection is empty or out of range, the
/// exposure columns do not match the fit, or a draw's kernel is degenerate.
pub fn predict_function_mean(
    fit: &BkmrFit,
    new_exposures: &Mat<f64>,
    selection: &DrawSelection,
) -> Result<FunctionPrediction, BkmrError> {
    check_exposure_columns(fit, new_exposures)?;
    let selected = selection.resolve(fit.posterior.len())?;
    let points = new_exposures.nrows();

    let mut mean_sum = vec![0.0; points];
    let mut mean_square_sum = vec![0.0; points];
    let mut variance_sum = vec![0.0; points];
    for &index in &selected {
        let draw = &fit.posterior.draws[index];
        let conditional = conditional_at(&fit.exposures, new_exposures, draw)
            .map_err(|source| BkmrError::Prediction {
                draw: index,
                source,
            })?;
        for point in 0..points {
            let value = conditional.mean[point];
            mean_sum[point] += value;
            mean_square_sum[point] += value * value;
            variance_sum[point] += conditional.covariance[(point, point)].max(0.0);
        }
    }

    let count = usize_to_f64(selected.len());
    let mean: Vec<f64> = mean_sum.iter().map(|sum| sum / count).collect();
    let std_error = (0..points)
        .map(|point| {
            let between = (mean_square_sum[point] / count - mean[point] * mean[point]).max(0.0);
            (variance_sum[point] / count + between).sqrt()
        })
        .collect();

    Ok(FunctionPrediction {
        mean,
        std_error,
        draws_used: selected.len(),
    })
}

/// Posterior predictive samples at `new_exposures` for a fixed covariate vector.
///
/// For each selected draw `h_new` is drawn jointly from its conditional. The
/// probit family returns the success probability `Phi(h_new + x'beta)`; the
/// continuous family adds independent noise with the draw's variance.
///
/// # Errors
///
/// Returns `BkmrError` if the covariate vector or exposure columns do not
/// match the fit, the draw selection is invalid, or a conditional cannot be
/// factorized.
pub fn posterior_predictive_samples(
    fit: &BkmrFit,
    new_exposures: &Mat<f64>,
    covariates: &[f64],
    selection: &DrawSelection,
    seed: u64,
) -> Result<PredictiveSamples, BkmrError> {
    check_exposure_columns(fit, new_exposures)?;
    if covariates.len() != fit.model.n_covariates {
        return Err(BkmrError::CovariateLengthMismatch {
            expected: fit.model.n_covariates,
            found: covariates.len(),
        });
    }
    let selected = selection.resolve(fit.posterior.len())?;
    let binary = fit.model.family.is_binary();
    let points = new_exposures.nrows();
    let covariate_row = Mat::from_fn(1, covariates.len(), |_, col| covariates[col]);
    let mut rng = StdRng::seed_from_u64(seed);

    let mut draws = Vec::with_capacity(selected.len());
    for &index in &selected {
        let draw = &fit.posterior.draws[index];
        let to_prediction_error = |source| BkmrError::Prediction {
            draw: index,
            source,
        };
        let conditional =
            conditional_at(&fit.exposures, new_exposures, draw).map_err(to_prediction_error)?;
        // The conditional is singular at training points; a nugget keeps it factorizable.
        let nugget = PREDICTIVE_NUGGET * draw.function_variance();
        let factor = cholesky_with_jitter(&add_to_diagonal(&conditional.covariance, nugget))
            .map_err(to_prediction_error)?;
        let offset = factor.lower_times(&sample_standard_normal_vec(&mut rng, points));
        let fixed_effect = dot_row(&covariate_row, 0, &draw.coefficients);

        let noise = if binary {
            Vec::new()
        } else {
            sample_standard_normal_vec(&mut rng, points)
        };
        let noise_sd = draw.noise_variance.sqrt();
        let row: Vec<f64> = (0..points)
            .map(|point| {
                let eta = conditional.mean[point] + offset[point] + fixed_effect;
                if binary {
                    standard_normal_cdf(eta)
                } else {
                    noise_sd.mul_add(noise[point], eta)
                }
            })
            .collect();
        draws.push(row);
    }

    Ok(PredictiveSamples {
        draws,
        scale: if binary {
            PredictiveScale::Probability
        } else {
            PredictiveScale::Outcome
        },
    })
}

/// Posterior of `h` as exposure `exposure_index` moves across its observed
/// range while every other exposure sits at its `fixed_quantile`.
///
/// # Errors
///
/// Returns `BkmrError` for an invalid exposure index, grid size, or quantile,
/// or if prediction fails.
pub fn predictor_response_univariate(
    fit: &BkmrFit,
    exposure_index: usize,
    grid_size: usize,
    fixed_quantile: f64,
    selection: &DrawSelection,
) -> Result<ExposureResponse, BkmrError> {
    let exposures = fit.model.n_exposures;
    if exposure_index >= exposures {
        return Err(BkmrError::InvalidExposureIndex {
            index: exposure_index,
            exposures,
        });
    }
    if grid_size == 0 {
        return Err(BkmrError::InvalidGridSize);
    }
    if !(0.0..=1.0).contains(&fixed_quantile) {
        return Err(BkmrError::InvalidQuantile(fixed_quantile));
    }

    let varying = column_values(&fit.exposures, exposure_index);
    let low = varying.iter().copied().fold(f64::INFINITY, f64::min);
    let high = varying.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let grid = linear_grid(low, high, grid_size);
    let fixed: Vec<f64> = (0..exposures)
        .map(|col| quantile(&column_values(&fit.exposures, col), fixed_quantile))
        .collect();

    let new_exposures = Mat::from_fn(grid_size, exposures, |row, col| {
        if col == exposure_index {
            grid[row]
        } else {
            fixed[col]
        }
    });
    let prediction = predict_function_mean(fit, &new_exposures, selection)?;

    Ok(ExposureResponse {
        exposure_index,
        grid,
        mean: prediction.mean,
        std_error: prediction.std_error,
    })
}

fn standard_normal_cdf(value: f64) -> f64 {
    0.5 * erfc(-value / std::f64::consts::SQRT_2)
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::input::Family;
    use crate::models::bkmr::kernel::Bandwidth;
    use crate::models::bkmr::posterior::BkmrPosteriorSamples;
    use crate::models::bkmr::types::{BkmrModel, BkmrReport};

    fn toy_fit(family: Family) -> BkmrFit {
        let exposures = Mat::from_fn(4, 1, |i, _| f64::from(u8::try_from(i).unwrap_or(0)));
        let draw = BkmrPosteriorDraw {
            iteration: 0,
            function_values: vec![0.0, 1.0, 2.0, 3.0],
            coefficients: vec![0.5],
            bandwidths: vec![Bandwidth::Included(0.5)],
            lambda: 2.0,
            noise_variance: 0.5,
            latent: None,
        };
        let mut shifted = draw.clone();
        shifted.iteration = 1;
        shifted.function_values = vec![1.0, 2.0, 3.0, 4.0];
        BkmrFit {
            model: BkmrModel {
                n_observations: 4,
                n_exposures: 1,
                n_covariates: 1,
                family,
                variable_selection: false,
            },
            report: BkmrReport::default(),
            posterior: BkmrPosteriorSamples {
                draws: vec![draw, shifted],
            },
            exposures,
        }
    }

    #[test]
    fn prediction_interpolates_training_points() {
        let fit = toy_fit(Family::Gaussian);
        let new_exposures = Mat::from_fn(1, 1, |_, _| 2.0);
        let prediction =
            predict_function_mean(&fit, &new_exposures, &DrawSelection::Indices(vec![0]))
                .expect("prediction");
        assert_relative_eq!(prediction.mean[0], 2.0, epsilon = 1.0e-6);
        assert!(prediction.std_error[0] < 1.0e-3);

        let both = predict_function_mean(&fit, &new_exposures, &DrawSelection::All)
            .expect("prediction");
        assert_eq!(both.draws_used, 2);
        assert_relative_eq!(both.mean[0], 2.5, epsilon = 1.0e-6);
        assert_relative_eq!(both.std_error[0], 0.5, epsilon = 1.0e-3);
    }

    #[test]
    fn far_points_revert_to_prior() {
        let fit = toy_fit(Family::Gaussian);
        let new_exposures = Mat::from_fn(1, 1, |_, _| 50.0);
        let prediction =
            predict_function_mean(&fit, &new_exposures, &DrawSelection::Indices(vec![0]))
                .expect("prediction");
        assert_relative_eq!(prediction.mean[0], 0.0, epsilon = 1.0e-9);
        assert_relative_eq!(prediction.std_error[0], 1.0, epsilon = 1.0e-9);
    }

    #[test]
    fn selection_errors_are_reported() {
        let fit = toy_fit(Family::Gaussian);
        let new_exposures = Mat::from_fn(1, 1, |_, _| 0.0);
        assert!(matches!(
            predict_function_mean(&fit, &new_exposures, &DrawSelection::AfterBurnIn(2)),
            Err(BkmrError::EmptyPosterior)
        ));
        assert!(matches!(
            predict_function_mean(&fit, &new_exposures, &DrawSelection::Indices(vec![5])),
            Err(BkmrError::DrawIndexOutOfRange { index: 5, draws: 2 })
        ));
        let wide = Mat::from_fn(1, 2, |_, _| 0.0);
        assert!(matches!(
            predict_function_mean(&fit, &wide, &DrawSelection::All),
            Err(BkmrError::ExposureDimensionMismatch {
                expected: 1,
                found: 2
            })
        ));
    }

    #[test]
    fn probit_predictions_are_probabilities() {
        let fit = toy_fit(Family::Binomial);
        let new_exposures = Mat::from_fn(3, 1, |i, _| 0.5 + f64::from(u8::try_from(i).unwrap_or(0)));
        let samples =
            posterior_predictive_samples(&fit, &new_exposures, &[1.0], &DrawSelection::All, 3)
                .expect("samples");
        assert_eq!(samples.scale, PredictiveScale::Probability);
        assert_eq!(samples.draws.len(), 2);
        assert!(
            samples
                .draws
                .iter()
                .flatten()
                .all(|value| (0.0..=1.0).contains(value))
        );

        assert!(matches!(
            posterior_predictive_samples(&fit, &new_exposures, &[], &DrawSelection::All, 3),
            Err(BkmrError::CovariateLengthMismatch {
                expected: 1,
                found: 0
            })
        ));
    }

    #[test]
    fn univariate_grid_spans_observed_range() {
        let fit = toy_fit(Family::Gaussian);
        let response = predictor_response_univariate(&fit, 0, 4, 0.5, &DrawSelection::All)
            .expect("response");
        assert_eq!(response.grid.len(), 4);
        assert_relative_eq!(response.grid[0], 0.0);
        assert_relative_eq!(response.grid[3], 3.0);
        assert_relative_eq!(response.mean[3], 3.5, epsilon = 1.0e-6);
        assert!(matches!(
            predictor_response_univariate(&fit, 1, 4, 0.5, &DrawSelection::All),
            Err(BkmrError::InvalidExposureIndex { .. })
        ));
        assert!(matches!(
            predictor_response_univariate(&fit, 0, 4, 1.5, &DrawSelection::All),
            Err(BkmrError::InvalidQuantile(_))
        ));
    }
}
