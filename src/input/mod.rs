//! # Model inputs
//!
//! Defines a light-weight container for the outcome vector, the exposure
//! matrix `Z` that enters the kernel, and an optional covariate matrix `X`
//! with linear effects.
//!
//! # Examples
//!
//! ```
//! use faer::Mat;
//! use kernel_machine_models::{Family, KernelMachineInput};
//!
//! fn idx_to_f64(idx: usize) -> f64 {
//!     f64::from(u32::try_from(idx).unwrap_or(u32::MAX))
//! }
//!
//! let outcome = Mat::from_fn(4, 1, |i, _| if i % 2 == 0 { 0.0 } else { 1.0 });
//! let exposures = Mat::from_fn(4, 2, |i, j| idx_to_f64(i + j));
//! let input = KernelMachineInput::new(outcome, exposures);
//!
//! assert!(input.validate_for_family(Family::Binomial).is_ok());
//! ```
//!
//! ```
//! use faer::Mat;
//! use kernel_machine_models::KernelMachineInput;
//!
//! let outcome = Mat::from_fn(4, 1, |_, _| 1.0);
//! let exposures = Mat::from_fn(4, 2, |_, _| 0.0);
//! let covariates = Mat::from_fn(3, 1, |_, _| 1.0);
//! let input = KernelMachineInput::new(outcome, exposures).with_covariates(covariates);
//!
//! assert!(input.validate().is_err());
//! ```

use std::fmt;
use std::str::FromStr;

use faer::Mat;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::utils::matrix_is_finite;

/// Errors returned when validating model inputs.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum InputError {
    #[error("outcome must have at least one row")]
    EmptyOutcome,
    #[error("outcome must be a single column matrix")]
    InvalidOutcomeShape,
    #[error("exposure matrix `z` must have at least one column")]
    EmptyExposures,
    #[error("exposure matrix `z` rows ({rows}) must match outcome rows ({len})")]
    ExposureRowMismatch { rows: usize, len: usize },
    #[error("covariate matrix `x` rows ({rows}) must match outcome rows ({len})")]
    CovariateRowMismatch { rows: usize, len: usize },
    #[error("outcome `y` contains non-finite values")]
    NonFiniteOutcome,
    #[error("exposure matrix `z` contains non-finite values")]
    NonFiniteExposures,
    #[error("covariate matrix `x` contains non-finite values")]
    NonFiniteCovariates,
    #[error("binary outcome `y` must be 0 or 1; row {row} has {value}")]
    NonBinaryOutcome { row: usize, value: f64 },
    #[error("unrecognized family `{0}`; expected `gaussian` or `binomial`")]
    UnknownFamily(String),
}

/// Outcome family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Family {
    /// Continuous outcome with Gaussian noise of unknown variance.
    #[default]
    Gaussian,
    /// Binary outcome with probit link, fitted through latent augmentation.
    Binomial,
}

impl Family {
    #[must_use]
    pub const fn is_binary(self) -> bool {
        matches!(self, Self::Binomial)
    }
}

impl FromStr for Family {
    type Err = InputError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "gaussian" | "continuous" | "normal" => Ok(Self::Gaussian),
            "binomial" | "binary" | "probit" => Ok(Self::Binomial),
            _ => Err(InputError::UnknownFamily(value.to_owned())),
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gaussian => f.write_str("gaussian"),
            Self::Binomial => f.write_str("binomial"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct KernelMachineInput {
    pub outcome: Mat<f64>,
    pub exposures: Mat<f64>,
    pub covariates: Option<Mat<f64>>,
}

impl KernelMachineInput {
    #[must_use]
    pub const fn new(outcome: Mat<f64>, exposures: Mat<f64>) -> Self {
        Self {
            outcome,
            exposures,
            covariates: None,
        }
    }

    #[must_use]
    pub fn with_covariates(self, covariates: Mat<f64>) -> Self {
        Self {
            covariates: Some(covariates),
            ..self
        }
    }

    #[must_use]
    pub fn n_observations(&self) -> usize {
        self.outcome.nrows()
    }

    #[must_use]
    pub fn n_exposures(&self) -> usize {
        self.exposures.ncols()
    }

    #[must_use]
    pub fn n_covariates(&self) -> usize {
        self.covariates.as_ref().map_or(0, |covariates| covariates.ncols())
    }

    /// Covariate matrix, or an `n x 0` matrix when no covariates were supplied.
    #[must_use]
    pub fn covariate_matrix(&self) -> Mat<f64> {
        self.covariates
            .clone()
            .unwrap_or_else(|| Mat::<f64>::zeros(self.outcome.nrows(), 0))
    }

    /// # Errors
    ///
    /// Returns `InputError` if shapes or values are malformed.
    pub fn validate(&self) -> Result<(), InputError> {
        if self.outcome.ncols() != 1 {
            return Err(InputError::InvalidOutcomeShape);
        }
        let len = self.outcome.nrows();
        if len == 0 {
            return Err(InputError::EmptyOutcome);
        }
        if self.exposures.ncols() == 0 {
            return Err(InputError::EmptyExposures);
        }
        if self.exposures.nrows() != len {
            return Err(InputError::ExposureRowMismatch {
                rows: self.exposures.nrows(),
                len,
            });
        }
        if let Some(covariates) = &self.covariates
            && covariates.nrows() != len
        {
            return Err(InputError::CovariateRowMismatch {
                rows: covariates.nrows(),
                len,
            });
        }

        if !matrix_is_finite(&self.outcome) {
            return Err(InputError::NonFiniteOutcome);
        }
        if !matrix_is_finite(&self.exposures) {
            return Err(InputError::NonFiniteExposures);
        }
        if let Some(covariates) = &self.covariates
            && !matrix_is_finite(covariates)
        {
            return Err(InputError::NonFiniteCovariates);
        }
        Ok(())
    }

    /// Shape validation plus the outcome support implied by `family`.
    ///
    /// # Errors
    ///
    /// Returns `InputError` if shapes are malformed or a binary outcome has
    /// values other than 0 and 1.
    pub fn validate_for_family(&self, family: Family) -> Result<(), InputError> {
        self.validate()?;
        if family.is_binary() {
            for row in 0..self.outcome.nrows() {
                let value = self.outcome[(row, 0)];
                if value != 0.0 && value != 1.0 {
                    return Err(InputError::NonBinaryOutcome { row, value });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn basic_input() -> KernelMachineInput {
        KernelMachineInput::new(
            Mat::from_fn(3, 1, |i, _| if i == 1 { 1.0 } else { 0.0 }),
            Mat::from_fn(3, 2, |i, j| f64::from(u32::try_from(i * 2 + j).unwrap_or(0))),
        )
    }

    #[test]
    fn validate_accepts_consistent_shapes() {
        let input = basic_input().with_covariates(Mat::from_fn(3, 1, |_, _| 1.0));
        assert!(input.validate().is_ok());
        assert_eq!(input.n_covariates(), 1);
        assert_eq!(input.n_exposures(), 2);
    }

    #[test]
    fn validate_names_exposure_mismatch() {
        let input = KernelMachineInput::new(
            Mat::from_fn(3, 1, |_, _| 0.0),
            Mat::from_fn(2, 2, |_, _| 0.0),
        );
        let err = input.validate().expect_err("row mismatch must fail");
        assert_eq!(err, InputError::ExposureRowMismatch { rows: 2, len: 3 });
        assert!(err.to_string().contains("`z`"));
    }

    #[test]
    fn validate_rejects_non_finite_covariates() {
        let input = basic_input().with_covariates(Mat::from_fn(3, 1, |i, _| {
            if i == 2 { f64::INFINITY } else { 0.0 }
        }));
        assert_eq!(input.validate(), Err(InputError::NonFiniteCovariates));
    }

    #[test]
    fn binary_family_requires_zero_one_outcome() {
        let input = KernelMachineInput::new(
            Mat::from_fn(3, 1, |i, _| if i == 2 { 0.5 } else { 1.0 }),
            Mat::from_fn(3, 1, |_, _| 0.0),
        );
        assert!(input.validate_for_family(Family::Gaussian).is_ok());
        assert_eq!(
            input.validate_for_family(Family::Binomial),
            Err(InputError::NonBinaryOutcome { row: 2, value: 0.5 })
        );
    }

    #[test]
    fn family_parses_known_names_only() {
        assert_eq!("binomial".parse::<Family>(), Ok(Family::Binomial));
        assert_eq!(" Gaussian ".parse::<Family>(), Ok(Family::Gaussian));
        assert!(matches!(
            "poisson".parse::<Family>(),
            Err(InputError::UnknownFamily(name)) if name == "poisson"
        ));
    }
}
