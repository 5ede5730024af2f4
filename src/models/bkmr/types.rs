//! Core public types for the BKMR module.

use std::fmt;

use faer::Mat;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::inference::{InferenceError, McmcConfig, NumericalError, ProposalStats};
use crate::input::{Family, InputError};

use super::posterior::{BkmrPosteriorSamples, BkmrPosteriorSummary};
use super::priors::BkmrPriorConfig;

/// Named stages of one sampler iteration, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SamplerStage {
    Initialization,
    LatentAugmentation,
    FunctionValues,
    Coefficients,
    VariableSelection,
    Hyperparameters,
}

impl fmt::Display for SamplerStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initialization => "initialization",
            Self::LatentAugmentation => "latent augmentation",
            Self::FunctionValues => "function values",
            Self::Coefficients => "coefficients",
            Self::VariableSelection => "variable selection",
            Self::Hyperparameters => "hyperparameters",
        };
        f.write_str(name)
    }
}

/// Errors returned by BKMR configuration, fitting, and prediction.
#[derive(Debug, Error)]
pub enum BkmrError {
    #[error(transparent)]
    InvalidInput(#[from] InputError),
    #[error(transparent)]
    InvalidSchedule(#[from] InferenceError),
    #[error("configuration value `{field}` is out of range")]
    InvalidConfig { field: &'static str },
    #[error("`r_jump` has {found} entries but there are {expected} exposures")]
    RefineJumpLength { expected: usize, found: usize },
    #[error("starting value `{field}` has length {found}; expected {expected}")]
    StartingValueLength {
        field: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("starting value `{field}` is out of range")]
    InvalidStartingValue { field: &'static str },
    #[error("numerical failure at iteration {iteration} during {stage}: {source}")]
    Numerical {
        iteration: usize,
        stage: SamplerStage,
        #[source]
        source: NumericalError,
    },
    #[error("posterior draws are required")]
    EmptyPosterior,
    #[error("draw index {index} is out of range for {draws} retained draws")]
    DrawIndexOutOfRange { index: usize, draws: usize },
    #[error("new exposure matrix has {found} columns; the fit used {expected}")]
    ExposureDimensionMismatch { expected: usize, found: usize },
    #[error("covariate vector has length {found}; the fit used {expected} covariates")]
    CovariateLengthMismatch { expected: usize, found: usize },
    #[error("exposure index {index} is out of range for {exposures} exposures")]
    InvalidExposureIndex { index: usize, exposures: usize },
    #[error("grid size must be positive")]
    InvalidGridSize,
    #[error("quantile must lie in [0, 1]; found {0}")]
    InvalidQuantile(f64),
    #[error("prediction failed for retained draw {draw}: {source}")]
    Prediction {
        draw: usize,
        #[source]
        source: NumericalError,
    },
    #[error("multi-chain workflows require at least {min} chains; found {found}")]
    InvalidChainCount { min: usize, found: usize },
    #[error("multi-chain seed stride must be positive")]
    InvalidSeedStride,
    #[error("each chain must retain at least {minimum} draws; minimum found {found}")]
    InsufficientChainDraws { minimum: usize, found: usize },
    #[error("posterior dimensions differ across chains")]
    InconsistentPosteriorDimensions,
    #[error("sampler thread for chain {0} panicked")]
    ChainPanicked(usize),
}

/// Whether a variance hyperparameter is sampled or held fixed.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum HyperparameterSetting {
    #[default]
    Estimate,
    Fixed(f64),
}

impl HyperparameterSetting {
    #[must_use]
    pub const fn is_estimated(self) -> bool {
        matches!(self, Self::Estimate)
    }

    #[must_use]
    pub fn is_valid(self) -> bool {
        match self {
            Self::Estimate => true,
            Self::Fixed(value) => value > 0.0 && value.is_finite(),
        }
    }
}

/// Which variance hyperparameters are updated during sampling.
///
/// `lambda` is the ratio of the function variance to the noise variance.
/// For the binary family the noise variance is always fixed at 1 and the
/// `noise_variance` setting is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct HyperparameterUpdates {
    /// Metropolis-Hastings update of `lambda` against its gamma prior.
    pub lambda: HyperparameterSetting,
    /// Conjugate inverse-gamma draw of the noise variance.
    pub noise_variance: HyperparameterSetting,
}

impl HyperparameterUpdates {
    /// Name of the first fixed value that is not positive and finite, if any.
    #[must_use]
    pub fn invalid_field(self) -> Option<&'static str> {
        if !self.lambda.is_valid() {
            Some("hyperparameters.lambda")
        } else if !self.noise_variance.is_valid() {
            Some("hyperparameters.noise_variance")
        } else {
            None
        }
    }
}

/// Sampler schedule and model switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BkmrFitOptions {
    /// Total MCMC iterations.
    pub iterations: usize,
    /// Iterations discarded before retention.
    pub burn_in: usize,
    /// Keep every `thin`-th iteration after burn-in.
    pub thin: usize,
    /// RNG seed for reproducibility.
    pub seed: u64,
    pub family: Family,
    /// Componentwise variable selection on the exposures.
    pub variable_selection: bool,
    /// Adapt proposal scales during burn-in.
    pub adapt_during_burn_in: bool,
}

impl Default for BkmrFitOptions {
    fn default() -> Self {
        Self {
            iterations: 1_000,
            burn_in: 0,
            thin: 1,
            seed: 42,
            family: Family::Gaussian,
            variable_selection: false,
            adapt_during_burn_in: false,
        }
    }
}

impl BkmrFitOptions {
    #[must_use]
    pub const fn schedule(self) -> McmcConfig {
        McmcConfig {
            iterations: self.iterations,
            burn_in: self.burn_in,
            thin: self.thin,
            seed: self.seed,
        }
    }

    /// # Errors
    ///
    /// Returns `BkmrError` if the schedule is internally inconsistent.
    pub fn validate(self) -> Result<(), BkmrError> {
        self.schedule().validate()?;
        Ok(())
    }

    /// Number of retained draws implied by `(iterations, burn_in, thin)`.
    #[must_use]
    pub const fn retained_draws(self) -> usize {
        self.schedule().retained_draws()
    }
}

/// Proposal standard deviation for refining an included bandwidth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RefineJump {
    /// Same standard deviation for every exposure.
    Common(f64),
    /// One standard deviation per exposure.
    PerExposure(Vec<f64>),
}

impl RefineJump {
    /// Expand to one value per exposure.
    ///
    /// # Errors
    ///
    /// Returns `BkmrError::RefineJumpLength` when a per-exposure vector has the wrong length.
    pub fn resolve(&self, exposures: usize) -> Result<Vec<f64>, BkmrError> {
        match self {
            Self::Common(value) => Ok(vec![*value; exposures]),
            Self::PerExposure(values) if values.len() == exposures => Ok(values.clone()),
            Self::PerExposure(values) => Err(BkmrError::RefineJumpLength {
                expected: exposures,
                found: values.len(),
            }),
        }
    }

    fn is_valid(&self) -> bool {
        match self {
            Self::Common(value) => *value > 0.0 && value.is_finite(),
            Self::PerExposure(values) => values
                .iter()
                .all(|value| *value > 0.0 && value.is_finite()),
        }
    }
}

/// Proposal scales for the Metropolis-Hastings blocks.
#[derive(Debug, Clone, PartialEq)]
pub struct BkmrProposalTuning {
    /// Move 1: gamma proposal sd when refining an included bandwidth.
    pub r_jump: RefineJump,
    /// Move 2: gamma proposal sd for the bandwidth drawn when an exposure is switched in.
    pub r_jump2: f64,
    /// Move 2: gamma proposal mean for the bandwidth drawn when an exposure is switched in.
    pub r_muprop: f64,
    /// Gamma proposal sd for `lambda`.
    pub lambda_jump: f64,
    /// Probability that an included exposure attempts a toggle rather than a refinement.
    pub toggle_probability: f64,
    /// Minimum allowed proposal scale after adaptation.
    pub min_draw_scale: f64,
    /// Adapt every `adaptation_interval` iterations during burn-in.
    pub adaptation_interval: usize,
    pub acceptance_target_low: f64,
    pub acceptance_target_high: f64,
    pub scale_decrease_factor: f64,
    pub scale_increase_factor: f64,
}

impl Default for BkmrProposalTuning {
    fn default() -> Self {
        Self {
            r_jump: RefineJump::Common(0.1),
            r_jump2: 2.0,
            r_muprop: 1.0,
            lambda_jump: 10.0,
            toggle_probability: 0.5,
            min_draw_scale: 1.0e-3,
            adaptation_interval: 50,
            acceptance_target_low: 0.2,
            acceptance_target_high: 0.45,
            scale_decrease_factor: 0.9,
            scale_increase_factor: 1.1,
        }
    }
}

impl BkmrProposalTuning {
    /// Name of the first proposal setting that is out of range, if any.
    #[must_use]
    pub fn invalid_field(&self) -> Option<&'static str> {
        let checks = [
            ("proposal_tuning.r_jump", self.r_jump.is_valid()),
            ("proposal_tuning.r_jump2", self.r_jump2 > 0.0),
            ("proposal_tuning.r_muprop", self.r_muprop > 0.0),
            ("proposal_tuning.lambda_jump", self.lambda_jump > 0.0),
            (
                "proposal_tuning.toggle_probability",
                self.toggle_probability > 0.0 && self.toggle_probability <= 1.0,
            ),
            ("proposal_tuning.min_draw_scale", self.min_draw_scale > 0.0),
            ("proposal_tuning.adaptation_interval", self.adaptation_interval > 0),
            (
                "proposal_tuning.acceptance_target_low",
                self.acceptance_target_low >= 0.0
                    && self.acceptance_target_low < self.acceptance_target_high,
            ),
            ("proposal_tuning.acceptance_target_high", self.acceptance_target_high <= 1.0),
            ("proposal_tuning.scale_decrease_factor", self.scale_decrease_factor > 0.0),
            ("proposal_tuning.scale_increase_factor", self.scale_increase_factor > 0.0),
        ];
        checks
            .into_iter()
            .find_map(|(field, valid)| (!valid).then_some(field))
    }
}

/// Optional user-supplied initial state. Missing entries fall back to defaults.
///
/// A bandwidth starting value of `0` starts that exposure excluded, which is
/// only allowed when variable selection is enabled.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StartingValues {
    pub bandwidths: Option<Vec<f64>>,
    pub coefficients: Option<Vec<f64>>,
    pub lambda: Option<f64>,
    pub noise_variance: Option<f64>,
    pub function_values: Option<Vec<f64>>,
}

/// Full sampler configuration for BKMR fitting.
#[derive(Debug, Clone, PartialEq)]
pub struct BkmrSamplerConfig {
    pub fit_options: BkmrFitOptions,
    pub prior_config: BkmrPriorConfig,
    pub proposal_tuning: BkmrProposalTuning,
    pub hyperparameters: HyperparameterUpdates,
    pub starting_values: StartingValues,
    /// Emit a debug log line every `progress_interval` iterations; `0` disables it.
    pub progress_interval: usize,
}

impl Default for BkmrSamplerConfig {
    fn default() -> Self {
        Self {
            fit_options: BkmrFitOptions::default(),
            prior_config: BkmrPriorConfig::default(),
            proposal_tuning: BkmrProposalTuning::default(),
            hyperparameters: HyperparameterUpdates::default(),
            starting_values: StartingValues::default(),
            progress_interval: 100,
        }
    }
}

impl BkmrSamplerConfig {
    /// # Errors
    ///
    /// Returns `BkmrError` if any configuration block is invalid.
    pub fn validate(&self) -> Result<(), BkmrError> {
        self.fit_options.validate()?;
        let invalid = self
            .prior_config
            .invalid_field()
            .or_else(|| self.proposal_tuning.invalid_field())
            .or_else(|| self.hyperparameters.invalid_field());
        match invalid {
            Some(field) => Err(BkmrError::InvalidConfig { field }),
            None => Ok(()),
        }
    }
}

/// Configuration for running multiple independent MCMC chains.
#[derive(Debug, Clone, Copy)]
pub struct BkmrMultiChainOptions {
    /// Number of independent chains to run.
    pub chains: usize,
    /// Seed increment between adjacent chains.
    ///
    /// Chain `i` uses `base_seed + i * seed_stride` with wrapping arithmetic.
    pub seed_stride: u64,
}

impl Default for BkmrMultiChainOptions {
    fn default() -> Self {
        Self {
            chains: 4,
            seed_stride: 10_000,
        }
    }
}

impl BkmrMultiChainOptions {
    /// # Errors
    ///
    /// Returns `BkmrError` if multi-chain options are invalid.
    pub const fn validate(self) -> Result<(), BkmrError> {
        if self.chains < 2 {
            return Err(BkmrError::InvalidChainCount {
                min: 2,
                found: self.chains,
            });
        }
        if self.seed_stride == 0 {
            return Err(BkmrError::InvalidSeedStride);
        }
        Ok(())
    }

    /// Seed used by chain `chain_index`.
    #[must_use]
    pub fn chain_seed(self, base_seed: u64, chain_index: usize) -> u64 {
        let index_u64 = u64::try_from(chain_index).unwrap_or(u64::MAX);
        base_seed.wrapping_add(index_u64.saturating_mul(self.seed_stride))
    }
}

/// Fitted BKMR model metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BkmrModel {
    pub n_observations: usize,
    pub n_exposures: usize,
    pub n_covariates: usize,
    pub family: Family,
    pub variable_selection: bool,
}

/// Attempted and accepted proposals per move type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BkmrMoveCounts {
    /// Move 1: refinement of an included bandwidth.
    pub refine: ProposalStats,
    /// Move 2: joint inclusion toggle and bandwidth proposal.
    pub toggle: ProposalStats,
    pub lambda: ProposalStats,
}

impl BkmrMoveCounts {
    #[must_use]
    pub fn rates(self) -> BkmrAcceptanceRates {
        BkmrAcceptanceRates {
            refine: self.refine.acceptance_rate(),
            toggle: self.toggle.acceptance_rate(),
            lambda: self.lambda.acceptance_rate(),
        }
    }
}

/// Acceptance rates per move type; `0` for a move that was never attempted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BkmrAcceptanceRates {
    pub refine: f64,
    pub toggle: f64,
    pub lambda: f64,
}

/// Sampler diagnostics summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BkmrSamplerDiagnostics {
    pub iterations_completed: usize,
    pub retained_draws: usize,
    /// The run stopped early on an abort request.
    pub aborted: bool,
    pub move_counts: BkmrMoveCounts,
    pub acceptance_rates: BkmrAcceptanceRates,
    /// Largest diagonal jitter used to factorize `I + lambda K` during the run.
    pub max_jitter: f64,
    /// Refinement proposal sd per exposure at the end of the run.
    pub final_r_jump: Vec<f64>,
    pub final_lambda_jump: f64,
}

/// Output report from BKMR fitting.
#[derive(Debug, Clone, Default)]
pub struct BkmrReport {
    pub diagnostics: BkmrSamplerDiagnostics,
    pub posterior_summary: Option<BkmrPosteriorSummary>,
}

/// Result of a single-chain fit: metadata, report, and the draw log.
///
/// The training exposures are kept so that predictions at new exposure
/// profiles can rebuild the cross kernel.
#[derive(Debug, Clone)]
pub struct BkmrFit {
    pub model: BkmrModel,
    pub report: BkmrReport,
    pub posterior: BkmrPosteriorSamples,
    pub exposures: Mat<f64>,
}

/// Multi-chain split-R-hat diagnostics summary.
#[derive(Debug, Clone, Default)]
pub struct BkmrConvergenceSummary {
    /// Number of chains included.
    pub chain_count: usize,
    /// Draws per chain used after truncation to equal even length.
    pub draws_per_chain_used: usize,
    pub coefficient_split_rhat: Vec<f64>,
    /// Split-R-hat of each bandwidth, treating excluded draws as zero.
    pub bandwidth_split_rhat: Vec<f64>,
    pub lambda_split_rhat: Option<f64>,
    pub noise_variance_split_rhat: Option<f64>,
    /// Maximum split-R-hat across all tracked scalar parameters.
    pub max_split_rhat: Option<f64>,
}

/// Output report for multi-chain BKMR fitting.
#[derive(Debug, Clone, Default)]
pub struct BkmrMultiChainReport {
    /// Chain-specific reports in execution order.
    pub chain_reports: Vec<BkmrReport>,
    /// Posterior summary from pooled draws across all chains.
    pub pooled_posterior_summary: Option<BkmrPosteriorSummary>,
    pub convergence: BkmrConvergenceSummary,
}
