#![forbid(unsafe_code)]

//! # `kernel_machine_models`
//!
//! Bayesian kernel machine regression for estimating the joint health effect
//! of a mixture of exposures. The exposure-response function is given a
//! Gaussian-kernel process prior and fitted by MCMC, with optional
//! componentwise variable selection and probit support for binary outcomes.
//!
//! ```no_run
//! use faer::Mat;
//! use kernel_machine_models::{BkmrFitOptions, KernelMachineInput, fit_bkmr_input};
//!
//! fn idx_to_f64(idx: usize) -> f64 {
//!     f64::from(u32::try_from(idx).unwrap_or(u32::MAX))
//! }
//!
//! let exposures = Mat::from_fn(50, 3, |i, j| idx_to_f64((i * 7 + j * 3) % 11) / 10.0);
//! let outcome = Mat::from_fn(50, 1, |i, _| exposures[(i, 0)] * exposures[(i, 0)]);
//! let input = KernelMachineInput::new(outcome, exposures);
//! let fit = fit_bkmr_input(
//!     &input,
//!     BkmrFitOptions {
//!         iterations: 500,
//!         burn_in: 250,
//!         variable_selection: true,
//!         ..BkmrFitOptions::default()
//!     },
//! )?;
//! println!("{:?}", fit.posterior.inclusion_probabilities());
//! # Ok::<(), kernel_machine_models::BkmrError>(())
//! ```

pub mod inference;
pub mod input;
pub mod models;
pub mod utils;

pub use inference::{
    AbortSignal, InferenceError, McmcConfig, NeverAbort, NumericalError, ProposalStats,
};
pub use input::{Family, InputError, KernelMachineInput};
pub mod matrix_ops {
    pub use crate::models::matrix_ops::*;
}

pub use models::bkmr::{
    Bandwidth, BandwidthPrior, BkmrAcceptanceRates, BkmrConvergenceSummary, BkmrError, BkmrFit,
    BkmrFitOptions, BkmrModel, BkmrMoveCounts, BkmrMultiChainOptions, BkmrMultiChainReport,
    BkmrPosteriorDraw, BkmrPosteriorSamples, BkmrPosteriorSummary, BkmrPriorConfig,
    BkmrProposalTuning, BkmrReport, BkmrSamplerConfig, BkmrSamplerDiagnostics, CoefficientPrior,
    DrawSelection, ExposureResponse, FunctionPrediction, HyperparameterSetting,
    HyperparameterUpdates, ParameterSummary, PredictiveSamples, PredictiveScale, RefineJump,
    SamplerStage, StartingValues, autocorrelation, chain_effective_sample_sizes, combine_posteriors,
    effective_sample_size, fit_bkmr_input, fit_bkmr_input_multi_chain,
    fit_bkmr_input_multi_chain_with_abort, fit_bkmr_input_with_abort, fit_bkmr_input_with_config,
    posterior_predictive_samples, predict_function_mean, predictor_response_univariate,
    render_posterior_summary_table, summarize_multi_chain_convergence, summarize_posterior,
};
