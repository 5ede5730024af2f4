//! Bayesian kernel machine regression (BKMR).
//!
//! `y_i = h(z_i) + x_i' beta + e_i` with a Gaussian-kernel process prior on
//! the exposure-response function `h`, optional componentwise variable
//! selection over the exposures, and probit augmentation for binary outcomes.
//!
//! The sampler works on the marginal of the kernel hyperparameters with `h`
//! integrated out and redraws `h` whenever those hyperparameters move.

pub mod coefficients;
pub mod diagnostics;
pub mod function;
pub mod kernel;
pub mod latent;
pub mod posterior;
pub mod predict;
pub mod priors;
pub mod random;
pub mod sampler;
pub mod selection;
pub mod types;

pub use diagnostics::{
    autocorrelation, chain_effective_sample_sizes, effective_sample_size,
    render_posterior_summary_table, split_rhat_scalar, summarize_multi_chain_convergence,
};
pub use kernel::{Bandwidth, KernelCache, SquaredDistances, cross_kernel, gaussian_kernel};
pub use posterior::{
    BkmrPosteriorDraw, BkmrPosteriorSamples, BkmrPosteriorSummary, ParameterSummary,
    summarize_posterior,
};
pub use predict::{
    DrawSelection, ExposureResponse, FunctionPrediction, PredictiveSamples, PredictiveScale,
    posterior_predictive_samples, predict_function_mean, predictor_response_univariate,
};
pub use priors::{BandwidthPrior, BkmrPriorConfig, CoefficientPrior};
pub use sampler::{
    combine_posteriors, fit_bkmr_input, fit_bkmr_input_multi_chain,
    fit_bkmr_input_multi_chain_with_abort, fit_bkmr_input_with_abort, fit_bkmr_input_with_config,
};
pub use types::{
    BkmrAcceptanceRates, BkmrConvergenceSummary, BkmrError, BkmrFit, BkmrFitOptions, BkmrModel,
    BkmrMoveCounts, BkmrMultiChainOptions, BkmrMultiChainReport, BkmrProposalTuning, BkmrReport,
    BkmrSamplerConfig, BkmrSamplerDiagnostics, HyperparameterSetting, HyperparameterUpdates,
    RefineJump, SamplerStage, StartingValues,
};
