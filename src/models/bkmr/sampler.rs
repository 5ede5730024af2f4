//! Sampler entrypoints for BKMR.
//!
//! One chain owns a single mutable `ChainState`. Every iteration runs, in
//! order:
//!
//! 1. latent augmentation (binary outcomes only),
//! 2. draw `h` given `y* - X beta`,
//! 3. draw `beta` given `y* - h`,
//! 4. variable-selection sweep over all exposures,
//! 5. `lambda` / noise-variance updates, then a fresh `h` if any of the
//!    collapsed moves changed the kernel or its scale,
//! 6. snapshot when the iteration is retained.

use faer::Mat;
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::inference::{AbortSignal, McmcConfig, NeverAbort, NumericalError};
use crate::input::{Family, KernelMachineInput};
use crate::models::matrix_ops::{column_to_vec, linear_predictor};
use crate::utils::usize_to_f64;

use super::coefficients::{least_squares_start, sample_coefficients};
use super::diagnostics::summarize_multi_chain_convergence;
use super::function::{MarginalCovariance, noise_variance_posterior, sample_function_values};
use super::kernel::{Bandwidth, KernelCache, SquaredDistances};
use super::latent::{augment_latent_outcomes, initial_latent_outcomes};
use super::posterior::{BkmrPosteriorDraw, BkmrPosteriorSamples, summarize_posterior};
use super::priors::{BkmrPriorConfig, log_gamma_proposal_density};
use super::random::{sample_gamma_mean_sd, sample_inverse_gamma, should_accept};
use super::selection::{
    SelectionProblem, SelectionProposals, SelectionState, count_included, sweep_bandwidths,
};
use super::types::{
    BkmrConvergenceSummary, BkmrError, BkmrFit, BkmrFitOptions, BkmrModel, BkmrMoveCounts,
    BkmrMultiChainOptions, BkmrMultiChainReport, BkmrProposalTuning, BkmrReport, BkmrSamplerConfig,
    BkmrSamplerDiagnostics, HyperparameterSetting, SamplerStage, StartingValues,
};

const DEFAULT_BANDWIDTH: f64 = 1.0;
const DEFAULT_LAMBDA: f64 = 10.0;
const MIN_START_NOISE_VARIANCE: f64 = 1.0e-6;

/// Data shared read-only by every chain of a fit.
struct SamplerContext {
    outcome: Vec<f64>,
    covariates: Mat<f64>,
    distances: SquaredDistances,
    family: Family,
    variable_selection: bool,
    prior: BkmrPriorConfig,
    lambda_setting: HyperparameterSetting,
    noise_setting: HyperparameterSetting,
    r_jump: Vec<f64>,
}

impl SamplerContext {
    fn n_observations(&self) -> usize {
        self.outcome.len()
    }

    fn n_exposures(&self) -> usize {
        self.distances.dimensions()
    }
}

#[derive(Debug, Clone)]
struct ChainState {
    bandwidths: Vec<Bandwidth>,
    kernel: KernelCache,
    marginal: MarginalCovariance,
    lambda: f64,
    noise_variance: f64,
    function_values: Vec<f64>,
    coefficients: Vec<f64>,
    /// `y*` for binary outcomes, `y` itself for continuous outcomes.
    latent: Vec<f64>,
    /// `h` was drawn under hyperparameters that have since changed.
    function_stale: bool,
}

#[derive(Debug, Clone)]
struct ProposalScales {
    r_jump: Vec<f64>,
    lambda_jump: f64,
}

struct SamplingResult {
    samples: BkmrPosteriorSamples,
    diagnostics: BkmrSamplerDiagnostics,
}

/// Fit BKMR with default priors and proposal tuning.
///
/// # Errors
///
/// Returns `BkmrError` if inputs/options are invalid or the sampler hits a
/// numerical failure.
pub fn fit_bkmr_input(
    input: &KernelMachineInput,
    options: BkmrFitOptions,
) -> Result<BkmrFit, BkmrError> {
    let config = BkmrSamplerConfig {
        fit_options: options,
        ..BkmrSamplerConfig::default()
    };
    fit_bkmr_input_with_config(input, &config)
}

/// Fit BKMR with explicit prior, proposal, and hyperparameter configuration.
///
/// # Errors
///
/// Returns `BkmrError` if inputs/options are invalid or the sampler hits a
/// numerical failure.
pub fn fit_bkmr_input_with_config(
    input: &KernelMachineInput,
    config: &BkmrSamplerConfig,
) -> Result<BkmrFit, BkmrError> {
    fit_bkmr_input_with_abort(input, config, &NeverAbort)
}

/// Fit BKMR, polling `abort` between iterations.
///
/// An aborted run is not an error: the returned fit holds every draw retained
/// up to the last completed iteration and `diagnostics.aborted` is set.
///
/// # Errors
///
/// Returns `BkmrError` if inputs/options are invalid or the sampler hits a
/// numerical failure.
pub fn fit_bkmr_input_with_abort<A>(
    input: &KernelMachineInput,
    config: &BkmrSamplerConfig,
    abort: &A,
) -> Result<BkmrFit, BkmrError>
where
    A: AbortSignal + ?Sized,
{
    let context = prepare_context(input, config)?;
    let sampling = run_mcmc_chain(&context, config, config.fit_options.seed, abort)?;
    Ok(assemble_fit(input, config, sampling))
}

/// Fit BKMR using multiple independent chains on scoped threads.
///
/// Chain `i` is seeded with `seed + i * seed_stride`. Every chain gets its own
/// state and RNG; only the prepared data is shared.
///
/// # Errors
///
/// Returns `BkmrError` if input/options are invalid, any chain fails, or the
/// chains retain too few draws for split-R-hat.
pub fn fit_bkmr_input_multi_chain(
    input: &KernelMachineInput,
    config: &BkmrSamplerConfig,
    multi_chain: BkmrMultiChainOptions,
) -> Result<(BkmrMultiChainReport, Vec<BkmrFit>), BkmrError> {
    fit_bkmr_input_multi_chain_with_abort(input, config, multi_chain, &NeverAbort)
}

/// Multi-chain fit where every chain polls the same `abort` signal between
/// iterations.
///
/// Aborted chains keep the draws retained so far. If they are too short for
/// split-R-hat the convergence summary only carries the chain count.
///
/// # Errors
///
/// Returns `BkmrError` if input/options are invalid, any chain fails, or the
/// chains of an uninterrupted run retain too few draws for split-R-hat.
pub fn fit_bkmr_input_multi_chain_with_abort<A>(
    input: &KernelMachineInput,
    config: &BkmrSamplerConfig,
    multi_chain: BkmrMultiChainOptions,
    abort: &A,
) -> Result<(BkmrMultiChainReport, Vec<BkmrFit>), BkmrError>
where
    A: AbortSignal + ?Sized,
{
    multi_chain.validate()?;
    let context = prepare_context(input, config)?;
    let context_ref = &context;

    let mut chain_results = (0..multi_chain.chains)
        .map(|_| None)
        .collect::<Vec<Option<Result<SamplingResult, BkmrError>>>>();

    std::thread::scope(|scope| -> Result<(), BkmrError> {
        let mut handles = Vec::with_capacity(multi_chain.chains);
        for chain_index in 0..multi_chain.chains {
            let seed = multi_chain.chain_seed(config.fit_options.seed, chain_index);
            handles.push((
                chain_index,
                scope.spawn(move || run_mcmc_chain(context_ref, config, seed, abort)),
            ));
        }

        for (chain_index, handle) in handles {
            let result = handle
                .join()
                .map_err(|_| BkmrError::ChainPanicked(chain_index))?;
            chain_results[chain_index] = Some(result);
        }

        Ok(())
    })?;

    let mut fits = Vec::with_capacity(multi_chain.chains);
    for (chain_index, chain_result) in chain_results.iter_mut().enumerate() {
        let sampling = chain_result
            .take()
            .ok_or(BkmrError::ChainPanicked(chain_index))??;
        fits.push(assemble_fit(input, config, sampling));
    }

    let chain_posteriors: Vec<BkmrPosteriorSamples> =
        fits.iter().map(|fit| fit.posterior.clone()).collect();
    let pooled = combine_posteriors(&chain_posteriors);
    let pooled_posterior_summary = if pooled.is_empty() {
        None
    } else {
        Some(summarize_posterior(&pooled))
    };
    let aborted = fits.iter().any(|fit| fit.report.diagnostics.aborted);
    let convergence = match summarize_multi_chain_convergence(&chain_posteriors) {
        Ok(summary) => summary,
        Err(BkmrError::InsufficientChainDraws { found, .. }) if aborted => {
            log::warn!("aborted chains retained {found} comparable draws; skipping split-R-hat");
            BkmrConvergenceSummary {
                chain_count: multi_chain.chains,
                ..BkmrConvergenceSummary::default()
            }
        }
        Err(err) => return Err(err),
    };
    if let Some(max_rhat) = convergence.max_split_rhat {
        log::info!(
            "{} chains finished; max split-R-hat {max_rhat:.3}",
            multi_chain.chains
        );
    }

    Ok((
        BkmrMultiChainReport {
            chain_reports: fits.iter().map(|fit| fit.report.clone()).collect(),
            pooled_posterior_summary,
            convergence,
        },
        fits,
    ))
}

/// Concatenate the draw logs of several chains.
#[must_use]
pub fn combine_posteriors(chains: &[BkmrPosteriorSamples]) -> BkmrPosteriorSamples {
    let total_draws = chains.iter().map(BkmrPosteriorSamples::len).sum();
    let mut draws = Vec::with_capacity(total_draws);
    for chain in chains {
        draws.extend(chain.draws.iter().cloned());
    }
    BkmrPosteriorSamples { draws }
}

fn prepare_context(
    input: &KernelMachineInput,
    config: &BkmrSamplerConfig,
) -> Result<SamplerContext, BkmrError> {
    config.validate()?;
    let options = config.fit_options;
    input.validate_for_family(options.family)?;

    let n_exposures = input.n_exposures();
    let r_jump = config.proposal_tuning.r_jump.resolve(n_exposures)?;
    validate_starting_values(&config.starting_values, input, options.variable_selection)?;

    let noise_setting = if options.family.is_binary() {
        HyperparameterSetting::Fixed(1.0)
    } else {
        config.hyperparameters.noise_variance
    };

    Ok(SamplerContext {
        outcome: column_to_vec(&input.outcome),
        covariates: input.covariate_matrix(),
        distances: SquaredDistances::from_exposures(&input.exposures),
        family: options.family,
        variable_selection: options.variable_selection,
        prior: config.prior_config,
        lambda_setting: config.hyperparameters.lambda,
        noise_setting,
        r_jump,
    })
}

fn validate_starting_values(
    starting: &StartingValues,
    input: &KernelMachineInput,
    variable_selection: bool,
) -> Result<(), BkmrError> {
    if let Some(bandwidths) = &starting.bandwidths {
        check_length("bandwidths", bandwidths.len(), input.n_exposures())?;
        let allowed = |value: f64| {
            value.is_finite() && (value > 0.0 || (value == 0.0 && variable_selection))
        };
        if !bandwidths.iter().all(|value| allowed(*value)) {
            return Err(BkmrError::InvalidStartingValue {
                field: "bandwidths",
            });
        }
    }
    if let Some(coefficients) = &starting.coefficients {
        check_length("coefficients", coefficients.len(), input.n_covariates())?;
        if !coefficients.iter().all(|value| value.is_finite()) {
            return Err(BkmrError::InvalidStartingValue {
                field: "coefficients",
            });
        }
    }
    if let Some(function_values) = &starting.function_values {
        check_length(
            "function_values",
            function_values.len(),
            input.n_observations(),
        )?;
        if !function_values.iter().all(|value| value.is_finite()) {
            return Err(BkmrError::InvalidStartingValue {
                field: "function_values",
            });
        }
    }
    for (field, value) in [
        ("lambda", starting.lambda),
        ("noise_variance", starting.noise_variance),
    ] {
        if let Some(value) = value
            && !(value > 0.0 && value.is_finite())
        {
            return Err(BkmrError::InvalidStartingValue { field });
        }
    }
    Ok(())
}

const fn check_length(
    field: &'static str,
    found: usize,
    expected: usize,
) -> Result<(), BkmrError> {
    if found == expected {
        Ok(())
    } else {
        Err(BkmrError::StartingValueLength {
            field,
            expected,
            found,
        })
    }
}

fn initialize_state(
    context: &SamplerContext,
    starting: &StartingValues,
) -> Result<ChainState, NumericalError> {
    let n = context.n_observations();
    let bandwidths: Vec<Bandwidth> = starting.bandwidths.as_ref().map_or_else(
        || vec![Bandwidth::Included(DEFAULT_BANDWIDTH); context.n_exposures()],
        |values| {
            values
                .iter()
                .map(|value| {
                    if *value == 0.0 {
                        Bandwidth::Excluded
                    } else {
                        Bandwidth::included(*value)
                    }
                })
                .collect()
        },
    );

    let lambda = match context.lambda_setting {
        HyperparameterSetting::Fixed(value) => value,
        HyperparameterSetting::Estimate => starting.lambda.unwrap_or(DEFAULT_LAMBDA),
    };

    let coefficients = match &starting.coefficients {
        Some(values) => values.clone(),
        None if context.family.is_binary() => vec![0.0; context.covariates.ncols()],
        None => least_squares_start(&context.covariates, &context.outcome)?,
    };

    let noise_variance = match context.noise_setting {
        HyperparameterSetting::Fixed(value) => value,
        HyperparameterSetting::Estimate => starting
            .noise_variance
            .unwrap_or_else(|| residual_variance(context, &coefficients)),
    };

    let latent = if context.family.is_binary() {
        initial_latent_outcomes(&context.outcome)
    } else {
        context.outcome.clone()
    };

    let kernel = KernelCache::build(&context.distances, &bandwidths);
    let marginal = MarginalCovariance::factorize(kernel.kernel(), lambda)?;

    Ok(ChainState {
        bandwidths,
        kernel,
        marginal,
        lambda,
        noise_variance,
        function_values: starting
            .function_values
            .clone()
            .unwrap_or_else(|| vec![0.0; n]),
        coefficients,
        latent,
        function_stale: false,
    })
}

fn residual_variance(context: &SamplerContext, coefficients: &[f64]) -> f64 {
    let n = context.n_observations();
    if n < 2 {
        return 1.0;
    }
    let fitted = linear_predictor(&context.covariates, coefficients);
    let residuals: Vec<f64> = context
        .outcome
        .iter()
        .zip(&fitted)
        .map(|(value, fit)| value - fit)
        .collect();
    let mean = residuals.iter().sum::<f64>() / usize_to_f64(n);
    let variance = residuals
        .iter()
        .map(|value| (value - mean) * (value - mean))
        .sum::<f64>()
        / usize_to_f64(n - 1);
    if variance.is_finite() {
        variance.max(MIN_START_NOISE_VARIANCE)
    } else {
        1.0
    }
}

fn run_mcmc_chain<A>(
    context: &SamplerContext,
    config: &BkmrSamplerConfig,
    seed: u64,
    abort: &A,
) -> Result<SamplingResult, BkmrError>
where
    A: AbortSignal + ?Sized,
{
    let options = config.fit_options;
    let schedule = McmcConfig {
        seed,
        ..options.schedule()
    };
    let tuning = &config.proposal_tuning;
    let mut rng = StdRng::seed_from_u64(seed);
    let mut state = initialize_state(context, &config.starting_values).map_err(|source| {
        BkmrError::Numerical {
            iteration: 0,
            stage: SamplerStage::Initialization,
            source,
        }
    })?;
    let mut scales = ProposalScales {
        r_jump: context.r_jump.clone(),
        lambda_jump: tuning.lambda_jump,
    };
    let mut counts = BkmrMoveCounts::default();
    let mut draws = Vec::with_capacity(schedule.retained_draws());
    let mut max_jitter = state.marginal.jitter();
    let mut jitter_reported = false;
    let mut iterations_completed = 0;
    let mut aborted = false;

    log::info!(
        "starting BKMR chain: n={}, exposures={}, covariates={}, family={}, selection={}, iterations={}, seed={seed}",
        context.n_observations(),
        context.n_exposures(),
        context.covariates.ncols(),
        context.family,
        context.variable_selection,
        schedule.iterations,
    );

    for iteration in 0..schedule.iterations {
        if abort.should_abort() {
            log::warn!(
                "BKMR chain aborted after {iteration} of {} iterations",
                schedule.iterations
            );
            aborted = true;
            break;
        }

        let proposals = SelectionProposals {
            r_jump: scales.r_jump.clone(),
            r_jump2: tuning.r_jump2,
            r_muprop: tuning.r_muprop,
            toggle_probability: tuning.toggle_probability,
            variable_selection: context.variable_selection,
        };
        run_iteration(
            context,
            &mut rng,
            &mut state,
            &proposals,
            scales.lambda_jump,
            &mut counts,
            iteration,
        )?;

        let jitter = state.marginal.jitter();
        if jitter > 0.0 && !jitter_reported {
            log::warn!("I + lambda K needed diagonal jitter {jitter:.3e} at iteration {iteration}");
            jitter_reported = true;
        }
        max_jitter = max_jitter.max(jitter);

        if options.adapt_during_burn_in
            && iteration < schedule.burn_in
            && (iteration + 1).is_multiple_of(tuning.adaptation_interval)
        {
            adapt_proposal_scales(&mut scales, counts, tuning);
        }

        if schedule.is_retained(iteration) {
            draws.push(snapshot(context, &state, iteration));
        }
        iterations_completed = iteration + 1;

        if config.progress_interval > 0
            && iterations_completed.is_multiple_of(config.progress_interval)
        {
            let rates = counts.rates();
            log::debug!(
                "iteration {iterations_completed}/{}: included={}, lambda={:.4}, sigsq={:.4}, refine={:.3}, toggle={:.3}",
                schedule.iterations,
                count_included(&state.bandwidths),
                state.lambda,
                state.noise_variance,
                rates.refine,
                rates.toggle,
            );
        }
    }

    let rates = counts.rates();
    log::info!(
        "BKMR chain finished: {iterations_completed} iterations, {} draws retained, acceptance refine={:.3} toggle={:.3} lambda={:.3}",
        draws.len(),
        rates.refine,
        rates.toggle,
        rates.lambda,
    );

    Ok(SamplingResult {
        diagnostics: BkmrSamplerDiagnostics {
            iterations_completed,
            retained_draws: draws.len(),
            aborted,
            move_counts: counts,
            acceptance_rates: rates,
            max_jitter,
            final_r_jump: scales.r_jump,
            final_lambda_jump: scales.lambda_jump,
        },
        samples: BkmrPosteriorSamples { draws },
    })
}

fn numerical_at(iteration: usize, stage: SamplerStage) -> impl Fn(NumericalError) -> BkmrError {
    move |source| BkmrError::Numerical {
        iteration,
        stage,
        source,
    }
}

fn run_iteration(
    context: &SamplerContext,
    rng: &mut StdRng,
    state: &mut ChainState,
    proposals: &SelectionProposals,
    lambda_jump: f64,
    counts: &mut BkmrMoveCounts,
    iteration: usize,
) -> Result<(), BkmrError> {
    let fixed_effects = linear_predictor(&context.covariates, &state.coefficients);
    if context.family.is_binary() {
        augment_latent_outcomes(
            rng,
            &context.outcome,
            &state.function_values,
            &fixed_effects,
            &mut state.latent,
        )
        .map_err(numerical_at(iteration, SamplerStage::LatentAugmentation))?;
    }

    let residual = difference(&state.latent, &fixed_effects);
    state.function_values = sample_function_values(
        rng,
        state.kernel.kernel(),
        &state.marginal,
        &residual,
        state.noise_variance,
    )
    .map_err(numerical_at(iteration, SamplerStage::FunctionValues))?;
    state.function_stale = false;

    let partial_residual = difference(&state.latent, &state.function_values);
    state.coefficients = sample_coefficients(
        rng,
        &context.covariates,
        &partial_residual,
        state.noise_variance,
        context.prior.coefficients,
    )
    .map_err(numerical_at(iteration, SamplerStage::Coefficients))?;

    let fixed_effects = linear_predictor(&context.covariates, &state.coefficients);
    let residual = difference(&state.latent, &fixed_effects);
    update_bandwidths(context, rng, state, proposals, &residual, counts, iteration)?;
    update_hyperparameters(context, rng, state, &residual, lambda_jump, counts)
        .map_err(numerical_at(iteration, SamplerStage::Hyperparameters))?;

    if state.function_stale {
        state.function_values = sample_function_values(
            rng,
            state.kernel.kernel(),
            &state.marginal,
            &residual,
            state.noise_variance,
        )
        .map_err(numerical_at(iteration, SamplerStage::Hyperparameters))?;
        state.function_stale = false;
    }
    Ok(())
}

fn update_bandwidths(
    context: &SamplerContext,
    rng: &mut StdRng,
    state: &mut ChainState,
    proposals: &SelectionProposals,
    residual: &[f64],
    counts: &mut BkmrMoveCounts,
    iteration: usize,
) -> Result<(), BkmrError> {
    let problem = SelectionProblem {
        distances: &context.distances,
        residual,
        lambda: state.lambda,
        noise_variance: state.noise_variance,
        prior: context.prior,
        proposals,
    };
    let outcome = sweep_bandwidths(
        rng,
        &problem,
        &mut SelectionState {
            bandwidths: &mut state.bandwidths,
            kernel: &mut state.kernel,
            marginal: &mut state.marginal,
        },
    );
    counts.refine.merge(outcome.refine);
    counts.toggle.merge(outcome.toggle);

    if outcome.changed {
        // Rebuild from scratch so incremental exponent updates cannot drift.
        state.kernel = KernelCache::build(&context.distances, &state.bandwidths);
        state.marginal = MarginalCovariance::factorize(state.kernel.kernel(), state.lambda)
            .map_err(numerical_at(iteration, SamplerStage::VariableSelection))?;
        state.function_stale = true;
    }
    Ok(())
}

fn update_hyperparameters(
    context: &SamplerContext,
    rng: &mut StdRng,
    state: &mut ChainState,
    residual: &[f64],
    lambda_jump: f64,
    counts: &mut BkmrMoveCounts,
) -> Result<(), NumericalError> {
    if context.lambda_setting.is_estimated() {
        let accepted = update_lambda(context, rng, state, residual, lambda_jump);
        counts.lambda.record(accepted);
        state.function_stale |= accepted;
    }

    if context.noise_setting.is_estimated() {
        let (shape, scale) = noise_variance_posterior(
            &state.marginal,
            residual,
            context.prior.noise_shape,
            context.prior.noise_scale,
        );
        let draw = sample_inverse_gamma(rng, shape, scale);
        if !(draw > 0.0 && draw.is_finite()) {
            return Err(NumericalError::NonFinite {
                quantity: "noise variance",
            });
        }
        state.noise_variance = draw;
        state.function_stale = true;
    }
    Ok(())
}

fn update_lambda(
    context: &SamplerContext,
    rng: &mut StdRng,
    state: &mut ChainState,
    residual: &[f64],
    lambda_jump: f64,
) -> bool {
    let current = state.lambda;
    let proposed = sample_gamma_mean_sd(rng, current, lambda_jump);
    if !(proposed > 0.0 && proposed.is_finite()) {
        return false;
    }
    let Ok(candidate) = MarginalCovariance::factorize(state.kernel.kernel(), proposed) else {
        return false;
    };

    let log_acceptance = candidate.log_likelihood(residual, state.noise_variance)
        - state.marginal.log_likelihood(residual, state.noise_variance)
        + context.prior.log_lambda_prior(proposed)
        - context.prior.log_lambda_prior(current)
        + log_gamma_proposal_density(current, proposed, lambda_jump)
        - log_gamma_proposal_density(proposed, current, lambda_jump);

    if should_accept(log_acceptance, rng) {
        state.lambda = proposed;
        state.marginal = candidate;
        true
    } else {
        false
    }
}

fn snapshot(context: &SamplerContext, state: &ChainState, iteration: usize) -> BkmrPosteriorDraw {
    BkmrPosteriorDraw {
        iteration,
        function_values: state.function_values.clone(),
        coefficients: state.coefficients.clone(),
        bandwidths: state.bandwidths.clone(),
        lambda: state.lambda,
        noise_variance: state.noise_variance,
        latent: context.family.is_binary().then(|| state.latent.clone()),
    }
}

fn adapt_proposal_scales(
    scales: &mut ProposalScales,
    counts: BkmrMoveCounts,
    tuning: &BkmrProposalTuning,
) {
    let rates = counts.rates();
    if counts.refine.proposed > 0 {
        let factor = adaptation_factor(rates.refine, tuning);
        for scale in &mut scales.r_jump {
            *scale = (*scale * factor).max(tuning.min_draw_scale);
        }
    }
    if counts.lambda.proposed > 0 {
        scales.lambda_jump = (scales.lambda_jump * adaptation_factor(rates.lambda, tuning))
            .max(tuning.min_draw_scale);
    }
}

fn adaptation_factor(acceptance: f64, tuning: &BkmrProposalTuning) -> f64 {
    if acceptance < tuning.acceptance_target_low {
        tuning.scale_decrease_factor
    } else if acceptance > tuning.acceptance_target_high {
        tuning.scale_increase_factor
    } else {
        1.0
    }
}

fn difference(left: &[f64], right: &[f64]) -> Vec<f64> {
    left.iter().zip(right).map(|(a, b)| a - b).collect()
}

fn assemble_fit(
    input: &KernelMachineInput,
    config: &BkmrSamplerConfig,
    sampling: SamplingResult,
) -> BkmrFit {
    let posterior = sampling.samples;
    let posterior_summary = if posterior.is_empty() {
        None
    } else {
        Some(summarize_posterior(&posterior))
    };
    BkmrFit {
        model: BkmrModel {
            n_observations: input.n_observations(),
            n_exposures: input.n_exposures(),
            n_covariates: input.n_covariates(),
            family: config.fit_options.family,
            variable_selection: config.fit_options.variable_selection,
        },
        report: BkmrReport {
            diagnostics: sampling.diagnostics,
            posterior_summary,
        },
        posterior,
        exposures: input.exposures.clone(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use super::*;
    use crate::input::InputError;

    fn idx_to_f64(idx: usize) -> f64 {
        f64::from(u32::try_from(idx).unwrap_or(u32::MAX))
    }

    fn pseudo_uniform(i: usize, j: usize) -> f64 {
        let value = (idx_to_f64(i) * 12.9898 + idx_to_f64(j) * 78.233).sin() * 43_758.545_3;
        value - value.floor()
    }

    fn continuous_input(n: usize) -> KernelMachineInput {
        let exposures = Mat::from_fn(n, 2, |i, j| 2.0 * pseudo_uniform(i, j) - 1.0);
        let covariates = Mat::from_fn(n, 1, |i, _| pseudo_uniform(i, 7) - 0.5);
        let outcome = Mat::from_fn(n, 1, |i, _| {
            let z = exposures[(i, 0)];
            z * z + 0.5 * covariates[(i, 0)] + 0.1 * (pseudo_uniform(i, 11) - 0.5)
        });
        KernelMachineInput::new(outcome, exposures).with_covariates(covariates)
    }

    fn short_config(iterations: usize) -> BkmrSamplerConfig {
        BkmrSamplerConfig {
            fit_options: BkmrFitOptions {
                iterations,
                burn_in: iterations / 2,
                thin: 2,
                seed: 5,
                ..BkmrFitOptions::default()
            },
            ..BkmrSamplerConfig::default()
        }
    }

    #[test]
    fn draw_log_has_configured_thinned_length() {
        let input = continuous_input(25);
        let config = short_config(40);
        let fit = fit_bkmr_input_with_config(&input, &config).expect("fit should succeed");
        assert_eq!(fit.posterior.len(), config.fit_options.retained_draws());
        assert_eq!(fit.report.diagnostics.iterations_completed, 40);
        assert!(!fit.report.diagnostics.aborted);
        let iterations: Vec<usize> = fit.posterior.draws.iter().map(|draw| draw.iteration).collect();
        assert_eq!(iterations.first(), Some(&20));
        assert!(iterations.windows(2).all(|pair| pair[1] - pair[0] == 2));
        assert!(fit.posterior.draws.iter().all(|draw| draw.latent.is_none()));
    }

    #[test]
    fn same_seed_reproduces_draws() {
        let input = continuous_input(20);
        let config = short_config(20);
        let first = fit_bkmr_input_with_config(&input, &config).expect("first fit");
        let second = fit_bkmr_input_with_config(&input, &config).expect("second fit");
        assert_eq!(first.posterior, second.posterior);
    }

    #[test]
    fn fixed_hyperparameters_stay_fixed() {
        let input = continuous_input(20);
        let mut config = short_config(20);
        config.hyperparameters.lambda = HyperparameterSetting::Fixed(3.0);
        config.hyperparameters.noise_variance = HyperparameterSetting::Fixed(0.2);
        let fit = fit_bkmr_input_with_config(&input, &config).expect("fit should succeed");
        assert!(fit.posterior.draws.iter().all(|draw| draw.lambda == 3.0));
        assert!(fit.posterior.draws.iter().all(|draw| draw.noise_variance == 0.2));
        assert_eq!(fit.report.diagnostics.move_counts.lambda.proposed, 0);
    }

    #[test]
    fn abort_before_first_iteration_returns_empty_log() {
        let input = continuous_input(10);
        let config = short_config(10);
        let flag = AtomicBool::new(true);
        let fit = fit_bkmr_input_with_abort(&input, &config, &flag).expect("abort is not an error");
        assert!(fit.report.diagnostics.aborted);
        assert_eq!(fit.report.diagnostics.iterations_completed, 0);
        assert!(fit.posterior.is_empty());
        assert!(fit.report.posterior_summary.is_none());
    }

    #[test]
    fn invalid_inputs_fail_before_sampling() {
        let mut input = continuous_input(10);
        input.outcome = Mat::from_fn(10, 1, |i, _| if i == 3 { 2.0 } else { 0.0 });
        let mut config = short_config(10);
        config.fit_options.family = Family::Binomial;
        assert!(matches!(
            fit_bkmr_input_with_config(&input, &config),
            Err(BkmrError::InvalidInput(InputError::NonBinaryOutcome { row: 3, .. }))
        ));

        let input = continuous_input(10);
        let mut config = short_config(10);
        config.starting_values.bandwidths = Some(vec![1.0, 0.0]);
        assert!(matches!(
            fit_bkmr_input_with_config(&input, &config),
            Err(BkmrError::InvalidStartingValue {
                field: "bandwidths"
            })
        ));
        config.starting_values.bandwidths = Some(vec![1.0]);
        assert!(matches!(
            fit_bkmr_input_with_config(&input, &config),
            Err(BkmrError::StartingValueLength {
                field: "bandwidths",
                expected: 2,
                found: 1
            })
        ));
    }

    #[test]
    fn adaptation_shrinks_scales_when_acceptance_is_low() {
        let tuning = BkmrProposalTuning::default();
        let mut scales = ProposalScales {
            r_jump: vec![0.5, 0.5],
            lambda_jump: 10.0,
        };
        let mut counts = BkmrMoveCounts::default();
        counts.refine.proposed = 100;
        counts.refine.accepted = 1;
        counts.lambda.proposed = 100;
        counts.lambda.accepted = 90;
        adapt_proposal_scales(&mut scales, counts, &tuning);
        assert!(scales.r_jump.iter().all(|scale| (*scale - 0.45).abs() < 1.0e-12));
        assert!((scales.lambda_jump - 11.0).abs() < 1.0e-12);
    }
}
