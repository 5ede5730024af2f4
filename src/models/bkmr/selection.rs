//! Metropolis-Hastings updates for the bandwidths and inclusion indicators.
//!
//! Every move targets the marginal of `(r, delta)` with `h` integrated out,
//! so acceptance ratios use `N(e | 0, sigma^2 (I + lambda K))`. The caller is
//! responsible for redrawing `h` once any move has been accepted.
//!
//! Per exposure the sweep picks one of two moves:
//!
//! * refine: the exposure stays included and `r_m` gets a gamma proposal
//!   centred on its current value with sd `r_jump[m]`;
//! * toggle: an excluded exposure is switched in with a fresh
//!   `r_m ~ Gamma(mean r_muprop, sd r_jump2)`, or an included exposure is
//!   switched out.
//!
//! Excluded exposures always toggle. Included exposures toggle with
//! probability `toggle_probability` when selection is enabled and always
//! refine otherwise.

use rand::RngExt;
use rand::rngs::StdRng;

use crate::inference::ProposalStats;

use super::function::MarginalCovariance;
use super::kernel::{Bandwidth, KernelCache, SquaredDistances};
use super::priors::{BkmrPriorConfig, log_gamma_proposal_density};
use super::random::{sample_gamma_mean_sd, should_accept};

/// Which move was attempted for an exposure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionMove {
    Refine,
    Toggle,
}

/// Proposal settings resolved for one sweep.
#[derive(Debug, Clone)]
pub struct SelectionProposals {
    pub r_jump: Vec<f64>,
    pub r_jump2: f64,
    pub r_muprop: f64,
    pub toggle_probability: f64,
    pub variable_selection: bool,
}

/// Read-only quantities that stay fixed during a sweep.
pub struct SelectionProblem<'a> {
    pub distances: &'a SquaredDistances,
    pub residual: &'a [f64],
    pub lambda: f64,
    pub noise_variance: f64,
    pub prior: BkmrPriorConfig,
    pub proposals: &'a SelectionProposals,
}

/// Mutable kernel state updated in place by the sweep.
pub struct SelectionState<'a> {
    pub bandwidths: &'a mut [Bandwidth],
    pub kernel: &'a mut KernelCache,
    pub marginal: &'a mut MarginalCovariance,
}

/// Counters and change flag from one sweep over all exposures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    pub refine: ProposalStats,
    pub toggle: ProposalStats,
    pub changed: bool,
}

struct Candidate {
    bandwidth: Bandwidth,
    kernel: KernelCache,
    marginal: MarginalCovariance,
    log_likelihood: f64,
}

/// One pass over all exposures.
///
/// Proposals whose kernel cannot be factorized or whose bandwidth falls
/// outside the prior support are rejected rather than reported as errors.
pub fn sweep_bandwidths(
    rng: &mut StdRng,
    problem: &SelectionProblem<'_>,
    state: &mut SelectionState<'_>,
) -> SweepOutcome {
    let mut outcome = SweepOutcome::default();
    let mut current_log_likelihood = state
        .marginal
        .log_likelihood(problem.residual, problem.noise_variance);

    for dim in 0..state.bandwidths.len() {
        let current = state.bandwidths[dim];
        let selected = choose_move(rng, current, problem.proposals);
        let (proposed, log_proposal_terms) = match (selected, current) {
            (SelectionMove::Refine, Bandwidth::Included(value)) => {
                propose_refinement(rng, value, problem.proposals.r_jump[dim])
            }
            (SelectionMove::Toggle, Bandwidth::Excluded) => propose_switch_in(rng, problem),
            (SelectionMove::Toggle, Bandwidth::Included(value)) => {
                propose_switch_out(value, problem)
            }
            (SelectionMove::Refine, Bandwidth::Excluded) => continue,
        };

        let candidate = if log_proposal_terms.is_finite() {
            evaluate_candidate(problem, state, dim, current, proposed)
        } else {
            None
        };
        let accepted = match candidate {
            Some(candidate) => {
                let included_now = count_included(state.bandwidths);
                let included_next = included_now + usize::from(proposed.is_included())
                    - usize::from(current.is_included());
                let dimensions = state.bandwidths.len();
                let log_acceptance = candidate.log_likelihood - current_log_likelihood
                    + log_bandwidth_prior(problem.prior, proposed)
                    - log_bandwidth_prior(problem.prior, current)
                    + problem.prior.log_inclusion_prior(included_next, dimensions)
                    - problem.prior.log_inclusion_prior(included_now, dimensions)
                    + log_proposal_terms;
                if should_accept(log_acceptance, rng) {
                    current_log_likelihood = candidate.log_likelihood;
                    state.bandwidths[dim] = candidate.bandwidth;
                    *state.kernel = candidate.kernel;
                    *state.marginal = candidate.marginal;
                    true
                } else {
                    false
                }
            }
            None => false,
        };

        match selected {
            SelectionMove::Refine => outcome.refine.record(accepted),
            SelectionMove::Toggle => outcome.toggle.record(accepted),
        }
        outcome.changed |= accepted;
    }

    outcome
}

fn choose_move(
    rng: &mut StdRng,
    current: Bandwidth,
    proposals: &SelectionProposals,
) -> SelectionMove {
    if !proposals.variable_selection {
        return SelectionMove::Refine;
    }
    match current {
        Bandwidth::Excluded => SelectionMove::Toggle,
        Bandwidth::Included(_) => {
            if rng.random::<f64>() < proposals.toggle_probability {
                SelectionMove::Toggle
            } else {
                SelectionMove::Refine
            }
        }
    }
}

/// Returns the proposal and `log q(reverse) - log q(forward)`.
fn propose_refinement(rng: &mut StdRng, current: f64, jump: f64) -> (Bandwidth, f64) {
    let draw = sample_gamma_mean_sd(rng, current, jump);
    if !(draw > 0.0 && draw.is_finite()) {
        return (Bandwidth::Included(current), f64::NEG_INFINITY);
    }
    let proposed = Bandwidth::included(draw);
    let value = proposed.value();
    let hastings = log_gamma_proposal_density(current, value, jump)
        - log_gamma_proposal_density(value, current, jump);
    (proposed, hastings)
}

// Reverse of a switch-in is a switch-out chosen with `toggle_probability`.
fn propose_switch_in(rng: &mut StdRng, problem: &SelectionProblem<'_>) -> (Bandwidth, f64) {
    let proposals = problem.proposals;
    let draw = sample_gamma_mean_sd(rng, proposals.r_muprop, proposals.r_jump2);
    if !(draw > 0.0 && draw.is_finite()) {
        return (Bandwidth::Excluded, f64::NEG_INFINITY);
    }
    let proposed = Bandwidth::included(draw);
    let hastings = proposals.toggle_probability.ln()
        - log_gamma_proposal_density(proposed.value(), proposals.r_muprop, proposals.r_jump2);
    (proposed, hastings)
}

fn propose_switch_out(current: f64, problem: &SelectionProblem<'_>) -> (Bandwidth, f64) {
    let proposals = problem.proposals;
    let hastings = log_gamma_proposal_density(current, proposals.r_muprop, proposals.r_jump2)
        - proposals.toggle_probability.ln();
    (Bandwidth::Excluded, hastings)
}

fn evaluate_candidate(
    problem: &SelectionProblem<'_>,
    state: &SelectionState<'_>,
    dim: usize,
    current: Bandwidth,
    proposed: Bandwidth,
) -> Option<Candidate> {
    if proposed.is_included()
        && !problem
            .prior
            .bandwidth
            .log_density(proposed.value())
            .is_finite()
    {
        return None;
    }
    let kernel = state
        .kernel
        .with_bandwidth_change(problem.distances, dim, current, proposed);
    let marginal = MarginalCovariance::factorize(kernel.kernel(), problem.lambda).ok()?;
    let log_likelihood = marginal.log_likelihood(problem.residual, problem.noise_variance);
    if !log_likelihood.is_finite() {
        return None;
    }
    Some(Candidate {
        bandwidth: proposed,
        kernel,
        marginal,
        log_likelihood,
    })
}

fn log_bandwidth_prior(prior: BkmrPriorConfig, bandwidth: Bandwidth) -> f64 {
    match bandwidth {
        Bandwidth::Excluded => 0.0,
        Bandwidth::Included(value) => prior.bandwidth.log_density(value),
    }
}

#[must_use]
pub fn count_included(bandwidths: &[Bandwidth]) -> usize {
    bandwidths
        .iter()
        .filter(|bandwidth| bandwidth.is_included())
        .count()
}

#[cfg(test)]
mod tests {
    use faer::Mat;
    use rand::SeedableRng;

    use super::*;
    use crate::models::bkmr::function::sample_function_values;
    use crate::models::bkmr::priors::BandwidthPrior;

    fn idx_to_f64(idx: usize) -> f64 {
        f64::from(u32::try_from(idx).unwrap_or(u32::MAX))
    }

    fn exposures(n: usize) -> Mat<f64> {
        Mat::from_fn(n, 3, |i, j| {
            let t = idx_to_f64(i);
            match j {
                0 => (t * 0.37).sin() * 1.5,
                1 => (t * 1.91 + 0.3).cos(),
                _ => ((t * 2.73).sin() * 13.0).fract(),
            }
        })
    }

    fn proposals(variable_selection: bool) -> SelectionProposals {
        SelectionProposals {
            r_jump: vec![0.2; 3],
            r_jump2: 1.0,
            r_muprop: 1.0,
            toggle_probability: 0.5,
            variable_selection,
        }
    }

    #[test]
    fn inclusion_frequency_separates_active_and_null_exposures() {
        let n = 60;
        let z = exposures(n);
        let residual: Vec<f64> = (0..n)
            .map(|i| {
                let value = z[(i, 0)];
                2.0 * value * value - 1.0 + 0.1 * (idx_to_f64(i) * 7.1).sin()
            })
            .collect();
        let distances = SquaredDistances::from_exposures(&z);
        let proposals = proposals(true);
        let problem = SelectionProblem {
            distances: &distances,
            residual: &residual,
            lambda: 10.0,
            noise_variance: 0.05,
            prior: BkmrPriorConfig {
                bandwidth: BandwidthPrior::Gamma {
                    shape: 2.0,
                    rate: 2.0,
                },
                ..BkmrPriorConfig::default()
            },
            proposals: &proposals,
        };

        let mut bandwidths = vec![Bandwidth::Included(1.0); 3];
        let mut kernel = KernelCache::build(&distances, &bandwidths);
        let mut marginal =
            MarginalCovariance::factorize(kernel.kernel(), 10.0).expect("V is positive definite");
        let mut rng = StdRng::seed_from_u64(2024);
        let sweeps = 400;
        let mut included = [0usize; 3];
        let mut toggles = ProposalStats::default();
        for sweep in 0..sweeps {
            let mut state = SelectionState {
                bandwidths: &mut bandwidths,
                kernel: &mut kernel,
                marginal: &mut marginal,
            };
            let outcome = sweep_bandwidths(&mut rng, &problem, &mut state);
            toggles.proposed += outcome.toggle.proposed;
            toggles.accepted += outcome.toggle.accepted;
            if sweep >= 100 {
                for (count, bandwidth) in included.iter_mut().zip(&bandwidths) {
                    *count += usize::from(bandwidth.is_included());
                }
            }
        }

        let kept = idx_to_f64(sweeps - 100);
        assert!(idx_to_f64(included[0]) / kept > 0.9);
        assert!(idx_to_f64(included[1]) / kept < 0.35);
        assert!(idx_to_f64(included[2]) / kept < 0.35);
        assert!(toggles.proposed > 0);
        assert!(toggles.acceptance_rate() > 0.0 && toggles.acceptance_rate() < 1.0);
    }

    #[test]
    fn without_selection_every_exposure_stays_included() {
        let n = 20;
        let z = exposures(n);
        let residual: Vec<f64> = (0..n).map(|i| z[(i, 1)]).collect();
        let distances = SquaredDistances::from_exposures(&z);
        let proposals = proposals(false);
        let problem = SelectionProblem {
            distances: &distances,
            residual: &residual,
            lambda: 5.0,
            noise_variance: 0.5,
            prior: BkmrPriorConfig::default(),
            proposals: &proposals,
        };
        let mut bandwidths = vec![Bandwidth::Included(0.5); 3];
        let mut kernel = KernelCache::build(&distances, &bandwidths);
        let mut marginal =
            MarginalCovariance::factorize(kernel.kernel(), 5.0).expect("V is positive definite");
        let mut rng = StdRng::seed_from_u64(8);
        for _ in 0..50 {
            let mut state = SelectionState {
                bandwidths: &mut bandwidths,
                kernel: &mut kernel,
                marginal: &mut marginal,
            };
            let outcome = sweep_bandwidths(&mut rng, &problem, &mut state);
            assert_eq!(outcome.toggle.proposed, 0);
            assert_eq!(outcome.refine.proposed, 3);
        }
        assert!(bandwidths.iter().all(|bandwidth| bandwidth.is_included()));

        let rebuilt = KernelCache::build(&distances, &bandwidths);
        for i in 0..n {
            for j in 0..n {
                assert!((rebuilt.kernel()[(i, j)] - kernel.kernel()[(i, j)]).abs() < 1.0e-10);
            }
        }
        let mut draw_rng = StdRng::seed_from_u64(1);
        assert!(
            sample_function_values(&mut draw_rng, kernel.kernel(), &marginal, &residual, 0.5)
                .is_ok()
        );
    }
}
