//! MCMC diagnostics and text rendering for BKMR posteriors.

use comfy_table::{
    Attribute, Cell, Color, ContentArrangement, Table, presets::UTF8_FULL_CONDENSED,
};

use crate::utils::usize_to_f64;

use super::posterior::{
    BkmrPosteriorDraw, BkmrPosteriorSamples, BkmrPosteriorSummary, ParameterSummary,
};
use super::types::{BkmrConvergenceSummary, BkmrError};

/// Inclusion probability at or above which an exposure is highlighted.
const HIGHLIGHT_PIP: f64 = 0.5;

/// Lag-`k` autocorrelation for a scalar chain.
#[must_use]
pub fn autocorrelation(series: &[f64], lag: usize) -> f64 {
    if series.is_empty() || lag >= series.len() {
        return 0.0;
    }

    let n = series.len() - lag;
    let mean = series.iter().sum::<f64>() / usize_to_f64(series.len());

    let denominator: f64 = series
        .iter()
        .map(|value| {
            let centered = value - mean;
            centered * centered
        })
        .sum();
    if denominator <= 0.0 {
        return 0.0;
    }

    let numerator: f64 = (0..n)
        .map(|idx| (series[idx] - mean) * (series[idx + lag] - mean))
        .sum();
    numerator / denominator
}

/// Heuristic effective sample size using positive autocorrelation truncation.
#[must_use]
pub fn effective_sample_size(series: &[f64]) -> f64 {
    let n = series.len();
    if n < 2 {
        return usize_to_f64(n);
    }

    let mut rho_sum = 0.0;
    for lag in 1..n {
        let rho = autocorrelation(series, lag);
        if rho <= 0.0 {
            break;
        }
        rho_sum += rho;
    }

    usize_to_f64(n) / (2.0f64.mul_add(rho_sum, 1.0)).max(1.0)
}

/// Effective sample size of `lambda` and of every coefficient in one chain.
#[must_use]
pub fn chain_effective_sample_sizes(samples: &BkmrPosteriorSamples) -> Vec<(String, f64)> {
    let Some(first) = samples.draws.first() else {
        return Vec::new();
    };
    let mut sizes = Vec::with_capacity(first.coefficients.len() + 1);
    for index in 0..first.coefficients.len() {
        let series: Vec<f64> = samples
            .draws
            .iter()
            .map(|draw| draw.coefficients[index])
            .collect();
        sizes.push((format!("beta[{index}]"), effective_sample_size(&series)));
    }
    let lambda: Vec<f64> = samples.draws.iter().map(|draw| draw.lambda).collect();
    sizes.push(("lambda".to_string(), effective_sample_size(&lambda)));
    sizes
}

/// Summarize split-R-hat convergence diagnostics across posterior chains.
///
/// All chains are truncated to the same even draw count. Bandwidths of
/// excluded draws enter as zero.
///
/// # Errors
///
/// Returns `BkmrError` if chain counts/draw lengths are insufficient or dimensions mismatch.
pub fn summarize_multi_chain_convergence(
    chains: &[BkmrPosteriorSamples],
) -> Result<BkmrConvergenceSummary, BkmrError> {
    if chains.len() < 2 {
        return Err(BkmrError::InvalidChainCount {
            min: 2,
            found: chains.len(),
        });
    }

    let min_draws = chains
        .iter()
        .map(BkmrPosteriorSamples::len)
        .min()
        .unwrap_or(0);
    let draws_per_chain_used = min_draws - (min_draws % 2);
    if draws_per_chain_used < 4 {
        return Err(BkmrError::InsufficientChainDraws {
            minimum: 4,
            found: draws_per_chain_used,
        });
    }

    let first_draw = chains.first().and_then(|chain| chain.draws.first()).ok_or(
        BkmrError::InsufficientChainDraws {
            minimum: 4,
            found: 0,
        },
    )?;
    let coefficient_len = first_draw.coefficients.len();
    let bandwidth_len = first_draw.bandwidths.len();

    for chain in chains {
        for draw in chain.draws.iter().take(draws_per_chain_used) {
            if draw.coefficients.len() != coefficient_len || draw.bandwidths.len() != bandwidth_len
            {
                return Err(BkmrError::InconsistentPosteriorDimensions);
            }
        }
    }

    let coefficient_split_rhat = (0..coefficient_len)
        .map(|index| {
            split_rhat_from_chains(chains, draws_per_chain_used, |draw| {
                draw.coefficients[index]
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    let bandwidth_split_rhat = (0..bandwidth_len)
        .map(|index| {
            split_rhat_from_chains(chains, draws_per_chain_used, |draw| {
                draw.bandwidths[index].value()
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    let lambda_split_rhat =
        split_rhat_from_chains(chains, draws_per_chain_used, |draw| draw.lambda).ok();
    let noise_variance_split_rhat =
        split_rhat_from_chains(chains, draws_per_chain_used, |draw| draw.noise_variance).ok();

    let max_split_rhat = coefficient_split_rhat
        .iter()
        .copied()
        .chain(bandwidth_split_rhat.iter().copied())
        .chain(lambda_split_rhat)
        .chain(noise_variance_split_rhat)
        .max_by(f64::total_cmp);

    Ok(BkmrConvergenceSummary {
        chain_count: chains.len(),
        draws_per_chain_used,
        coefficient_split_rhat,
        bandwidth_split_rhat,
        lambda_split_rhat,
        noise_variance_split_rhat,
        max_split_rhat,
    })
}

fn split_rhat_from_chains<F>(
    chains: &[BkmrPosteriorSamples],
    draws_per_chain_used: usize,
    extractor: F,
) -> Result<f64, BkmrError>
where
    F: Fn(&BkmrPosteriorDraw) -> f64,
{
    if chains.len() < 2 || draws_per_chain_used < 4 || !draws_per_chain_used.is_multiple_of(2) {
        return Err(BkmrError::InsufficientChainDraws {
            minimum: 4,
            found: draws_per_chain_used,
        });
    }

    let half = draws_per_chain_used / 2;
    let mut split_chains = Vec::with_capacity(chains.len() * 2);
    for chain in chains {
        let values: Vec<f64> = chain
            .draws
            .iter()
            .take(draws_per_chain_used)
            .map(&extractor)
            .collect();
        let (first_half, second_half) = values.split_at(half);
        split_chains.push(first_half.to_vec());
        split_chains.push(second_half.to_vec());
    }

    split_rhat_scalar(&split_chains)
}

/// Gelman-Rubin potential scale reduction over already-split chains.
///
/// # Errors
///
/// Returns `BkmrError` when fewer than two chains or two draws per chain are given.
pub fn split_rhat_scalar(chains: &[Vec<f64>]) -> Result<f64, BkmrError> {
    if chains.len() < 2 {
        return Err(BkmrError::InvalidChainCount {
            min: 2,
            found: chains.len(),
        });
    }

    let n = chains.first().map_or(0, Vec::len);
    if n < 2 {
        return Err(BkmrError::InsufficientChainDraws {
            minimum: 2,
            found: n,
        });
    }
    if chains.iter().any(|chain| chain.len() != n) {
        return Err(BkmrError::InconsistentPosteriorDimensions);
    }

    let chain_means = chains
        .iter()
        .map(|chain| chain.iter().sum::<f64>() / usize_to_f64(n))
        .collect::<Vec<_>>();
    let chain_vars = chains
        .iter()
        .zip(chain_means.iter())
        .map(|(chain, mean)| sample_variance(chain, *mean))
        .collect::<Vec<_>>();

    let m = chains.len();
    let mean_of_means = chain_means.iter().sum::<f64>() / usize_to_f64(m);
    let between = usize_to_f64(n)
        * chain_means
            .iter()
            .map(|mean| {
                let centered = *mean - mean_of_means;
                centered * centered
            })
            .sum::<f64>()
        / usize_to_f64(m - 1);
    let within = chain_vars.iter().sum::<f64>() / usize_to_f64(m);

    if !(within.is_finite() && within > 0.0 && between.is_finite()) {
        return Ok(1.0);
    }

    let n_f64 = usize_to_f64(n);
    let var_plus = ((n_f64 - 1.0) / n_f64).mul_add(within, between / n_f64);
    if !var_plus.is_finite() || var_plus <= 0.0 {
        return Ok(1.0);
    }

    Ok((var_plus / within).sqrt().max(1.0))
}

fn sample_variance(values: &[f64], mean: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    values
        .iter()
        .map(|value| {
            let centered = *value - mean;
            centered * centered
        })
        .sum::<f64>()
        / usize_to_f64(values.len() - 1)
}

/// Render the scalar blocks of a posterior summary as a text table.
///
/// Exposures with an inclusion probability of at least one half are highlighted.
#[must_use]
pub fn render_posterior_summary_table(summary: &BkmrPosteriorSummary) -> String {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(
            ["parameter", "mean", "sd", "2.5%", "50%", "97.5%", "pip"]
                .iter()
                .map(|h| Cell::new(*h))
                .collect::<Vec<_>>(),
        );

    for (index, coefficient) in summary.coefficients.iter().enumerate() {
        table.add_row(summary_row(format!("beta[{index}]"), coefficient, None));
    }
    for (index, bandwidth) in summary.bandwidths.iter().enumerate() {
        let pip = summary.inclusion_probabilities.get(index).copied();
        table.add_row(summary_row(format!("r[{index}]"), bandwidth, pip));
    }
    if let Some(lambda) = &summary.lambda {
        table.add_row(summary_row("lambda".to_string(), lambda, None));
    }
    if let Some(noise_variance) = &summary.noise_variance {
        table.add_row(summary_row("sigsq.eps".to_string(), noise_variance, None));
    }
    if let Some(tau) = &summary.function_variance {
        table.add_row(summary_row("tau".to_string(), tau, None));
    }

    table.to_string()
}

fn summary_row(name: String, summary: &ParameterSummary, pip: Option<f64>) -> Vec<Cell> {
    let pip_cell = match pip {
        Some(value) if value >= HIGHLIGHT_PIP => Cell::new(format!("{value:.3}"))
            .fg(Color::Green)
            .add_attribute(Attribute::Bold),
        Some(value) => Cell::new(format!("{value:.3}")),
        None => Cell::new(""),
    };
    vec![
        Cell::new(name),
        Cell::new(format!("{:.4}", summary.mean)),
        Cell::new(format!("{:.4}", summary.std_dev)),
        Cell::new(format!("{:.4}", summary.q025)),
        Cell::new(format!("{:.4}", summary.q50)),
        Cell::new(format!("{:.4}", summary.q975)),
        pip_cell,
    ]
}
