//! Posterior draw log and summaries for BKMR.

use serde::{Deserialize, Serialize};

use crate::models::matrix_ops::sorted_quantile;
use crate::utils::usize_to_f64;

use super::kernel::Bandwidth;

/// Snapshot of the chain state at one retained iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BkmrPosteriorDraw {
    /// Zero-based iteration that produced this draw.
    pub iteration: usize,
    pub function_values: Vec<f64>,
    pub coefficients: Vec<f64>,
    pub bandwidths: Vec<Bandwidth>,
    /// Ratio of the function variance to the noise variance.
    pub lambda: f64,
    pub noise_variance: f64,
    /// Latent probit outcomes; `None` for continuous outcomes.
    pub latent: Option<Vec<f64>>,
}

impl BkmrPosteriorDraw {
    /// Function variance `tau = lambda * sigma^2`.
    #[must_use]
    pub fn function_variance(&self) -> f64 {
        self.lambda * self.noise_variance
    }
}

/// Append-only posterior draw log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BkmrPosteriorSamples {
    pub draws: Vec<BkmrPosteriorDraw>,
}

impl BkmrPosteriorSamples {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.draws.is_empty()
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.draws.len()
    }

    /// Fraction of draws in which each exposure is included.
    #[must_use]
    pub fn inclusion_probabilities(&self) -> Vec<f64> {
        let dimensions = self.draws.first().map_or(0, |draw| draw.bandwidths.len());
        if self.is_empty() {
            return vec![0.0; dimensions];
        }
        let total = usize_to_f64(self.len());
        (0..dimensions)
            .map(|dim| {
                let included = self
                    .draws
                    .iter()
                    .filter(|draw| draw.bandwidths[dim].is_included())
                    .count();
                usize_to_f64(included) / total
            })
            .collect()
    }

    /// Posterior mean of `h` at the training observations.
    #[must_use]
    pub fn function_value_means(&self) -> Vec<f64> {
        let n = self.draws.first().map_or(0, |draw| draw.function_values.len());
        (0..n)
            .map(|row| mean(self.draws.iter().map(|draw| draw.function_values[row])))
            .collect()
    }
}

/// Scalar posterior summary statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterSummary {
    pub mean: f64,
    pub std_dev: f64,
    pub q025: f64,
    pub q50: f64,
    pub q975: f64,
}

/// Posterior summary for the BKMR parameter blocks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BkmrPosteriorSummary {
    pub coefficients: Vec<ParameterSummary>,
    /// Bandwidth summaries with excluded draws counted as zero.
    pub bandwidths: Vec<ParameterSummary>,
    pub inclusion_probabilities: Vec<f64>,
    pub lambda: Option<ParameterSummary>,
    pub noise_variance: Option<ParameterSummary>,
    pub function_variance: Option<ParameterSummary>,
    pub function_values: Vec<ParameterSummary>,
    pub draw_count: usize,
}

/// Compute posterior summaries for all stored parameter blocks.
#[must_use]
pub fn summarize_posterior(samples: &BkmrPosteriorSamples) -> BkmrPosteriorSummary {
    let draw_count = samples.len();
    let Some(first) = samples.draws.first() else {
        return BkmrPosteriorSummary {
            draw_count,
            ..BkmrPosteriorSummary::default()
        };
    };

    let coefficients = (0..first.coefficients.len())
        .map(|index| summarize_by(samples, |draw| draw.coefficients[index]))
        .collect();
    let bandwidths = (0..first.bandwidths.len())
        .map(|index| summarize_by(samples, |draw| draw.bandwidths[index].value()))
        .collect();
    let function_values = (0..first.function_values.len())
        .map(|index| summarize_by(samples, |draw| draw.function_values[index]))
        .collect();

    BkmrPosteriorSummary {
        coefficients,
        bandwidths,
        inclusion_probabilities: samples.inclusion_probabilities(),
        lambda: Some(summarize_by(samples, |draw| draw.lambda)),
        noise_variance: Some(summarize_by(samples, |draw| draw.noise_variance)),
        function_variance: Some(summarize_by(samples, BkmrPosteriorDraw::function_variance)),
        function_values,
        draw_count,
    }
}

fn summarize_by<F>(samples: &BkmrPosteriorSamples, extractor: F) -> ParameterSummary
where
    F: Fn(&BkmrPosteriorDraw) -> f64,
{
    let values: Vec<f64> = samples.draws.iter().map(extractor).collect();
    summarize_scalar(&values)
}

#[must_use]
pub fn summarize_scalar(values: &[f64]) -> ParameterSummary {
    if values.is_empty() {
        return ParameterSummary::default();
    }

    let n = usize_to_f64(values.len());
    let mean = values.iter().sum::<f64>() / n;
    let variance = values
        .iter()
        .map(|value| {
            let centered = value - mean;
            centered * centered
        })
        .sum::<f64>()
        / n.max(1.0);

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    ParameterSummary {
        mean,
        std_dev: variance.sqrt(),
        q025: sorted_quantile(&sorted, 0.025),
        q50: sorted_quantile(&sorted, 0.5),
        q975: sorted_quantile(&sorted, 0.975),
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), value| (sum + value, count + 1));
    if count == 0 {
        f64::NAN
    } else {
        sum / usize_to_f64(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draw(iteration: usize, included: bool, beta: f64) -> BkmrPosteriorDraw {
        BkmrPosteriorDraw {
            iteration,
            function_values: vec![beta, -beta],
            coefficients: vec![beta],
            bandwidths: vec![
                Bandwidth::Included(1.0),
                if included {
                    Bandwidth::Included(0.5)
                } else {
                    Bandwidth::Excluded
                },
            ],
            lambda: 2.0,
            noise_variance: 0.5,
            latent: None,
        }
    }

    #[test]
    fn summarize_empty_samples() {
        let summary = summarize_posterior(&BkmrPosteriorSamples::default());
        assert_eq!(summary.draw_count, 0);
        assert!(summary.coefficients.is_empty());
        assert!(summary.lambda.is_none());
    }

    #[test]
    fn inclusion_probabilities_count_included_draws() {
        let samples = BkmrPosteriorSamples {
            draws: vec![
                draw(0, true, 0.0),
                draw(1, false, 2.0),
                draw(2, false, 1.0),
                draw(3, true, 3.0),
            ],
        };
        assert_eq!(samples.inclusion_probabilities(), vec![1.0, 0.5]);

        let summary = summarize_posterior(&samples);
        assert_eq!(summary.draw_count, 4);
        assert!((summary.coefficients[0].mean - 1.5).abs() < 1.0e-12);
        assert!((summary.bandwidths[1].mean - 0.25).abs() < 1.0e-12);
        let tau = summary.function_variance.expect("non-empty samples");
        assert!((tau.mean - 1.0).abs() < 1.0e-12);
        assert_eq!(samples.function_value_means(), vec![1.5, -1.5]);
    }
}
