use faer::Mat;
use kernel_machine_models::{
    BandwidthPrior, BkmrFitOptions, BkmrPriorConfig, BkmrSamplerConfig, DrawSelection, Family,
    KernelMachineInput, fit_bkmr_input_with_config, predictor_response_univariate,
};
use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};

fn usize_to_f64(value: usize) -> f64 {
    f64::from(u32::try_from(value).unwrap_or(u32::MAX))
}

fn sample_standard_normal(rng: &mut StdRng) -> f64 {
    let u1 = (1.0_f64 - rng.random::<f64>()).max(f64::MIN_POSITIVE);
    let u2 = rng.random::<f64>();
    (-2.0_f64 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
}

fn quadratic_effect(z: f64) -> f64 {
    2.0 * z * z
}

/// Exposures uniform on `[-1, 1]`; only the first one affects the outcome.
fn simulate_quadratic(
    n: usize,
    exposures: usize,
    family: Family,
    seed: u64,
) -> (KernelMachineInput, Vec<f64>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut z = Vec::with_capacity(n * exposures);
    let mut x = Vec::with_capacity(n);
    let mut y = Vec::with_capacity(n);
    let mut truth = Vec::with_capacity(n);

    for _ in 0..n {
        let row: Vec<f64> = (0..exposures)
            .map(|_| 2.0f64.mul_add(rng.random::<f64>(), -1.0))
            .collect();
        let covariate = sample_standard_normal(&mut rng);
        let h = quadratic_effect(row[0]);
        let eta = 0.5f64.mul_add(covariate, h);
        let outcome = match family {
            Family::Gaussian => 0.25f64.mul_add(sample_standard_normal(&mut rng), eta),
            Family::Binomial => {
                if eta - 0.7 + sample_standard_normal(&mut rng) > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
        };
        z.extend_from_slice(&row);
        x.push(covariate);
        y.push(outcome);
        truth.push(h);
    }

    let input = KernelMachineInput::new(
        Mat::from_fn(n, 1, |row, _| y[row]),
        Mat::from_fn(n, exposures, |row, col| z[row * exposures + col]),
    )
    .with_covariates(Mat::from_fn(n, 1, |row, _| x[row]));
    (input, truth)
}

fn selection_config(
    iterations: usize,
    burn_in: usize,
    family: Family,
    seed: u64,
) -> BkmrSamplerConfig {
    BkmrSamplerConfig {
        fit_options: BkmrFitOptions {
            iterations,
            burn_in,
            thin: 1,
            seed,
            family,
            variable_selection: true,
            ..BkmrFitOptions::default()
        },
        prior_config: BkmrPriorConfig {
            bandwidth: BandwidthPrior::Gamma {
                shape: 2.0,
                rate: 2.0,
            },
            ..BkmrPriorConfig::default()
        },
        ..BkmrSamplerConfig::default()
    }
}

fn centered(values: &[f64]) -> Vec<f64> {
    let mean = values.iter().sum::<f64>() / usize_to_f64(values.len());
    values.iter().map(|value| value - mean).collect()
}

fn correlation(left: &[f64], right: &[f64]) -> f64 {
    let left = centered(left);
    let right = centered(right);
    let cross: f64 = left.iter().zip(&right).map(|(a, b)| a * b).sum();
    let left_norm: f64 = left.iter().map(|a| a * a).sum::<f64>().sqrt();
    let right_norm: f64 = right.iter().map(|b| b * b).sum::<f64>().sqrt();
    cross / (left_norm * right_norm)
}

#[test]
fn continuous_fit_recovers_function_and_flags_active_exposure() {
    let (input, truth) = simulate_quadratic(60, 3, Family::Gaussian, 2024);
    let config = selection_config(1_500, 500, Family::Gaussian, 7);
    let fit = fit_bkmr_input_with_config(&input, &config).expect("fit should succeed");

    let h_mean = fit.posterior.function_value_means();
    let rmse = (h_mean
        .iter()
        .zip(&truth)
        .map(|(estimate, actual)| (estimate - actual) * (estimate - actual))
        .sum::<f64>()
        / usize_to_f64(truth.len()))
    .sqrt();
    assert!(rmse < 0.3, "rmse {rmse}");
    assert!(correlation(&h_mean, &truth) > 0.85);

    let pips = fit.posterior.inclusion_probabilities();
    assert!(pips[0] > 0.8, "pips {pips:?}");
    assert!(pips[1] < 0.3, "pips {pips:?}");
    assert!(pips[2] < 0.3, "pips {pips:?}");

    let summary = fit
        .report
        .posterior_summary
        .expect("summary should be present");
    assert!((summary.coefficients[0].mean - 0.5).abs() < 0.3);
}

#[test]
fn switch_proposal_scale_changes_toggle_acceptance() {
    let (input, _) = simulate_quadratic(30, 3, Family::Gaussian, 55);
    let default_config = selection_config(300, 100, Family::Gaussian, 19);
    let mut tuned_config = default_config.clone();
    tuned_config.proposal_tuning.r_jump2 = 0.1;

    let default_fit = fit_bkmr_input_with_config(&input, &default_config).expect("default fit");
    let tuned_fit = fit_bkmr_input_with_config(&input, &tuned_config).expect("tuned fit");

    let default_rate = default_fit.report.diagnostics.acceptance_rates.toggle;
    let tuned_rate = tuned_fit.report.diagnostics.acceptance_rates.toggle;
    assert!(default_rate > 0.0 && default_rate < 1.0);
    assert!(tuned_rate > 0.0 && tuned_rate < 1.0);
    assert!((default_rate - tuned_rate).abs() > 1.0e-3);
}

#[test]
#[ignore = "long-running probit scenario; run with --ignored"]
fn probit_scenario_tracks_quadratic_and_separates_exposures() {
    let (input, _) = simulate_quadratic(200, 4, Family::Binomial, 11);
    let config = selection_config(4_000, 1_500, Family::Binomial, 3);
    let fit = fit_bkmr_input_with_config(&input, &config).expect("fit should succeed");

    let pips = fit.posterior.inclusion_probabilities();
    assert!(pips[0] > 0.8, "pips {pips:?}");
    for pip in &pips[1..] {
        assert!(*pip < 0.3, "pips {pips:?}");
    }

    let response = predictor_response_univariate(&fit, 0, 25, 0.5, &DrawSelection::All)
        .expect("exposure-response grid");
    let expected: Vec<f64> = response.grid.iter().map(|z| quadratic_effect(*z)).collect();
    assert!(correlation(&response.mean, &expected) > 0.9);

    let rates = fit.report.diagnostics.acceptance_rates;
    assert!(rates.toggle > 0.0 && rates.toggle < 1.0);
}
