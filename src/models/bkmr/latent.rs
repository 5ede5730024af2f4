//! Probit data augmentation.
//!
//! For a binary outcome the latent `y*_i ~ N(eta_i, 1)` is truncated to
//! `(0, inf)` when `y_i = 1` and to `(-inf, 0]` when `y_i = 0`, with
//! `eta_i = h_i + x_i' beta`.

use rand::rngs::StdRng;

use crate::inference::NumericalError;

use super::random::{sample_non_positive_normal, sample_positive_normal};

/// Redraw every latent outcome in place.
///
/// # Errors
///
/// Returns `NumericalError::NonFinite` if a linear predictor or a draw is not finite.
pub fn augment_latent_outcomes(
    rng: &mut StdRng,
    outcome: &[f64],
    function_values: &[f64],
    fixed_effects: &[f64],
    latent: &mut [f64],
) -> Result<(), NumericalError> {
    for (row, slot) in latent.iter_mut().enumerate() {
        let eta = function_values[row] + fixed_effects[row];
        if !eta.is_finite() {
            return Err(NumericalError::NonFinite {
                quantity: "latent linear predictor",
            });
        }
        let draw = if outcome[row] > 0.5 {
            sample_positive_normal(rng, eta)
        } else {
            sample_non_positive_normal(rng, eta)
        };
        if !draw.is_finite() {
            return Err(NumericalError::NonFinite {
                quantity: "latent outcome",
            });
        }
        *slot = draw;
    }
    Ok(())
}

/// Latent values that satisfy the sign constraints, used before the first sweep.
#[must_use]
pub fn initial_latent_outcomes(outcome: &[f64]) -> Vec<f64> {
    outcome
        .iter()
        .map(|value| if *value > 0.5 { 0.5 } else { -0.5 })
        .collect()
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use super::*;

    #[test]
    fn latent_signs_follow_outcomes_even_for_extreme_predictors() {
        let mut rng = StdRng::seed_from_u64(21);
        let outcome = [1.0, 0.0, 1.0, 0.0];
        let function_values = [-30.0, 30.0, 0.0, 0.0];
        let fixed_effects = [-5.0, 5.0, 0.2, -0.2];
        let mut latent = initial_latent_outcomes(&outcome);

        for _ in 0..200 {
            augment_latent_outcomes(
                &mut rng,
                &outcome,
                &function_values,
                &fixed_effects,
                &mut latent,
            )
            .expect("augmentation should succeed");
            assert!(latent[0] > 0.0 && latent[0] < 1.0);
            assert!(latent[1] <= 0.0 && latent[1] > -1.0);
            assert!(latent[2] > 0.0);
            assert!(latent[3] <= 0.0);
        }
    }

    #[test]
    fn non_finite_predictor_is_reported() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut latent = vec![0.0];
        let err = augment_latent_outcomes(&mut rng, &[1.0], &[f64::NAN], &[0.0], &mut latent)
            .expect_err("NaN predictor must fail");
        assert!(matches!(err, NumericalError::NonFinite { .. }));
    }
}
