use faer::Mat;
use num_traits::ToPrimitive;

use crate::utils::usize_to_f64;

#[must_use]
pub fn vec_to_column(values: &[f64]) -> Mat<f64> {
    Mat::from_fn(values.len(), 1, |row, _| values[row])
}

#[must_use]
pub fn column_to_vec(column: &Mat<f64>) -> Vec<f64> {
    (0..column.nrows()).map(|row| column[(row, 0)]).collect()
}

#[must_use]
pub fn dot_row(matrix: &Mat<f64>, row: usize, coefficients: &[f64]) -> f64 {
    (0..matrix.ncols())
        .map(|col| matrix[(row, col)] * coefficients[col])
        .sum()
}

/// `X beta` as a vector; zeros when `X` has no columns.
#[must_use]
pub fn linear_predictor(design_matrix: &Mat<f64>, coefficients: &[f64]) -> Vec<f64> {
    (0..design_matrix.nrows())
        .map(|row| dot_row(design_matrix, row, coefficients))
        .collect()
}

#[must_use]
pub fn column_values(matrix: &Mat<f64>, col: usize) -> Vec<f64> {
    (0..matrix.nrows()).map(|row| matrix[(row, col)]).collect()
}

/// Linearly interpolated quantile of an unsorted sample.
#[must_use]
pub fn quantile(values: &[f64], probability: f64) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    sorted_quantile(&sorted, probability)
}

#[must_use]
pub fn sorted_quantile(sorted_values: &[f64], probability: f64) -> f64 {
    if sorted_values.is_empty() {
        return f64::NAN;
    }

    let clamped = probability.clamp(0.0, 1.0);
    let last = sorted_values.len() - 1;
    let position = clamped * usize_to_f64(last);
    let lower = position.floor().to_usize().unwrap_or(0);
    let upper = position.ceil().to_usize().unwrap_or(last);

    if lower == upper {
        sorted_values[lower]
    } else {
        let weight = position - usize_to_f64(lower);
        (1.0 - weight).mul_add(sorted_values[lower], weight * sorted_values[upper])
    }
}

/// Evenly spaced grid of `points` values spanning `[low, high]`.
#[must_use]
pub fn linear_grid(low: f64, high: f64, points: usize) -> Vec<f64> {
    match points {
        0 => Vec::new(),
        1 => vec![0.5 * (low + high)],
        _ => {
            let step = (high - low) / usize_to_f64(points - 1);
            (0..points)
                .map(|idx| step.mul_add(usize_to_f64(idx), low))
                .collect()
        }
    }
}
