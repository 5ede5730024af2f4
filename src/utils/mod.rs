/////////////////////////////////////////////////////////////////////////////////////////////\
//
// Shared linear algebra utilities for the kernel machine sampler.
//
// Created on: 24 Jan 2026     Author: Tobias Kragholm
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! # Utilities
//!
//! Dense Cholesky factorization with bounded jitter retries on top of faer's
//! `Llt`, and small helpers for working with faer matrices.

use faer::linalg::solvers::{Llt, Solve};
use faer::linalg::triangular_solve::{
    solve_lower_triangular_in_place, solve_upper_triangular_in_place,
};
use faer::{Mat, MatRef, Side, get_global_parallelism};

use crate::inference::NumericalError;

/// Maximum number of diagonal-jitter escalations before a factorization fails.
pub const MAX_JITTER_ATTEMPTS: usize = 8;

const INITIAL_RELATIVE_JITTER: f64 = 1.0e-10;
const JITTER_GROWTH: f64 = 10.0;

/// Cholesky factorization `A + jitter I = L L^T` together with the jitter
/// that was needed to obtain it.
#[derive(Debug, Clone)]
pub struct JitteredCholesky {
    factor: Llt<f64>,
    pub jitter: f64,
    pub attempts: usize,
}

impl JitteredCholesky {
    /// Lower-triangular factor `L`.
    #[must_use]
    pub fn lower(&self) -> MatRef<'_, f64> {
        self.factor.L()
    }

    #[must_use]
    pub fn dim(&self) -> usize {
        self.factor.L().nrows()
    }

    /// `log|A + jitter I|` from the factor diagonal.
    #[must_use]
    pub fn log_determinant(&self) -> f64 {
        let lower = self.factor.L();
        2.0 * (0..lower.nrows())
            .map(|idx| lower[(idx, idx)].ln())
            .sum::<f64>()
    }

    /// Solve `(A + jitter I) X = B`.
    #[must_use]
    pub fn solve(&self, rhs: &Mat<f64>) -> Mat<f64> {
        self.factor.solve(rhs)
    }

    /// Solve `L X = B`.
    #[must_use]
    pub fn solve_lower(&self, rhs: &Mat<f64>) -> Mat<f64> {
        let mut solution = rhs.clone();
        solve_lower_triangular_in_place(
            self.factor.L(),
            solution.as_mut(),
            get_global_parallelism(),
        );
        solution
    }

    /// Solve `L^T X = B`.
    #[must_use]
    pub fn solve_lower_transpose(&self, rhs: &Mat<f64>) -> Mat<f64> {
        let mut solution = rhs.clone();
        solve_upper_triangular_in_place(
            self.factor.L().transpose(),
            solution.as_mut(),
            get_global_parallelism(),
        );
        solution
    }

    /// `L z`.
    #[must_use]
    pub fn lower_times(&self, values: &[f64]) -> Vec<f64> {
        let column = Mat::from_fn(values.len(), 1, |row, _| values[row]);
        let product = self.factor.L() * &column;
        (0..product.nrows()).map(|row| product[(row, 0)]).collect()
    }
}

// faer reports non-positive pivots; a NaN input can still slip through.
fn try_llt(matrix: &Mat<f64>) -> Option<Llt<f64>> {
    let factor = matrix.llt(Side::Lower).ok()?;
    let lower = factor.L();
    (0..lower.nrows())
        .all(|idx| lower[(idx, idx)] > 0.0 && lower[(idx, idx)].is_finite())
        .then_some(factor)
}

/// Cholesky factorization that retries with a growing diagonal jitter.
///
/// The first attempt is unjittered. Subsequent attempts add
/// `1e-10 * mean(diag) * 10^k` to the diagonal.
///
/// # Errors
///
/// Returns `NumericalError::NotPositiveDefinite` when every attempt fails and
/// `NumericalError::DimensionMismatch` for non-square input.
pub fn cholesky_with_jitter(matrix: &Mat<f64>) -> Result<JitteredCholesky, NumericalError> {
    let dim = matrix.ncols();
    if matrix.nrows() != dim {
        return Err(NumericalError::DimensionMismatch {
            rows: matrix.nrows(),
            cols: dim,
        });
    }

    if let Some(factor) = try_llt(matrix) {
        return Ok(JitteredCholesky {
            factor,
            jitter: 0.0,
            attempts: 1,
        });
    }

    let mean_diagonal = if dim == 0 {
        1.0
    } else {
        (0..dim).map(|idx| matrix[(idx, idx)].abs()).sum::<f64>() / usize_to_f64(dim)
    };
    let mut jitter = INITIAL_RELATIVE_JITTER * mean_diagonal.max(f64::MIN_POSITIVE.sqrt());

    for attempt in 2..=MAX_JITTER_ATTEMPTS {
        let regularized = add_to_diagonal(matrix, jitter);
        if let Some(factor) = try_llt(&regularized) {
            log::trace!("cholesky succeeded with jitter {jitter:.3e} after {attempt} attempts");
            return Ok(JitteredCholesky {
                factor,
                jitter,
                attempts: attempt,
            });
        }
        jitter *= JITTER_GROWTH;
    }

    Err(NumericalError::NotPositiveDefinite {
        attempts: MAX_JITTER_ATTEMPTS,
    })
}

/// Replace `A` with `(A + A^T) / 2`.
pub fn symmetrize(matrix: &mut Mat<f64>) {
    let dim = matrix.nrows().min(matrix.ncols());
    for row in 0..dim {
        for col in (row + 1)..dim {
            let average = 0.5 * (matrix[(row, col)] + matrix[(col, row)]);
            matrix[(row, col)] = average;
            matrix[(col, row)] = average;
        }
    }
}

#[must_use]
pub fn add_to_diagonal(matrix: &Mat<f64>, value: f64) -> Mat<f64> {
    Mat::from_fn(matrix.nrows(), matrix.ncols(), |row, col| {
        if row == col {
            matrix[(row, col)] + value
        } else {
            matrix[(row, col)]
        }
    })
}

#[must_use]
pub fn matrix_is_finite(matrix: &Mat<f64>) -> bool {
    for i in 0..matrix.nrows() {
        for j in 0..matrix.ncols() {
            if !matrix[(i, j)].is_finite() {
                return false;
            }
        }
    }
    true
}

#[must_use]
pub fn slice_is_finite(values: &[f64]) -> bool {
    values.iter().all(|value| value.is_finite())
}

#[must_use]
pub fn usize_to_f64(value: usize) -> f64 {
    f64::from(u32::try_from(value).unwrap_or(u32::MAX))
}
