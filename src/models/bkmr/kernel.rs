//! Gaussian kernel over exposure profiles.
//!
//! `K[i, j] = exp(-sum_m r_m (z_im - z_jm)^2)`. The per-dimension squared
//! distance matrices are computed once per fit so that a change to a single
//! bandwidth only costs one `n x n` pass.

use faer::Mat;
use serde::{Deserialize, Serialize};

/// Upper clamp applied to included bandwidths.
pub const MAX_BANDWIDTH: f64 = 1.0e6;

/// Per-exposure kernel state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Bandwidth {
    /// Exposure does not enter the kernel.
    Excluded,
    /// Exposure enters the kernel with the given inverse squared length-scale.
    Included(f64),
}

impl Bandwidth {
    /// Included bandwidth, clamped to `[0, MAX_BANDWIDTH]`.
    #[must_use]
    pub fn included(value: f64) -> Self {
        Self::Included(clamp_bandwidth(value))
    }

    /// Effective bandwidth: zero when excluded.
    #[must_use]
    pub const fn value(self) -> f64 {
        match self {
            Self::Excluded => 0.0,
            Self::Included(value) => value,
        }
    }

    #[must_use]
    pub const fn is_included(self) -> bool {
        matches!(self, Self::Included(_))
    }
}

#[must_use]
pub fn clamp_bandwidth(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, MAX_BANDWIDTH)
    }
}

/// Squared pairwise distances, one symmetric `n x n` matrix per exposure.
#[derive(Debug, Clone)]
pub struct SquaredDistances {
    per_dimension: Vec<Mat<f64>>,
    n_observations: usize,
}

impl SquaredDistances {
    #[must_use]
    pub fn from_exposures(exposures: &Mat<f64>) -> Self {
        let n = exposures.nrows();
        let per_dimension = (0..exposures.ncols())
            .map(|dim| {
                Mat::from_fn(n, n, |i, j| {
                    let diff = exposures[(i, dim)] - exposures[(j, dim)];
                    diff * diff
                })
            })
            .collect();
        Self {
            per_dimension,
            n_observations: n,
        }
    }

    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.per_dimension.len()
    }

    #[must_use]
    pub const fn n_observations(&self) -> usize {
        self.n_observations
    }

    #[must_use]
    pub fn dimension(&self, dim: usize) -> &Mat<f64> {
        &self.per_dimension[dim]
    }
}

/// Kernel matrix together with its exponent `-sum_m r_m D_m`.
#[derive(Debug, Clone)]
pub struct KernelCache {
    exponent: Mat<f64>,
    kernel: Mat<f64>,
}

impl KernelCache {
    #[must_use]
    pub fn build(distances: &SquaredDistances, bandwidths: &[Bandwidth]) -> Self {
        let n = distances.n_observations();
        let mut exponent = Mat::<f64>::zeros(n, n);
        for (dim, bandwidth) in bandwidths.iter().enumerate() {
            let value = bandwidth.value();
            if value == 0.0 {
                continue;
            }
            let squared = distances.dimension(dim);
            for j in 0..n {
                for i in 0..j {
                    exponent[(i, j)] -= value * squared[(i, j)];
                }
            }
        }
        Self::from_upper_exponent(exponent)
    }

    /// Kernel after replacing bandwidth `dim` (`old -> new`), leaving `self` untouched.
    #[must_use]
    pub fn with_bandwidth_change(
        &self,
        distances: &SquaredDistances,
        dim: usize,
        old: Bandwidth,
        new: Bandwidth,
    ) -> Self {
        let delta = new.value() - old.value();
        let n = self.exponent.nrows();
        let squared = distances.dimension(dim);
        let mut exponent = self.exponent.clone();
        if delta != 0.0 {
            for j in 0..n {
                for i in 0..j {
                    exponent[(i, j)] -= delta * squared[(i, j)];
                }
            }
        }
        Self::from_upper_exponent(exponent)
    }

    #[must_use]
    pub const fn kernel(&self) -> &Mat<f64> {
        &self.kernel
    }

    #[must_use]
    pub fn n_observations(&self) -> usize {
        self.kernel.nrows()
    }

    // Only the strict upper triangle of `exponent` is read; the result is
    // mirrored so the kernel is exactly symmetric with a unit diagonal.
    fn from_upper_exponent(mut exponent: Mat<f64>) -> Self {
        let n = exponent.nrows();
        let mut kernel = Mat::<f64>::zeros(n, n);
        for j in 0..n {
            exponent[(j, j)] = 0.0;
            kernel[(j, j)] = 1.0;
            for i in 0..j {
                let value = exponent[(i, j)].exp();
                exponent[(j, i)] = exponent[(i, j)];
                kernel[(i, j)] = value;
                kernel[(j, i)] = value;
            }
        }
        Self { exponent, kernel }
    }
}

/// Kernel between the rows of `exposures`.
#[must_use]
pub fn gaussian_kernel(exposures: &Mat<f64>, bandwidths: &[Bandwidth]) -> Mat<f64> {
    KernelCache::build(&SquaredDistances::from_exposures(exposures), bandwidths)
        .kernel()
        .clone()
}

/// Kernel between the rows of `left` and the rows of `right`.
#[must_use]
pub fn cross_kernel(left: &Mat<f64>, right: &Mat<f64>, bandwidths: &[Bandwidth]) -> Mat<f64> {
    Mat::from_fn(left.nrows(), right.nrows(), |i, j| {
        let exponent: f64 = bandwidths
            .iter()
            .enumerate()
            .filter(|(_, bandwidth)| bandwidth.is_included())
            .map(|(dim, bandwidth)| {
                let diff = left[(i, dim)] - right[(j, dim)];
                bandwidth.value() * diff * diff
            })
            .sum();
        (-exponent).exp()
    })
}
