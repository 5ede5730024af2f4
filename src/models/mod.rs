//! # Models
//!
//! Bayesian kernel machine regression and the small matrix helpers it shares.

pub mod bkmr;
pub mod matrix_ops;
