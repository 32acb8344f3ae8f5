//! # Truncated Normal Initialization
//!
//! Fills tensors with samples from a normal distribution restricted to `[a, b]`, the
//! initializer vision transformers use for linear and convolution weights.
//!
//! Sampling goes through the inverse CDF: uniform values on `[cdf(a), cdf(b)]` are mapped
//! back with [`erfinv`](crate::erfinv), so no sample is rejected or redrawn.

use burn::{prelude::*, tensor::Distribution};

use crate::erfinv::Erfinv;

/// Standard normal CDF.
fn norm_cdf(x: f64) -> f64 {
    (1.0 + libm::erf(x / core::f64::consts::SQRT_2)) / 2.0
}

/// Fills a tensor with values from a truncated normal distribution.
///
/// # Arguments
///
/// * `x` - Tensor whose shape and device are used.
/// * `mean` - The mean of the normal distribution.
/// * `std` - The standard deviation of the normal distribution.
/// * `a` - The lower bound of the truncation.
/// * `b` - The upper bound of the truncation.
pub fn trunc_normal<B: Backend, const D: usize>(
    x: Tensor<B, D>,
    mean: f64,
    std: f64,
    a: f64,
    b: f64,
) -> Tensor<B, D> {
    let lower = norm_cdf((a - mean) / std);
    let upper = norm_cdf((b - mean) / std);

    // erf of the standardized samples is uniform on [2l - 1, 2u - 1].
    x.random_like(Distribution::Uniform(
        2.0_f64.mul_add(lower, -1.0),
        2.0_f64.mul_add(upper, -1.0),
    ))
    .erfinv()
    .mul_scalar(std * core::f64::consts::SQRT_2)
    .add_scalar(mean)
    // Rounding at the edges of the uniform range can step just past the bounds.
    .clamp(a, b)
}
