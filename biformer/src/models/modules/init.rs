//! Weight initialization shared by every BiFormer layer.
//!
//! Linear and convolution weights are drawn from a truncated normal with bounds at
//! `±2`; biases start at zero.

use burn::{
    module::Param,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        Linear, LinearConfig,
    },
    prelude::*,
};
use burn_extra_ops::trunc_normal;

const TRUNC_BOUND: f64 = 2.0;

/// Builds a linear layer with a truncated-normal weight and zero bias.
pub fn trunc_normal_linear<B: Backend>(
    d_input: usize,
    d_output: usize,
    std: f64,
    device: &B::Device,
) -> Linear<B> {
    let linear = LinearConfig::new(d_input, d_output).init(device);
    Linear {
        weight: Param::from_tensor(trunc_normal(
            linear.weight.val(),
            0.0,
            std,
            -TRUNC_BOUND,
            TRUNC_BOUND,
        )),
        bias: linear
            .bias
            .map(|bias| Param::from_tensor(bias.val().zeros_like())),
    }
}

/// Builds a convolution from `config`, then overwrites its parameters with a
/// truncated-normal weight and zero bias.
pub fn trunc_normal_conv2d<B: Backend>(
    config: Conv2dConfig,
    std: f64,
    device: &B::Device,
) -> Conv2d<B> {
    let mut conv = config.init(device);
    conv.weight = Param::from_tensor(trunc_normal(
        conv.weight.val(),
        0.0,
        std,
        -TRUNC_BOUND,
        TRUNC_BOUND,
    ));
    conv.bias = conv
        .bias
        .map(|bias| Param::from_tensor(bias.val().zeros_like()));
    conv
}
