use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        Gelu,
    },
    prelude::*,
};

use super::init::trunc_normal_conv2d;

/// Configuration for the per-pixel feed-forward network of a BiFormer block.
#[derive(Config, Debug)]
pub struct ConvMlpConfig {
    dim: usize,
    #[config(default = 4.0)]
    mlp_ratio: f64,
    #[config(default = 0.02)]
    init_std: f64,
}

impl ConvMlpConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> ConvMlp<B> {
        let hidden = (self.mlp_ratio * self.dim as f64) as usize;
        ConvMlp {
            fc1: trunc_normal_conv2d(Conv2dConfig::new([self.dim, hidden], [1, 1]), self.init_std, device),
            act: Gelu::new(),
            fc2: trunc_normal_conv2d(Conv2dConfig::new([hidden, self.dim], [1, 1]), self.init_std, device),
        }
    }
}

/// 1x1 conv -> GELU -> 1x1 conv, mixing channels only.
#[derive(Module, Debug)]
pub struct ConvMlp<B: Backend> {
    fc1: Conv2d<B>,
    act: Gelu,
    fc2: Conv2d<B>,
}

impl<B: Backend> ConvMlp<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.fc1.forward(x);
        let x = self.act.forward(x);
        self.fc2.forward(x)
    }

    pub fn hidden_features(&self) -> usize {
        self.fc1.weight.val().dims()[0]
    }
}
