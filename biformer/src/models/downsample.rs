//! Patch embedding and the strided downsampling layers between stages.

use burn::{
    nn::conv::{Conv2d, Conv2dConfig},
    prelude::*,
};

use super::modules::{init::trunc_normal_conv2d, Norm2d, NormLayer};

/// Configuration for [`Downsample`].
#[derive(Config, Debug)]
pub struct DownsampleConfig {
    pub in_channels: usize,
    pub out_channels: usize,
    /// Kernel size and stride of the projection.
    pub patch_size: usize,
    /// Normalize before the projection (between stages) instead of after it (stem).
    #[config(default = false)]
    pub norm_first: bool,
    #[config(default = "NormLayer::LayerNorm2d")]
    pub norm_layer: NormLayer,
    #[config(default = 1e-6)]
    pub epsilon: f64,
    #[config(default = 0.02)]
    pub init_std: f64,
}

impl DownsampleConfig {
    /// Stem: 4x4 stride-4 conv, then norm.
    pub fn stem(in_channels: usize, out_channels: usize) -> Self {
        Self::new(in_channels, out_channels, 4)
    }

    /// Between stages: norm, then 2x2 stride-2 conv.
    pub fn merge(in_channels: usize, out_channels: usize) -> Self {
        Self::new(in_channels, out_channels, 2).with_norm_first(true)
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Downsample<B> {
        let norm_channels = if self.norm_first {
            self.in_channels
        } else {
            self.out_channels
        };
        Downsample {
            proj: trunc_normal_conv2d(
                Conv2dConfig::new(
                    [self.in_channels, self.out_channels],
                    [self.patch_size, self.patch_size],
                )
                .with_stride([self.patch_size, self.patch_size]),
                self.init_std,
                device,
            ),
            norm: self.norm_layer.init(norm_channels, self.epsilon, device),
            norm_first: self.norm_first,
            patch_size: self.patch_size,
        }
    }
}

/// Strided convolution with a norm before or after it.
#[derive(Module, Debug)]
pub struct Downsample<B: Backend> {
    proj: Conv2d<B>,
    norm: Norm2d<B>,
    norm_first: bool,
    patch_size: usize,
}

impl<B: Backend> Downsample<B> {
    pub fn out_channels(&self) -> usize {
        self.proj.weight.val().dims()[0]
    }

    /// Spatial reduction factor.
    pub const fn patch_size(&self) -> usize {
        self.patch_size
    }

    /// # Shapes
    /// - input: `[batch, in_channels, height, width]`
    /// - output: `[batch, out_channels, height / patch_size, width / patch_size]`
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        if self.norm_first {
            self.proj.forward(self.norm.forward(x))
        } else {
            self.norm.forward(self.proj.forward(x))
        }
    }
}
