//! Global multi-head self-attention with a locally-enhanced positional encoding (LePE)
//! computed by a depthwise convolution over the values.

use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        Dropout, DropoutConfig, PaddingConfig2d,
    },
    prelude::*,
    tensor::activation::softmax,
};

use super::AttentionOp;
use crate::{
    error::{BiFormerError, BiFormerResult},
    models::modules::init::trunc_normal_conv2d,
};

/// Configuration for [`AttentionLePE`].
#[derive(Config, Debug)]
pub struct AttentionLePEConfig {
    pub dim: usize,
    #[config(default = 8)]
    pub num_heads: usize,
    #[config(default = false)]
    pub qkv_bias: bool,
    /// Overrides the default `head_dim^-0.5` attention scale.
    #[config(default = "None")]
    pub qk_scale: Option<f64>,
    #[config(default = 0.0)]
    pub attn_drop: f64,
    #[config(default = 0.0)]
    pub proj_drop: f64,
    /// Kernel of the depthwise LePE conv; 0 disables it.
    #[config(default = 5)]
    pub side_dwconv: usize,
    #[config(default = 0.02)]
    pub init_std: f64,
}

impl AttentionLePEConfig {
    /// # Errors
    ///
    /// Returns [`BiFormerError::InvalidConfiguration`] if `dim` is not divisible by
    /// `num_heads`.
    pub fn init<B: Backend>(&self, device: &B::Device) -> BiFormerResult<AttentionLePE<B>> {
        if self.num_heads == 0 || self.dim % self.num_heads != 0 {
            return Err(BiFormerError::InvalidConfiguration {
                reason: format!("dim {} is not divisible by num_heads {}", self.dim, self.num_heads),
            });
        }
        let head_dim = self.dim / self.num_heads;

        let lepe = (self.side_dwconv > 0).then(|| {
            let padding = self.side_dwconv / 2;
            trunc_normal_conv2d(
                Conv2dConfig::new([self.dim, self.dim], [self.side_dwconv, self.side_dwconv])
                    .with_padding(PaddingConfig2d::Explicit(padding, padding))
                    .with_groups(self.dim),
                self.init_std,
                device,
            )
        });

        Ok(AttentionLePE {
            qkv: trunc_normal_conv2d(
                Conv2dConfig::new([self.dim, self.dim * 3], [1, 1]).with_bias(self.qkv_bias),
                self.init_std,
                device,
            ),
            attn_drop: DropoutConfig::new(self.attn_drop).init(),
            proj: trunc_normal_conv2d(
                Conv2dConfig::new([self.dim, self.dim], [1, 1]),
                self.init_std,
                device,
            ),
            proj_drop: DropoutConfig::new(self.proj_drop).init(),
            lepe,
            num_heads: self.num_heads,
            scale: self.qk_scale.unwrap_or_else(|| (head_dim as f64).powf(-0.5)),
        })
    }
}

/// Full self-attention over all `H * W` positions of an NCHW feature map.
#[derive(Module, Debug)]
pub struct AttentionLePE<B: Backend> {
    qkv: Conv2d<B>,
    attn_drop: Dropout,
    proj: Conv2d<B>,
    proj_drop: Dropout,
    lepe: Option<Conv2d<B>>,
    num_heads: usize,
    scale: f64,
}

impl<B: Backend> AttentionLePE<B> {
    /// # Shapes
    /// - input: `[batch, dim, height, width]`
    /// - output: `[batch, dim, height, width]`
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let [batch, channels, height, width] = x.dims();
        let head_dim = channels / self.num_heads;
        let tokens = height * width;

        let qkv = self.qkv.forward(x);
        let v_map = qkv.clone().narrow(1, 2 * channels, channels);
        // [batch, 3, heads, head_dim, tokens] -> [3, batch, heads, tokens, head_dim]
        let qkv = qkv
            .reshape([batch, 3, self.num_heads, head_dim, tokens])
            .permute([1, 0, 2, 4, 3]);
        let q = qkv.clone().narrow(0, 0, 1).squeeze::<4>(0);
        let k = qkv.clone().narrow(0, 1, 1).squeeze::<4>(0);
        let v = qkv.narrow(0, 2, 1).squeeze::<4>(0);

        let attn = q.mul_scalar(self.scale).matmul(k.swap_dims(2, 3));
        let attn = self.attn_drop.forward(softmax(attn, 3));

        let output = attn
            .matmul(v)
            .swap_dims(2, 3)
            .reshape([batch, channels, height, width]);
        let output = match &self.lepe {
            Some(lepe) => output + lepe.forward(v_map),
            None => output,
        };

        self.proj_drop.forward(self.proj.forward(output))
    }
}

impl<B: Backend> AttentionOp<B> for AttentionLePE<B> {
    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.forward(x)
    }
}
