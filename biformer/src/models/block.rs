use burn::prelude::*;
use burn_extra_ops::{DropPath, DropPathConfig};

use super::{
    attention::{
        Attention, AttentionKind, AttentionLePEConfig, AttentionOp, BiLevelRoutingAttentionConfig,
    },
    modules::{ChannelLayerNorm, ChannelLayerNormConfig, ConvMlp, ConvMlpConfig, DataFormat},
};
use crate::error::BiFormerResult;

/// Configuration for [`BiFormerBlock`].
#[derive(Config, Debug)]
pub struct BiFormerBlockConfig {
    pub dim: usize,
    #[config(default = 0.0)]
    pub drop_path: f64,
    #[config(default = 8)]
    pub num_heads: usize,
    #[config(default = 7)]
    pub n_win: usize,
    #[config(default = "None")]
    pub qk_scale: Option<f64>,
    /// Positive: routed attention with this many key regions. `-1`: plain attention.
    #[config(default = 4)]
    pub topk: i64,
    #[config(default = 4.0)]
    pub mlp_ratio: f64,
    #[config(default = 5)]
    pub side_dwconv: usize,
    #[config(default = 1e-6)]
    pub epsilon: f64,
    #[config(default = 0.02)]
    pub init_std: f64,
}

impl BiFormerBlockConfig {
    /// # Errors
    ///
    /// Returns [`crate::BiFormerError::InvalidTopk`] if `topk` is neither positive nor `-1`,
    /// or the attention operator's configuration error.
    pub fn init<B: Backend>(&self, device: &B::Device) -> BiFormerResult<BiFormerBlock<B>> {
        let attn = match AttentionKind::from_topk(self.topk)? {
            AttentionKind::Routed { topk } => Attention::Routed(
                BiLevelRoutingAttentionConfig::new(self.dim)
                    .with_num_heads(self.num_heads)
                    .with_n_win(self.n_win)
                    .with_topk(topk)
                    .with_qk_scale(self.qk_scale)
                    .with_side_dwconv(self.side_dwconv)
                    .with_init_std(self.init_std)
                    .init(device)?,
            ),
            // The non-routed fallback always runs with its own head count and LePE kernel.
            AttentionKind::Plain => Attention::Plain(
                AttentionLePEConfig::new(self.dim)
                    .with_init_std(self.init_std)
                    .init(device)?,
            ),
        };

        let norm = || {
            ChannelLayerNormConfig::new(self.dim)
                .with_epsilon(self.epsilon)
                .with_data_format(DataFormat::ChannelsFirst)
                .init(device)
        };

        Ok(BiFormerBlock {
            norm1: norm(),
            attn,
            norm2: norm(),
            mlp: ConvMlpConfig::new(self.dim)
                .with_mlp_ratio(self.mlp_ratio)
                .with_init_std(self.init_std)
                .init(device),
            drop_path: DropPathConfig::new().with_drop_prob(self.drop_path).init(),
        })
    }
}

/// Pre-norm transformer block on NCHW tensors.
#[derive(Module, Debug)]
pub struct BiFormerBlock<B: Backend> {
    norm1: ChannelLayerNorm<B>,
    attn: Attention<B>,
    norm2: ChannelLayerNorm<B>,
    mlp: ConvMlp<B>,
    drop_path: DropPath,
}

impl<B: Backend> BiFormerBlock<B> {
    pub fn attention_kind(&self) -> AttentionKind {
        self.attn.kind()
    }

    pub fn drop_path_prob(&self) -> f64 {
        self.drop_path.drop_prob()
    }

    /// # Shapes
    /// - input: `[batch, dim, height, width]`
    /// - output: `[batch, dim, height, width]`
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = x.clone()
            + self
                .drop_path
                .forward(self.attn.forward(self.norm1.forward(x)));
        x.clone() + self.drop_path.forward(self.mlp.forward(self.norm2.forward(x)))
    }
}
