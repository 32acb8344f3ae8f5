//! Network configuration for BiFormer.
//!
//! All per-stage parameters are fixed-size arrays over the four stages.

use burn::prelude::*;

use crate::{
    error::{BiFormerError, BiFormerResult},
    models::{attention::AttentionKind, modules::NormLayer},
};

/// Number of stages in the network.
pub const NUM_STAGES: usize = 4;

/// Configuration of the BiFormer (NCHW) network.
#[derive(Config, Debug)]
pub struct BiFormerConfig {
    /// Channels of the input image.
    #[config(default = "3")]
    pub in_channels: usize,
    /// Width of the classification head; 0 returns pooled features instead of logits.
    #[config(default = "1000")]
    pub num_classes: usize,
    /// Blocks per stage.
    #[config(default = "[2, 2, 6, 2]")]
    pub depth: [usize; NUM_STAGES],
    /// Channel width per stage.
    #[config(default = "[96, 192, 384, 768]")]
    pub embed_dim: [usize; NUM_STAGES],
    /// Channels per attention head; heads per stage = width / head_dim.
    #[config(default = "32")]
    pub head_dim: usize,
    /// Overrides the attention scale of routed stages.
    #[config(default = "None")]
    pub qk_scale: Option<f64>,
    /// Stochastic-depth rate of the last block; earlier blocks ramp up linearly from 0.
    #[config(default = "0.0")]
    pub drop_path_rate: f64,
    /// Dropout on the pooled features before the head.
    #[config(default = "0.0")]
    pub drop_rate: f64,
    /// Stage indices that request activation checkpointing.
    #[config(default = "Vec::new()")]
    pub use_checkpoint_stages: Vec<usize>,
    #[config(default = "[4.0; NUM_STAGES]")]
    pub mlp_ratios: [f64; NUM_STAGES],
    /// Norm of the stem, the downsampling layers and, unless overridden, the final norm.
    #[config(default = "NormLayer::LayerNorm2d")]
    pub norm_layer: NormLayer,
    #[config(default = "None")]
    pub pre_head_norm_layer: Option<NormLayer>,
    /// Routing window grid per side, per stage.
    #[config(default = "[7; NUM_STAGES]")]
    pub n_wins: [usize; NUM_STAGES],
    /// Routed key regions per stage; `-1` selects plain global attention.
    #[config(default = "[1, 4, 16, -1]")]
    pub topks: [i64; NUM_STAGES],
    /// LePE kernel of routed attention; 0 disables it.
    #[config(default = "5")]
    pub side_dwconv: usize,
    #[config(default = "1e-6")]
    pub layer_norm_eps: f64,
    #[config(default = "0.02")]
    pub init_std: f64,
}

impl BiFormerConfig {
    /// BiFormer-STL in NCHW layout as published with the ImageNet-1k checkpoint.
    pub fn biformer_stl_nchw() -> Self {
        Self::new()
            .with_depth([2, 2, 6, 2])
            .with_embed_dim([96, 192, 384, 768])
            .with_head_dim(32)
            .with_mlp_ratios([4.0; NUM_STAGES])
            .with_norm_layer(NormLayer::BatchNorm2d)
            .with_n_wins([7; NUM_STAGES])
            .with_topks([1, 4, 16, -1])
            .with_side_dwconv(5)
    }

    /// Attention heads per stage.
    pub fn num_heads(&self) -> [usize; NUM_STAGES] {
        self.embed_dim.map(|dim| dim / self.head_dim.max(1))
    }

    /// Attention variant of every stage.
    ///
    /// # Errors
    ///
    /// Returns [`BiFormerError::InvalidTopk`] for the first stage whose `topk` is invalid.
    pub fn attention_kinds(&self) -> BiFormerResult<[AttentionKind; NUM_STAGES]> {
        let mut kinds = [AttentionKind::Plain; NUM_STAGES];
        for (kind, &topk) in kinds.iter_mut().zip(&self.topks) {
            *kind = AttentionKind::from_topk(topk)?;
        }
        Ok(kinds)
    }

    /// Whether any stage asked for activation checkpointing, in which case training should
    /// run on an `Autodiff<B, BalancedCheckpointing>` backend.
    pub fn requests_checkpointing(&self) -> bool {
        !self.use_checkpoint_stages.is_empty()
    }

    /// Resolution divisor at the input of `stage`: 4 for the stem, doubled by each merge.
    pub const fn stage_stride(stage: usize) -> usize {
        4 << stage
    }

    /// Validates the configuration for logical consistency.
    ///
    /// # Errors
    ///
    /// Returns [`BiFormerError::InvalidTopk`] for a routing budget that is neither positive
    /// nor `-1`, and [`BiFormerError::InvalidConfiguration`] for any other inconsistency.
    pub fn validate(&self) -> BiFormerResult<()> {
        if self.in_channels == 0 {
            return Err(invalid("in_channels must be positive".to_owned()));
        }

        if self.head_dim == 0 {
            return Err(invalid("head_dim must be positive".to_owned()));
        }

        for (stage, &dim) in self.embed_dim.iter().enumerate() {
            if dim == 0 || dim % self.head_dim != 0 {
                return Err(invalid(format!(
                    "embed_dim[{stage}] = {dim} is not a positive multiple of head_dim {}",
                    self.head_dim
                )));
            }
        }

        let kinds = self.attention_kinds()?;
        for (stage, (kind, &n_win)) in kinds.iter().zip(&self.n_wins).enumerate() {
            if n_win == 0 {
                return Err(invalid(format!("n_wins[{stage}] must be positive")));
            }
            if let AttentionKind::Routed { topk } = *kind {
                if topk > n_win * n_win {
                    return Err(invalid(format!(
                        "topks[{stage}] = {topk} exceeds the {} regions of a {n_win}x{n_win} grid",
                        n_win * n_win
                    )));
                }
            }
        }

        for (stage, &ratio) in self.mlp_ratios.iter().enumerate() {
            if !ratio.is_finite() || ratio <= 0.0 {
                return Err(invalid(format!("mlp_ratios[{stage}] must be positive, got {ratio}")));
            }
        }

        if let Some(&stage) = self.use_checkpoint_stages.iter().find(|&&s| s >= NUM_STAGES) {
            return Err(invalid(format!(
                "use_checkpoint_stages contains {stage}, but there are only {NUM_STAGES} stages"
            )));
        }

        for (name, rate) in [
            ("drop_path_rate", self.drop_path_rate),
            ("drop_rate", self.drop_rate),
        ] {
            if !(0.0..1.0).contains(&rate) {
                return Err(invalid(format!("{name} must be in [0, 1), got {rate}")));
            }
        }

        Ok(())
    }
}

fn invalid(reason: String) -> BiFormerError {
    BiFormerError::InvalidConfiguration { reason }
}
