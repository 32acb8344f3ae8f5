//! Token mixers used inside BiFormer blocks.
//!
//! A block's `topk` selects the mixer: a positive value routes each region to that many
//! key regions, `-1` falls back to plain global attention.

pub mod lepe;
pub mod routing;

use burn::prelude::*;

pub use lepe::{AttentionLePE, AttentionLePEConfig};
pub use routing::{BiLevelRoutingAttention, BiLevelRoutingAttentionConfig};

use crate::error::{BiFormerError, BiFormerResult};

/// Shape-preserving attention over an NCHW feature map.
pub trait AttentionOp<B: Backend> {
    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4>;
}

/// Which mixer a block uses, resolved from its `topk` setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttentionKind {
    Routed { topk: usize },
    Plain,
}

impl AttentionKind {
    /// # Errors
    ///
    /// Returns [`BiFormerError::InvalidTopk`] for any `topk` that is neither positive nor `-1`.
    pub fn from_topk(topk: i64) -> BiFormerResult<Self> {
        match topk {
            -1 => Ok(Self::Plain),
            k if k > 0 => Ok(Self::Routed { topk: k as usize }),
            _ => Err(BiFormerError::InvalidTopk { topk }),
        }
    }
}

/// The mixer held by a block.
#[derive(Module, Debug)]
pub enum Attention<B: Backend> {
    Routed(BiLevelRoutingAttention<B>),
    Plain(AttentionLePE<B>),
}

impl<B: Backend> Attention<B> {
    pub fn kind(&self) -> AttentionKind {
        match self {
            Self::Routed(attn) => AttentionKind::Routed { topk: attn.topk() },
            Self::Plain(_) => AttentionKind::Plain,
        }
    }
}

impl<B: Backend> AttentionOp<B> for Attention<B> {
    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        match self {
            Self::Routed(attn) => attn.forward(x),
            Self::Plain(attn) => attn.forward(x),
        }
    }
}
