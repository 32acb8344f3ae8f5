//! Building blocks shared by the BiFormer network: normalization layers, the
//! convolutional feed-forward network, the local feature block and weight initializers.

pub mod init;
pub mod local_block;
pub mod mlp;
pub mod norm;

pub use local_block::{LocalBlock, LocalBlockConfig};
pub use mlp::{ConvMlp, ConvMlpConfig};
pub use norm::{ChannelLayerNorm, ChannelLayerNormConfig, DataFormat, Norm2d, NormLayer};
