//! # BiFormer-Burn
//!
//! BiFormer, a vision transformer built on bi-level routing attention, in its NCHW
//! variant, implemented with the Burn deep learning framework.
//!
//! ## Modules
//!
//! - `config`: `BiFormerConfig`, the per-stage architecture description and its presets.
//! - `error`: the crate's error type.
//! - `models`: norm layers, attention operators, blocks, stages, downsampling and the
//!   network itself.
//! - `registry`: named models and where their pretrained checkpoints live.
//! - `weights`: fetching, hash verification and (with `pretrained`) loading of checkpoints.
//!
//! ## Key Components
//!
//! - `BiFormer`: the classification network.
//! - `BiFormerConfig`: drives construction; `BiFormerConfig::biformer_stl_nchw()` is the
//!   published model.
//! - `ModelRegistry`: resolves model names to configs and checkpoints.

mod config;
mod error;
pub mod models;
mod registry;
mod weights;

#[cfg(test)]
mod tests;

#[doc(inline)]
pub use config::{BiFormerConfig, NUM_STAGES};
#[doc(inline)]
pub use error::{BiFormerError, BiFormerResult};
#[doc(inline)]
pub use models::{
    attention::{AttentionKind, AttentionOp},
    modules::{DataFormat, NormLayer},
    BiFormer, BiFormerRecord,
};
#[doc(inline)]
pub use registry::{CheckpointSource, ModelRegistry, ModelSpec};
#[doc(inline)]
pub use weights::{
    fetch_checkpoint, hash_prefix_from_file_name, sha256_file, verify_checkpoint,
    CheckpointFetcher, LocalFetcher,
};
#[cfg(feature = "pretrained")]
#[doc(inline)]
pub use weights::{load_pretrained, load_pytorch_checkpoint, HttpFetcher};
