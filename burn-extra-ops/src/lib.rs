//! Additional operations for the Burn deep learning framework
//!
//! This crate provides operations that vision transformers rely on but that are not
//! yet available in the core Burn framework.

mod drop_path;
mod erfinv;
mod trunc_normal;

#[doc(inline)]
pub use drop_path::{DropPath, DropPathConfig};
#[doc(inline)]
pub use erfinv::{erfinv, Erfinv};
#[doc(inline)]
pub use trunc_normal::trunc_normal;
