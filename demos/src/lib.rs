//! BiFormer demos
//!
//! ## Available binaries
//!
//! - `model_manager`: list registered models, show their configuration, run a forward or
//!   forward-backward pass on random input and (with `pretrained`) download and verify
//!   checkpoints.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin model_manager -- list
//! cargo run --bin model_manager -- forward biformer_stl_nchw --size 224
//! cargo run --bin model_manager -- backward biformer_stl_nchw --checkpoint-stages 0 1
//! cargo run --bin model_manager --features pretrained -- download biformer_stl_nchw
//! ```

pub mod backend;

pub use backend::{
    create_device, get_backend_name, get_training_backend_name, CheckpointedTrainingBackend,
    SelectedBackend, SelectedDevice, TrainingBackend,
};
