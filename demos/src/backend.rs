//! Backend selection utilities for the BiFormer demos
//!
//! The inference backend is picked from Cargo features. Training passes wrap it in
//! [`Autodiff`], with activation checkpointing when the model configuration requests it
//! for any stage.

use burn::backend::{autodiff::checkpoint::strategy::BalancedCheckpointing, Autodiff};
use cfg_if::cfg_if;

cfg_if! {
    if #[cfg(feature = "cuda")] {
        use burn::backend::cuda::{Cuda, CudaDevice};

        /// Selected backend type
        pub type SelectedBackend = Cuda;
        /// Selected device type
        pub type SelectedDevice = CudaDevice;

        /// Creates the appropriate device for the selected backend
        pub fn create_device() -> SelectedDevice {
            CudaDevice::default()
        }

        /// Gets the backend name for logging purposes
        pub const fn get_backend_name() -> &'static str {
            "CUDA (NVIDIA GPU)"
        }
    } else if #[cfg(feature = "wgpu")] {
        use burn::backend::wgpu::{Wgpu, WgpuDevice};

        /// Selected backend type
        pub type SelectedBackend = Wgpu;
        /// Selected device type
        pub type SelectedDevice = WgpuDevice;

        /// Creates the appropriate device for the selected backend
        pub fn create_device() -> SelectedDevice {
            WgpuDevice::default()
        }

        /// Gets the backend name for logging purposes
        pub const fn get_backend_name() -> &'static str {
            "WGPU (GPU)"
        }
    } else {
        // Default to ndarray backend
        use burn::backend::ndarray::{NdArray, NdArrayDevice};

        /// Selected backend type
        pub type SelectedBackend = NdArray;
        /// Selected device type
        pub type SelectedDevice = NdArrayDevice;

        /// Creates the appropriate device for the selected backend
        pub fn create_device() -> SelectedDevice {
            NdArrayDevice::default()
        }

        /// Gets the backend name for logging purposes
        pub const fn get_backend_name() -> &'static str {
            "NdArray (CPU)"
        }
    }
}

/// Autodiff backend keeping every intermediate activation
pub type TrainingBackend = Autodiff<SelectedBackend>;
/// Autodiff backend recomputing cheap activations during the backward pass
pub type CheckpointedTrainingBackend = Autodiff<SelectedBackend, BalancedCheckpointing>;

/// Gets the autodiff backend name for logging purposes
pub const fn get_training_backend_name(checkpointing: bool) -> &'static str {
    if checkpointing {
        "Autodiff with balanced checkpointing"
    } else {
        "Autodiff"
    }
}
