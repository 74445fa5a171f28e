//! Backend selection: CUDA when the `cuda` feature is enabled, NdArray (CPU)
//! otherwise.

use burn::backend::Autodiff;
use burn::tensor::backend::Backend;

#[cfg(feature = "cuda")]
pub type DefaultBackend = burn::backend::Cuda;

#[cfg(not(feature = "cuda"))]
pub type DefaultBackend = burn::backend::NdArray;

/// The autodiff backend used for training steps
pub type TrainingBackend = Autodiff<DefaultBackend>;

pub fn default_device() -> <DefaultBackend as Backend>::Device {
    <DefaultBackend as Backend>::Device::default()
}

/// Human-readable name of the compiled-in backend
pub fn backend_name() -> &'static str {
    if cfg!(feature = "cuda") {
        "CUDA (GPU)"
    } else {
        "NdArray (CPU)"
    }
}
