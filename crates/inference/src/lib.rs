#![recursion_limit = "256"]

pub mod factory;
pub mod postprocess;

#[cfg(feature = "backend-wgpu")]
pub type InferenceBackend = burn_wgpu::Wgpu<f32>;
#[cfg(not(feature = "backend-wgpu"))]
pub type InferenceBackend = burn_ndarray::NdArray<f32>;

pub type InferenceModel<B> = models::PixelProposalNetwork<B>;

pub use factory::{InferenceFactory, PpnDetector};
pub use postprocess::{postprocess, PostprocessConfig};

pub mod prelude {
    pub use crate::factory::{InferenceFactory, PpnDetector};
    pub use crate::postprocess::{cluster_points, postprocess, to_image_space, PostprocessConfig};
    pub use crate::{InferenceBackend, InferenceModel};
}
