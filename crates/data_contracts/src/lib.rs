//! Shared data contracts for detector images and ground-truth points.

pub mod blob;
pub mod points;

pub use blob::{ImageBlob, ImageTensor};
pub use points::{GtPixel, PointClass, ValidationError};
