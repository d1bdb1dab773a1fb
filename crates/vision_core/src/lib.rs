//! vision_core: shared point-detector and data-provider interfaces.

pub mod interfaces;

pub mod prelude {
    pub use crate::interfaces::*;
}
