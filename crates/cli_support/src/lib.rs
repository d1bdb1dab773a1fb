pub mod common;

pub use common::{init_logging, PostprocessArgs, WeightsArgs};
