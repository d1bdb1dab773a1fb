#![recursion_limit = "256"]

pub mod config;
pub mod dataset;
pub mod eval;
pub mod util;

pub use config::TrainConfig;
pub use dataset::{ToyDataConfig, ToyDataGenerator};
pub use eval::{held_out_report, EvalStats, HeldOutReport};
pub use util::{adam_trainer, run_train, StepReport, TrainArgs, TrainSummary, Trainer};

/// Backend alias for training/eval (NdArray by default; WGPU if enabled).
#[cfg(feature = "backend-wgpu")]
pub type TrainBackend = burn_wgpu::Wgpu<f32>;
#[cfg(not(feature = "backend-wgpu"))]
pub type TrainBackend = burn_ndarray::NdArray<f32>;

pub type AdBackend = burn::backend::Autodiff<TrainBackend>;
