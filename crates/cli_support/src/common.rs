use clap::Args;
use log::LevelFilter;
use std::path::PathBuf;

/// Logs to stderr at `info` unless `RUST_LOG` says otherwise.
pub fn init_logging() {
    env_logger::Builder::new()
        .filter_level(LevelFilter::Info)
        .filter(Some("wgpu"), LevelFilter::Warn)
        .parse_default_env()
        .try_init()
        .ok();
}

/// Optional detector checkpoint shared by the inference-side binaries.
#[derive(Debug, Clone, Default, Args)]
pub struct WeightsArgs {
    /// Checkpoint written by `train` (the `.bin` file).
    #[arg(long)]
    pub checkpoint: Option<PathBuf>,
}

/// Post-processing knobs applied to stage-2 proposals.
#[derive(Debug, Clone, Copy, Args)]
pub struct PostprocessArgs {
    /// Drop detections whose class probability is below this.
    #[arg(long, default_value_t = 0.0)]
    pub min_confidence: f32,
    /// Merge detections within this many pixels, keeping the most confident.
    #[arg(long)]
    pub cluster_radius: Option<f32>,
    /// Drop detections labelled background.
    #[arg(long, default_value_t = false)]
    pub drop_background: bool,
}
