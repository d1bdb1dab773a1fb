use anyhow::Context;
use burn::module::{AutodiffModule, Module};
use burn::optim::decay::WeightDecayConfig;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use burn::tensor::backend::{AutodiffBackend, Backend};
use clap::{Parser, ValueEnum};
use data_contracts::ImageBlob;
use models::{LossBreakdown, PixelProposalNetwork, PpnConfig, StepDiagnostics};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use vision_core::interfaces::BlobSource;

use crate::config::TrainConfig;
use crate::dataset::{ToyDataConfig, ToyDataGenerator};
use crate::eval::{held_out_report, HeldOutReport};
use crate::{AdBackend, TrainBackend};

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum BackendKind {
    NdArray,
    Wgpu,
}

#[derive(Parser, Debug, Default)]
#[command(name = "train", about = "Train the two-stage pixel proposal network on toy data")]
pub struct TrainArgs {
    /// TOML config (defaults to $PPN_CONFIG, then ./ppn.toml).
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Backend to use (ndarray or wgpu if enabled).
    #[arg(long, value_enum)]
    pub backend: Option<BackendKind>,
    /// Number of training steps (one image each).
    #[arg(long)]
    pub steps: Option<usize>,
    /// Learning rate.
    #[arg(long)]
    pub lr: Option<f64>,
    /// Seed for the toy data generator.
    #[arg(long)]
    pub seed: Option<u64>,
    /// Image side length N.
    #[arg(long)]
    pub image_size: Option<usize>,
    /// Maximum tracks per toy image.
    #[arg(long)]
    pub max_tracks: Option<usize>,
    /// Maximum kinks per toy track.
    #[arg(long)]
    pub max_kinks: Option<usize>,
    /// Log losses every N steps.
    #[arg(long)]
    pub log_every: Option<usize>,
    /// Save an intermediate checkpoint every N steps.
    #[arg(long)]
    pub checkpoint_every: Option<usize>,
    /// Checkpoint output path (the recorder appends `.bin`).
    #[arg(long)]
    pub checkpoint_out: Option<PathBuf>,
    /// Warm start from a checkpoint written by an earlier run.
    #[arg(long)]
    pub init_checkpoint: Option<PathBuf>,
    /// Score a held-out toy image every N steps.
    #[arg(long)]
    pub test_every: Option<usize>,
    /// Seed for the held-out toy images.
    #[arg(long)]
    pub test_seed: Option<u64>,
}

impl TrainArgs {
    /// Config file values with command-line flags applied on top.
    pub fn resolve(&self) -> anyhow::Result<TrainConfig> {
        let mut cfg = match &self.config {
            Some(path) => TrainConfig::from_path(path)?,
            None => TrainConfig::load()?,
        };
        if let Some(v) = self.steps {
            cfg.steps = v;
        }
        if let Some(v) = self.lr {
            cfg.lr = v;
        }
        if let Some(v) = self.seed {
            cfg.toydata.seed = v;
        }
        if let Some(v) = self.image_size {
            cfg.model.image_size = v;
        }
        if let Some(v) = self.max_tracks {
            cfg.toydata.max_tracks = v;
        }
        if let Some(v) = self.max_kinks {
            cfg.toydata.max_kinks = v;
        }
        if let Some(v) = self.log_every {
            cfg.log_every = v.max(1);
        }
        if self.checkpoint_every.is_some() {
            cfg.checkpoint_every = self.checkpoint_every;
        }
        if let Some(v) = &self.checkpoint_out {
            cfg.checkpoint_out = v.clone();
        }
        if self.init_checkpoint.is_some() {
            cfg.init_checkpoint = self.init_checkpoint.clone();
        }
        if self.test_every.is_some() {
            cfg.test_every = self.test_every;
        }
        if let Some(v) = self.test_seed {
            cfg.test_seed = v;
        }
        cfg.model.validate()?;
        Ok(cfg)
    }
}

/// Loss terms of one step.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct StepReport {
    pub step: usize,
    #[serde(flatten)]
    pub losses: LossBreakdown,
}

/// Owns the network and its optimiser; one image per step.
pub struct Trainer<B: AutodiffBackend, O: Optimizer<PixelProposalNetwork<B>, B>> {
    model: PixelProposalNetwork<B>,
    optim: O,
    lr: f64,
    step: usize,
}

/// Adam with decoupled weight decay standing in for the L2 weight penalty.
pub fn adam_trainer<B: AutodiffBackend>(
    model: PixelProposalNetwork<B>,
    lr: f64,
    weight_decay: f32,
) -> Trainer<B, impl Optimizer<PixelProposalNetwork<B>, B>> {
    let optim = AdamConfig::new()
        .with_weight_decay(Some(WeightDecayConfig::new(weight_decay)))
        .init::<B, PixelProposalNetwork<B>>();
    Trainer::new(model, optim, lr)
}

impl<B: AutodiffBackend, O: Optimizer<PixelProposalNetwork<B>, B>> Trainer<B, O> {
    pub fn new(model: PixelProposalNetwork<B>, optim: O, lr: f64) -> Self {
        Self {
            model,
            optim,
            lr,
            step: 0,
        }
    }

    pub fn model(&self) -> &PixelProposalNetwork<B> {
        &self.model
    }

    pub fn into_model(self) -> PixelProposalNetwork<B> {
        self.model
    }

    pub fn steps_done(&self) -> usize {
        self.step
    }

    pub fn train_step(&mut self, blob: &ImageBlob) -> anyhow::Result<StepReport> {
        self.train_step_verbose(blob).map(|(report, _)| report)
    }

    /// Same as [`Trainer::train_step`], also returning the intermediate
    /// proposals, scores, ROIs and positive masks.
    pub fn train_step_verbose(&mut self, blob: &ImageBlob) -> anyhow::Result<(StepReport, StepDiagnostics)> {
        let out = self
            .model
            .forward_train(blob)
            .with_context(|| format!("training step {} failed", self.step))?;
        let losses = out.losses.breakdown()?;
        if !losses.total.is_finite() {
            anyhow::bail!("non-finite loss at step {}: {losses:?}", self.step);
        }
        let grads = GradientsParams::from_grads(out.losses.total().backward(), &self.model);
        self.model = self.optim.step(self.lr, self.model.clone(), grads);
        self.step += 1;
        log::debug!(
            "step {}: ppn1 positives {}, rois {}, ppn2 positives {}",
            self.step,
            out.diagnostics.ppn1_positives.iter().filter(|&&p| p).count(),
            out.diagnostics.rois.len(),
            out.diagnostics.ppn2_positives.iter().filter(|&&p| p).count()
        );
        Ok((
            StepReport {
                step: self.step,
                losses,
            },
            out.diagnostics,
        ))
    }
}

/// Writes `<path>.bin` and the model config as `<path>.json`.
pub fn save_checkpoint<B: Backend>(model: &PixelProposalNetwork<B>, path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    model
        .clone()
        .save_file(path, &recorder)
        .map_err(|e| anyhow::anyhow!("failed to save checkpoint: {e}"))?;
    let sidecar = path.with_extension("json");
    fs::write(&sidecar, serde_json::to_string_pretty(model.config())?)
        .with_context(|| format!("failed to write {}", sidecar.display()))?;
    Ok(())
}

/// Reads the config written next to a checkpoint by [`save_checkpoint`].
pub fn load_checkpoint_config(path: &Path) -> anyhow::Result<PpnConfig> {
    let sidecar = path.with_extension("json");
    let raw = fs::read_to_string(&sidecar).with_context(|| format!("failed to read {}", sidecar.display()))?;
    Ok(serde_json::from_str(&raw)?)
}

pub fn load_checkpoint<B: Backend>(path: &Path, device: &B::Device) -> anyhow::Result<PixelProposalNetwork<B>> {
    let cfg = load_checkpoint_config(path)?;
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    PixelProposalNetwork::<B>::new(cfg, device)?
        .load_file(path, &recorder, device)
        .map_err(|e| anyhow::anyhow!("failed to load checkpoint {}: {e}", path.display()))
}

/// What a finished run produced.
#[derive(Debug, Clone, Serialize)]
pub struct TrainSummary {
    pub steps: usize,
    pub final_loss: Option<f32>,
    pub held_out: Vec<HeldOutReport>,
    pub checkpoint: PathBuf,
}

pub fn run_train(args: TrainArgs) -> anyhow::Result<TrainSummary> {
    if let Some(kind) = args.backend {
        validate_backend_choice(kind)?;
    }
    let cfg = args.resolve()?;

    let device = <AdBackend as Backend>::Device::default();
    let model = match &cfg.init_checkpoint {
        Some(path) => {
            let model = load_checkpoint::<AdBackend>(path, &device)?;
            if model.config() != &cfg.model {
                log::warn!(
                    "warm start from {}: using the checkpoint's model config over the configured one",
                    path.display()
                );
            }
            log::info!("warm start from {}", path.display());
            model
        }
        None => PixelProposalNetwork::<AdBackend>::new(cfg.model.clone(), &device)?,
    };
    let image_size = model.config().image_size;
    log::info!(
        "training {} steps on {}x{} toy images (lr {}, seed {})",
        cfg.steps,
        image_size,
        image_size,
        cfg.lr,
        cfg.toydata.seed
    );

    let mut trainer = adam_trainer(model, cfg.lr, cfg.weight_decay);
    let mut source = ToyDataGenerator::new(image_size, cfg.toydata.clone())?;
    let mut test_source = match cfg.test_every {
        Some(every) if every > 0 => Some(ToyDataGenerator::new(
            image_size,
            ToyDataConfig {
                seed: cfg.test_seed,
                ..cfg.toydata.clone()
            },
        )?),
        _ => None,
    };

    let mut window = Vec::with_capacity(cfg.log_every);
    let mut final_loss = None;
    let mut held_out = Vec::new();
    for _ in 0..cfg.steps {
        let blob = source.forward()?;
        let report = trainer.train_step(&blob)?;
        final_loss = Some(report.losses.total);
        window.push(report.losses.total);
        if report.step % cfg.log_every == 0 {
            let avg = window.iter().sum::<f32>() / window.len() as f32;
            log::info!(
                "step {}: loss {:.4} (avg {:.4}) ppn1 point {:.4} class {:.4} ppn2 point {:.4} class {:.4}",
                report.step,
                report.losses.total,
                avg,
                report.losses.ppn1_point,
                report.losses.ppn1_class,
                report.losses.ppn2_point,
                report.losses.ppn2_class
            );
            window.clear();
        }
        if let (Some(every), Some(test)) = (cfg.test_every, test_source.as_mut()) {
            if report.step % every == 0 {
                let held = held_out_report(&trainer.model().clone().valid(), &test.forward()?, report.step)?;
                log::info!(
                    "step {} held-out: loss {:.4}, {} rois, {} detections, matched {:.3}, mean distance {}",
                    held.step,
                    held.losses.total,
                    held.rois,
                    held.summary.detections,
                    held.summary.matched_fraction,
                    held.summary.mean_distance.map_or_else(|| "n/a".to_string(), |d| format!("{d:.2}px"))
                );
                held_out.push(held);
            }
        }
        if let Some(every) = cfg.checkpoint_every {
            if every > 0 && report.step % every == 0 {
                let path = step_checkpoint_path(&cfg.checkpoint_out, report.step);
                save_checkpoint(&trainer.model().clone().valid(), &path)?;
                log::info!("saved checkpoint {}", path.display());
            }
        }
    }

    let steps = trainer.steps_done();
    let model = trainer.into_model().valid();
    save_checkpoint::<TrainBackend>(&model, &cfg.checkpoint_out)?;
    log::info!("Saved checkpoint to {}.bin", cfg.checkpoint_out.display());
    Ok(TrainSummary {
        steps,
        final_loss,
        held_out,
        checkpoint: cfg.checkpoint_out,
    })
}

fn step_checkpoint_path(base: &Path, step: usize) -> PathBuf {
    let stem = base
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("ppn");
    base.with_file_name(format!("{stem}_step{step:06}"))
}

pub fn validate_backend_choice(kind: BackendKind) -> anyhow::Result<()> {
    let built_wgpu = cfg!(feature = "backend-wgpu");
    match (kind, built_wgpu) {
        (BackendKind::Wgpu, false) => {
            anyhow::bail!("backend-wgpu feature not enabled; rebuild with --features backend-wgpu or choose ndarray backend")
        }
        (BackendKind::NdArray, true) => {
            log::warn!("built with backend-wgpu; training will still use the WGPU backend despite --backend nd-array");
            Ok(())
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_file_values() {
        let args = TrainArgs {
            steps: Some(3),
            image_size: Some(64),
            seed: Some(9),
            checkpoint_out: Some(PathBuf::from("out/x")),
            config: Some(PathBuf::from("/nonexistent.toml")),
            ..TrainArgs::default()
        };
        assert!(args.resolve().is_err());

        let args = TrainArgs {
            config: None,
            ..args
        };
        // No ppn.toml is expected in the crate directory during tests.
        if std::env::var("PPN_CONFIG").is_err() && !Path::new("ppn.toml").exists() {
            let cfg = args.resolve().unwrap();
            assert_eq!(cfg.steps, 3);
            assert_eq!(cfg.model.image_size, 64);
            assert_eq!(cfg.toydata.seed, 9);
            assert_eq!(cfg.checkpoint_out, PathBuf::from("out/x"));
        }
    }

    #[test]
    fn step_checkpoints_sit_next_to_final() {
        let path = step_checkpoint_path(Path::new("checkpoints/ppn"), 40);
        assert_eq!(path, PathBuf::from("checkpoints/ppn_step000040"));
    }
}
