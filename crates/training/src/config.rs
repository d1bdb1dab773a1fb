use anyhow::Context;
use models::PpnConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::dataset::ToyDataConfig;

const DEFAULT_CONFIG_NAME: &str = "ppn.toml";
const CONFIG_ENV: &str = "PPN_CONFIG";

/// Everything a training run needs. Image and crop sizes live in `model` and
/// are passed down explicitly.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainConfig {
    pub steps: usize,
    pub lr: f64,
    pub weight_decay: f32,
    pub log_every: usize,
    pub checkpoint_every: Option<usize>,
    pub checkpoint_out: PathBuf,
    /// Start from these weights instead of a fresh network.
    pub init_checkpoint: Option<PathBuf>,
    /// Score one held-out toy image every N steps.
    pub test_every: Option<usize>,
    /// Seed of the held-out toy images.
    pub test_seed: u64,
    pub model: PpnConfig,
    pub toydata: ToyDataConfig,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            steps: 100,
            lr: 1e-3,
            weight_decay: 5e-4,
            log_every: 10,
            checkpoint_every: None,
            checkpoint_out: PathBuf::from("checkpoints/ppn"),
            init_checkpoint: None,
            test_every: None,
            test_seed: 4242,
            model: PpnConfig::default(),
            toydata: ToyDataConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct TrainConfigFile {
    train: Option<TrainSection>,
    model: Option<PpnConfig>,
    toydata: Option<ToyDataConfig>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct TrainSection {
    steps: Option<usize>,
    lr: Option<f64>,
    weight_decay: Option<f32>,
    log_every: Option<usize>,
    checkpoint_every: Option<usize>,
    checkpoint_out: Option<String>,
    init_checkpoint: Option<String>,
    test_every: Option<usize>,
    test_seed: Option<u64>,
}

impl TrainConfig {
    /// Reads `$PPN_CONFIG` if set, else `ppn.toml` in the working directory if
    /// present, else defaults.
    pub fn load() -> anyhow::Result<Self> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Self::from_path(Path::new(&path));
        }
        let default = Path::new(DEFAULT_CONFIG_NAME);
        if default.exists() {
            return Self::from_path(default);
        }
        Ok(Self::default())
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_toml(&raw).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn from_toml(raw: &str) -> anyhow::Result<Self> {
        let file: TrainConfigFile = toml::from_str(raw)?;
        let cfg = Self::from_file(file);
        cfg.model.validate()?;
        Ok(cfg)
    }

    fn from_file(file: TrainConfigFile) -> Self {
        let defaults = Self::default();
        let train = file.train.unwrap_or_default();
        Self {
            steps: train.steps.unwrap_or(defaults.steps),
            lr: train.lr.unwrap_or(defaults.lr),
            weight_decay: train.weight_decay.unwrap_or(defaults.weight_decay),
            log_every: train.log_every.unwrap_or(defaults.log_every).max(1),
            checkpoint_every: train.checkpoint_every.or(defaults.checkpoint_every),
            checkpoint_out: train
                .checkpoint_out
                .map(PathBuf::from)
                .unwrap_or(defaults.checkpoint_out),
            init_checkpoint: train.init_checkpoint.map(PathBuf::from),
            test_every: train.test_every.or(defaults.test_every),
            test_seed: train.test_seed.unwrap_or(defaults.test_seed),
            model: file.model.unwrap_or(defaults.model),
            toydata: file.toydata.unwrap_or(defaults.toydata),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_file_merges_onto_defaults() {
        let cfg = TrainConfig::from_toml(
            r#"
            [train]
            steps = 5
            checkpoint_out = "out/ppn"

            [model]
            image_size = 256
            roi_cap = 10

            [toydata]
            max_tracks = 2
            "#,
        )
        .unwrap();
        assert_eq!(cfg.steps, 5);
        assert_eq!(cfg.lr, 1e-3);
        assert_eq!(cfg.checkpoint_out, PathBuf::from("out/ppn"));
        assert_eq!(cfg.model.image_size, 256);
        assert_eq!(cfg.model.roi_cap, 10);
        assert_eq!(cfg.model.ppn1_score_threshold, 0.5);
        assert_eq!(cfg.toydata.max_tracks, 2);
        assert_eq!(cfg.toydata.seed, 123);
        assert_eq!(cfg.test_every, None);
        assert_eq!(cfg.init_checkpoint, None);
    }

    #[test]
    fn held_out_and_warm_start_keys() {
        let cfg = TrainConfig::from_toml(
            r#"
            [train]
            test_every = 10
            test_seed = 5
            init_checkpoint = "checkpoints/ppn"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.test_every, Some(10));
        assert_eq!(cfg.test_seed, 5);
        assert_eq!(cfg.init_checkpoint, Some(PathBuf::from("checkpoints/ppn")));
    }

    #[test]
    fn unknown_keys_and_bad_models_are_rejected() {
        assert!(TrainConfig::from_toml("[train]\nstep = 5\n").is_err());
        assert!(TrainConfig::from_toml("[model]\nroi_cap = 0\n").is_err());
    }

    #[test]
    fn reads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[train]\nlog_every = 3").unwrap();
        let cfg = TrainConfig::from_path(file.path()).unwrap();
        assert_eq!(cfg.log_every, 3);
        assert!(TrainConfig::from_path(Path::new("/nonexistent/ppn.toml")).is_err());
    }
}
