use crate::postprocess::{postprocess, PostprocessConfig};
use crate::{InferenceBackend, InferenceModel};
use anyhow::Context;
use burn::module::Module;
use data_contracts::ImageBlob;
use models::PpnConfig;
use std::path::Path;
use std::sync::{Arc, Mutex};
use vision_core::interfaces::{DetectionResult, PointDetector};

/// Two-stage PPN detector over the inference backend.
pub struct PpnDetector {
    model: Arc<Mutex<InferenceModel<InferenceBackend>>>,
    post: PostprocessConfig,
}

impl PpnDetector {
    pub fn new(model: InferenceModel<InferenceBackend>, post: PostprocessConfig) -> Self {
        Self {
            model: Arc::new(Mutex::new(model)),
            post,
        }
    }
}

impl PointDetector for PpnDetector {
    fn detect(&mut self, frame_id: u64, blob: &ImageBlob) -> anyhow::Result<DetectionResult> {
        let model = self
            .model
            .lock()
            .map_err(|_| anyhow::anyhow!("detector model mutex poisoned"))?;
        let output = model
            .forward_inference(blob)
            .with_context(|| format!("inference failed on frame {frame_id}"))?;
        let detections = postprocess(&output, model.strides(), &self.post)?;
        log::debug!(
            "frame {frame_id}: {} rois, {} detections",
            output.rois.len(),
            detections.len()
        );
        Ok(DetectionResult {
            frame_id,
            detections,
            rois: output.rois.iter().map(|r| r.to_vec()).collect(),
        })
    }

    fn set_score_threshold(&mut self, threshold: f32) {
        if let Ok(mut model) = self.model.lock() {
            model.set_score_threshold(threshold);
        }
    }
}

/// Builds detectors from a checkpoint, or from fresh weights when none loads.
pub struct InferenceFactory;

impl InferenceFactory {
    pub fn build(
        &self,
        cfg: PpnConfig,
        post: PostprocessConfig,
        weights: Option<&Path>,
    ) -> anyhow::Result<Box<dyn PointDetector + Send>> {
        if let Some(det) = self.try_load_checkpoint(&cfg, post, weights) {
            return Ok(det);
        }
        log::warn!("InferenceFactory: no valid checkpoint provided; using freshly initialised weights.");
        let device = <InferenceBackend as burn::tensor::backend::Backend>::Device::default();
        let model = InferenceModel::<InferenceBackend>::new(cfg, &device)?;
        Ok(Box::new(PpnDetector::new(model, post)))
    }

    fn try_load_checkpoint(
        &self,
        cfg: &PpnConfig,
        post: PostprocessConfig,
        weights: Option<&Path>,
    ) -> Option<Box<dyn PointDetector + Send>> {
        let path = weights?;
        if !path.exists() {
            log::warn!("checkpoint {} does not exist", path.display());
            return None;
        }
        let device = <InferenceBackend as burn::tensor::backend::Backend>::Device::default();
        let recorder = burn::record::BinFileRecorder::<burn::record::FullPrecisionSettings>::new();
        let model = match InferenceModel::<InferenceBackend>::new(cfg.clone(), &device) {
            Ok(model) => model,
            Err(err) => {
                log::warn!("invalid detector configuration: {err}");
                return None;
            }
        };
        match model.load_file(path, &recorder, &device) {
            Ok(model) => {
                log::info!("loaded detector checkpoint {}", path.display());
                Some(Box::new(PpnDetector::new(model, post)))
            }
            Err(err) => {
                log::warn!(
                    "Failed to load detector checkpoint {}: {err}. Falling back to fresh weights.",
                    path.display()
                );
                None
            }
        }
    }
}
