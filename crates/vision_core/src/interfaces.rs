use data_contracts::{ImageBlob, PointClass};
use serde::{Deserialize, Serialize};

/// A labelled point found by a detector, in original image pixel space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointDetection {
    pub position: Vec<f32>,
    pub label: PointClass,
    /// Probability of `label` under the stage-2 softmax.
    pub confidence: f32,
}

impl PointDetection {
    pub fn distance_to(&self, coords: &[f32]) -> f32 {
        self.position
            .iter()
            .zip(coords)
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f32>()
            .sqrt()
    }
}

/// Result of running a detector on one image.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetectionResult {
    pub frame_id: u64,
    pub detections: Vec<PointDetection>,
    /// Stage-1 regions of interest used for this image (coarse feature-map frame).
    pub rois: Vec<Vec<f32>>,
}

impl DetectionResult {
    pub fn of_class(&self, class: PointClass) -> impl Iterator<Item = &PointDetection> {
        self.detections.iter().filter(move |d| d.label == class)
    }
}

/// Produces image blobs (toy generator, detector file reader, test fixture).
pub trait BlobSource {
    fn forward(&mut self) -> anyhow::Result<ImageBlob>;
}

/// Runs point detection on an image blob.
pub trait PointDetector {
    fn detect(&mut self, frame_id: u64, blob: &ImageBlob) -> anyhow::Result<DetectionResult>;
    /// Optional: adjust the stage-1 score threshold at runtime.
    fn set_score_threshold(&mut self, _threshold: f32) {}
}
