//! Distance-based detection metrics against ground-truth points.

use burn::tensor::backend::Backend;
use data_contracts::{GtPixel, ImageBlob};
use inference::{postprocess, PostprocessConfig};
use models::{LossBreakdown, PixelProposalNetwork};
use serde::Serialize;
use vision_core::interfaces::DetectionResult;

/// Running totals over evaluated images.
#[derive(Debug, Clone, Default)]
pub struct EvalStats {
    match_distance: f32,
    images: usize,
    gt_points: usize,
    matched: usize,
    detections: usize,
    /// Distance from each ground-truth point to the closest same-class detection.
    distances: Vec<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EvalSummary {
    pub images: usize,
    pub gt_points: usize,
    pub detections: usize,
    /// Mean over ground-truth points that had any same-class detection.
    pub mean_distance: Option<f32>,
    /// Fraction of ground-truth points with a same-class detection within the match distance.
    pub matched_fraction: f32,
}

impl EvalStats {
    pub fn new(match_distance: f32) -> Self {
        Self {
            match_distance,
            ..Self::default()
        }
    }

    pub fn add(&mut self, gt: &[GtPixel], result: &DetectionResult) {
        self.images += 1;
        self.detections += result.detections.len();
        for point in gt {
            self.gt_points += 1;
            let closest = result
                .of_class(point.label)
                .map(|d| d.distance_to(&point.coords))
                .min_by(f32::total_cmp);
            if let Some(d) = closest {
                self.distances.push(d);
                if d <= self.match_distance {
                    self.matched += 1;
                }
            }
        }
    }

    pub fn summary(&self) -> EvalSummary {
        let mean_distance = (!self.distances.is_empty())
            .then(|| self.distances.iter().sum::<f32>() / self.distances.len() as f32);
        let matched_fraction = if self.gt_points == 0 {
            0.0
        } else {
            self.matched as f32 / self.gt_points as f32
        };
        EvalSummary {
            images: self.images,
            gt_points: self.gt_points,
            detections: self.detections,
            mean_distance,
            matched_fraction,
        }
    }
}

/// Losses and detections of the current weights on an image kept out of training.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct HeldOutReport {
    pub step: usize,
    pub losses: LossBreakdown,
    pub rois: usize,
    pub summary: EvalSummary,
}

/// Scores `blob` with both forward passes; detections match within one fine cell.
pub fn held_out_report<B: Backend>(
    model: &PixelProposalNetwork<B>,
    blob: &ImageBlob,
    step: usize,
) -> anyhow::Result<HeldOutReport> {
    let losses = model.forward_train(blob)?.losses.breakdown()?;
    let output = model.forward_inference(blob)?;
    let strides = model.strides();
    let result = DetectionResult {
        frame_id: step as u64,
        detections: postprocess(&output, strides, &PostprocessConfig::default())?,
        rois: output.rois.iter().map(|r| r.to_vec()).collect(),
    };
    let mut stats = EvalStats::new(strides.fine as f32);
    stats.add(&blob.gt_pixels, &result);
    Ok(HeldOutReport {
        step,
        losses,
        rois: result.rois.len(),
        summary: stats.summary(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use data_contracts::PointClass;
    use vision_core::interfaces::PointDetection;

    fn det(position: [f32; 2], label: PointClass) -> PointDetection {
        PointDetection {
            position: position.to_vec(),
            label,
            confidence: 0.9,
        }
    }

    #[test]
    fn distances_only_count_same_class() {
        let gt = vec![
            GtPixel::new(vec![10.0, 10.0], PointClass::TrackEdge),
            GtPixel::new(vec![50.0, 50.0], PointClass::ShowerStart),
            GtPixel::new(vec![90.0, 90.0], PointClass::ShowerStart),
        ];
        let result = DetectionResult {
            frame_id: 0,
            detections: vec![
                det([13.0, 14.0], PointClass::TrackEdge),
                det([50.0, 52.0], PointClass::TrackEdge),
                det([50.0, 56.0], PointClass::ShowerStart),
                det([90.0, 80.0], PointClass::ShowerStart),
            ],
            rois: vec![],
        };
        let mut stats = EvalStats::new(8.0);
        stats.add(&gt, &result);
        let summary = stats.summary();
        assert_eq!(summary.gt_points, 3);
        assert_eq!(summary.detections, 4);
        // 5 for the track edge, 6 and 10 for the shower starts.
        assert_eq!(summary.mean_distance, Some(7.0));
        assert!((summary.matched_fraction - 2.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn no_detections_means_no_distance() {
        let mut stats = EvalStats::new(8.0);
        stats.add(
            &[GtPixel::new(vec![1.0, 1.0], PointClass::TrackEdge)],
            &DetectionResult::default(),
        );
        let summary = stats.summary();
        assert_eq!(summary.mean_distance, None);
        assert_eq!(summary.matched_fraction, 0.0);
    }
}
