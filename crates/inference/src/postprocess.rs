//! Maps stage-2 proposals back to image pixels and turns them into labelled
//! point detections.

use data_contracts::PointClass;
use models::tensor_util::argmax;
use models::{InferenceOutput, PpnError, PpnResult, StrideContract};
use serde::{Deserialize, Serialize};
use vision_core::interfaces::PointDetection;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostprocessConfig {
    /// Detections below this confidence are dropped.
    pub min_confidence: f32,
    /// Merge detections closer than this many pixels, keeping the most confident.
    pub cluster_radius: Option<f32>,
    pub drop_background: bool,
}

impl Default for PostprocessConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.0,
            cluster_radius: None,
            drop_background: false,
        }
    }
}

/// `(proposal + ratio * roi) * fine_stride`: a stage-2 proposal in its ROI's
/// fine-map patch, expressed in image pixels.
pub fn to_image_space<const D: usize>(proposal: [f32; D], roi: [f32; D], strides: StrideContract) -> [f32; D] {
    let ratio = strides.ratio_f32();
    let fine = strides.fine as f32;
    std::array::from_fn(|axis| (proposal[axis] + ratio * roi[axis]) * fine)
}

/// Arg-max class of a stage-2 score vector and its probability.
pub fn label_and_confidence(scores: &[f32]) -> PpnResult<(PointClass, f32)> {
    if scores.is_empty() {
        return Err(PpnError::shape("class scores", &[PointClass::ALL.len()], &[0]));
    }
    let best = argmax(scores);
    let label = PointClass::try_from(best as i64).map_err(|_| PpnError::UnknownLabel(best as i64))?;
    Ok((label, scores[best]))
}

pub fn postprocess(
    output: &InferenceOutput,
    strides: StrideContract,
    cfg: &PostprocessConfig,
) -> PpnResult<Vec<PointDetection>> {
    if output.rois.is_empty() {
        return Ok(Vec::new());
    }
    let per_roi = output.per_roi.max(1);
    let expected = output.rois.len() * per_roi;
    if output.proposals.len() != expected || output.class_scores.len() != expected {
        return Err(PpnError::ShapeMismatch {
            what: "stage-2 proposals",
            expected: vec![expected],
            actual: vec![output.proposals.len(), output.class_scores.len()],
        });
    }

    let mut detections = Vec::with_capacity(expected);
    for (i, (proposal, scores)) in output.proposals.iter().zip(&output.class_scores).enumerate() {
        let (label, confidence) = label_and_confidence(scores)?;
        if (cfg.drop_background && label == PointClass::Background) || confidence < cfg.min_confidence {
            continue;
        }
        detections.push(PointDetection {
            position: to_image_space(*proposal, output.rois[i / per_roi], strides).to_vec(),
            label,
            confidence,
        });
    }

    Ok(match cfg.cluster_radius {
        Some(eps) => cluster_points(detections, eps),
        None => detections,
    })
}

/// Density clustering with a single-point minimum: detections within `eps` of
/// each other, transitively, form one cluster. Only the most confident member
/// of each cluster is returned, clusters in order of their first member.
pub fn cluster_points(detections: Vec<PointDetection>, eps: f32) -> Vec<PointDetection> {
    let n = detections.len();
    let mut cluster = vec![usize::MAX; n];
    let mut next = 0;
    for seed in 0..n {
        if cluster[seed] != usize::MAX {
            continue;
        }
        cluster[seed] = next;
        let mut frontier = vec![seed];
        while let Some(i) = frontier.pop() {
            for j in 0..n {
                if cluster[j] == usize::MAX && detections[i].distance_to(&detections[j].position) <= eps {
                    cluster[j] = next;
                    frontier.push(j);
                }
            }
        }
        next += 1;
    }

    let mut best: Vec<Option<usize>> = vec![None; next];
    for (i, &c) in cluster.iter().enumerate() {
        match best[c] {
            Some(b) if detections[b].confidence >= detections[i].confidence => {}
            _ => best[c] = Some(i),
        }
    }
    best.into_iter()
        .flatten()
        .map(|i| detections[i].clone())
        .collect()
}
