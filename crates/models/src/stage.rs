//! Per-stage wiring: raw head outputs in, proposals, ROIs and losses out.
//!
//! The stage functions take head outputs as tensors so they can be driven by
//! any head (or by fixed tensors) without touching the network module.

use burn::tensor::activation::softmax;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use crate::anchors::generate_anchors;
use crate::assign::{
    assign_ground_truth, stage1_positives, stage2_positives, AssignFrame, GroundTruth,
};
use crate::config::{PpnConfig, StrideContract};
use crate::error::{PpnError, PpnResult};
use crate::heads::HeadOutput;
use crate::loss::{class_loss, point_loss};
use crate::proposals::{decode_proposals, top_r_pixels, Proposals, ScoreMode, Selection};
use crate::tensor_util::{argmax, flatten_cells, matrix_from_tensor, rows_from_tensor, tensor_values};

/// Stage-1 result on the coarse grid.
#[derive(Debug, Clone)]
pub struct Stage1<B: Backend> {
    pub grid: [usize; 2],
    /// `[cells, 2]` background/signal logits.
    pub logits: Tensor<B, 2>,
    pub proposals: Proposals<B>,
    pub proposal_rows: Vec<[f32; 2]>,
    pub signal_scores: Vec<f32>,
    pub rois: Selection<2>,
}

/// Stage-2 result, one proposal per ROI cell.
#[derive(Debug, Clone)]
pub struct Stage2<B: Backend> {
    /// `[n, C]` class logits.
    pub logits: Tensor<B, 2>,
    pub proposals: Proposals<B>,
    pub proposal_rows: Vec<[f32; 2]>,
    pub class_scores: Vec<Vec<f32>>,
    pub predicted: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct StageLoss<B: Backend> {
    pub point: Tensor<B, 1>,
    pub class: Tensor<B, 1>,
    pub positives: Vec<bool>,
}

fn flatten_head<B: Backend>(raw: HeadOutput<B>, classes: usize) -> PpnResult<(Tensor<B, 2>, Tensor<B, 2>, [usize; 4])> {
    let dims = raw.logits.dims();
    let offset_dims = raw.offsets.dims();
    if dims[1] != classes {
        return Err(PpnError::shape("class logits", &[dims[0], classes, dims[2], dims[3]], &dims));
    }
    if offset_dims != [dims[0], 2, dims[2], dims[3]] {
        return Err(PpnError::shape("offsets", &[dims[0], 2, dims[2], dims[3]], &offset_dims));
    }
    Ok((flatten_cells(raw.logits), flatten_cells(raw.offsets), dims))
}

/// Decodes the coarse-map head output and selects the top-R ROIs.
pub fn stage1_propose<B: Backend>(raw: HeadOutput<B>, cfg: &PpnConfig) -> PpnResult<Stage1<B>> {
    let (logits, offsets, [batch, _, rows, cols]) = flatten_head(raw, 2)?;
    if batch != 1 {
        return Err(PpnError::BatchSize(batch));
    }
    let grid = [rows, cols];
    let anchors = generate_anchors(grid, 1);
    let probs = softmax(logits.clone(), 1);
    let proposals = decode_proposals(probs, offsets, &anchors, ScoreMode::Signal, cfg.clip, rows as f32)?;
    let proposal_rows = rows_from_tensor::<B, 2>(proposals.coords.clone().detach())?;
    let signal_scores = tensor_values(proposals.scores.clone().detach())?;
    let rois = top_r_pixels(&proposal_rows, &signal_scores, cfg.roi_cap, cfg.ppn1_score_threshold)?;
    log::debug!("ppn1: {} of {} cells survive as ROIs", rois.len(), proposal_rows.len());
    Ok(Stage1 {
        grid,
        logits,
        proposals,
        proposal_rows,
        signal_scores,
        rois,
    })
}

/// Cells holding ground truth are positives; point loss pulls their proposals
/// onto the nearest ground truth, class loss covers every cell.
pub fn stage1_loss<B: Backend>(
    stage: &Stage1<B>,
    gt: &GroundTruth<2>,
    strides: StrideContract,
) -> PpnResult<StageLoss<B>> {
    let coarse = strides.coarse as f32;
    let positives = stage1_positives(gt, coarse, stage.grid)?;
    let assignment = assign_ground_truth(&stage.proposal_rows, gt, AssignFrame::Global { stride: coarse })?;
    let point = point_loss(stage.proposals.coords.clone(), &assignment.target, &positives)?;
    let targets: Vec<usize> = positives.iter().map(|&p| usize::from(p)).collect();
    let class = class_loss(stage.logits.clone(), &targets)?;
    Ok(StageLoss { point, class, positives })
}

/// Decodes the head output computed on pooled ROI features. Each ROI carries
/// its own local grid, so anchors are the single-cell grid tiled per ROI.
pub fn stage2_propose<B: Backend>(raw: HeadOutput<B>, cfg: &PpnConfig) -> PpnResult<Stage2<B>> {
    let (logits, offsets, [roi_count, _, rows, cols]) = flatten_head(raw, cfg.num_classes)?;
    let anchors = generate_anchors([rows, cols], roi_count);
    let probs = softmax(logits.clone(), 1);
    let proposals = decode_proposals(probs, offsets, &anchors, ScoreMode::PerClass, cfg.clip, rows as f32)?;
    let proposal_rows = rows_from_tensor::<B, 2>(proposals.coords.clone().detach())?;
    let class_scores = matrix_from_tensor(proposals.scores.clone().detach())?;
    let predicted = class_scores.iter().map(|row| argmax(row)).collect();
    Ok(Stage2 {
        logits,
        proposals,
        proposal_rows,
        class_scores,
        predicted,
    })
}

/// Stage-2 distances are measured in each ROI's local patch of the fine map.
/// Class loss targets the nearest ground truth's label.
pub fn stage2_loss<B: Backend>(
    stage: &Stage2<B>,
    gt: &GroundTruth<2>,
    rois: &[[f32; 2]],
    strides: StrideContract,
    distance_threshold: f32,
) -> PpnResult<StageLoss<B>> {
    let assignment = assign_ground_truth(
        &stage.proposal_rows,
        gt,
        AssignFrame::RoiRelative {
            rois,
            fine_stride: strides.fine as f32,
            stride_ratio: strides.ratio_f32(),
        },
    )?;
    let positives = stage2_positives(&assignment.distance, &assignment.label, &stage.predicted, distance_threshold)?;
    let point = point_loss(stage.proposals.coords.clone(), &assignment.target, &positives)?;
    let targets: Vec<usize> = assignment.label.iter().map(|l| l.index()).collect();
    let class = class_loss(stage.logits.clone(), &targets)?;
    Ok(StageLoss { point, class, positives })
}
