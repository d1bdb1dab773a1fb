//! Proposal decoding and top-R ROI selection.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use crate::config::ClipPolicy;
use crate::error::{PpnError, PpnResult};
use crate::tensor_util::rows_to_tensor;

/// Which part of the probability vector travels with each proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreMode {
    /// Stage 1: the signal column of a background/signal pair, shape `[n, 1]`.
    Signal,
    /// Stage 2: the full per-class probability vector, shape `[n, C]`.
    PerClass,
}

#[derive(Debug, Clone)]
pub struct Proposals<B: Backend> {
    /// `[n, D]` coordinates in the anchors' frame.
    pub coords: Tensor<B, 2>,
    pub scores: Tensor<B, 2>,
}

/// Adds regressed offsets to their anchors and picks the scores to keep.
///
/// `probs` and `offsets` are flattened per cell (`[n, C]` and `[n, D]`) in the
/// same row-major order the anchors were generated in. `extent` is the side
/// length of the frame the anchors live in; it only matters for
/// [`ClipPolicy::Clamp`].
pub fn decode_proposals<B: Backend, const D: usize>(
    probs: Tensor<B, 2>,
    offsets: Tensor<B, 2>,
    anchors: &[[f32; D]],
    mode: ScoreMode,
    clip: ClipPolicy,
    extent: f32,
) -> PpnResult<Proposals<B>> {
    let [n, classes] = probs.dims();
    let [n_offsets, dim] = offsets.dims();
    if n_offsets != n || dim != D {
        return Err(PpnError::shape("offsets", &[n, D], &[n_offsets, dim]));
    }
    if anchors.len() != n {
        return Err(PpnError::shape("anchors", &[n, D], &[anchors.len(), D]));
    }
    let coords = rows_to_tensor::<B, D>(anchors, &offsets.device()) + offsets;
    let coords = clip_proposals(coords, clip, extent);
    let scores = match mode {
        ScoreMode::Signal => {
            if classes != 2 {
                return Err(PpnError::shape("stage-1 scores", &[n, 2], &[n, classes]));
            }
            probs.slice([0..n, 1..2])
        }
        ScoreMode::PerClass => probs,
    };
    Ok(Proposals { coords, scores })
}

pub fn clip_proposals<B: Backend>(coords: Tensor<B, 2>, clip: ClipPolicy, extent: f32) -> Tensor<B, 2> {
    match clip {
        ClipPolicy::Identity => coords,
        ClipPolicy::Clamp => coords.clamp(0.0, extent),
    }
}

/// Stage-1 survivors in descending score order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Selection<const D: usize> {
    pub indices: Vec<usize>,
    pub proposals: Vec<[f32; D]>,
    pub scores: Vec<f32>,
}

impl<const D: usize> Selection<D> {
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Keeps the `cap` best-scoring proposals, then drops those scoring `<= threshold`.
///
/// Equal scores keep their input order. An empty result is valid.
pub fn top_r_pixels<const D: usize>(
    proposals: &[[f32; D]],
    scores: &[f32],
    cap: usize,
    threshold: f32,
) -> PpnResult<Selection<D>> {
    if proposals.len() != scores.len() {
        return Err(PpnError::shape("scores", &[proposals.len()], &[scores.len()]));
    }
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]).then(a.cmp(&b)));
    order.truncate(cap.min(scores.len()));
    order.retain(|&i| scores[i] > threshold);

    Ok(Selection {
        proposals: order.iter().map(|&i| proposals[i]).collect(),
        scores: order.iter().map(|&i| scores[i]).collect(),
        indices: order,
    })
}
