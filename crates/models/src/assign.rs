//! Nearest-ground-truth assignment and the per-stage positive rules.

use data_contracts::{GtPixel, PointClass};

use crate::anchors::flat_index;
use crate::error::{PpnError, PpnResult};

/// Ground-truth points of one image, in image pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct GroundTruth<const D: usize> {
    pub coords: Vec<[f32; D]>,
    pub labels: Vec<PointClass>,
}

impl<const D: usize> GroundTruth<D> {
    pub fn from_pixels(pixels: &[GtPixel]) -> PpnResult<Self> {
        let mut coords = Vec::with_capacity(pixels.len());
        let mut labels = Vec::with_capacity(pixels.len());
        for pixel in pixels {
            pixel.validate(D)?;
            coords.push(std::array::from_fn(|axis| pixel.coords[axis]));
            labels.push(pixel.label);
        }
        Ok(Self { coords, labels })
    }

    pub fn len(&self) -> usize {
        self.coords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coords.is_empty()
    }

    /// Coordinates divided by `stride`, i.e. expressed in a feature-map frame.
    pub fn scaled(&self, stride: f32) -> Vec<[f32; D]> {
        self.coords
            .iter()
            .map(|c| std::array::from_fn(|axis| c[axis] / stride))
            .collect()
    }
}

/// Per-proposal nearest ground truth.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment<const D: usize> {
    pub gt_index: Vec<usize>,
    pub distance: Vec<f32>,
    pub label: Vec<PointClass>,
    /// The assigned ground-truth point, in the proposal's own frame.
    pub target: Vec<[f32; D]>,
}

impl<const D: usize> Assignment<D> {
    fn with_capacity(n: usize) -> Self {
        Self {
            gt_index: Vec::with_capacity(n),
            distance: Vec::with_capacity(n),
            label: Vec::with_capacity(n),
            target: Vec::with_capacity(n),
        }
    }
}

/// Frame the proposals are expressed in.
#[derive(Debug, Clone, Copy)]
pub enum AssignFrame<'a, const D: usize> {
    /// Proposals on a feature map of the given stride.
    Global { stride: f32 },
    /// Stage-2 proposals: consecutive groups of equal size share one ROI, and
    /// each group is measured in its ROI's local patch on the fine map.
    RoiRelative {
        rois: &'a [[f32; D]],
        fine_stride: f32,
        stride_ratio: f32,
    },
}

fn euclidean<const D: usize>(a: &[f32; D], b: &[f32; D]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

fn assign_into<const D: usize>(
    out: &mut Assignment<D>,
    proposals: &[[f32; D]],
    gt_frame: &[[f32; D]],
    labels: &[PointClass],
) {
    for proposal in proposals {
        let mut best = 0;
        let mut best_distance = f32::INFINITY;
        for (j, gt) in gt_frame.iter().enumerate() {
            let d = euclidean(proposal, gt);
            if d < best_distance {
                best = j;
                best_distance = d;
            }
        }
        out.gt_index.push(best);
        out.distance.push(best_distance);
        out.label.push(labels[best]);
        out.target.push(gt_frame[best]);
    }
}

/// Nearest ground-truth point per proposal. The lowest index wins exact ties.
pub fn assign_ground_truth<const D: usize>(
    proposals: &[[f32; D]],
    gt: &GroundTruth<D>,
    frame: AssignFrame<'_, D>,
) -> PpnResult<Assignment<D>> {
    if gt.is_empty() {
        return Err(PpnError::EmptyGroundTruth);
    }
    let mut out = Assignment::with_capacity(proposals.len());
    match frame {
        AssignFrame::Global { stride } => {
            assign_into(&mut out, proposals, &gt.scaled(stride), &gt.labels);
        }
        AssignFrame::RoiRelative {
            rois,
            fine_stride,
            stride_ratio,
        } => {
            if rois.is_empty() || proposals.len() % rois.len() != 0 {
                return Err(PpnError::shape(
                    "stage-2 proposals per ROI",
                    &[rois.len()],
                    &[proposals.len()],
                ));
            }
            let group = proposals.len() / rois.len();
            let gt_fine = gt.scaled(fine_stride);
            for (roi, chunk) in rois.iter().zip(proposals.chunks(group.max(1))) {
                let local: Vec<[f32; D]> = gt_fine
                    .iter()
                    .map(|g| std::array::from_fn(|axis| g[axis] - stride_ratio * roi[axis]))
                    .collect();
                assign_into(&mut out, chunk, &local, &gt.labels);
            }
        }
    }
    Ok(out)
}

/// Stage 1: a cell is positive iff some ground-truth point, in image pixels,
/// falls inside it once divided by `stride` and floored.
pub fn stage1_positives<const D: usize>(
    gt: &GroundTruth<D>,
    stride: f32,
    grid: [usize; D],
) -> PpnResult<Vec<bool>> {
    let mut mask = vec![false; grid.iter().product()];
    for coords in &gt.coords {
        let cell: [i64; D] = std::array::from_fn(|axis| (coords[axis] / stride).floor() as i64);
        let inside = cell
            .iter()
            .zip(grid.iter())
            .all(|(&c, &extent)| c >= 0 && (c as usize) < extent);
        if !inside {
            return Err(PpnError::GroundTruthOutOfBounds {
                coords: coords.to_vec(),
                cell: cell.to_vec(),
                grid: grid.to_vec(),
            });
        }
        mask[flat_index(cell.map(|c| c as usize), grid)] = true;
    }
    Ok(mask)
}

/// Stage 2: positive iff the nearest ground truth is within `threshold` and the
/// predicted class equals that ground truth's label. Both must hold.
pub fn stage2_positives(
    distance: &[f32],
    true_labels: &[PointClass],
    predicted: &[usize],
    threshold: f32,
) -> PpnResult<Vec<bool>> {
    if true_labels.len() != distance.len() || predicted.len() != distance.len() {
        return Err(PpnError::shape(
            "stage-2 positives",
            &[distance.len(), distance.len()],
            &[true_labels.len(), predicted.len()],
        ));
    }
    Ok(distance
        .iter()
        .zip(true_labels)
        .zip(predicted)
        .map(|((&d, label), &p)| d <= threshold && p == label.index())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn gt(points: &[([f32; 2], PointClass)]) -> GroundTruth<2> {
        GroundTruth {
            coords: points.iter().map(|p| p.0).collect(),
            labels: points.iter().map(|p| p.1).collect(),
        }
    }

    #[test]
    fn coincident_proposal_has_zero_distance() {
        let truth = gt(&[
            ([64.0, 96.0], PointClass::ShowerStart),
            ([320.0, 32.0], PointClass::TrackEdge),
        ]);
        let proposals = [[2.0, 3.0], [10.0, 1.0], [9.0, 9.0]];
        let a = assign_ground_truth(&proposals, &truth, AssignFrame::Global { stride: 32.0 }).unwrap();
        assert_eq!(a.distance[0], 0.0);
        assert_eq!(a.label[0], PointClass::ShowerStart);
        assert_eq!(a.distance[1], 0.0);
        assert_eq!(a.label[1], PointClass::TrackEdge);
        assert_eq!(a.gt_index, vec![0, 1, 1]);
        assert_eq!(a.target[2], [10.0, 1.0]);
    }

    #[test]
    fn exact_ties_pick_lowest_index() {
        let truth = gt(&[
            ([0.0, 0.0], PointClass::TrackEdge),
            ([4.0, 0.0], PointClass::ShowerStart),
        ]);
        let a = assign_ground_truth(&[[2.0, 0.0]], &truth, AssignFrame::Global { stride: 1.0 }).unwrap();
        assert_eq!(a.gt_index, vec![0]);
        assert_eq!(a.label, vec![PointClass::TrackEdge]);
    }

    #[test]
    fn empty_ground_truth_fails() {
        let truth = GroundTruth::<2> {
            coords: vec![],
            labels: vec![],
        };
        let err = assign_ground_truth(&[[1.0, 1.0]], &truth, AssignFrame::Global { stride: 8.0 });
        assert!(matches!(err, Err(PpnError::EmptyGroundTruth)));
    }

    #[test]
    fn roi_relative_frame_shifts_each_group() {
        // One point at image (100, 150): fine frame (12.5, 18.75).
        let truth = gt(&[([100.0, 150.0], PointClass::TrackEdge)]);
        let rois = [[3.0, 4.0], [0.0, 0.0]];
        let proposals = [[0.5, 2.75], [12.5, 18.75]];
        let a = assign_ground_truth(
            &proposals,
            &truth,
            AssignFrame::RoiRelative {
                rois: &rois,
                fine_stride: 8.0,
                stride_ratio: 4.0,
            },
        )
        .unwrap();
        assert_relative_eq!(a.distance[0], 0.0);
        assert_relative_eq!(a.distance[1], 0.0);
        assert_eq!(a.target[0], [0.5, 2.75]);
    }

    #[test]
    fn roi_groups_must_divide_proposals() {
        let truth = gt(&[([8.0, 8.0], PointClass::TrackEdge)]);
        let err = assign_ground_truth(
            &[[0.5, 0.5], [0.5, 0.5], [0.5, 0.5]],
            &truth,
            AssignFrame::RoiRelative {
                rois: &[[0.0, 0.0], [1.0, 1.0]],
                fine_stride: 8.0,
                stride_ratio: 4.0,
            },
        );
        assert!(matches!(err, Err(PpnError::ShapeMismatch { .. })));
    }

    #[test]
    fn stage1_marks_cells_holding_ground_truth() {
        let truth = gt(&[
            ([100.0, 150.0], PointClass::TrackEdge),
            ([110.0, 140.0], PointClass::ShowerStart),
            ([0.0, 511.0], PointClass::TrackEdge),
        ]);
        let mask = stage1_positives(&truth, 32.0, [16, 16]).unwrap();
        assert_eq!(mask.iter().filter(|&&m| m).count(), 2);
        assert!(mask[3 * 16 + 4]);
        assert!(mask[15]);
    }

    #[test]
    fn stage1_rejects_points_outside_grid() {
        let truth = gt(&[([512.0, 10.0], PointClass::TrackEdge)]);
        let err = stage1_positives(&truth, 32.0, [16, 16]);
        assert!(matches!(err, Err(PpnError::GroundTruthOutOfBounds { .. })));
    }

    #[test]
    fn stage2_needs_distance_and_label() {
        let labels = [PointClass::TrackEdge; 4];
        let mask = stage2_positives(&[1.0, 2.0, 2.5, 0.1], &labels, &[1, 1, 1, 2], 2.0).unwrap();
        assert_eq!(mask, vec![true, true, false, false]);
    }
}
