//! ROI set construction and crop-and-resize pooling from the fine feature map.

use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};

use crate::assign::GroundTruth;
use crate::config::StrideContract;
use crate::error::{PpnError, PpnResult};
use crate::tensor_util::{flatten_cells, index_tensor};

/// Training-time ROI set: the floored stage-1 survivors followed by, for every
/// ground-truth point, the `(2 * radius + 1)^D` block of fine cells centred on
/// the fine cell holding it. Cells outside the fine map are skipped; duplicates
/// with the survivors are kept. Added ROIs are in the coarse frame.
pub fn include_gt_neighbourhood<const D: usize>(
    survivors: &[[f32; D]],
    gt: &GroundTruth<D>,
    strides: StrideContract,
    fine_extent: usize,
    radius: usize,
) -> Vec<[f32; D]> {
    let side = 2 * radius + 1;
    let block = side.pow(D as u32);
    let ratio = strides.ratio_f32();
    let mut rois: Vec<[f32; D]> = survivors.iter().map(|r| r.map(f32::floor)).collect();
    rois.reserve(gt.len() * block);

    for centre in gt.scaled(strides.fine as f32) {
        let centre = centre.map(|c| c.floor() as i64);
        for offset in 0..block {
            let mut rem = offset;
            let mut cell = [0i64; D];
            for axis in (0..D).rev() {
                cell[axis] = centre[axis] + (rem % side) as i64 - radius as i64;
                rem /= side;
            }
            if cell.iter().all(|&c| c >= 0 && (c as usize) < fine_extent) {
                rois.push(cell.map(|c| c as f32 / ratio));
            }
        }
    }
    rois
}

struct Corner {
    index: Vec<usize>,
    weight: Vec<f32>,
}

/// One bilinear sample position along an axis: the two neighbours and the
/// weight of the upper one, or `None` when the sample falls outside the map.
fn axis_sample(at: f32, extent: usize) -> Option<(usize, usize, f32)> {
    let last = extent.saturating_sub(1) as f32;
    if !(0.0..=last).contains(&at) {
        return None;
    }
    let lo = at.floor();
    let hi = (lo + 1.0).min(last);
    Some((lo as usize, hi as usize, at - lo))
}

fn sample_positions(start: f32, end: f32, extent: usize, crop: usize) -> Vec<f32> {
    let scale = extent.saturating_sub(1) as f32;
    if crop == 1 {
        return vec![0.5 * (start + end) * scale];
    }
    let step = (end - start) * scale / (crop - 1) as f32;
    (0..crop).map(|i| start * scale + i as f32 * step).collect()
}

/// Crops a unit box per ROI from the fine map, resizes it to `crop x crop`
/// bilinearly and max pools it to a single cell.
///
/// `fine` is `[1, C, H, W]`; ROIs are in the coarse frame and are scaled by
/// `stride_ratio` onto the fine map. Returns `[R, C, 1, 1]`.
pub fn crop_pool_2d<B: Backend>(
    fine: Tensor<B, 4>,
    rois: &[[f32; 2]],
    stride_ratio: f32,
    crop: usize,
) -> PpnResult<Tensor<B, 4>> {
    let [batch, channels, height, width] = fine.dims();
    if batch != 1 {
        return Err(PpnError::BatchSize(batch));
    }
    if rois.is_empty() {
        return Err(PpnError::NoRois);
    }
    let device = fine.device();
    let samples_per_roi = crop * crop;
    let total = rois.len() * samples_per_roi;
    let mut corners: [Corner; 4] = std::array::from_fn(|_| Corner {
        index: Vec::with_capacity(total),
        weight: Vec::with_capacity(total),
    });

    for roi in rois {
        let row0 = roi[0] * stride_ratio;
        let col0 = roi[1] * stride_ratio;
        let rows = sample_positions(row0 / height as f32, (row0 + 1.0) / height as f32, height, crop);
        let cols = sample_positions(col0 / width as f32, (col0 + 1.0) / width as f32, width, crop);
        for &r in &rows {
            for &c in &cols {
                let taps = match (axis_sample(r, height), axis_sample(c, width)) {
                    (Some((r0, r1, wr)), Some((c0, c1, wc))) => [
                        (r0 * width + c0, (1.0 - wr) * (1.0 - wc)),
                        (r0 * width + c1, (1.0 - wr) * wc),
                        (r1 * width + c0, wr * (1.0 - wc)),
                        (r1 * width + c1, wr * wc),
                    ],
                    _ => [(0, 0.0); 4],
                };
                for (corner, (index, weight)) in corners.iter_mut().zip(taps) {
                    corner.index.push(index);
                    corner.weight.push(weight);
                }
            }
        }
    }

    let cells = flatten_cells(fine);
    let mut sampled = Tensor::<B, 2>::zeros([total, channels], &device);
    for corner in corners {
        let weight = Tensor::<B, 2>::from_data(TensorData::new(corner.weight, [total, 1]), &device);
        let gathered = cells.clone().select(0, index_tensor::<B>(&corner.index, &device));
        sampled = sampled + gathered * weight;
    }

    Ok(sampled
        .reshape([rois.len(), samples_per_roi, channels])
        .swap_dims(1, 2)
        .max_dim(2)
        .reshape([rois.len(), channels, 1, 1]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor_util::tensor_values;
    use approx::assert_relative_eq;
    use burn_ndarray::NdArray;
    use data_contracts::PointClass;

    type B = NdArray<f32>;

    fn ramp(size: usize) -> Tensor<B, 4> {
        // Channel 0 is 16 * row + col, channel 1 its negative minus one.
        let mut values = Vec::with_capacity(2 * size * size);
        for sign in [1.0f32, -1.0] {
            for row in 0..size {
                for col in 0..size {
                    let v = (size * row + col) as f32;
                    values.push(if sign > 0.0 { v } else { -v - 1.0 });
                }
            }
        }
        Tensor::from_data(TensorData::new(values, [1, 2, size, size]), &Default::default())
    }

    #[test]
    fn crop_takes_max_of_bilinear_samples() {
        let pooled = crop_pool_2d(ramp(16), &[[1.0, 1.0]], 4.0, 2).unwrap();
        assert_eq!(pooled.dims(), [1, 2, 1, 1]);
        let values = tensor_values(pooled).unwrap();
        // Box [4, 5] on a 16-wide map samples 3.75 and 4.6875 on each axis.
        assert_relative_eq!(values[0], 16.0 * 4.6875 + 4.6875, epsilon = 1e-3);
        assert_relative_eq!(values[1], -(16.0 * 3.75 + 3.75) - 1.0, epsilon = 1e-3);
    }

    #[test]
    fn samples_past_the_edge_read_zero() {
        let pooled = crop_pool_2d(ramp(16), &[[3.9, 3.9]], 4.0, 2).unwrap();
        let values = tensor_values(pooled).unwrap();
        assert_relative_eq!(values[0], 16.0 * 14.625 + 14.625, epsilon = 1e-3);
        assert_eq!(values[1], 0.0);
    }

    #[test]
    fn one_output_per_roi() {
        let rois = [[0.0, 0.0], [1.0, 2.0], [1.0, 2.0], [3.0, 0.5]];
        let pooled = crop_pool_2d(ramp(16), &rois, 4.0, 3).unwrap();
        assert_eq!(pooled.dims(), [4, 2, 1, 1]);
        let values = tensor_values(pooled).unwrap();
        assert_eq!(values[2], values[4]);
    }

    #[test]
    fn batch_and_empty_rois_are_rejected() {
        let two = Tensor::<B, 4>::zeros([2, 2, 16, 16], &Default::default());
        assert!(matches!(crop_pool_2d(two, &[[0.0, 0.0]], 4.0, 2), Err(PpnError::BatchSize(2))));
        assert!(matches!(crop_pool_2d(ramp(16), &[], 4.0, 2), Err(PpnError::NoRois)));
    }

    #[test]
    fn neighbourhood_follows_survivors() {
        let strides = StrideContract::new(8, 32).unwrap();
        let gt = GroundTruth {
            coords: vec![[100.0, 150.0], [0.0, 0.0]],
            labels: vec![PointClass::TrackEdge, PointClass::ShowerStart],
        };
        let rois = include_gt_neighbourhood(&[[3.7, 4.2]], &gt, strides, 64, 1);
        assert_eq!(rois[0], [3.0, 4.0]);
        // 9 cells around fine (12, 18), 4 around the corner point.
        assert_eq!(rois.len(), 1 + 9 + 4);
        assert_eq!(rois[1], [11.0 / 4.0, 17.0 / 4.0]);
        assert_eq!(rois[5], [3.0, 4.5]);
        assert_eq!(rois[10], [0.0, 0.0]);
        assert_eq!(rois[13], [0.25, 0.25]);
    }

    #[test]
    fn survivor_on_a_forced_cell_is_kept_twice() {
        let strides = StrideContract::new(8, 32).unwrap();
        let gt = GroundTruth {
            coords: vec![[100.0, 130.0]],
            labels: vec![PointClass::TrackEdge],
        };
        let rois = include_gt_neighbourhood(&[[3.2, 4.1]], &gt, strides, 64, 1);
        assert_eq!(rois.len(), 1 + 9);
        assert_eq!(rois[0], [3.0, 4.0]);
        assert_eq!(rois[5], [3.0, 4.0]);
        assert_eq!(rois.iter().filter(|r| **r == [3.0, 4.0]).count(), 2);
    }

    #[test]
    fn gradient_reaches_the_fine_map() {
        type AB = burn::backend::Autodiff<B>;
        let fine = Tensor::<AB, 4>::from_inner(ramp(16)).require_grad();
        let rois = [[1.0, 1.0], [1.0, 1.0], [3.0, 0.5]];
        let pooled = crop_pool_2d(fine.clone(), &rois, 4.0, 2).unwrap();
        let grads = pooled.sum().backward();
        let grad = fine.grad(&grads).unwrap();
        assert_eq!(grad.dims(), [1, 2, 16, 16]);
        let values = tensor_values(grad).unwrap();
        // Every (ROI, channel) max lands inside the map, so its bilinear weights sum to one.
        assert_relative_eq!(values.iter().sum::<f32>(), 6.0, epsilon = 1e-4);
        assert!(values.iter().all(|v| *v >= 0.0));
    }
}
