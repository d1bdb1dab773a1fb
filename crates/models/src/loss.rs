use burn::nn::loss::CrossEntropyLossConfig;
use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor, TensorData};
use serde::Serialize;

use crate::error::{PpnError, PpnResult};
use crate::tensor_util::{index_tensor, rows_to_tensor, tensor_values};

/// Keeps the square-root gradient finite when a proposal sits on its target.
const DISTANCE_EPS: f32 = 1e-12;

/// Mean Euclidean distance between positive proposals and their assigned
/// targets. Zero when there are no positives.
pub fn point_loss<B: Backend, const D: usize>(
    coords: Tensor<B, 2>,
    targets: &[[f32; D]],
    positives: &[bool],
) -> PpnResult<Tensor<B, 1>> {
    let [n, _] = coords.dims();
    if targets.len() != n || positives.len() != n {
        return Err(PpnError::shape("point loss inputs", &[n, n], &[targets.len(), positives.len()]));
    }
    let device = coords.device();
    let picked: Vec<usize> = positives
        .iter()
        .enumerate()
        .filter_map(|(i, &p)| p.then_some(i))
        .collect();
    if picked.is_empty() {
        return Ok(Tensor::zeros([1], &device));
    }
    let chosen_targets: Vec<[f32; D]> = picked.iter().map(|&i| targets[i]).collect();
    let chosen = coords.select(0, index_tensor::<B>(&picked, &device));
    let target = rows_to_tensor::<B, D>(&chosen_targets, &device);
    let squared = (chosen - target).powf_scalar(2.0).sum_dim(1);
    Ok(squared.add_scalar(DISTANCE_EPS).sqrt().mean())
}

/// Mean cross-entropy of `[n, C]` logits against integer class targets.
pub fn class_loss<B: Backend>(logits: Tensor<B, 2>, targets: &[usize]) -> PpnResult<Tensor<B, 1>> {
    let [n, classes] = logits.dims();
    if targets.len() != n {
        return Err(PpnError::shape("class targets", &[n], &[targets.len()]));
    }
    if let Some(&bad) = targets.iter().find(|&&t| t >= classes) {
        return Err(PpnError::UnknownLabel(bad as i64));
    }
    let device = logits.device();
    let data: Vec<i64> = targets.iter().map(|&t| t as i64).collect();
    let targets = Tensor::<B, 1, Int>::from_data(TensorData::new(data, [n]), &device);
    Ok(CrossEntropyLossConfig::new().init(&device).forward(logits, targets))
}

/// The four loss terms of one training step.
#[derive(Debug, Clone)]
pub struct PpnLosses<B: Backend> {
    pub ppn1_point: Tensor<B, 1>,
    pub ppn1_class: Tensor<B, 1>,
    pub ppn2_point: Tensor<B, 1>,
    pub ppn2_class: Tensor<B, 1>,
}

impl<B: Backend> PpnLosses<B> {
    /// Unweighted sum of the four terms.
    pub fn total(&self) -> Tensor<B, 1> {
        self.ppn1_point.clone() + self.ppn1_class.clone() + self.ppn2_point.clone() + self.ppn2_class.clone()
    }

    pub fn breakdown(&self) -> PpnResult<LossBreakdown> {
        let scalar = |t: &Tensor<B, 1>| -> PpnResult<f32> {
            tensor_values(t.clone())?
                .first()
                .copied()
                .ok_or_else(|| PpnError::TensorData("empty loss tensor".into()))
        };
        let ppn1_point = scalar(&self.ppn1_point)?;
        let ppn1_class = scalar(&self.ppn1_class)?;
        let ppn2_point = scalar(&self.ppn2_point)?;
        let ppn2_class = scalar(&self.ppn2_class)?;
        Ok(LossBreakdown {
            total: ppn1_point + ppn1_class + ppn2_point + ppn2_class,
            ppn1_point,
            ppn1_class,
            ppn2_point,
            ppn2_class,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LossBreakdown {
    pub total: f32,
    pub ppn1_point: f32,
    pub ppn1_class: f32,
    pub ppn2_point: f32,
    pub ppn2_class: f32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use burn_ndarray::NdArray;

    type B = NdArray<f32>;

    #[test]
    fn point_loss_averages_positives_only() {
        let device = Default::default();
        let coords = rows_to_tensor::<B, 2>(&[[0.0, 0.0], [3.0, 4.0], [100.0, 100.0]], &device);
        let targets = [[0.0, 0.0], [0.0, 0.0], [0.0, 0.0]];
        let loss = point_loss(coords, &targets, &[true, true, false]).unwrap();
        assert_relative_eq!(tensor_values(loss).unwrap()[0], 2.5, epsilon = 1e-4);
    }

    #[test]
    fn no_positives_gives_zero() {
        let device = Default::default();
        let coords = rows_to_tensor::<B, 2>(&[[1.0, 1.0]], &device);
        let loss = point_loss(coords, &[[5.0, 5.0]], &[false]).unwrap();
        assert_eq!(tensor_values(loss).unwrap(), vec![0.0]);
    }

    #[test]
    fn class_loss_rejects_out_of_range_targets() {
        let logits = Tensor::<B, 2>::zeros([2, 3], &Default::default());
        assert!(matches!(class_loss(logits.clone(), &[0, 3]), Err(PpnError::UnknownLabel(3))));
        let loss = class_loss(logits, &[0, 2]).unwrap();
        assert_relative_eq!(tensor_values(loss).unwrap()[0], 3.0f32.ln(), epsilon = 1e-5);
    }

    #[test]
    fn total_is_unweighted_sum() {
        let device = Default::default();
        let term = |v: f32| Tensor::<B, 1>::from_data(TensorData::new(vec![v], [1]), &device);
        let losses = PpnLosses {
            ppn1_point: term(0.5),
            ppn1_class: term(1.0),
            ppn2_point: term(2.0),
            ppn2_class: term(4.0),
        };
        assert_eq!(tensor_values(losses.total()).unwrap(), vec![7.5]);
        let breakdown = losses.breakdown().unwrap();
        assert_eq!(breakdown.total, 7.5);
        assert_eq!(breakdown.ppn2_class, 4.0);
    }
}
