//! Conversions between burn tensors and the host-side row types the PPN
//! geometry works on.

use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor, TensorData};

use crate::error::{PpnError, PpnResult};

pub fn tensor_values<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> PpnResult<Vec<f32>> {
    tensor
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| PpnError::TensorData(format!("{e:?}")))
}

/// Reads a `[n, D]` tensor into coordinate rows.
pub fn rows_from_tensor<B: Backend, const D: usize>(
    tensor: Tensor<B, 2>,
) -> PpnResult<Vec<[f32; D]>> {
    let [n, width] = tensor.dims();
    if width != D {
        return Err(PpnError::shape("coordinate rows", &[n, D], &[n, width]));
    }
    let values = tensor_values(tensor)?;
    Ok(values
        .chunks_exact(D)
        .map(|chunk| std::array::from_fn(|axis| chunk[axis]))
        .collect())
}

/// Reads a `[n, C]` tensor into per-row vectors.
pub fn matrix_from_tensor<B: Backend>(tensor: Tensor<B, 2>) -> PpnResult<Vec<Vec<f32>>> {
    let [_, width] = tensor.dims();
    let values = tensor_values(tensor)?;
    if width == 0 {
        return Ok(Vec::new());
    }
    Ok(values.chunks_exact(width).map(|c| c.to_vec()).collect())
}

pub fn rows_to_tensor<B: Backend, const D: usize>(
    rows: &[[f32; D]],
    device: &B::Device,
) -> Tensor<B, 2> {
    let flat: Vec<f32> = rows.iter().flat_map(|row| row.iter().copied()).collect();
    Tensor::<B, 2>::from_data(TensorData::new(flat, [rows.len(), D]), device)
}

pub fn index_tensor<B: Backend>(indices: &[usize], device: &B::Device) -> Tensor<B, 1, Int> {
    let data: Vec<i64> = indices.iter().map(|&i| i as i64).collect();
    Tensor::<B, 1, Int>::from_data(TensorData::new(data, [indices.len()]), device)
}

/// `[batch, channels, rows, cols]` -> `[batch * rows * cols, channels]`, row-major
/// over the cells so the order matches the anchor grid.
pub fn flatten_cells<B: Backend>(tensor: Tensor<B, 4>) -> Tensor<B, 2> {
    let [batch, channels, rows, cols] = tensor.dims();
    tensor
        .permute([0, 2, 3, 1])
        .reshape([batch * rows * cols, channels])
}

/// Index of the largest entry; the first one wins on ties.
pub fn argmax(row: &[f32]) -> usize {
    let mut best = 0;
    for (i, v) in row.iter().enumerate() {
        if *v > row[best] {
            best = i;
        }
    }
    best
}
