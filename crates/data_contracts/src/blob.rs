use serde::{Deserialize, Serialize};

use crate::points::{GtPixel, ValidationError};

/// Dense image in channels-last layout: `[1, N, N, 3]` (2D) or
/// `[1, N, N, N, 3]` (3D).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageTensor {
    pub shape: Vec<usize>,
    pub values: Vec<f32>,
}

impl ImageTensor {
    pub fn zeros_2d(size: usize) -> Self {
        Self {
            shape: vec![1, size, size, 3],
            values: vec![0.0; size * size * 3],
        }
    }

    /// Number of spatial axes.
    pub fn spatial_dim(&self) -> usize {
        self.shape.len().saturating_sub(2)
    }

    /// Edge length N of the (square/cubic) image.
    pub fn size(&self) -> usize {
        self.shape.get(1).copied().unwrap_or(0)
    }

    pub fn channels(&self) -> usize {
        self.shape.last().copied().unwrap_or(0)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let dims_ok = matches!(self.shape.len(), 4 | 5)
            && self.shape[0] == 1
            && self.channels() == 3
            && self.shape[1..self.shape.len() - 1]
                .iter()
                .all(|v| *v == self.size() && *v > 0);
        if !dims_ok {
            return Err(ValidationError::ImageShape(self.shape.clone()));
        }
        let expected: usize = self.shape.iter().product();
        if expected != self.values.len() {
            return Err(ValidationError::ImageSizeMismatch {
                shape: self.shape.clone(),
                len: self.values.len(),
            });
        }
        Ok(())
    }

    /// Reorders a 2D NHWC buffer into CHW, the layout convolution layers consume.
    pub fn to_chw(&self) -> Vec<f32> {
        let n = self.size();
        let channels = self.channels();
        let mut out = vec![0.0; self.values.len()];
        for row in 0..n {
            for col in 0..n {
                let src = (row * n + col) * channels;
                for c in 0..channels {
                    out[c * n * n + row * n + col] = self.values[src + c];
                }
            }
        }
        out
    }
}

mod gt_rows {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use crate::points::GtPixel;

    pub fn serialize<S: Serializer>(points: &[GtPixel], serializer: S) -> Result<S::Ok, S::Error> {
        let rows: Vec<Vec<f32>> = points.iter().map(GtPixel::to_row).collect();
        rows.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<GtPixel>, D::Error> {
        let rows = Vec::<Vec<f32>>::deserialize(deserializer)?;
        GtPixel::from_rows(&rows).map_err(D::Error::custom)
    }
}

/// One detector image plus its ground truth, as produced by a data provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageBlob {
    pub data: ImageTensor,
    /// Serialized as `[coord..., label]` rows, a negative first coordinate ends the list.
    #[serde(with = "gt_rows")]
    pub gt_pixels: Vec<GtPixel>,
    /// Segmentation labels for auxiliary heads; carried through untouched.
    #[serde(default)]
    pub labels: Option<Vec<i64>>,
    /// Per-pixel loss weights for auxiliary heads; carried through untouched.
    #[serde(default)]
    pub weight: Option<Vec<f32>>,
}

impl ImageBlob {
    pub fn new(data: ImageTensor, gt_pixels: Vec<GtPixel>) -> Self {
        Self {
            data,
            gt_pixels,
            labels: None,
            weight: None,
        }
    }

    /// Image-only blob for inference.
    pub fn image_only(data: ImageTensor) -> Self {
        Self::new(data, Vec::new())
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.data.validate()?;
        let dim = self.data.spatial_dim();
        let size = self.data.size();
        for gt in &self.gt_pixels {
            gt.validate(dim)?;
            if gt.coords.iter().any(|c| *c >= size as f32) {
                return Err(ValidationError::OutOfImage {
                    coords: gt.coords.clone(),
                    size,
                });
            }
        }
        Ok(())
    }
}
