use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Class of a point-like feature. Discriminants match the integer labels used
/// in `gt_pixels` rows and in the stage-2 score vector.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PointClass {
    Background = 0,
    TrackEdge = 1,
    ShowerStart = 2,
}

impl PointClass {
    pub const ALL: [PointClass; 3] = [
        PointClass::Background,
        PointClass::TrackEdge,
        PointClass::ShowerStart,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Classes a ground-truth point may carry.
    pub fn is_signal(self) -> bool {
        !matches!(self, PointClass::Background)
    }
}

impl TryFrom<i64> for PointClass {
    type Error = ValidationError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PointClass::Background),
            1 => Ok(PointClass::TrackEdge),
            2 => Ok(PointClass::ShowerStart),
            other => Err(ValidationError::UnknownLabel(other)),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("unknown point label {0}")]
    UnknownLabel(i64),
    #[error("ground-truth label must be track_edge or shower_start, got {0:?}")]
    NonSignalLabel(PointClass),
    #[error("ground-truth coordinate invalid (negative or not finite): {0:?}")]
    InvalidCoordinate(Vec<f32>),
    #[error("ground-truth point has {actual} coordinates, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("ground-truth point {coords:?} lies outside an image of size {size}")]
    OutOfImage { coords: Vec<f32>, size: usize },
    #[error("gt_pixels row too short: {0:?}")]
    ShortRow(Vec<f32>),
    #[error("image tensor shape {shape:?} does not hold {len} values")]
    ImageSizeMismatch { shape: Vec<usize>, len: usize },
    #[error("image tensor must be [1, N, N, 3] or [1, N, N, N, 3], got {0:?}")]
    ImageShape(Vec<usize>),
}

/// One ground-truth point in original image pixel space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GtPixel {
    pub coords: Vec<f32>,
    pub label: PointClass,
}

impl GtPixel {
    pub fn new(coords: Vec<f32>, label: PointClass) -> Self {
        Self { coords, label }
    }

    pub fn dim(&self) -> usize {
        self.coords.len()
    }

    /// Parses `[coord..., label]` rows. Parsing stops at the first row whose
    /// first coordinate is negative, which producers use as an end-of-list
    /// marker.
    pub fn from_rows(rows: &[Vec<f32>]) -> Result<Vec<GtPixel>, ValidationError> {
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            if row.len() < 2 {
                return Err(ValidationError::ShortRow(row.clone()));
            }
            if row[0] < 0.0 {
                break;
            }
            let (coords, label) = row.split_at(row.len() - 1);
            let label = PointClass::try_from(label[0].round() as i64)?;
            out.push(GtPixel::new(coords.to_vec(), label));
        }
        Ok(out)
    }

    /// Back to `[coord..., label]` form.
    pub fn to_row(&self) -> Vec<f32> {
        let mut row = self.coords.clone();
        row.push(self.label.index() as f32);
        row
    }

    pub fn validate(&self, expected_dim: usize) -> Result<(), ValidationError> {
        if self.coords.len() != expected_dim {
            return Err(ValidationError::DimensionMismatch {
                expected: expected_dim,
                actual: self.coords.len(),
            });
        }
        if self.coords.iter().any(|c| !c.is_finite() || *c < 0.0) {
            return Err(ValidationError::InvalidCoordinate(self.coords.clone()));
        }
        if !self.label.is_signal() {
            return Err(ValidationError::NonSignalLabel(self.label));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_round_trips_through_index() {
        for class in PointClass::ALL {
            assert_eq!(PointClass::try_from(class.index() as i64), Ok(class));
        }
        assert_eq!(
            PointClass::try_from(7),
            Err(ValidationError::UnknownLabel(7))
        );
    }

    #[test]
    fn rows_stop_at_sentinel() {
        let rows = vec![
            vec![10.0, 20.0, 1.0],
            vec![30.0, 40.0, 2.0],
            vec![-1.0, 0.0, 0.0],
            vec![50.0, 60.0, 1.0],
        ];
        let points = GtPixel::from_rows(&rows).unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[1].label, PointClass::ShowerStart);
        assert_eq!(points[0].to_row(), rows[0]);
    }
}
