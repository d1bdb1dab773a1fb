use thiserror::Error;

pub type PpnResult<T> = Result<T, PpnError>;

#[derive(Debug, Error)]
pub enum PpnError {
    #[error("shape contract violated for {what}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        what: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
    #[error("expected batch size 1, got {0}")]
    BatchSize(usize),
    #[error("coarse stride {coarse} is not a multiple of fine stride {fine}")]
    InvalidStrides { fine: usize, coarse: usize },
    #[error("image size {size} is not a positive multiple of the coarse stride {stride}")]
    ImageSize { size: usize, stride: usize },
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("nearest ground truth is undefined: image has no ground-truth points")]
    EmptyGroundTruth,
    #[error("ground-truth point {coords:?} maps to cell {cell:?} outside a {grid:?} grid")]
    GroundTruthOutOfBounds {
        coords: Vec<f32>,
        cell: Vec<i64>,
        grid: Vec<usize>,
    },
    #[error("cannot crop an empty ROI set")]
    NoRois,
    #[error("unknown class label {0}")]
    UnknownLabel(i64),
    #[error(transparent)]
    Contract(#[from] data_contracts::ValidationError),
    #[error("tensor data: {0}")]
    TensorData(String),
}

impl PpnError {
    pub fn shape(what: &'static str, expected: &[usize], actual: &[usize]) -> Self {
        PpnError::ShapeMismatch {
            what,
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }
}
