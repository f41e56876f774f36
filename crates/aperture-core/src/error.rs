use thiserror::Error;

use crate::psf::ParameterGroup;

#[derive(Error, Debug)]
pub enum ApertureError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing input: {0}")]
    MissingInput(&'static str),

    #[error("Parameter vector for {group} has {actual} coefficients, expected {expected}")]
    DimensionMismatch {
        group: ParameterGroup,
        expected: usize,
        actual: usize,
    },

    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: (usize, usize, usize),
        actual: (usize, usize, usize),
    },

    #[error("Array layout error: {0}")]
    Array(#[from] ndarray::ShapeError),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Worker pool error: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

pub type Result<T> = std::result::Result<T, ApertureError>;

/// Fail with [`ApertureError::ShapeMismatch`] unless both dimensions agree.
pub(crate) fn ensure_shape(
    expected: (usize, usize, usize),
    actual: (usize, usize, usize),
) -> Result<()> {
    if expected != actual {
        return Err(ApertureError::ShapeMismatch { expected, actual });
    }
    Ok(())
}
