pub mod edge_preserving;

use ndarray::Array3;
use serde::{Deserialize, Serialize};

use crate::cancel::AbortToken;
use crate::consts::{
    DEFAULT_DECONV_ITERATIONS, DEFAULT_EDGE_THRESHOLD, DEFAULT_MEMORY, DEFAULT_REGULARIZATION,
};
use crate::error::{ApertureError, Result};

pub use edge_preserving::EdgePreservingDeconvolver;

/// Object-domain solver used by the alternating loop.
pub trait Deconvolver: Send {
    /// Install the PSF, in FFT layout.
    fn update_psf(&mut self, psf: &Array3<f64>) -> Result<()>;

    /// Replace the data weights.
    fn set_weights(&mut self, weights: &Array3<f64>) -> Result<()>;

    /// Refine `initial` into a new object estimate.
    fn deconv(&mut self, initial: &Array3<f64>) -> Result<Array3<f64>>;

    fn abort_token(&self) -> AbortToken;

    /// Request the running `deconv` to stop at its next iteration.
    fn abort(&self) {
        self.abort_token().abort();
    }

    /// Blurred version of the last estimate (PSF ⊛ object), if any.
    fn model(&self) -> Option<&Array3<f64>>;

    fn data(&self) -> Option<&Array3<f64>>;
}

/// Recomputes data weights from the state of a deconvolver.
pub trait WeightUpdater: Send {
    fn update(&mut self, deconvolver: &dyn Deconvolver) -> Result<&Array3<f64>>;

    /// Weights of the last update.
    fn weights(&self) -> Option<&Array3<f64>>;
}

/// Settings of the edge-preserving object deconvolution.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeconvolutionConfig {
    /// Weight `μ` of the hyperbolic total-variation term.
    pub regularization: f64,
    /// Edge threshold `ε`.
    pub edge_threshold: f64,
    pub max_iterations: usize,
    /// Constrain the object to be non-negative.
    pub positivity: bool,
    pub memory: usize,
}

impl Default for DeconvolutionConfig {
    fn default() -> Self {
        Self {
            regularization: DEFAULT_REGULARIZATION,
            edge_threshold: DEFAULT_EDGE_THRESHOLD,
            max_iterations: DEFAULT_DECONV_ITERATIONS,
            positivity: true,
            memory: DEFAULT_MEMORY,
        }
    }
}

impl DeconvolutionConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.regularization.is_finite() && self.regularization >= 0.0) {
            return Err(ApertureError::Config(format!(
                "regularization must be non-negative, got {}",
                self.regularization
            )));
        }
        if !(self.edge_threshold.is_finite() && self.edge_threshold > 0.0) {
            return Err(ApertureError::Config(format!(
                "edge_threshold must be positive, got {}",
                self.edge_threshold
            )));
        }
        Ok(())
    }
}
