//! Data-fidelity costs evaluated on a convolution model.

pub mod weighted;

use ndarray::Array3;

use crate::error::Result;

pub use weighted::WeightedConvolutionCost;

/// Cost of a variable convolved with a fixed kernel, compared with data.
///
/// The kernel role is symmetric: the object deconvolution installs the PSF
/// and varies the object, the PSF fit installs the object and varies the PSF.
pub trait CostFunction: Send {
    /// Install the fixed convolution kernel, circularly shifted by `offset`
    /// voxels along (z, y, x).
    fn set_psf(&mut self, psf: &Array3<f64>, offset: [isize; 3]) -> Result<()>;

    fn set_data(&mut self, data: &Array3<f64>) -> Result<()>;

    /// Install per-voxel weights. With `normalize` the non-zero weights are
    /// rescaled to unit mean.
    fn set_weights(&mut self, weights: &Array3<f64>, normalize: bool) -> Result<()>;

    /// Return `scale·f(x)`. When `want_gradient` is set, `grad` receives
    /// `scale·∇f(x)`; otherwise it is left untouched.
    fn cost_and_gradient(
        &mut self,
        scale: f64,
        x: &Array3<f64>,
        grad: &mut Array3<f64>,
        want_gradient: bool,
    ) -> Result<f64>;
}
