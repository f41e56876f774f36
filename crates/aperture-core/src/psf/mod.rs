pub mod cache;
pub mod config;
pub mod gaussian;
pub mod grid;
pub mod pupil;
pub mod zernike;

use ndarray::Array3;
use serde::{Deserialize, Serialize};

use crate::error::{ApertureError, Result};
use crate::volume::VolumeShape;

pub use cache::Generation;
pub use config::{ModelKind, OpticsConfig, Precision};
pub use gaussian::GaussianModel;
pub use pupil::PupilModel;

/// PSF parameter group. The integer tags are part of the external interface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParameterGroup {
    Defocus = 0,
    Phase = 1,
    Modulus = 2,
}

impl ParameterGroup {
    /// Groups in estimation order.
    pub const ALL: [ParameterGroup; 3] = [Self::Defocus, Self::Phase, Self::Modulus];

    pub fn index(self) -> usize {
        self as usize
    }
}

impl TryFrom<usize> for ParameterGroup {
    type Error = ApertureError;

    fn try_from(tag: usize) -> Result<Self> {
        match tag {
            0 => Ok(Self::Defocus),
            1 => Ok(Self::Phase),
            2 => Ok(Self::Modulus),
            other => Err(ApertureError::InvalidArgument(format!(
                "unknown parameter group tag {other}"
            ))),
        }
    }
}

impl std::fmt::Display for ParameterGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Defocus => write!(f, "defocus"),
            Self::Phase => write!(f, "phase"),
            Self::Modulus => write!(f, "modulus"),
        }
    }
}

/// Coefficients of one parameter group.
#[derive(Clone, Debug, PartialEq)]
pub struct ParameterVector {
    group: ParameterGroup,
    values: Vec<f64>,
}

impl ParameterVector {
    pub fn new(group: ParameterGroup, values: Vec<f64>) -> Self {
        Self { group, values }
    }

    pub fn zeros(group: ParameterGroup, len: usize) -> Self {
        Self::new(group, vec![0.0; len])
    }

    pub fn group(&self) -> ParameterGroup {
        self.group
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn into_values(self) -> Vec<f64> {
        self.values
    }

    /// Fail unless `candidate` has exactly this vector's dimension.
    pub(crate) fn check_dimension(&self, candidate: &[f64]) -> Result<()> {
        if candidate.len() != self.values.len() {
            return Err(ApertureError::DimensionMismatch {
                group: self.group,
                expected: self.values.len(),
                actual: candidate.len(),
            });
        }
        Ok(())
    }
}

/// Which parameter groups a model exposes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParameterFlags {
    pub defocus: bool,
    pub phase: bool,
    pub modulus: bool,
}

impl ParameterFlags {
    pub fn contains(&self, group: ParameterGroup) -> bool {
        match group {
            ParameterGroup::Defocus => self.defocus,
            ParameterGroup::Phase => self.phase,
            ParameterGroup::Modulus => self.modulus,
        }
    }
}

/// Capabilities shared by every PSF model variant.
pub trait PsfOps {
    fn shape(&self) -> VolumeShape;

    /// Synthesize the PSF unless the cache already matches the parameters.
    fn compute_psf(&mut self);

    /// Current PSF in FFT layout (origin at voxel `[0, 0, 0]`), recomputed if stale.
    fn psf(&mut self) -> &Array3<f64>;

    /// Map a gradient over PSF voxels to a gradient over `group`'s coefficients.
    fn apply_jacobian(&mut self, grad: &Array3<f64>, group: ParameterGroup) -> Result<Vec<f64>>;

    /// Replace the coefficients of the vector's group and invalidate the PSF.
    fn set_param(&mut self, params: &ParameterVector) -> Result<()>;

    fn param(&self, group: ParameterGroup) -> Result<&ParameterVector>;

    fn parameter_flags(&self) -> ParameterFlags;

    /// Release scratch buffers not needed to read the PSF.
    fn free_memory(&mut self);

    fn generation(&self) -> Generation;
}

/// Closed set of PSF models, dispatched on the variant tag.
#[derive(Debug)]
pub enum PsfModel {
    PupilFunction(PupilModel),
    Gaussian(GaussianModel),
}

impl PsfModel {
    /// Build the configured variant.
    pub fn build(optics: &OpticsConfig, kind: &ModelKind) -> Result<Self> {
        match kind {
            ModelKind::PupilFunction => Ok(Self::PupilFunction(PupilModel::new(optics.clone())?)),
            ModelKind::Gaussian { sigma } => {
                Ok(Self::Gaussian(GaussianModel::new(optics, *sigma)?))
            }
        }
    }

    pub fn kind(&self) -> ModelKind {
        match self {
            Self::PupilFunction(_) => ModelKind::PupilFunction,
            Self::Gaussian(m) => {
                let w = m.widths();
                ModelKind::Gaussian {
                    sigma: [w[0], w[1], w[2]],
                }
            }
        }
    }
}

impl PsfOps for PsfModel {
    fn shape(&self) -> VolumeShape {
        match self {
            Self::PupilFunction(m) => m.shape(),
            Self::Gaussian(m) => m.shape(),
        }
    }

    fn compute_psf(&mut self) {
        match self {
            Self::PupilFunction(m) => m.compute_psf(),
            Self::Gaussian(m) => m.compute_psf(),
        }
    }

    fn psf(&mut self) -> &Array3<f64> {
        match self {
            Self::PupilFunction(m) => m.psf(),
            Self::Gaussian(m) => m.psf(),
        }
    }

    fn apply_jacobian(&mut self, grad: &Array3<f64>, group: ParameterGroup) -> Result<Vec<f64>> {
        match self {
            Self::PupilFunction(m) => m.apply_jacobian(grad, group),
            Self::Gaussian(m) => m.apply_jacobian(grad, group),
        }
    }

    fn set_param(&mut self, params: &ParameterVector) -> Result<()> {
        match self {
            Self::PupilFunction(m) => m.set_param(params),
            Self::Gaussian(m) => m.set_param(params),
        }
    }

    fn param(&self, group: ParameterGroup) -> Result<&ParameterVector> {
        match self {
            Self::PupilFunction(m) => m.param(group),
            Self::Gaussian(m) => m.param(group),
        }
    }

    fn parameter_flags(&self) -> ParameterFlags {
        match self {
            Self::PupilFunction(m) => m.parameter_flags(),
            Self::Gaussian(m) => m.parameter_flags(),
        }
    }

    fn free_memory(&mut self) {
        match self {
            Self::PupilFunction(m) => m.free_memory(),
            Self::Gaussian(m) => m.free_memory(),
        }
    }

    fn generation(&self) -> Generation {
        match self {
            Self::PupilFunction(m) => m.generation(),
            Self::Gaussian(m) => m.generation(),
        }
    }
}
