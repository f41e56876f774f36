use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ApertureError, Result};
use crate::volume::VolumeShape;

/// Physical description of the microscope used to build the pupil.
///
/// Lengths (wavelength, pixel sizes) share one unit, typically nanometres.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OpticsConfig {
    /// PSF voxel shape (X, Y, Z).
    pub shape: VolumeShape,
    pub numerical_aperture: f64,
    /// Emission wavelength.
    pub wavelength: f64,
    /// Refractive index of the immersion medium.
    pub immersion_index: f64,
    /// Lateral pixel size.
    pub lateral_pixel: f64,
    /// Axial pixel size.
    pub axial_pixel: f64,
    /// Keep only rotationally symmetric Zernike modes.
    pub radial: bool,
    pub precision: Precision,
    /// Number of phase coefficients. Piston is excluded, and so are tip and
    /// tilt unless the basis is radial.
    pub phase_modes: usize,
    /// Number of modulus coefficients (piston included).
    pub modulus_modes: usize,
    /// Defocus coefficients: 1 = `[n/λ]`, 2 adds the x pupil shift, 3 the y shift.
    pub defocus_terms: usize,
}

impl Default for OpticsConfig {
    fn default() -> Self {
        Self {
            shape: VolumeShape::default(),
            numerical_aperture: 1.4,
            wavelength: 542.0,
            immersion_index: 1.518,
            lateral_pixel: 64.5,
            axial_pixel: 160.0,
            radial: false,
            precision: Precision::Double,
            phase_modes: 10,
            modulus_modes: 1,
            defocus_terms: 1,
        }
    }
}

impl OpticsConfig {
    pub fn validate(&self) -> Result<()> {
        let VolumeShape { nx, ny, nz } = self.shape;
        if nx == 0 || ny == 0 || nz == 0 {
            return Err(ApertureError::Config(format!(
                "PSF shape must be non-empty, got {}",
                self.shape
            )));
        }
        let positive = [
            ("numerical_aperture", self.numerical_aperture),
            ("wavelength", self.wavelength),
            ("immersion_index", self.immersion_index),
            ("lateral_pixel", self.lateral_pixel),
            ("axial_pixel", self.axial_pixel),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(ApertureError::Config(format!(
                    "{name} must be positive, got {value}"
                )));
            }
        }
        if self.numerical_aperture >= self.immersion_index {
            return Err(ApertureError::Config(format!(
                "numerical aperture {} must be below the immersion index {}",
                self.numerical_aperture, self.immersion_index
            )));
        }
        if self.modulus_modes == 0 {
            return Err(ApertureError::Config(
                "at least one modulus mode is required".into(),
            ));
        }
        if !(1..=3).contains(&self.defocus_terms) {
            return Err(ApertureError::Config(format!(
                "defocus_terms must be 1, 2 or 3, got {}",
                self.defocus_terms
            )));
        }
        Ok(())
    }

    /// Pupil cut-off frequency NA/λ.
    pub fn pupil_radius(&self) -> f64 {
        self.numerical_aperture / self.wavelength
    }

    /// Index-to-wavelength ratio n/λ, the leading defocus coefficient.
    pub fn index_over_wavelength(&self) -> f64 {
        self.immersion_index / self.wavelength
    }

    /// Basis index of the first phase mode.
    ///
    /// Tip and tilt only translate the PSF, which the object absorbs, so a
    /// full basis starts phase at defocus (Noll 4). A radial basis holds no
    /// tilt and starts right after the piston.
    pub fn phase_offset(&self) -> usize {
        if self.radial {
            1
        } else {
            3
        }
    }
}

/// Sample precision of PSF and volume output.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Precision {
    Single,
    #[default]
    Double,
}

impl std::fmt::Display for Precision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Single => write!(f, "single"),
            Self::Double => write!(f, "double"),
        }
    }
}

/// PSF model variant.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum ModelKind {
    /// Physically derived pupil-function (wide-field) model.
    #[default]
    PupilFunction,
    /// Separable Gaussian with widths `[σx, σy, σz]` in length units.
    Gaussian { sigma: [f64; 3] },
}

impl ModelKind {
    pub const DEFAULT_GAUSSIAN_SIGMA: [f64; 3] = [100.0, 100.0, 300.0];
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PupilFunction => write!(f, "Pupil function"),
            Self::Gaussian { sigma } => write!(
                f,
                "Gaussian (sigma={}, {}, {})",
                sigma[0], sigma[1], sigma[2]
            ),
        }
    }
}

impl FromStr for ModelKind {
    type Err = ApertureError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "pupil" | "widefield" | "wide-field" | "pupil-function" => Ok(Self::PupilFunction),
            "gaussian" => Ok(Self::Gaussian {
                sigma: Self::DEFAULT_GAUSSIAN_SIGMA,
            }),
            other => Err(ApertureError::Unsupported(format!(
                "optical model '{other}'"
            ))),
        }
    }
}
