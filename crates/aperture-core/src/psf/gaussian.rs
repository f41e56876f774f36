use ndarray::{Array1, Array3, Zip};

use crate::error::{ensure_shape, ApertureError, Result};
use crate::volume::{signed_index, VolumeShape};

use super::cache::{Generation, PsfCache};
use super::config::OpticsConfig;
use super::{ParameterFlags, ParameterGroup, ParameterVector, PsfOps};

/// Separable Gaussian PSF.
///
/// Lightweight stand-in for the pupil model: its only parameter group is
/// carried in the defocus slot and holds the widths `[σx, σy, σz]`.
#[derive(Debug)]
pub struct GaussianModel {
    shape: VolumeShape,
    /// Sample spacing along (x, y, z).
    spacing: [f64; 3],
    widths: ParameterVector,
    generation: Generation,
    cache: PsfCache,
}

impl GaussianModel {
    pub fn new(optics: &OpticsConfig, sigma: [f64; 3]) -> Result<Self> {
        optics.validate()?;
        check_widths(&sigma)?;
        Ok(Self {
            shape: optics.shape,
            spacing: [optics.lateral_pixel, optics.lateral_pixel, optics.axial_pixel],
            widths: ParameterVector::new(ParameterGroup::Defocus, sigma.to_vec()),
            generation: Generation::first(),
            cache: PsfCache::real_only(optics.shape.dim()),
        })
    }

    pub fn widths(&self) -> &[f64] {
        self.widths.values()
    }

    /// Signed sample coordinates along each axis, in (x, y, z) order.
    fn coordinates(&self) -> [Array1<f64>; 3] {
        let lengths = [self.shape.nx, self.shape.ny, self.shape.nz];
        std::array::from_fn(|axis| {
            let n = lengths[axis];
            Array1::from_shape_fn(n, |i| signed_index(i, n) * self.spacing[axis])
        })
    }

    fn unsupported(group: ParameterGroup) -> ApertureError {
        ApertureError::InvalidArgument(format!(
            "the Gaussian model has no {group} parameters"
        ))
    }
}

impl PsfOps for GaussianModel {
    fn shape(&self) -> VolumeShape {
        self.shape
    }

    /// Build the separable profile, then rescale it to unit sum.
    fn compute_psf(&mut self) {
        if self.cache.psf_is_fresh(self.generation) {
            return;
        }
        let [cx, cy, cz] = self.coordinates();
        let sigma = self.widths.values();
        let profile = |coords: &Array1<f64>, s: f64| coords.mapv(|u| (-u * u / (2.0 * s * s)).exp());
        let (gx, gy, gz) = (
            profile(&cx, sigma[0]),
            profile(&cy, sigma[1]),
            profile(&cz, sigma[2]),
        );

        let psf = self.cache.psf_mut();
        Zip::indexed(psf.view_mut()).par_for_each(|(z, y, x), h| {
            *h = gz[z] * gy[y] * gx[x];
        });
        let sum: f64 = psf.sum();
        if sum > 0.0 {
            let inv = 1.0 / sum;
            psf.mapv_inplace(|v| v * inv);
        }
        self.cache.stamp(self.generation);
    }

    fn psf(&mut self) -> &Array3<f64> {
        self.compute_psf();
        self.cache.psf()
    }

    /// For the unit-sum PSF `h`, `∂h/∂σ = h·(u²/σ³ - E_h[u²/σ³])` along each axis.
    fn apply_jacobian(&mut self, grad: &Array3<f64>, group: ParameterGroup) -> Result<Vec<f64>> {
        if group != ParameterGroup::Defocus {
            return Err(Self::unsupported(group));
        }
        ensure_shape(self.shape.dim(), grad.dim())?;
        self.compute_psf();

        let [cx, cy, cz] = self.coordinates();
        let sigma = self.widths.values().to_vec();
        let weight = |coords: &Array1<f64>, s: f64| coords.mapv(|u| u * u / (s * s * s));
        let (qx, qy, qz) = (
            weight(&cx, sigma[0]),
            weight(&cy, sigma[1]),
            weight(&cz, sigma[2]),
        );

        // [Σgh, Σgh·qx, Σgh·qy, Σgh·qz, Σh·qx, Σh·qy, Σh·qz]
        let mut acc = [0.0f64; 7];
        Zip::indexed(grad)
            .and(self.cache.psf())
            .for_each(|(z, y, x), &g, &h| {
                let gh = g * h;
                acc[0] += gh;
                acc[1] += gh * qx[x];
                acc[2] += gh * qy[y];
                acc[3] += gh * qz[z];
                acc[4] += h * qx[x];
                acc[5] += h * qy[y];
                acc[6] += h * qz[z];
            });

        Ok(vec![
            acc[1] - acc[0] * acc[4],
            acc[2] - acc[0] * acc[5],
            acc[3] - acc[0] * acc[6],
        ])
    }

    fn set_param(&mut self, params: &ParameterVector) -> Result<()> {
        if params.group() != ParameterGroup::Defocus {
            return Err(Self::unsupported(params.group()));
        }
        self.widths.check_dimension(params.values())?;
        check_widths(params.values())?;
        self.widths = params.clone();
        self.generation = self.generation.next();
        Ok(())
    }

    fn param(&self, group: ParameterGroup) -> Result<&ParameterVector> {
        match group {
            ParameterGroup::Defocus => Ok(&self.widths),
            other => Err(Self::unsupported(other)),
        }
    }

    fn parameter_flags(&self) -> ParameterFlags {
        ParameterFlags {
            defocus: true,
            phase: false,
            modulus: false,
        }
    }

    fn free_memory(&mut self) {}

    fn generation(&self) -> Generation {
        self.generation
    }
}

fn check_widths(sigma: &[f64]) -> Result<()> {
    if let Some(bad) = sigma.iter().find(|s| !(s.is_finite() && **s > 0.0)) {
        return Err(ApertureError::InvalidArgument(format!(
            "Gaussian widths must be positive, got {bad}"
        )));
    }
    Ok(())
}
