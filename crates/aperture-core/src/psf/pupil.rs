//! Wide-field pupil-function PSF model.
//!
//! The pupil is `A = ρ·exp(i·(φ + 2π·d(z)·ψ))` over the support of the
//! objective, with `ρ` and `φ` expanded on an orthonormal Zernike basis and
//! `ψ = sqrt((n/λ)² - |k - δ|²)` the defocus function. Each axial slice of the
//! PSF is the squared modulus of the 2-D Fourier transform of `A` at the
//! slice's signed depth `d(z)`.

use std::f64::consts::TAU;
use std::sync::Arc;

use ndarray::{Array2, Array3, ArrayView2, Axis, Zip};
use num_complex::Complex64;
use tracing::debug;

use crate::compute::{Fft2Plan, WorkerPool};
use crate::error::{ensure_shape, ApertureError, Result};
use crate::volume::{signed_index, VolumeShape};

use super::cache::{Generation, PsfCache};
use super::config::OpticsConfig;
use super::grid::FrequencyGrid;
use super::zernike::zernike_basis;
use super::{ParameterFlags, ParameterGroup, ParameterVector, PsfOps};

pub struct PupilModel {
    optics: OpticsConfig,
    grid: FrequencyGrid,
    /// Pixels inside the NA/λ disk.
    support: Array2<bool>,
    /// Support minus the evanescent pixels of the current defocus.
    mask: Array2<bool>,
    /// Orthonormal basis, shape `(modes, ny, nx)`.
    zernike: Array3<f64>,
    defocus: ParameterVector,
    phase: ParameterVector,
    modulus: ParameterVector,
    rho: Array2<f64>,
    phi: Array2<f64>,
    psi: Array2<f64>,
    generation: Generation,
    cache: PsfCache,
    plan: Fft2Plan,
    pool: Arc<WorkerPool>,
}

impl PupilModel {
    pub fn new(optics: OpticsConfig) -> Result<Self> {
        let pool = Arc::new(WorkerPool::with_available_parallelism()?);
        Self::with_pool(optics, pool)
    }

    /// Build a model that schedules its slice tasks on an existing pool.
    pub fn with_pool(optics: OpticsConfig, pool: Arc<WorkerPool>) -> Result<Self> {
        optics.validate()?;
        let VolumeShape { nx, ny, .. } = optics.shape;
        let grid = FrequencyGrid::new(nx, ny, optics.lateral_pixel);
        let radius = optics.pupil_radius();
        let support = grid.disk(radius);
        if !support.iter().any(|&inside| inside) {
            return Err(ApertureError::Config(
                "pupil support is empty; lateral sampling is too coarse for NA/λ".into(),
            ));
        }

        let modes = optics
            .modulus_modes
            .max(optics.phase_modes + optics.phase_offset());
        let zernike = zernike_basis(&grid, radius, &support, modes, optics.radial)?;

        let mut defocus = vec![0.0; optics.defocus_terms];
        defocus[0] = optics.index_over_wavelength();
        let mut modulus = vec![0.0; optics.modulus_modes];
        modulus[0] = 1.0;

        let mut model = Self {
            grid,
            mask: support.clone(),
            support,
            zernike,
            defocus: ParameterVector::new(ParameterGroup::Defocus, defocus),
            phase: ParameterVector::zeros(ParameterGroup::Phase, optics.phase_modes),
            modulus: ParameterVector::new(ParameterGroup::Modulus, modulus),
            rho: Array2::zeros((ny, nx)),
            phi: Array2::zeros((ny, nx)),
            psi: Array2::zeros((ny, nx)),
            generation: Generation::first(),
            cache: PsfCache::new(optics.shape.dim()),
            plan: Fft2Plan::forward(ny, nx),
            pool,
            optics,
        };
        model.compute_defocus();
        model.compute_rho();
        model.compute_phi();

        debug!(
            shape = %model.optics.shape,
            modes,
            support_pixels = model.support.iter().filter(|&&b| b).count(),
            "Pupil model ready"
        );
        Ok(model)
    }

    pub fn optics(&self) -> &OpticsConfig {
        &self.optics
    }

    pub fn support(&self) -> &Array2<bool> {
        &self.support
    }

    pub fn mask(&self) -> &Array2<bool> {
        &self.mask
    }

    pub fn zernike(&self) -> &Array3<f64> {
        &self.zernike
    }

    pub fn rho(&self) -> &Array2<f64> {
        &self.rho
    }

    pub fn phi(&self) -> &Array2<f64> {
        &self.phi
    }

    pub fn psi(&self) -> &Array2<f64> {
        &self.psi
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    pub fn set_defocus(&mut self, values: &[f64]) -> Result<()> {
        self.defocus.check_dimension(values)?;
        if !(values[0].is_finite() && values[0] > 0.0) {
            return Err(ApertureError::InvalidArgument(format!(
                "index/wavelength ratio must be positive, got {}",
                values[0]
            )));
        }
        self.defocus = ParameterVector::new(ParameterGroup::Defocus, values.to_vec());
        self.compute_defocus();
        self.invalidate();
        Ok(())
    }

    pub fn set_phase(&mut self, values: &[f64]) -> Result<()> {
        self.phase.check_dimension(values)?;
        self.phase = ParameterVector::new(ParameterGroup::Phase, values.to_vec());
        self.compute_phi();
        self.invalidate();
        Ok(())
    }

    /// Modulus coefficients are used up to scale: `ρ` is built from the
    /// unit-norm direction of the vector.
    pub fn set_modulus(&mut self, values: &[f64]) -> Result<()> {
        self.modulus.check_dimension(values)?;
        let norm = values.iter().map(|v| v * v).sum::<f64>().sqrt();
        if !(norm.is_finite() && norm > 0.0) {
            return Err(ApertureError::InvalidArgument(
                "modulus coefficients must have a non-zero finite norm".into(),
            ));
        }
        self.modulus = ParameterVector::new(ParameterGroup::Modulus, values.to_vec());
        self.compute_rho();
        self.invalidate();
        Ok(())
    }

    fn invalidate(&mut self) {
        self.generation = self.generation.next();
    }

    /// `(n/λ, δx, δy)` with absent shifts read as zero.
    fn defocus_terms(&self) -> (f64, f64, f64) {
        let d = self.defocus.values();
        (
            d[0],
            d.get(1).copied().unwrap_or(0.0),
            d.get(2).copied().unwrap_or(0.0),
        )
    }

    /// Recompute `ψ` and drop the evanescent pixels from the mask.
    fn compute_defocus(&mut self) {
        let (n_lambda, dx, dy) = self.defocus_terms();
        let n2 = n_lambda * n_lambda;
        let (kx, ky) = (&self.grid.kx, &self.grid.ky);
        Zip::indexed(&mut self.psi)
            .and(&mut self.mask)
            .and(&self.support)
            .for_each(|(y, x), psi, mask, &inside| {
                let qx = kx[x] - dx;
                let qy = ky[y] - dy;
                let radicand = n2 - qx * qx - qy * qy;
                if inside && radicand > 0.0 {
                    *psi = radicand.sqrt();
                    *mask = true;
                } else {
                    *psi = 0.0;
                    *mask = false;
                }
            });
    }

    fn compute_rho(&mut self) {
        let beta = self.modulus.values();
        let norm_inv = 1.0 / beta.iter().map(|b| b * b).sum::<f64>().sqrt();
        self.rho.fill(0.0);
        for (k, &b) in beta.iter().enumerate() {
            let weight = b * norm_inv;
            self.rho
                .scaled_add(weight, &self.zernike.index_axis(Axis(0), k));
        }
    }

    fn compute_phi(&mut self) {
        let offset = self.optics.phase_offset();
        self.phi.fill(0.0);
        for (k, &a) in self.phase.values().iter().enumerate() {
            self.phi
                .scaled_add(a, &self.zernike.index_axis(Axis(0), k + offset));
        }
    }

    /// Fill the PSF and the complex field for the current generation.
    fn synthesize(&mut self) {
        let nz = self.optics.shape.nz;
        let norm = 1.0 / self.optics.shape.voxel_count() as f64;
        let dz = self.optics.axial_pixel;
        let (rho, phi, psi, mask, plan) = (&self.rho, &self.phi, &self.psi, &self.mask, &self.plan);
        let (psf, field) = self.cache.arrays_mut();

        self.pool.install(|| {
            Zip::indexed(psf.outer_iter_mut())
                .and(field.outer_iter_mut())
                .par_for_each(|z, mut psf_slice, mut field_slice| {
                    let depth_phase = TAU * signed_index(z, nz) * dz;
                    Zip::from(&mut field_slice)
                        .and(rho)
                        .and(phi)
                        .and(psi)
                        .and(mask)
                        .for_each(|a, &r, &p, &s, &inside| {
                            *a = if inside {
                                Complex64::from_polar(r, p + depth_phase * s)
                            } else {
                                Complex64::default()
                            };
                        });
                    plan.process(field_slice.view_mut());
                    Zip::from(&mut psf_slice)
                        .and(&mut field_slice)
                        .for_each(|h, a| {
                            *h = a.norm_sqr() * norm;
                            *a = a.conj();
                        });
                });
        });

        self.cache.stamp(self.generation);
        debug!(generation = self.generation.value(), "PSF synthesized");
    }

    fn slice_kernel(&self) -> SliceKernel<'_> {
        let (n_lambda, dx, dy) = self.defocus_terms();
        SliceKernel {
            field: self.cache.field(),
            rho: &self.rho,
            phi: &self.phi,
            psi: &self.psi,
            mask: &self.mask,
            grid: &self.grid,
            plan: &self.plan,
            nz: self.optics.shape.nz,
            axial_pixel: self.optics.axial_pixel,
            two_over_n: 2.0 / self.optics.shape.voxel_count() as f64,
            n_lambda,
            shift: (dx, dy),
        }
    }
}

impl PsfOps for PupilModel {
    fn shape(&self) -> VolumeShape {
        self.optics.shape
    }

    fn compute_psf(&mut self) {
        if !self.cache.psf_is_fresh(self.generation) {
            self.synthesize();
        }
    }

    fn psf(&mut self) -> &Array3<f64> {
        self.compute_psf();
        self.cache.psf()
    }

    fn apply_jacobian(&mut self, grad: &Array3<f64>, group: ParameterGroup) -> Result<Vec<f64>> {
        ensure_shape(self.optics.shape.dim(), grad.dim())?;
        if !self.cache.is_fresh(self.generation) {
            self.synthesize();
        }

        let nz = self.optics.shape.nz;
        let kernel = self.slice_kernel();
        let pool = &self.pool;
        match group {
            ParameterGroup::Defocus => {
                let len = self.defocus.len();
                Ok(pool.sum_slices(nz, len, |z| kernel.defocus_slice(z, grad, len)))
            }
            ParameterGroup::Phase => {
                let len = self.phase.len();
                let offset = self.optics.phase_offset();
                let basis = &self.zernike;
                Ok(pool.sum_slices(nz, len, |z| {
                    let t = kernel.phase_derivative(z, grad);
                    (0..len)
                        .map(|k| project(basis.index_axis(Axis(0), k + offset), &t))
                        .collect()
                }))
            }
            ParameterGroup::Modulus => {
                let beta = self.modulus.values();
                let len = beta.len();
                let basis = &self.zernike;
                let mut jac = pool.sum_slices(nz, len, |z| {
                    let t = kernel.modulus_derivative(z, grad);
                    (0..len)
                        .map(|k| project(basis.index_axis(Axis(0), k), &t))
                        .collect()
                });
                // ρ = Σ c_k·Z_k with c = β/|β|, so ∂ρ/∂β_j = (Z_j - c_j·ρ)/|β|.
                // With a single active coefficient this reduces to the diagonal
                // factor (1 - c_j²)/|β|.
                let norm_inv = 1.0 / beta.iter().map(|b| b * b).sum::<f64>().sqrt();
                let along_rho: f64 = jac
                    .iter()
                    .zip(beta)
                    .map(|(j, &b)| j * b * norm_inv)
                    .sum();
                for (j, &b) in jac.iter_mut().zip(beta) {
                    *j = norm_inv * (*j - b * norm_inv * along_rho);
                }
                Ok(jac)
            }
        }
    }

    fn set_param(&mut self, params: &ParameterVector) -> Result<()> {
        match params.group() {
            ParameterGroup::Defocus => self.set_defocus(params.values()),
            ParameterGroup::Phase => self.set_phase(params.values()),
            ParameterGroup::Modulus => self.set_modulus(params.values()),
        }
    }

    fn param(&self, group: ParameterGroup) -> Result<&ParameterVector> {
        Ok(match group {
            ParameterGroup::Defocus => &self.defocus,
            ParameterGroup::Phase => &self.phase,
            ParameterGroup::Modulus => &self.modulus,
        })
    }

    fn parameter_flags(&self) -> ParameterFlags {
        ParameterFlags {
            defocus: true,
            phase: true,
            modulus: true,
        }
    }

    fn free_memory(&mut self) {
        self.cache.release_field();
    }

    fn generation(&self) -> Generation {
        self.generation
    }
}

impl std::fmt::Debug for PupilModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PupilModel")
            .field("shape", &self.optics.shape)
            .field("defocus", &self.defocus.values())
            .field("phase", &self.phase.values())
            .field("modulus", &self.modulus.values())
            .field("generation", &self.generation)
            .finish()
    }
}

/// Read-only state shared by the per-slice Jacobian tasks.
struct SliceKernel<'a> {
    field: &'a Array3<Complex64>,
    rho: &'a Array2<f64>,
    phi: &'a Array2<f64>,
    psi: &'a Array2<f64>,
    mask: &'a Array2<bool>,
    grid: &'a FrequencyGrid,
    plan: &'a Fft2Plan,
    nz: usize,
    axial_pixel: f64,
    /// `2 / (Nx·Ny·Nz)`: derivative of the squared modulus times the PSF scale.
    two_over_n: f64,
    n_lambda: f64,
    shift: (f64, f64),
}

impl SliceKernel<'_> {
    fn depth_phase(&self, z: usize) -> f64 {
        TAU * signed_index(z, self.nz) * self.axial_pixel
    }

    /// `FFT(conj(FFT(A)) · g)` for slice `z`.
    fn weighted_spectrum(&self, z: usize, grad: &Array3<f64>) -> Array2<Complex64> {
        let mut spectrum = Zip::from(self.field.index_axis(Axis(0), z))
            .and(grad.index_axis(Axis(0), z))
            .map_collect(|&a, &g| a * g);
        self.plan.process(spectrum.view_mut());
        spectrum
    }

    /// Derivative of the cost with respect to the pupil phase at each pixel.
    fn phase_derivative(&self, z: usize, grad: &Array3<f64>) -> Array2<f64> {
        let spectrum = self.weighted_spectrum(z, grad);
        let depth_phase = self.depth_phase(z);
        let scale = self.two_over_n;
        Zip::from(&spectrum)
            .and(self.rho)
            .and(self.phi)
            .and(self.psi)
            .and(self.mask)
            .map_collect(|b, &r, &p, &s, &inside| {
                if !inside {
                    return 0.0;
                }
                let (sin, cos) = (p + depth_phase * s).sin_cos();
                -scale * r * (b.im * cos + b.re * sin)
            })
    }

    /// Derivative of the cost with respect to the pupil modulus at each pixel.
    fn modulus_derivative(&self, z: usize, grad: &Array3<f64>) -> Array2<f64> {
        let spectrum = self.weighted_spectrum(z, grad);
        let depth_phase = self.depth_phase(z);
        let scale = self.two_over_n;
        Zip::from(&spectrum)
            .and(self.phi)
            .and(self.psi)
            .and(self.mask)
            .map_collect(|b, &p, &s, &inside| {
                if !inside {
                    return 0.0;
                }
                let (sin, cos) = (p + depth_phase * s).sin_cos();
                scale * (b.re * cos - b.im * sin)
            })
    }

    /// Contribution of slice `z` to the defocus gradient `[n/λ, δx, δy][..len]`.
    fn defocus_slice(&self, z: usize, grad: &Array3<f64>, len: usize) -> Vec<f64> {
        let depth_phase = self.depth_phase(z);
        let mut acc = vec![0.0; len];
        if depth_phase == 0.0 {
            return acc;
        }
        let t = self.phase_derivative(z, grad);
        let (dx, dy) = self.shift;
        Zip::indexed(&t)
            .and(self.psi)
            .and(self.mask)
            .for_each(|(y, x), &dphi, &s, &inside| {
                if !inside {
                    return;
                }
                let w = dphi * depth_phase / s;
                acc[0] += w * self.n_lambda;
                if len > 1 {
                    acc[1] += w * (self.grid.kx[x] - dx);
                }
                if len > 2 {
                    acc[2] += w * (self.grid.ky[y] - dy);
                }
            });
        acc
    }
}

fn project(mode: ArrayView2<'_, f64>, values: &Array2<f64>) -> f64 {
    Zip::from(mode)
        .and(values)
        .fold(0.0, |acc, &z, &v| acc + z * v)
}
