use ndarray::Array3;
use num_complex::Complex64;

/// Parameter generation of a model.
///
/// Bumped on every parameter mutation; cached products remember the
/// generation they were computed for and are stale on mismatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(u64);

impl Generation {
    /// Stamp carried by a cache that was never filled.
    pub const NEVER: Generation = Generation(0);

    pub fn first() -> Self {
        Generation(1)
    }

    pub fn next(self) -> Self {
        Generation(self.0 + 1)
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

/// Synthesized PSF and its conjugated per-slice Fourier field.
#[derive(Clone, Debug)]
pub struct PsfCache {
    psf: Array3<f64>,
    field: Array3<Complex64>,
    psf_stamp: Generation,
    field_stamp: Generation,
}

impl PsfCache {
    pub fn new(dim: (usize, usize, usize)) -> Self {
        Self {
            psf: Array3::zeros(dim),
            field: Array3::zeros(dim),
            psf_stamp: Generation::NEVER,
            field_stamp: Generation::NEVER,
        }
    }

    /// Cache that only ever holds a real PSF.
    pub fn real_only(dim: (usize, usize, usize)) -> Self {
        Self {
            psf: Array3::zeros(dim),
            field: Array3::zeros((0, 0, 0)),
            psf_stamp: Generation::NEVER,
            field_stamp: Generation::NEVER,
        }
    }

    pub fn psf_is_fresh(&self, current: Generation) -> bool {
        self.psf_stamp == current
    }

    /// Both the PSF and the complex field match `current`.
    pub fn is_fresh(&self, current: Generation) -> bool {
        self.psf_stamp == current && self.field_stamp == current
    }

    pub fn psf(&self) -> &Array3<f64> {
        &self.psf
    }

    pub fn field(&self) -> &Array3<Complex64> {
        &self.field
    }

    /// Mutable access for a fill; reallocates a released field.
    pub fn arrays_mut(&mut self) -> (&mut Array3<f64>, &mut Array3<Complex64>) {
        if self.field.dim() != self.psf.dim() {
            self.field = Array3::zeros(self.psf.dim());
        }
        (&mut self.psf, &mut self.field)
    }

    pub fn psf_mut(&mut self) -> &mut Array3<f64> {
        &mut self.psf
    }

    pub fn stamp(&mut self, generation: Generation) {
        self.psf_stamp = generation;
        if self.field.dim() == self.psf.dim() {
            self.field_stamp = generation;
        }
    }

    /// Drop the complex field; the next Jacobian recomputes it.
    pub fn release_field(&mut self) {
        self.field = Array3::zeros((0, 0, 0));
        self.field_stamp = Generation::NEVER;
    }
}
