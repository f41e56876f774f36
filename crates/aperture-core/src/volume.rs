use ndarray::{Array3, ArrayView3, Axis};
use num_traits::Float;
use serde::{Deserialize, Serialize};

use crate::error::{ApertureError, Result};

/// Voxel dimensions of a volume.
///
/// Arrays are stored with shape `(nz, ny, nx)` and indexed `[z, y, x]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeShape {
    pub nx: usize,
    pub ny: usize,
    pub nz: usize,
}

impl VolumeShape {
    pub fn new(nx: usize, ny: usize, nz: usize) -> Self {
        Self { nx, ny, nz }
    }

    /// ndarray dimension tuple `(nz, ny, nx)`.
    pub fn dim(&self) -> (usize, usize, usize) {
        (self.nz, self.ny, self.nx)
    }

    pub fn from_dim((nz, ny, nx): (usize, usize, usize)) -> Self {
        Self { nx, ny, nz }
    }

    pub fn voxel_count(&self) -> usize {
        self.nx * self.ny * self.nz
    }
}

impl Default for VolumeShape {
    fn default() -> Self {
        Self {
            nx: 64,
            ny: 64,
            nz: 32,
        }
    }
}

impl std::fmt::Display for VolumeShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}x{}", self.nx, self.ny, self.nz)
    }
}

/// Signed index of sample `i` out of `n` in FFT layout: `i` for `i <= n/2`,
/// `i - n` above the Nyquist boundary.
pub fn signed_index(i: usize, n: usize) -> f64 {
    if i <= n / 2 {
        i as f64
    } else {
        i as f64 - n as f64
    }
}

/// Normalized cross-correlation of two volumes (Pearson coefficient over voxels).
///
/// Returns 0 when either volume is constant.
pub fn normalized_cross_correlation<T: Float>(a: ArrayView3<'_, T>, b: ArrayView3<'_, T>) -> T {
    let n = T::from(a.len()).unwrap_or_else(T::one);
    let mean_a = a.iter().fold(T::zero(), |acc, &v| acc + v) / n;
    let mean_b = b.iter().fold(T::zero(), |acc, &v| acc + v) / n;

    let mut cov = T::zero();
    let mut var_a = T::zero();
    let mut var_b = T::zero();
    for (&va, &vb) in a.iter().zip(b.iter()) {
        let da = va - mean_a;
        let db = vb - mean_b;
        cov = cov + da * db;
        var_a = var_a + da * da;
        var_b = var_b + db * db;
    }

    let denom = (var_a * var_b).sqrt();
    if denom > T::zero() {
        cov / denom
    } else {
        T::zero()
    }
}

/// Circularly shift a volume by `offset` voxels along (z, y, x).
pub fn roll(volume: &Array3<f64>, offset: [isize; 3]) -> Array3<f64> {
    if offset == [0, 0, 0] {
        return volume.clone();
    }
    let mut out = volume.clone();
    for (axis, &shift) in offset.iter().enumerate() {
        let n = out.len_of(Axis(axis)) as isize;
        if n == 0 {
            continue;
        }
        let shift = shift.rem_euclid(n) as usize;
        if shift == 0 {
            continue;
        }
        let src = out.clone();
        let n = n as usize;
        for i in 0..n {
            out.index_axis_mut(Axis(axis), (i + shift) % n)
                .assign(&src.index_axis(Axis(axis), i));
        }
    }
    out
}

/// Flat view of a standard-layout volume.
pub(crate) fn contiguous(volume: &Array3<f64>) -> Result<&[f64]> {
    volume
        .as_slice()
        .ok_or_else(|| ApertureError::InvalidArgument("volume is not in standard layout".into()))
}

pub(crate) fn contiguous_mut(volume: &mut Array3<f64>) -> Result<&mut [f64]> {
    volume
        .as_slice_mut()
        .ok_or_else(|| ApertureError::InvalidArgument("volume is not in standard layout".into()))
}
