use ndarray::Array2;

use crate::volume::signed_index;

/// Lateral spatial-frequency sampling of one PSF slice.
///
/// `kx[x]` and `ky[y]` are signed frequencies (cycles per unit length) in
/// FFT layout.
#[derive(Clone, Debug)]
pub struct FrequencyGrid {
    pub kx: Vec<f64>,
    pub ky: Vec<f64>,
}

impl FrequencyGrid {
    pub fn new(nx: usize, ny: usize, pixel_size: f64) -> Self {
        let axis = |n: usize| -> Vec<f64> {
            let step = 1.0 / (n as f64 * pixel_size);
            (0..n).map(|i| signed_index(i, n) * step).collect()
        };
        Self {
            kx: axis(nx),
            ky: axis(ny),
        }
    }

    pub fn dim(&self) -> (usize, usize) {
        (self.ky.len(), self.kx.len())
    }

    /// Pixels whose squared radial frequency is below `radius²`.
    pub fn disk(&self, radius: f64) -> Array2<bool> {
        let r2 = radius * radius;
        Array2::from_shape_fn(self.dim(), |(y, x)| {
            self.kx[x] * self.kx[x] + self.ky[y] * self.ky[y] < r2
        })
    }

    /// Polar coordinates `(r / radius, theta)` of every pixel.
    pub fn polar(&self, radius: f64) -> Array2<(f64, f64)> {
        Array2::from_shape_fn(self.dim(), |(y, x)| {
            let (kx, ky) = (self.kx[x], self.ky[y]);
            ((kx * kx + ky * ky).sqrt() / radius, ky.atan2(kx))
        })
    }
}
