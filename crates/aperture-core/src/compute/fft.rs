use std::sync::Arc;

use ndarray::{Array3, ArrayViewMut2, Axis, Zip};
use num_complex::Complex64;
use rustfft::{Fft, FftPlanner};

use crate::consts::PARALLEL_VOXEL_THRESHOLD;
use crate::error::{ensure_shape, Result};

/// 2-D transform over `(ny, nx)` slices, planned once and shared by the
/// per-slice workers.
#[derive(Clone)]
pub struct Fft2Plan {
    rows: Arc<dyn Fft<f64>>,
    cols: Arc<dyn Fft<f64>>,
}

impl Fft2Plan {
    pub fn forward(ny: usize, nx: usize) -> Self {
        let mut planner = FftPlanner::new();
        Self {
            rows: planner.plan_fft_forward(nx),
            cols: planner.plan_fft_forward(ny),
        }
    }

    /// Unnormalized in-place transform of one slice.
    pub fn process(&self, mut slice: ArrayViewMut2<'_, Complex64>) {
        let (ny, nx) = slice.dim();
        let mut row_data = vec![Complex64::default(); nx];
        for mut row in slice.rows_mut() {
            match row.as_slice_mut() {
                Some(buf) => self.rows.process(buf),
                None => {
                    for (dst, &src) in row_data.iter_mut().zip(row.iter()) {
                        *dst = src;
                    }
                    self.rows.process(&mut row_data);
                    for (dst, &src) in row.iter_mut().zip(row_data.iter()) {
                        *dst = src;
                    }
                }
            }
        }

        let mut col_data = vec![Complex64::default(); ny];
        for mut col in slice.columns_mut() {
            for (dst, &src) in col_data.iter_mut().zip(col.iter()) {
                *dst = src;
            }
            self.cols.process(&mut col_data);
            for (dst, &src) in col.iter_mut().zip(col_data.iter()) {
                *dst = src;
            }
        }
    }
}

/// 3-D transform built from one 1-D plan per axis.
#[derive(Clone)]
pub struct Fft3Plan {
    forward: [Arc<dyn Fft<f64>>; 3],
    inverse: [Arc<dyn Fft<f64>>; 3],
    dim: (usize, usize, usize),
}

impl Fft3Plan {
    pub fn new(dim: (usize, usize, usize)) -> Self {
        let (nz, ny, nx) = dim;
        let mut planner = FftPlanner::new();
        Self {
            forward: [
                planner.plan_fft_forward(nz),
                planner.plan_fft_forward(ny),
                planner.plan_fft_forward(nx),
            ],
            inverse: [
                planner.plan_fft_inverse(nz),
                planner.plan_fft_inverse(ny),
                planner.plan_fft_inverse(nx),
            ],
            dim,
        }
    }

    pub fn dim(&self) -> (usize, usize, usize) {
        self.dim
    }

    /// Forward transform of a real volume.
    pub fn forward_real(&self, data: &Array3<f64>) -> Array3<Complex64> {
        let mut spectrum = data.mapv(|v| Complex64::new(v, 0.0));
        self.forward_inplace(&mut spectrum);
        spectrum
    }

    /// Inverse transform keeping the real part, normalized by the voxel count.
    pub fn inverse_real(&self, mut spectrum: Array3<Complex64>) -> Array3<f64> {
        self.inverse_inplace(&mut spectrum);
        let scale = 1.0 / spectrum.len() as f64;
        spectrum.mapv(|v| v.re * scale)
    }

    pub fn forward_inplace(&self, data: &mut Array3<Complex64>) {
        for (axis, fft) in self.forward.iter().enumerate() {
            process_axis(data, fft, Axis(axis));
        }
    }

    /// Unnormalized inverse transform.
    pub fn inverse_inplace(&self, data: &mut Array3<Complex64>) {
        for (axis, fft) in self.inverse.iter().enumerate() {
            process_axis(data, fft, Axis(axis));
        }
    }
}

/// Circular convolution of two volumes of the same shape.
///
/// `kernel` is in FFT layout (origin at voxel `[0, 0, 0]`).
pub fn convolve(volume: &Array3<f64>, kernel: &Array3<f64>) -> Result<Array3<f64>> {
    ensure_shape(volume.dim(), kernel.dim())?;
    let plan = Fft3Plan::new(volume.dim());
    let mut spectrum = plan.forward_real(volume);
    let kernel = plan.forward_real(kernel);
    Zip::from(&mut spectrum).and(&kernel).for_each(|s, &k| *s *= k);
    Ok(plan.inverse_real(spectrum))
}

fn process_axis(data: &mut Array3<Complex64>, fft: &Arc<dyn Fft<f64>>, axis: Axis) {
    if data.len_of(axis) <= 1 {
        return;
    }
    if data.len() >= PARALLEL_VOXEL_THRESHOLD {
        Zip::from(data.lanes_mut(axis)).par_for_each(|mut lane| {
            let mut buf: Vec<Complex64> = lane.iter().copied().collect();
            fft.process(&mut buf);
            for (dst, src) in lane.iter_mut().zip(buf) {
                *dst = src;
            }
        });
    } else {
        let mut buf = vec![Complex64::default(); data.len_of(axis)];
        for mut lane in data.lanes_mut(axis) {
            for (dst, &src) in buf.iter_mut().zip(lane.iter()) {
                *dst = src;
            }
            fft.process(&mut buf);
            for (dst, &src) in lane.iter_mut().zip(buf.iter()) {
                *dst = src;
            }
        }
    }
}
