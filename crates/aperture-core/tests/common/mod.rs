#![allow(dead_code)]

use ndarray::Array3;

use aperture_core::psf::{OpticsConfig, Precision};
use aperture_core::volume::VolumeShape;

/// Microscope in arbitrary length units with n/λ = 1 and NA/λ = 2/3.
///
/// The 0.25 lateral pixel puts the pupil cut-off well below Nyquist, so a
/// 16x16 slice already holds 21 support pixels.
pub fn test_optics(shape: VolumeShape) -> OpticsConfig {
    OpticsConfig {
        shape,
        numerical_aperture: 1.0,
        wavelength: 1.5,
        immersion_index: 1.5,
        lateral_pixel: 0.25,
        axial_pixel: 0.5,
        radial: false,
        precision: Precision::Double,
        phase_modes: 4,
        modulus_modes: 3,
        defocus_terms: 1,
    }
}

pub fn small_shape() -> VolumeShape {
    VolumeShape::new(16, 16, 8)
}

pub fn medium_shape() -> VolumeShape {
    VolumeShape::new(32, 32, 16)
}

/// Deterministic values in [-1, 1] from a linear congruential sequence.
pub fn pseudo_random(dim: (usize, usize, usize), seed: u64) -> Array3<f64> {
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    Array3::from_shape_simple_fn(dim, || {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        ((state >> 11) as f64 / (1u64 << 53) as f64) * 2.0 - 1.0
    })
}

/// Positive test object: a few smooth Gaussian blobs on a faint background.
pub fn blob_object(dim: (usize, usize, usize)) -> Array3<f64> {
    let (nz, ny, nx) = dim;
    let centres = [
        (nz as f64 * 0.5, ny as f64 * 0.3, nx as f64 * 0.35, 1.0),
        (nz as f64 * 0.4, ny as f64 * 0.65, nx as f64 * 0.6, 0.7),
        (nz as f64 * 0.6, ny as f64 * 0.5, nx as f64 * 0.25, 0.5),
    ];
    Array3::from_shape_fn(dim, |(z, y, x)| {
        let background = 0.01;
        centres.iter().fold(background, |acc, &(cz, cy, cx, amp)| {
            let d2 = ((z as f64 - cz) / 1.5).powi(2)
                + ((y as f64 - cy) / 1.5).powi(2)
                + ((x as f64 - cx) / 1.5).powi(2);
            acc + amp * (-0.5 * d2).exp()
        })
    })
}

/// `Σ a·b` over two volumes.
pub fn inner(a: &Array3<f64>, b: &Array3<f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Assert two gradients agree to `rtol` relative to the larger norm.
pub fn assert_gradients_close(analytic: &[f64], numeric: &[f64], rtol: f64) {
    assert_eq!(analytic.len(), numeric.len());
    let norm = analytic
        .iter()
        .chain(numeric.iter())
        .map(|v| v.abs())
        .fold(0.0f64, f64::max)
        .max(1e-300);
    for (k, (a, n)) in analytic.iter().zip(numeric).enumerate() {
        assert!(
            (a - n).abs() <= rtol * norm,
            "gradient component {k}: analytic {a:e}, numeric {n:e} (scale {norm:e})"
        );
    }
}
