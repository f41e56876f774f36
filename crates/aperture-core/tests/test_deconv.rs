mod common;

use approx::assert_abs_diff_eq;
use ndarray::Array3;

use aperture_core::compute::convolve;
use aperture_core::deconv::edge_preserving::hyperbolic_tv;
use aperture_core::deconv::{DeconvolutionConfig, Deconvolver, EdgePreservingDeconvolver};
use aperture_core::error::ApertureError;
use aperture_core::psf::{GaussianModel, PsfOps};

use common::{assert_gradients_close, blob_object, pseudo_random, small_shape, test_optics};

fn gaussian_psf() -> Array3<f64> {
    let mut model = GaussianModel::new(&test_optics(small_shape()), [0.4, 0.4, 0.8]).unwrap();
    model.psf().clone()
}

/// Blurred blobs and the deconvolver set up on them.
fn setup(config: DeconvolutionConfig) -> (Array3<f64>, EdgePreservingDeconvolver) {
    let psf = gaussian_psf();
    let truth = blob_object(small_shape().dim());
    let data = convolve(&truth, &psf).unwrap();
    let mut deconvolver = EdgePreservingDeconvolver::new(&data, config).unwrap();
    deconvolver.update_psf(&psf).unwrap();
    (data, deconvolver)
}

fn residual(a: &Array3<f64>, b: &Array3<f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
}

// ---------------------------------------------------------------------------
// Hyperbolic total variation
// ---------------------------------------------------------------------------

#[test]
fn constant_volume_has_no_variation() {
    let x = Array3::from_elem((3, 4, 5), 2.5);
    let mut grad = Array3::zeros(x.raw_dim());
    let value = hyperbolic_tv(&x, 1.0, 0.1, &mut grad);
    assert_abs_diff_eq!(value, 0.0, epsilon = 1e-14);
    assert!(grad.iter().all(|g| g.abs() < 1e-14));
}

#[test]
fn tv_gradient_matches_finite_differences() {
    let dim = (3, 4, 5);
    let mut x = pseudo_random(dim, 51);
    let (mu, eps) = (0.7, 0.05);
    let mut grad = Array3::zeros(dim);
    hyperbolic_tv(&x, mu, eps, &mut grad);

    let step = 1e-6;
    let mut analytic = Vec::new();
    let mut numeric = Vec::new();
    for idx in [[0, 0, 0], [1, 2, 3], [2, 3, 4], [1, 0, 4], [0, 3, 2]] {
        let base = x[idx];
        let mut scratch = Array3::zeros(dim);
        x[idx] = base + step;
        let f_plus = hyperbolic_tv(&x, mu, eps, &mut scratch);
        x[idx] = base - step;
        let f_minus = hyperbolic_tv(&x, mu, eps, &mut scratch);
        x[idx] = base;
        analytic.push(grad[idx]);
        numeric.push((f_plus - f_minus) / (2.0 * step));
    }
    assert_gradients_close(&analytic, &numeric, 1e-6);
}

#[test]
fn tv_accumulates_into_gradient() {
    let x = pseudo_random((2, 3, 4), 52);
    let mut fresh = Array3::zeros(x.raw_dim());
    hyperbolic_tv(&x, 1.0, 0.1, &mut fresh);

    let mut offset = Array3::from_elem(x.raw_dim(), 1.0);
    hyperbolic_tv(&x, 1.0, 0.1, &mut offset);
    for (a, b) in fresh.iter().zip(offset.iter()) {
        assert_abs_diff_eq!(a + 1.0, *b, epsilon = 1e-12);
    }
}

// ---------------------------------------------------------------------------
// Deconvolution
// ---------------------------------------------------------------------------

#[test]
fn unregularized_deconvolution_reduces_residual() {
    let config = DeconvolutionConfig {
        regularization: 0.0,
        max_iterations: 20,
        ..DeconvolutionConfig::default()
    };
    let (data, mut deconvolver) = setup(config);
    let psf = gaussian_psf();

    let before = residual(&convolve(&data, &psf).unwrap(), &data);
    let object = deconvolver.deconv(&data).unwrap();
    let after = residual(&convolve(&object, &psf).unwrap(), &data);
    assert!(after < before, "residual rose from {before:e} to {after:e}");
    assert!(deconvolver.iterations() > 0);

    let model = deconvolver.model().expect("model after deconv");
    assert_abs_diff_eq!(residual(model, &data), after, epsilon = 1e-12);
}

#[test]
fn positivity_is_enforced() {
    let (data, mut deconvolver) = setup(DeconvolutionConfig {
        max_iterations: 15,
        ..DeconvolutionConfig::default()
    });
    let object = deconvolver.deconv(&data).unwrap();
    assert!(object.iter().all(|&v| v >= 0.0), "negative voxel in object");
}

#[test]
fn zero_iterations_return_initial() {
    let (data, mut deconvolver) = setup(DeconvolutionConfig {
        max_iterations: 0,
        ..DeconvolutionConfig::default()
    });
    let object = deconvolver.deconv(&data).unwrap();
    assert_eq!(object, data);
    assert_eq!(deconvolver.iterations(), 0);
}

#[test]
fn aborted_deconvolution_stops_at_first_checkpoint() {
    let (data, mut deconvolver) = setup(DeconvolutionConfig::default());
    deconvolver.abort();
    assert!(deconvolver.abort_token().is_aborted());
    deconvolver.deconv(&data).unwrap();
    assert_eq!(deconvolver.iterations(), 0);
}

#[test]
fn deconv_without_psf_is_missing_input() {
    let data = blob_object(small_shape().dim());
    let mut deconvolver =
        EdgePreservingDeconvolver::new(&data, DeconvolutionConfig::default()).unwrap();
    assert!(deconvolver.model().is_none());
    assert!(deconvolver.data().is_some());
    assert!(matches!(
        deconvolver.deconv(&data),
        Err(ApertureError::MissingInput("psf"))
    ));
}

#[test]
fn wrong_initial_shape_is_rejected() {
    let (_, mut deconvolver) = setup(DeconvolutionConfig::default());
    assert!(matches!(
        deconvolver.deconv(&Array3::zeros((2, 2, 2))),
        Err(ApertureError::ShapeMismatch { .. })
    ));
}

#[test]
fn invalid_config_is_rejected() {
    let data = blob_object(small_shape().dim());
    let config = DeconvolutionConfig {
        edge_threshold: 0.0,
        ..DeconvolutionConfig::default()
    };
    assert!(matches!(
        EdgePreservingDeconvolver::new(&data, config),
        Err(ApertureError::Config(_))
    ));
}
