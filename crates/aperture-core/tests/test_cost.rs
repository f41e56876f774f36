mod common;

use approx::assert_abs_diff_eq;
use ndarray::Array3;

use aperture_core::compute::convolve;
use aperture_core::cost::{CostFunction, WeightedConvolutionCost};
use aperture_core::error::ApertureError;

use common::{assert_gradients_close, pseudo_random};

const DIM: (usize, usize, usize) = (4, 6, 8);

fn kernel() -> Array3<f64> {
    pseudo_random(DIM, 1).mapv(|v| v.abs())
}

fn cost_with(data: &Array3<f64>) -> WeightedConvolutionCost {
    let mut cost = WeightedConvolutionCost::new();
    cost.set_data(data).unwrap();
    cost.set_psf(&kernel(), [0, 0, 0]).unwrap();
    cost
}

fn evaluate(cost: &mut WeightedConvolutionCost, x: &Array3<f64>) -> f64 {
    let mut unused = Array3::zeros(DIM);
    cost.cost_and_gradient(1.0, x, &mut unused, false).unwrap()
}

// ---------------------------------------------------------------------------
// Value and gradient
// ---------------------------------------------------------------------------

#[test]
fn exact_data_has_zero_cost() {
    let x = pseudo_random(DIM, 2);
    let data = convolve(&x, &kernel()).unwrap();
    let mut cost = cost_with(&data);
    let mut grad = Array3::zeros(DIM);
    let f = cost.cost_and_gradient(1.0, &x, &mut grad, true).unwrap();
    assert!(f < 1e-20, "cost {f:e}");
    assert!(grad.iter().all(|g| g.abs() < 1e-10));
}

#[test]
fn weighted_gradient_matches_finite_differences() {
    let data = pseudo_random(DIM, 3);
    let mut cost = cost_with(&data);
    let weights = pseudo_random(DIM, 4).mapv(|v| v.abs());
    cost.set_weights(&weights, false).unwrap();

    let mut x = pseudo_random(DIM, 5);
    let mut grad = Array3::zeros(DIM);
    cost.cost_and_gradient(1.0, &x, &mut grad, true).unwrap();

    let step = 1e-6;
    let voxels = [[0, 0, 0], [1, 2, 3], [3, 5, 7], [2, 0, 6]];
    let mut analytic = Vec::new();
    let mut numeric = Vec::new();
    for idx in voxels {
        let base = x[idx];
        x[idx] = base + step;
        let f_plus = evaluate(&mut cost, &x);
        x[idx] = base - step;
        let f_minus = evaluate(&mut cost, &x);
        x[idx] = base;
        analytic.push(grad[idx]);
        numeric.push((f_plus - f_minus) / (2.0 * step));
    }
    assert_gradients_close(&analytic, &numeric, 1e-6);
}

#[test]
fn scale_multiplies_cost_and_gradient() {
    let data = pseudo_random(DIM, 6);
    let mut cost = cost_with(&data);
    let x = pseudo_random(DIM, 7);

    let mut g1 = Array3::zeros(DIM);
    let mut g3 = Array3::zeros(DIM);
    let f1 = cost.cost_and_gradient(1.0, &x, &mut g1, true).unwrap();
    let f3 = cost.cost_and_gradient(3.0, &x, &mut g3, true).unwrap();
    assert_abs_diff_eq!(f3, 3.0 * f1, epsilon = 1e-10 * f1.abs());
    for (a, b) in g1.iter().zip(g3.iter()) {
        assert_abs_diff_eq!(*b, 3.0 * a, epsilon = 1e-10);
    }
}

#[test]
fn gradient_untouched_when_not_requested() {
    let data = pseudo_random(DIM, 8);
    let mut cost = cost_with(&data);
    let x = pseudo_random(DIM, 9);
    let mut grad = Array3::from_elem(DIM, 42.0);
    cost.cost_and_gradient(1.0, &x, &mut grad, false).unwrap();
    assert!(grad.iter().all(|&g| g == 42.0));
}

#[test]
fn kernel_offset_shifts_the_model() {
    let x = pseudo_random(DIM, 10);
    let mut delta = Array3::zeros(DIM);
    delta[[0, 0, 0]] = 1.0;

    let mut cost = WeightedConvolutionCost::new();
    cost.set_data(&x).unwrap();
    cost.set_psf(&delta, [0, 0, 1]).unwrap();
    let shifted = cost.convolve(&x).unwrap();
    assert_abs_diff_eq!(shifted[[1, 2, 4]], x[[1, 2, 3]], epsilon = 1e-12);
}

// ---------------------------------------------------------------------------
// Weights
// ---------------------------------------------------------------------------

#[test]
fn normalized_uniform_weights_match_unweighted() {
    let data = pseudo_random(DIM, 11);
    let x = pseudo_random(DIM, 12);

    let mut plain = cost_with(&data);
    let unweighted = evaluate(&mut plain, &x);

    let mut weighted = cost_with(&data);
    weighted
        .set_weights(&Array3::from_elem(DIM, 2.0), true)
        .unwrap();
    assert_abs_diff_eq!(
        evaluate(&mut weighted, &x),
        unweighted,
        epsilon = 1e-10 * unweighted
    );
}

#[test]
fn zero_weights_mask_voxels() {
    let data = pseudo_random(DIM, 13);
    let mut cost = cost_with(&data);
    cost.set_weights(&Array3::zeros(DIM), false).unwrap();
    assert_eq!(evaluate(&mut cost, &pseudo_random(DIM, 14)), 0.0);
}

#[test]
fn negative_weights_are_rejected() {
    let mut cost = cost_with(&pseudo_random(DIM, 15));
    let mut weights = Array3::from_elem(DIM, 1.0);
    weights[[1, 1, 1]] = -0.5;
    assert!(matches!(
        cost.set_weights(&weights, false),
        Err(ApertureError::InvalidArgument(_))
    ));
}

#[test]
fn all_zero_weights_cannot_be_normalized() {
    let mut cost = cost_with(&pseudo_random(DIM, 16));
    assert!(matches!(
        cost.set_weights(&Array3::zeros(DIM), true),
        Err(ApertureError::InvalidArgument(_))
    ));
}

// ---------------------------------------------------------------------------
// Input errors
// ---------------------------------------------------------------------------

#[test]
fn missing_psf_is_reported() {
    let mut cost = WeightedConvolutionCost::new();
    cost.set_data(&pseudo_random(DIM, 17)).unwrap();
    let mut grad = Array3::zeros(DIM);
    let err = cost
        .cost_and_gradient(1.0, &pseudo_random(DIM, 18), &mut grad, true)
        .unwrap_err();
    assert!(matches!(err, ApertureError::MissingInput("psf")), "got {err}");
}

#[test]
fn psf_before_data_is_reported() {
    let mut cost = WeightedConvolutionCost::new();
    let err = cost.set_psf(&kernel(), [0, 0, 0]).unwrap_err();
    assert!(matches!(err, ApertureError::MissingInput("data")));
}

#[test]
fn shape_mismatch_is_reported() {
    let mut cost = cost_with(&pseudo_random(DIM, 19));
    let x = Array3::zeros((4, 6, 6));
    let mut grad = Array3::zeros((4, 6, 6));
    assert!(matches!(
        cost.cost_and_gradient(1.0, &x, &mut grad, true),
        Err(ApertureError::ShapeMismatch { .. })
    ));
    assert!(matches!(
        cost.set_psf(&Array3::zeros((2, 6, 8)), [0, 0, 0]),
        Err(ApertureError::ShapeMismatch { .. })
    ));
}

#[test]
fn non_finite_data_is_rejected() {
    let mut data = pseudo_random(DIM, 20);
    data[[0, 1, 2]] = f64::NAN;
    let mut cost = WeightedConvolutionCost::new();
    assert!(matches!(
        cost.set_data(&data),
        Err(ApertureError::InvalidArgument(_))
    ));
}

#[test]
fn new_data_shape_drops_kernel() {
    let mut cost = cost_with(&pseudo_random(DIM, 21));
    cost.set_data(&Array3::zeros((2, 6, 8))).unwrap();
    assert_eq!(cost.dim(), Some((2, 6, 8)));
    assert!(matches!(
        cost.convolve(&Array3::zeros((2, 6, 8))),
        Err(ApertureError::MissingInput("psf"))
    ));
}
