use ndarray::{Array2, Array3, Axis, Zip};

use crate::consts::GRAM_SCHMIDT_EPSILON;
use crate::error::{ApertureError, Result};

use super::grid::FrequencyGrid;

/// Radial order `n` and azimuthal frequency `m` of the Noll index `j` (1-based).
///
/// Odd `j` carry `sin` terms (negative `m`), even `j` carry `cos` terms.
pub fn noll_to_nm(j: usize) -> (usize, i32) {
    assert!(j >= 1, "Noll indices start at 1");
    let mut n = 0usize;
    let mut j1 = j - 1;
    while j1 > n {
        n += 1;
        j1 -= n;
    }
    let magnitude = (n % 2) + 2 * ((j1 + (n + 1) % 2) / 2);
    let m = magnitude as i32;
    if j % 2 == 0 {
        (n, m)
    } else {
        (n, -m)
    }
}

/// Zernike radial polynomial `R_n^m(r)` for `m >= 0`, `n - m` even.
pub fn radial_polynomial(n: usize, m: usize, r: f64) -> f64 {
    if m > n || (n - m) % 2 != 0 {
        return 0.0;
    }
    let half_sum = (n + m) / 2;
    let half_diff = (n - m) / 2;
    (0..=half_diff)
        .map(|k| {
            let sign = if k % 2 == 0 { 1.0 } else { -1.0 };
            let coeff = factorial(n - k)
                / (factorial(k) * factorial(half_sum - k) * factorial(half_diff - k));
            sign * coeff * r.powi((n - 2 * k) as i32)
        })
        .sum()
}

/// Noll-normalized Zernike polynomial `Z_j` at polar coordinates on the unit disk.
pub fn zernike(j: usize, r: f64, theta: f64) -> f64 {
    let (n, m) = noll_to_nm(j);
    let radial = radial_polynomial(n, m.unsigned_abs() as usize, r);
    let norm = (n as f64 + 1.0).sqrt();
    match m {
        0 => norm * radial,
        m if m > 0 => std::f64::consts::SQRT_2 * norm * radial * (m as f64 * theta).cos(),
        m => std::f64::consts::SQRT_2 * norm * radial * (-m as f64 * theta).sin(),
    }
}

/// Noll indices of the first `count` modes; only rotationally symmetric
/// modes (`m == 0`) when `radial` is set.
pub fn noll_indices(count: usize, radial: bool) -> Vec<usize> {
    (1..)
        .filter(|&j| !radial || noll_to_nm(j).1 == 0)
        .take(count)
        .collect()
}

/// First `count` Zernike modes sampled on the pupil grid, shape `(count, ny, nx)`.
///
/// Modes are evaluated on the disk of radius `radius`, zeroed outside
/// `support`, and Gram-Schmidt orthonormalized over the support so that every
/// mode has unit L2 norm and mode 0 is the constant piston.
pub fn zernike_basis(
    grid: &FrequencyGrid,
    radius: f64,
    support: &Array2<bool>,
    count: usize,
    radial: bool,
) -> Result<Array3<f64>> {
    let (ny, nx) = grid.dim();
    let polar = grid.polar(radius);
    let mut basis = Array3::<f64>::zeros((count, ny, nx));

    for (mode, j) in noll_indices(count, radial).into_iter().enumerate() {
        let mut plane = basis.index_axis_mut(Axis(0), mode);
        Zip::from(&mut plane)
            .and(&polar)
            .and(support)
            .for_each(|z, &(r, theta), &inside| {
                if inside {
                    *z = zernike(j, r, theta);
                }
            });
    }

    gram_schmidt(&mut basis)?;
    Ok(basis)
}

/// Modified Gram-Schmidt over the leading axis.
fn gram_schmidt(basis: &mut Array3<f64>) -> Result<()> {
    let count = basis.len_of(Axis(0));
    for k in 0..count {
        for i in 0..k {
            let (done, mut rest) = basis.view_mut().split_at(Axis(0), k);
            let q = done.index_axis(Axis(0), i);
            let mut v = rest.index_axis_mut(Axis(0), 0);
            let proj = Zip::from(&v).and(&q).fold(0.0, |acc, &a, &b| acc + a * b);
            v.zip_mut_with(&q, |a, &b| *a -= proj * b);
        }
        let mut v = basis.index_axis_mut(Axis(0), k);
        let norm = v.iter().map(|a| a * a).sum::<f64>().sqrt();
        if norm < GRAM_SCHMIDT_EPSILON {
            return Err(ApertureError::Config(format!(
                "pupil support is too small to hold {count} independent Zernike modes"
            )));
        }
        v.mapv_inplace(|a| a / norm);
    }
    Ok(())
}

fn factorial(n: usize) -> f64 {
    (1..=n).fold(1.0, |acc, k| acc * k as f64)
}
