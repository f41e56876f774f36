use ndarray::{Array3, Zip};
use num_complex::Complex64;

use crate::compute::Fft3Plan;
use crate::error::{ensure_shape, ApertureError, Result};
use crate::volume::roll;

use super::CostFunction;

/// Weighted least squares on a circular convolution:
/// `f(x) = Σ w·(h ⊛ x - d)²`.
///
/// Without weights every voxel counts once.
#[derive(Clone, Default)]
pub struct WeightedConvolutionCost {
    plan: Option<Fft3Plan>,
    /// Spectrum of the installed kernel.
    kernel: Option<Array3<Complex64>>,
    data: Option<Array3<f64>>,
    weights: Option<Array3<f64>>,
}

impl WeightedConvolutionCost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dim(&self) -> Option<(usize, usize, usize)> {
        self.plan.as_ref().map(Fft3Plan::dim)
    }

    pub fn data(&self) -> Option<&Array3<f64>> {
        self.data.as_ref()
    }

    pub fn weights(&self) -> Option<&Array3<f64>> {
        self.weights.as_ref()
    }

    /// Circular convolution of `x` with the installed kernel.
    pub fn convolve(&self, x: &Array3<f64>) -> Result<Array3<f64>> {
        let (plan, kernel) = self.plan_and_kernel()?;
        ensure_shape(plan.dim(), x.dim())?;
        let mut spectrum = plan.forward_real(x);
        Zip::from(&mut spectrum).and(kernel).for_each(|s, &k| *s *= k);
        Ok(plan.inverse_real(spectrum))
    }

    /// Replan for `dim`; products tied to the old shape are dropped.
    fn reshape(&mut self, dim: (usize, usize, usize)) {
        if self.plan.as_ref().is_some_and(|p| p.dim() == dim) {
            return;
        }
        self.plan = Some(Fft3Plan::new(dim));
        self.kernel = None;
        self.weights = None;
    }

    fn plan_and_kernel(&self) -> Result<(&Fft3Plan, &Array3<Complex64>)> {
        let plan = self.plan.as_ref().ok_or(ApertureError::MissingInput("data"))?;
        let kernel = self.kernel.as_ref().ok_or(ApertureError::MissingInput("psf"))?;
        Ok((plan, kernel))
    }
}

impl CostFunction for WeightedConvolutionCost {
    fn set_psf(&mut self, psf: &Array3<f64>, offset: [isize; 3]) -> Result<()> {
        let plan = self.plan.as_ref().ok_or(ApertureError::MissingInput("data"))?;
        ensure_shape(plan.dim(), psf.dim())?;
        let kernel = plan.forward_real(&roll(psf, offset));
        self.kernel = Some(kernel);
        Ok(())
    }

    fn set_data(&mut self, data: &Array3<f64>) -> Result<()> {
        if data.iter().any(|v| !v.is_finite()) {
            return Err(ApertureError::InvalidArgument(
                "data contains non-finite values".into(),
            ));
        }
        self.reshape(data.dim());
        self.data = Some(data.to_owned());
        Ok(())
    }

    fn set_weights(&mut self, weights: &Array3<f64>, normalize: bool) -> Result<()> {
        let plan = self.plan.as_ref().ok_or(ApertureError::MissingInput("data"))?;
        ensure_shape(plan.dim(), weights.dim())?;
        if weights.iter().any(|w| !(w.is_finite() && *w >= 0.0)) {
            return Err(ApertureError::InvalidArgument(
                "weights must be finite and non-negative".into(),
            ));
        }

        let mut weights = weights.to_owned();
        if normalize {
            let (sum, count) = weights
                .iter()
                .filter(|&&w| w > 0.0)
                .fold((0.0, 0usize), |(s, n), &w| (s + w, n + 1));
            if count == 0 {
                return Err(ApertureError::InvalidArgument(
                    "all weights are zero".into(),
                ));
            }
            let scale = count as f64 / sum;
            weights.mapv_inplace(|w| w * scale);
        }
        self.weights = Some(weights);
        Ok(())
    }

    fn cost_and_gradient(
        &mut self,
        scale: f64,
        x: &Array3<f64>,
        grad: &mut Array3<f64>,
        want_gradient: bool,
    ) -> Result<f64> {
        let data = self.data.as_ref().ok_or(ApertureError::MissingInput("data"))?;
        let (plan, kernel) = self.plan_and_kernel()?;
        ensure_shape(plan.dim(), x.dim())?;
        if want_gradient {
            ensure_shape(plan.dim(), grad.dim())?;
        }

        let mut spectrum = plan.forward_real(x);
        Zip::from(&mut spectrum).and(kernel).for_each(|s, &k| *s *= k);
        let model = plan.inverse_real(spectrum);

        // Weighted residual w·(h ⊛ x - d).
        let mut residual = model - data;
        let cost = match &self.weights {
            Some(w) => {
                let mut acc = 0.0;
                Zip::from(&mut residual).and(w).for_each(|r, &w| {
                    acc += w * *r * *r;
                    *r *= w;
                });
                acc
            }
            None => residual.iter().map(|r| r * r).sum(),
        };

        if want_gradient {
            // ∇f = 2·hᵀ ⊛ (w·r), the adjoint being correlation.
            let mut spectrum = plan.forward_real(&residual);
            Zip::from(&mut spectrum)
                .and(kernel)
                .for_each(|s, k| *s *= k.conj());
            let back = plan.inverse_real(spectrum);
            let factor = 2.0 * scale;
            Zip::from(grad).and(&back).for_each(|g, &b| *g = factor * b);
        }

        Ok(scale * cost)
    }
}

impl std::fmt::Debug for WeightedConvolutionCost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeightedConvolutionCost")
            .field("dim", &self.dim())
            .field("has_kernel", &self.kernel.is_some())
            .field("weighted", &self.weights.is_some())
            .finish()
    }
}
