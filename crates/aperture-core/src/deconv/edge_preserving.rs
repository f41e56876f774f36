use ndarray::{Array3, Axis, Slice, Zip};
use tracing::debug;

use crate::cancel::AbortToken;
use crate::cost::{CostFunction, WeightedConvolutionCost};
use crate::error::{ensure_shape, ApertureError, Result};
use crate::optim::{Task, Vmlmb, VmlmbConfig};
use crate::volume::{contiguous, contiguous_mut};

use super::{DeconvolutionConfig, Deconvolver};

/// Weighted least squares plus hyperbolic total variation:
///
/// `f(x) = Σ w·(h ⊛ x - d)² + μ·Σ (sqrt(|∇x|² + ε²) - ε)`
///
/// minimized with the bounded quasi-Newton optimizer, optionally under a
/// positivity constraint.
#[derive(Debug)]
pub struct EdgePreservingDeconvolver {
    config: DeconvolutionConfig,
    cost: WeightedConvolutionCost,
    abort: AbortToken,
    model: Option<Array3<f64>>,
    iterations: usize,
    has_psf: bool,
}

impl EdgePreservingDeconvolver {
    pub fn new(data: &Array3<f64>, config: DeconvolutionConfig) -> Result<Self> {
        config.validate()?;
        let mut cost = WeightedConvolutionCost::new();
        cost.set_data(data)?;
        Ok(Self {
            config,
            cost,
            abort: AbortToken::new(),
            model: None,
            iterations: 0,
            has_psf: false,
        })
    }

    pub fn config(&self) -> &DeconvolutionConfig {
        &self.config
    }

    /// Iterations performed by the last `deconv`.
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    fn optimizer_config(&self) -> VmlmbConfig {
        VmlmbConfig {
            memory: self.config.memory,
            lower: if self.config.positivity {
                0.0
            } else {
                f64::NEG_INFINITY
            },
            ..VmlmbConfig::default()
        }
    }

    fn evaluate(&mut self, x: &Array3<f64>, grad: &mut Array3<f64>) -> Result<f64> {
        let data_term = self.cost.cost_and_gradient(1.0, x, grad, true)?;
        let prior = hyperbolic_tv(
            x,
            self.config.regularization,
            self.config.edge_threshold,
            grad,
        );
        Ok(data_term + prior)
    }
}

impl Deconvolver for EdgePreservingDeconvolver {
    fn update_psf(&mut self, psf: &Array3<f64>) -> Result<()> {
        self.cost.set_psf(psf, [0, 0, 0])?;
        self.has_psf = true;
        Ok(())
    }

    fn set_weights(&mut self, weights: &Array3<f64>) -> Result<()> {
        self.cost.set_weights(weights, true)
    }

    fn deconv(&mut self, initial: &Array3<f64>) -> Result<Array3<f64>> {
        if !self.has_psf {
            return Err(ApertureError::MissingInput("psf"));
        }
        let dim = self.cost.dim().ok_or(ApertureError::MissingInput("data"))?;
        ensure_shape(dim, initial.dim())?;

        let mut x = initial.as_standard_layout().into_owned();
        let mut grad = Array3::zeros(dim);
        let mut optimizer = Vmlmb::new(self.optimizer_config());
        let mut f = 0.0;
        self.iterations = 0;

        if self.config.max_iterations > 0 {
            let mut task = optimizer.start(contiguous_mut(&mut x)?);
            loop {
                match task {
                    Task::ComputeFg => f = self.evaluate(&x, &mut grad)?,
                    Task::NewX => {
                        if self.abort.is_aborted()
                            || optimizer.iterations() >= self.config.max_iterations
                        {
                            break;
                        }
                    }
                    Task::FinalX => break,
                    Task::Warning(reason) | Task::Error(reason) => {
                        debug!(%reason, "Deconvolution stopped early");
                        break;
                    }
                }
                task = optimizer.iterate(contiguous_mut(&mut x)?, f, contiguous(&grad)?);
            }
            self.iterations = optimizer.iterations();
        }

        debug!(
            iterations = self.iterations,
            evaluations = optimizer.evaluations(),
            cost = optimizer.cost(),
            "Object deconvolved"
        );
        self.model = Some(self.cost.convolve(&x)?);
        Ok(x)
    }

    fn abort_token(&self) -> AbortToken {
        self.abort.clone()
    }

    fn model(&self) -> Option<&Array3<f64>> {
        self.model.as_ref()
    }

    fn data(&self) -> Option<&Array3<f64>> {
        self.cost.data()
    }
}

/// Add the gradient of `μ·Σ (sqrt(|∇x|² + ε²) - ε)` to `grad` and return its value.
///
/// Forward differences; the difference leaving the volume is zero.
pub fn hyperbolic_tv(x: &Array3<f64>, mu: f64, epsilon: f64, grad: &mut Array3<f64>) -> f64 {
    if mu == 0.0 {
        return 0.0;
    }
    let diffs: [Array3<f64>; 3] = std::array::from_fn(|axis| forward_difference(x, Axis(axis)));

    let mut norm = Array3::<f64>::zeros(x.raw_dim());
    Zip::from(&mut norm)
        .and(&diffs[0])
        .and(&diffs[1])
        .and(&diffs[2])
        .for_each(|n, &dz, &dy, &dx| {
            *n = (dz * dz + dy * dy + dx * dx + epsilon * epsilon).sqrt();
        });
    let value = mu * norm.iter().map(|n| n - epsilon).sum::<f64>();

    for (axis, diff) in diffs.iter().enumerate() {
        let axis = Axis(axis);
        let n = x.len_of(axis);
        if n < 2 {
            continue;
        }
        let flux = Zip::from(diff)
            .and(&norm)
            .map_collect(|&d, &norm| mu * d / norm);
        let head = Slice::from(..n - 1);
        let tail = Slice::from(1..);
        {
            let mut lo = grad.slice_axis_mut(axis, head);
            lo -= &flux.slice_axis(axis, head);
        }
        let mut hi = grad.slice_axis_mut(axis, tail);
        hi += &flux.slice_axis(axis, head);
    }
    value
}

fn forward_difference(x: &Array3<f64>, axis: Axis) -> Array3<f64> {
    let n = x.len_of(axis);
    let mut out = Array3::zeros(x.raw_dim());
    if n > 1 {
        let head = Slice::from(..n - 1);
        let diff = &x.slice_axis(axis, Slice::from(1..)) - &x.slice_axis(axis, head);
        out.slice_axis_mut(axis, head).assign(&diff);
    }
    out
}
