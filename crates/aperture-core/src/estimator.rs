//! PSF parameter fitting, one group at a time.

use ndarray::Array3;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cancel::AbortToken;
use crate::consts::{
    DEFAULT_GRADIENT_ATOL, DEFAULT_GRADIENT_RTOL, DEFAULT_MAX_ITERATIONS, DEFAULT_MEMORY,
    EVALUATION_CAP_FACTOR, LINE_SEARCH_FTOL, LINE_SEARCH_GTOL, LINE_SEARCH_STPMIN,
};
use crate::cost::{CostFunction, WeightedConvolutionCost};
use crate::error::{ensure_shape, ApertureError, Result};
use crate::optim::{Diagnostic, Task, Vmlmb, VmlmbConfig};
use crate::psf::{ParameterGroup, ParameterVector, PsfModel, PsfOps};

/// Optimizer settings of a parameter fit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    pub gatol: f64,
    pub grtol: f64,
    pub max_iterations: usize,
    /// Evaluation cap; defaults to twice the iteration cap.
    pub max_evaluations: Option<usize>,
    pub memory: usize,
    /// Lower bound on every coefficient, unbounded when absent.
    pub lower: Option<f64>,
    pub upper: Option<f64>,
    pub ftol: f64,
    pub gtol: f64,
    pub stpmin: f64,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            gatol: DEFAULT_GRADIENT_ATOL,
            grtol: DEFAULT_GRADIENT_RTOL,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_evaluations: None,
            memory: DEFAULT_MEMORY,
            lower: None,
            upper: None,
            ftol: LINE_SEARCH_FTOL,
            gtol: LINE_SEARCH_GTOL,
            stpmin: LINE_SEARCH_STPMIN,
        }
    }
}

impl EstimatorConfig {
    pub fn evaluation_cap(&self) -> usize {
        self.max_evaluations
            .unwrap_or(EVALUATION_CAP_FACTOR * self.max_iterations)
    }

    pub fn validate(&self) -> Result<()> {
        let lower = self.lower.unwrap_or(f64::NEG_INFINITY);
        let upper = self.upper.unwrap_or(f64::INFINITY);
        if lower.is_nan() || upper.is_nan() || lower > upper {
            return Err(ApertureError::Config(format!(
                "invalid coefficient bounds [{lower}, {upper}]"
            )));
        }
        if !(0.0 < self.ftol && self.ftol < self.gtol && self.gtol < 1.0) {
            return Err(ApertureError::Config(format!(
                "line search constants must satisfy 0 < ftol < gtol < 1, got {} and {}",
                self.ftol, self.gtol
            )));
        }
        if self.gatol < 0.0 || self.grtol < 0.0 {
            return Err(ApertureError::Config(
                "gradient tolerances must be non-negative".into(),
            ));
        }
        Ok(())
    }

    fn optimizer_config(&self) -> VmlmbConfig {
        VmlmbConfig {
            memory: self.memory,
            gatol: self.gatol,
            grtol: self.grtol,
            lower: self.lower.unwrap_or(f64::NEG_INFINITY),
            upper: self.upper.unwrap_or(f64::INFINITY),
            ftol: self.ftol,
            gtol: self.gtol,
            stpmin: self.stpmin,
        }
    }
}

/// Why a fit ended.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum StopReason {
    Converged,
    IterationLimit,
    EvaluationLimit,
    Aborted,
    /// Zero iteration budget: nothing was evaluated.
    Skipped,
    /// The optimizer gave up; the best coefficients seen are kept.
    Optimizer(Diagnostic),
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Converged => write!(f, "converged"),
            Self::IterationLimit => write!(f, "iteration limit"),
            Self::EvaluationLimit => write!(f, "evaluation limit"),
            Self::Aborted => write!(f, "aborted"),
            Self::Skipped => write!(f, "skipped"),
            Self::Optimizer(d) => write!(f, "{d}"),
        }
    }
}

/// Report of one group fit.
#[derive(Clone, Debug, PartialEq)]
pub struct FitSummary {
    pub group: ParameterGroup,
    /// Cost at the starting coefficients.
    pub initial_cost: Option<f64>,
    pub best_cost: Option<f64>,
    pub iterations: usize,
    pub evaluations: usize,
    pub stop: StopReason,
    /// Coefficients installed in the model.
    pub coefficients: Vec<f64>,
}

impl FitSummary {
    fn untouched(group: ParameterGroup, coefficients: Vec<f64>, stop: StopReason) -> Self {
        Self {
            group,
            initial_cost: None,
            best_cost: None,
            iterations: 0,
            evaluations: 0,
            stop,
            coefficients,
        }
    }
}

/// Lowest-cost coefficients seen during a fit.
struct BestSnapshot {
    coefficients: Vec<f64>,
    cost: f64,
}

impl BestSnapshot {
    fn offer(&mut self, coefficients: &[f64], cost: f64) {
        if cost < self.cost {
            self.cost = cost;
            self.coefficients.copy_from_slice(coefficients);
        }
    }
}

/// Fits PSF parameters to the data given a fixed object estimate.
pub struct ParameterEstimator {
    config: EstimatorConfig,
    cost: Box<dyn CostFunction>,
    data_dim: Option<(usize, usize, usize)>,
    object: Option<Array3<f64>>,
    abort: AbortToken,
}

impl ParameterEstimator {
    /// Estimator with the weighted least-squares cost.
    pub fn new(config: EstimatorConfig) -> Self {
        Self::with_cost(config, Box::new(WeightedConvolutionCost::new()))
    }

    pub fn with_cost(config: EstimatorConfig, cost: Box<dyn CostFunction>) -> Self {
        Self {
            config,
            cost,
            data_dim: None,
            object: None,
            abort: AbortToken::new(),
        }
    }

    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut EstimatorConfig {
        &mut self.config
    }

    pub fn set_data(&mut self, data: &Array3<f64>) -> Result<()> {
        self.cost.set_data(data)?;
        self.data_dim = Some(data.dim());
        Ok(())
    }

    pub fn set_weights(&mut self, weights: &Array3<f64>, normalize: bool) -> Result<()> {
        self.cost.set_weights(weights, normalize)
    }

    pub fn set_object(&mut self, object: Array3<f64>) {
        self.object = Some(object);
    }

    pub fn object(&self) -> Option<&Array3<f64>> {
        self.object.as_ref()
    }

    pub fn abort_token(&self) -> AbortToken {
        self.abort.clone()
    }

    pub fn abort(&self) {
        self.abort.abort();
    }

    /// Fit `group`'s coefficients of `model` and install the best ones found.
    ///
    /// Configuration problems fail before any evaluation. Optimizer warnings,
    /// caps and aborts end the fit normally and are reported in the summary.
    pub fn fit(&mut self, model: &mut PsfModel, group: ParameterGroup) -> Result<FitSummary> {
        let data_dim = self.data_dim.ok_or(ApertureError::MissingInput("data"))?;
        let object = self
            .object
            .as_ref()
            .ok_or(ApertureError::MissingInput("object"))?;
        ensure_shape(data_dim, object.dim())?;
        ensure_shape(data_dim, model.shape().dim())?;
        if !model.parameter_flags().contains(group) {
            return Err(ApertureError::Unsupported(format!(
                "{group} parameters on a {} model",
                model.kind()
            )));
        }
        self.config.validate()?;

        let start = model.param(group)?.clone();
        if self.config.max_iterations == 0 {
            return Ok(FitSummary::untouched(
                group,
                start.into_values(),
                StopReason::Skipped,
            ));
        }
        if self.abort.is_aborted() {
            return Ok(FitSummary::untouched(
                group,
                start.into_values(),
                StopReason::Aborted,
            ));
        }

        // The object plays the kernel; the PSF is the variable.
        self.cost.set_psf(object, [0, 0, 0])?;

        let cap = self.config.evaluation_cap();
        let mut optimizer = Vmlmb::new(self.config.optimizer_config());
        let mut x = start.values().to_vec();
        let mut g = vec![0.0; x.len()];
        let mut f = f64::INFINITY;
        let mut grad_psf = Array3::<f64>::zeros(data_dim);
        let mut best = BestSnapshot {
            coefficients: x.clone(),
            cost: f64::INFINITY,
        };
        let mut initial_cost = None;
        let mut evaluations = 0;

        let mut task = optimizer.start(&mut x);
        let stop = loop {
            match task {
                Task::ComputeFg => {
                    if evaluations >= cap {
                        break StopReason::EvaluationLimit;
                    }
                    f = self.evaluate(model, group, &x, &mut grad_psf, &mut g)?;
                    evaluations += 1;
                    if initial_cost.is_none() {
                        initial_cost = Some(f);
                    }
                    best.offer(&x, f);
                }
                Task::NewX => {
                    debug!(
                        %group,
                        iteration = optimizer.iterations(),
                        evaluations,
                        cost = optimizer.cost(),
                        "Parameter iterate accepted"
                    );
                    if self.abort.is_aborted() {
                        break StopReason::Aborted;
                    }
                    if optimizer.iterations() >= self.config.max_iterations {
                        break StopReason::IterationLimit;
                    }
                }
                Task::FinalX => break StopReason::Converged,
                Task::Warning(reason) | Task::Error(reason) => {
                    warn!(%group, %reason, "Parameter fit stopped early");
                    break StopReason::Optimizer(reason);
                }
            }
            task = optimizer.iterate(&mut x, f, &g);
        };

        let installed = if best.cost.is_finite() {
            best.coefficients
        } else {
            start.values().to_vec()
        };
        model.set_param(&ParameterVector::new(group, installed.clone()))?;

        let summary = FitSummary {
            group,
            initial_cost,
            best_cost: best.cost.is_finite().then_some(best.cost),
            iterations: optimizer.iterations(),
            evaluations,
            stop,
            coefficients: installed,
        };
        info!(
            %group,
            iterations = summary.iterations,
            evaluations = summary.evaluations,
            initial_cost = ?summary.initial_cost,
            best_cost = ?summary.best_cost,
            stop = %summary.stop,
            "Parameter fit finished"
        );
        Ok(summary)
    }

    /// Push `x` into the model and return the cost, writing its gradient to `g`.
    ///
    /// Coefficients the model rejects (a non-positive index/wavelength ratio,
    /// a zero modulus) cost infinity so the line search backs off.
    fn evaluate(
        &mut self,
        model: &mut PsfModel,
        group: ParameterGroup,
        x: &[f64],
        grad_psf: &mut Array3<f64>,
        g: &mut [f64],
    ) -> Result<f64> {
        match model.set_param(&ParameterVector::new(group, x.to_vec())) {
            Ok(()) => {}
            Err(ApertureError::InvalidArgument(reason)) => {
                debug!(%group, %reason, "Trial coefficients rejected");
                g.fill(0.0);
                return Ok(f64::INFINITY);
            }
            Err(e) => return Err(e),
        }
        let cost = self
            .cost
            .cost_and_gradient(1.0, model.psf(), grad_psf, true)?;
        let jacobian = model.apply_jacobian(grad_psf, group)?;
        g.copy_from_slice(&jacobian);
        Ok(cost)
    }
}

impl std::fmt::Debug for ParameterEstimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParameterEstimator")
            .field("config", &self.config)
            .field("data_dim", &self.data_dim)
            .field("has_object", &self.object.is_some())
            .finish()
    }
}
