//! Alternating blind deconvolution: object deconvolution and PSF parameter
//! fits take turns for a fixed number of passes.

pub mod progress;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ndarray::Array3;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cancel::AbortToken;
use crate::consts::{BLIND_MIN_MEMORY, PARAMETER_GROUP_COUNT};
use crate::deconv::{Deconvolver, WeightUpdater};
use crate::error::{ApertureError, Result};
use crate::estimator::{FitSummary, ParameterEstimator};
use crate::psf::{ParameterGroup, PsfModel, PsfOps};

pub use progress::{BlindProgress, NoProgress};

/// Iteration budget of each parameter group, indexed by the group tag.
/// A zero budget disables the group.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Budgets([usize; PARAMETER_GROUP_COUNT]);

impl Budgets {
    pub fn new(defocus: usize, phase: usize, modulus: usize) -> Self {
        Self([defocus, phase, modulus])
    }

    /// Budgets from an externally supplied list, which must have one entry per group.
    pub fn from_slice(budgets: &[usize]) -> Result<Self> {
        let array: [usize; PARAMETER_GROUP_COUNT] = budgets.try_into().map_err(|_| {
            ApertureError::InvalidArgument(format!(
                "expected {PARAMETER_GROUP_COUNT} group budgets, got {}",
                budgets.len()
            ))
        })?;
        Ok(Self(array))
    }

    pub fn get(&self, group: ParameterGroup) -> usize {
        self.0[group.index()]
    }

    pub fn set(&mut self, group: ParameterGroup, budget: usize) {
        self.0[group.index()] = budget;
    }

    /// Groups with a positive budget, in estimation order.
    pub fn enabled(&self) -> impl Iterator<Item = (ParameterGroup, usize)> + '_ {
        ParameterGroup::ALL
            .into_iter()
            .map(|g| (g, self.get(g)))
            .filter(|&(_, budget)| budget > 0)
    }
}

/// Result of a blind deconvolution run.
#[derive(Clone, Debug)]
pub struct BlindOutcome {
    pub object: Array3<f64>,
    /// Every group fit, in execution order.
    pub fits: Vec<(usize, FitSummary)>,
    /// Passes whose deconvolution completed.
    pub passes_completed: usize,
    pub aborted: bool,
}

/// Cancels a run from another thread.
#[derive(Clone, Debug)]
pub struct AbortHandle {
    controller: AbortToken,
    deconvolver: AbortToken,
    estimator: AbortToken,
    running: Arc<AtomicBool>,
}

impl AbortHandle {
    pub fn abort(&self) {
        self.controller.abort();
        self.deconvolver.abort();
        self.estimator.abort();
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Clears the run flag on every exit path.
struct RunningGuard(Arc<AtomicBool>);

impl RunningGuard {
    fn enter(flag: &Arc<AtomicBool>) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(Arc::clone(flag))
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Alternates object deconvolution and PSF parameter estimation.
pub struct BlindDeconvolution<D: Deconvolver> {
    deconvolver: D,
    estimator: ParameterEstimator,
    passes: usize,
    budgets: Budgets,
    weight_updater: Option<Box<dyn WeightUpdater>>,
    abort: AbortToken,
    running: Arc<AtomicBool>,
}

impl<D: Deconvolver> BlindDeconvolution<D> {
    pub fn new(
        deconvolver: D,
        estimator: ParameterEstimator,
        passes: usize,
        budgets: Budgets,
    ) -> Self {
        Self {
            deconvolver,
            estimator,
            passes,
            budgets,
            weight_updater: None,
            abort: AbortToken::new(),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_weight_updater(mut self, updater: Box<dyn WeightUpdater>) -> Self {
        self.weight_updater = Some(updater);
        self
    }

    pub fn deconvolver(&self) -> &D {
        &self.deconvolver
    }

    pub fn estimator(&self) -> &ParameterEstimator {
        &self.estimator
    }

    pub fn estimator_mut(&mut self) -> &mut ParameterEstimator {
        &mut self.estimator
    }

    pub fn budgets(&self) -> Budgets {
        self.budgets
    }

    pub fn passes(&self) -> usize {
        self.passes
    }

    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            controller: self.abort.clone(),
            deconvolver: self.deconvolver.abort_token(),
            estimator: self.estimator.abort_token(),
            running: Arc::clone(&self.running),
        }
    }

    pub fn abort(&self) {
        self.abort_handle().abort();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run the alternating loop from `initial`.
    ///
    /// An abort returns the current object at the next checkpoint: after a
    /// deconvolution or after a group fit.
    pub fn blind_deconv(
        &mut self,
        model: &mut PsfModel,
        initial: Array3<f64>,
        progress: &dyn BlindProgress,
    ) -> Result<BlindOutcome> {
        let flags = model.parameter_flags();
        if let Some((group, _)) = self.budgets.enabled().find(|&(g, _)| !flags.contains(g)) {
            return Err(ApertureError::Config(format!(
                "{group} estimation requested but the {} model has no {group} parameters",
                model.kind()
            )));
        }

        // Reset before raising the flag: an abort sent while running must stick.
        self.abort.reset();
        self.deconvolver.abort_token().reset();
        self.estimator.abort_token().reset();
        let _guard = RunningGuard::enter(&self.running);

        let memory = self.estimator.config().memory.max(BLIND_MIN_MEMORY);
        self.estimator.config_mut().memory = memory;

        let mut outcome = BlindOutcome {
            object: initial,
            fits: Vec::new(),
            passes_completed: 0,
            aborted: false,
        };

        for pass in 0..self.passes {
            progress.begin_pass(pass, self.passes);
            info!(pass = pass + 1, total = self.passes, "Blind deconvolution pass");

            model.compute_psf();
            model.free_memory();
            self.deconvolver.update_psf(model.psf())?;

            outcome.object = self.deconvolver.deconv(&outcome.object)?;
            outcome.passes_completed = pass + 1;
            progress.deconvolved(pass);

            if let Some(updater) = self.weight_updater.as_mut() {
                let weights = updater.update(&self.deconvolver)?;
                self.deconvolver.set_weights(weights)?;
                self.estimator.set_weights(weights, true)?;
            }

            if self.abort.is_aborted() {
                return Ok(self.finish(outcome, true, progress));
            }

            if pass + 1 == self.passes {
                break;
            }
            for (group, budget) in self.budgets.enabled() {
                self.estimator.set_object(outcome.object.clone());
                let config = self.estimator.config_mut();
                config.grtol = 0.0;
                config.max_iterations = budget;

                let summary = self.estimator.fit(model, group)?;
                debug!(pass, %group, stop = %summary.stop, "Group fitted");
                progress.group_fitted(pass, &summary);
                outcome.fits.push((pass, summary));

                if self.abort.is_aborted() {
                    return Ok(self.finish(outcome, true, progress));
                }
            }
        }

        Ok(self.finish(outcome, false, progress))
    }

    fn finish(
        &self,
        mut outcome: BlindOutcome,
        aborted: bool,
        progress: &dyn BlindProgress,
    ) -> BlindOutcome {
        self.running.store(false, Ordering::SeqCst);
        outcome.aborted = aborted;
        if aborted {
            info!(passes = outcome.passes_completed, "Blind deconvolution aborted");
        }
        progress.finished(aborted);
        outcome
    }
}

impl<D: Deconvolver + std::fmt::Debug> std::fmt::Debug for BlindDeconvolution<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlindDeconvolution")
            .field("deconvolver", &self.deconvolver)
            .field("estimator", &self.estimator)
            .field("passes", &self.passes)
            .field("budgets", &self.budgets)
            .field("running", &self.is_running())
            .finish()
    }
}
