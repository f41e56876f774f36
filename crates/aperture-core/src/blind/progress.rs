use crate::estimator::FitSummary;

/// Receives progress events from a blind deconvolution run.
///
/// All methods have no-op defaults; implement only what you display.
pub trait BlindProgress: Send + Sync {
    /// Pass `pass` (0-based) of `total` starts.
    fn begin_pass(&self, _pass: usize, _total: usize) {}

    /// The object deconvolution of `pass` is done.
    fn deconvolved(&self, _pass: usize) {}

    /// One parameter group was fitted during `pass`.
    fn group_fitted(&self, _pass: usize, _summary: &FitSummary) {}

    /// The run returned, normally or on abort.
    fn finished(&self, _aborted: bool) {}
}

/// Progress sink that ignores every event.
pub struct NoProgress;

impl BlindProgress for NoProgress {}
