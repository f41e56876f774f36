use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared cooperative-abort flag.
///
/// Clones observe the same flag. Long-running loops poll it at their coarse
/// checkpoints; nothing is interrupted mid-step.
#[derive(Clone, Debug, Default)]
pub struct AbortToken(Arc<AtomicBool>);

impl AbortToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clear the flag before a new run.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
