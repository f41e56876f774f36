use std::num::NonZeroUsize;

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::error::Result;

/// Bounded pool executing one task per axial slice.
///
/// Built once per model and reused for every synthesis and Jacobian batch.
pub struct WorkerPool {
    pool: ThreadPool,
}

impl WorkerPool {
    pub fn new(threads: usize) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|i| format!("aperture-slice-{i}"))
            .build()?;
        Ok(Self { pool })
    }

    /// Pool sized to the number of available processing units.
    pub fn with_available_parallelism() -> Result<Self> {
        let threads = std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1);
        Self::new(threads)
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Run `op` inside the pool; parallel iterators it spawns use the pool's workers.
    pub fn install<R, F>(&self, op: F) -> R
    where
        R: Send,
        F: FnOnce() -> R + Send,
    {
        self.pool.install(op)
    }

    /// Evaluate `task` for every slice index and add the per-slice vectors.
    ///
    /// Partial results are summed in slice order after the batch joins, so the
    /// reduction does not depend on scheduling.
    pub fn sum_slices<F>(&self, slices: usize, len: usize, task: F) -> Vec<f64>
    where
        F: Fn(usize) -> Vec<f64> + Send + Sync,
    {
        let partials: Vec<Vec<f64>> =
            self.install(|| (0..slices).into_par_iter().map(&task).collect());

        let mut total = vec![0.0; len];
        for partial in partials {
            for (acc, v) in total.iter_mut().zip(partial) {
                *acc += v;
            }
        }
        total
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("threads", &self.threads())
            .finish()
    }
}
