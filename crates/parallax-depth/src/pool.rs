//! Bounded worker pool for depth inference.

use crate::error::{DepthError, DepthResult};
use crate::estimator::DepthEstimator;
use crate::normalize::RawDepth;
use parallax_core::{Frame, ParallaxError};
use rayon::prelude::*;

/// Runs estimator calls for a batch of frames concurrently.
///
/// Results always come back in input order.
pub struct EstimatorPool {
    pool: Option<rayon::ThreadPool>,
    workers: usize,
}

impl EstimatorPool {
    /// A pool of `workers` threads; one worker runs inline on the caller.
    pub fn new(workers: usize) -> DepthResult<Self> {
        if workers == 0 {
            return Err(ParallaxError::InvalidParameter("depth_workers must be at least 1".into()).into());
        }
        let pool = if workers > 1 {
            Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(workers)
                    .thread_name(|i| format!("depth-worker-{i}"))
                    .build()
                    .map_err(|e| DepthError::Preprocess(format!("depth worker pool: {e}")))?,
            )
        } else {
            None
        };
        Ok(Self { pool, workers })
    }

    /// Batch size that keeps every worker busy.
    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn predict_batch(
        &self,
        estimator: &dyn DepthEstimator,
        frames: &[Frame],
    ) -> Vec<DepthResult<RawDepth>> {
        match &self.pool {
            Some(pool) => pool.install(|| frames.par_iter().map(|f| estimator.predict(f)).collect()),
            None => frames.iter().map(|f| estimator.predict(f)).collect(),
        }
    }
}
