//! Explicit owner of loaded depth models.
//!
//! A [`DepthContext`] is created once per process (or per run), hands out
//! shared estimators keyed by model, and drops them on [`DepthContext::release`].

use crate::error::DepthResult;
use crate::estimator::DepthEstimator;
use crate::model_manager::{DepthModel, ModelManager};
use crate::normalize::DepthNormalizer;
use parallax_core::{BitDepth, DepthMap, Frame};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Builds the estimator for a model on first use.
pub type EstimatorFactory =
    Box<dyn Fn(DepthModel) -> DepthResult<Arc<dyn DepthEstimator>> + Send + Sync>;

pub struct DepthContext {
    factory: EstimatorFactory,
    loaded: Mutex<HashMap<DepthModel, Arc<dyn DepthEstimator>>>,
}

impl DepthContext {
    /// Context backed by model weights in `models`.
    ///
    /// With the `onnx` feature the weights must exist; without it every model
    /// resolves to the heuristic CPU estimator.
    pub fn new(models: ModelManager) -> Self {
        Self::with_factory(move |model| default_estimator(&models, model))
    }

    /// Context with a custom estimator constructor.
    pub fn with_factory<F>(factory: F) -> Self
    where
        F: Fn(DepthModel) -> DepthResult<Arc<dyn DepthEstimator>> + Send + Sync + 'static,
    {
        Self {
            factory: Box::new(factory),
            loaded: Mutex::new(HashMap::new()),
        }
    }

    /// Shared estimator for `model`, constructing it if needed.
    pub fn estimator(&self, model: DepthModel) -> DepthResult<Arc<dyn DepthEstimator>> {
        let mut loaded = self.loaded.lock();
        if let Some(est) = loaded.get(&model) {
            return Ok(Arc::clone(est));
        }
        let est = (self.factory)(model)?;
        info!(model = %model, estimator = est.name(), "Depth model loaded");
        loaded.insert(model, Arc::clone(&est));
        Ok(est)
    }

    /// Estimate one frame with per-frame normalization.
    pub fn estimate(
        &self,
        frame: &Frame,
        model: DepthModel,
        bit_depth: BitDepth,
    ) -> DepthResult<DepthMap> {
        let raw = self.estimator(model)?.predict(frame)?;
        DepthNormalizer::new(Default::default(), bit_depth).normalize(&raw)
    }

    pub fn loaded_models(&self) -> Vec<DepthModel> {
        let mut models: Vec<_> = self.loaded.lock().keys().copied().collect();
        models.sort_by_key(|m| m.id());
        models
    }

    /// Drop every loaded model. Estimators still shared elsewhere stay alive
    /// until their last handle is dropped.
    pub fn release(&self) {
        let mut loaded = self.loaded.lock();
        if !loaded.is_empty() {
            info!(count = loaded.len(), "Releasing depth models");
            loaded.clear();
        }
    }
}

impl Drop for DepthContext {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(feature = "onnx")]
fn default_estimator(
    models: &ModelManager,
    model: DepthModel,
) -> DepthResult<Arc<dyn DepthEstimator>> {
    let path = models.ensure_model(model)?;
    Ok(Arc::new(crate::estimator::OnnxDepthEstimator::load(&path, model)?))
}

#[cfg(not(feature = "onnx"))]
fn default_estimator(
    models: &ModelManager,
    model: DepthModel,
) -> DepthResult<Arc<dyn DepthEstimator>> {
    tracing::warn!(
        model = %model,
        model_dir = %models.model_dir().display(),
        "Built without ONNX support, using heuristic depth"
    );
    Ok(Arc::new(crate::estimator::HeuristicDepthEstimator::default()))
}
