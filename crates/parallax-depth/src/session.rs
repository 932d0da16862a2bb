//! ONNX Runtime session wrapper.
//!
//! Gated behind the `onnx` feature flag.

#[cfg(feature = "onnx")]
use crate::error::{DepthError, DepthResult};
#[cfg(feature = "onnx")]
use crate::model_manager::DepthModel;
#[cfg(feature = "onnx")]
use parking_lot::Mutex;
#[cfg(feature = "onnx")]
use std::path::Path;
#[cfg(feature = "onnx")]
use tracing::info;

/// A loaded ONNX model session.
///
/// `ort` sessions need exclusive access to run, so concurrent estimator
/// calls serialize on the inner lock.
#[cfg(feature = "onnx")]
pub struct OnnxSession {
    session: Mutex<ort::session::Session>,
    model: DepthModel,
}

#[cfg(feature = "onnx")]
impl OnnxSession {
    /// Load an ONNX model from a file path.
    pub fn load(model_path: &Path, model: DepthModel) -> DepthResult<Self> {
        info!(model = %model, path = %model_path.display(), "Loading ONNX session");

        let session = ort::session::Session::builder()
            .and_then(|b| {
                b.with_optimization_level(
                    ort::session::builder::GraphOptimizationLevel::Level3,
                )
            })
            .and_then(|b| b.commit_from_file(model_path))
            .map_err(|e| DepthError::Preprocess(format!("failed to load {model}: {e}")))?;

        info!(model = %model, "ONNX session loaded successfully");
        Ok(Self {
            session: Mutex::new(session),
            model,
        })
    }

    /// Run the model on one NCHW tensor, returning the first output's
    /// shape and values.
    pub fn run(&self, input: ndarray::ArrayView4<'_, f32>) -> DepthResult<(Vec<usize>, Vec<f32>)> {
        let tensor = ort::value::TensorRef::from_array_view(input)?;
        let mut session = self.session.lock();
        let outputs = session.run(ort::inputs![tensor])?;
        let array = outputs[0].try_extract_array::<f32>()?;
        Ok((array.shape().to_vec(), array.iter().copied().collect()))
    }

    pub fn model(&self) -> DepthModel {
        self.model
    }
}
