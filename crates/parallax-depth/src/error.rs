//! Error types for depth estimation and caching.

use parallax_core::ParallaxError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while producing or caching depth maps.
#[derive(Debug, Error)]
pub enum DepthError {
    /// The weights for the requested model are not in the model directory.
    #[error("Model not found: {model_id} (expected at {path})")]
    ModelNotFound { model_id: String, path: PathBuf },

    /// ONNX Runtime error.
    #[cfg(feature = "onnx")]
    #[error("ONNX Runtime error: {0}")]
    Onnx(#[from] ort::Error),

    /// Preprocessing error (resize, tensor shape, etc.).
    #[error("Preprocessing error: {0}")]
    Preprocess(String),

    /// A cache record is truncated or fails validation.
    #[error("depth cache corrupt: {path}: {reason}")]
    CacheCorrupt { path: PathBuf, reason: String },

    /// Another process holds the cache lock.
    #[error("depth cache busy: {0} is locked by another run")]
    CacheBusy(PathBuf),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Core(#[from] ParallaxError),
}

impl DepthError {
    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::CacheCorrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

impl From<DepthError> for ParallaxError {
    fn from(err: DepthError) -> Self {
        match err {
            DepthError::CacheCorrupt { path, reason } => ParallaxError::CacheCorrupt { path, reason },
            DepthError::CacheBusy(path) => ParallaxError::CacheBusy(path.display().to_string()),
            DepthError::Io(e) => ParallaxError::Io(e),
            DepthError::Core(e) => e,
            other => ParallaxError::Estimator(other.to_string()),
        }
    }
}

/// Result type alias for depth operations.
pub type DepthResult<T> = std::result::Result<T, DepthError>;
