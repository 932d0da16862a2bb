//! Depth model identifiers and weight file resolution.
//!
//! Each model maps to one fixed (weights, input size, preprocessing) tuple,
//! resolved once when the estimator is built.

use crate::error::{DepthError, DepthResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::info;

/// Input normalization applied before inference.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Preprocess {
    /// DPT transforms: mean 0.5, std 0.5 per channel.
    Dpt,
    /// MiDaS small transform: ImageNet mean/std.
    Small,
}

impl Preprocess {
    pub fn mean(self) -> [f32; 3] {
        match self {
            Self::Dpt => [0.5, 0.5, 0.5],
            Self::Small => [0.485, 0.456, 0.406],
        }
    }

    pub fn std(self) -> [f32; 3] {
        match self {
            Self::Dpt => [0.5, 0.5, 0.5],
            Self::Small => [0.229, 0.224, 0.225],
        }
    }
}

/// Specification for a depth model.
#[derive(Debug, Clone)]
pub struct ModelSpec {
    pub model: DepthModel,
    /// Filename in the model directory.
    pub filename: &'static str,
    /// Square network input size in pixels.
    pub input_size: u32,
    pub preprocess: Preprocess,
}

/// Selectable monocular depth model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DepthModel {
    /// DPT-Large: best quality, slowest.
    #[default]
    Large,
    /// DPT-Hybrid.
    Hybrid,
    /// MiDaS small: fastest.
    Small,
}

impl DepthModel {
    pub const ALL: [DepthModel; 3] = [Self::Large, Self::Hybrid, Self::Small];

    /// Stable identifier used in cache keys and output names.
    pub fn id(self) -> &'static str {
        match self {
            Self::Large => "dpt_large",
            Self::Hybrid => "dpt_hybrid",
            Self::Small => "midas_small",
        }
    }

    pub fn spec(self) -> ModelSpec {
        match self {
            Self::Large => ModelSpec {
                model: self,
                filename: "dpt_large_384.onnx",
                input_size: 384,
                preprocess: Preprocess::Dpt,
            },
            Self::Hybrid => ModelSpec {
                model: self,
                filename: "dpt_hybrid_384.onnx",
                input_size: 384,
                preprocess: Preprocess::Dpt,
            },
            Self::Small => ModelSpec {
                model: self,
                filename: "midas_v21_small_256.onnx",
                input_size: 256,
                preprocess: Preprocess::Small,
            },
        }
    }
}

impl fmt::Display for DepthModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Resolves model weight files inside a model directory.
#[derive(Debug, Clone)]
pub struct ModelManager {
    model_dir: PathBuf,
}

impl ModelManager {
    pub fn new(model_dir: impl Into<PathBuf>) -> Self {
        Self {
            model_dir: model_dir.into(),
        }
    }

    /// `<user cache dir>/parallax/models`, or `./models` when the platform
    /// has no cache directory.
    pub fn default_dir() -> PathBuf {
        dirs::cache_dir()
            .map(|d| d.join("parallax").join("models"))
            .unwrap_or_else(|| PathBuf::from("models"))
    }

    /// Returns the path to the model weights, or `ModelNotFound`.
    pub fn ensure_model(&self, model: DepthModel) -> DepthResult<PathBuf> {
        let path = self.model_path(model);
        if path.is_file() {
            info!(model = %model, path = %path.display(), "Model weights found");
            Ok(path)
        } else {
            Err(DepthError::ModelNotFound {
                model_id: model.id().to_string(),
                path,
            })
        }
    }

    pub fn is_cached(&self, model: DepthModel) -> bool {
        self.model_path(model).is_file()
    }

    /// Local path for a model (may not exist yet).
    pub fn model_path(&self, model: DepthModel) -> PathBuf {
        self.model_dir.join(model.spec().filename)
    }

    pub fn model_dir(&self) -> &Path {
        &self.model_dir
    }
}
