//! Parallax Depth - per-frame depth maps
//!
//! Provides:
//! - Depth models and their fixed preprocessing (MiDaS / DPT)
//! - Estimators (ONNX Runtime behind the `onnx` feature, heuristic fallback)
//! - Per-frame or running min-max normalization
//! - The incremental, resumable on-disk depth cache
//! - [`DepthStream`], which pairs decoded frames with depth maps in lockstep

pub mod cache;
pub mod context;
pub mod error;
pub mod estimator;
pub mod model_manager;
pub mod normalize;
pub mod pool;
pub mod session;
pub mod stream;

pub use cache::{content_key, CacheEntry, CacheKey, CacheStatus, DepthCache};
pub use context::DepthContext;
pub use error::{DepthError, DepthResult};
pub use estimator::{DepthEstimator, HeuristicDepthEstimator};
pub use model_manager::{DepthModel, ModelManager};
pub use normalize::{normalize_depth, DepthNormalizer, DepthRange, NormalizationMode, RawDepth};
pub use pool::EstimatorPool;
pub use stream::{DepthStats, DepthStream, Estimation};

#[cfg(feature = "onnx")]
pub use estimator::OnnxDepthEstimator;
