//! Error types for Parallax.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for Parallax operations.
#[derive(Error, Debug)]
pub enum ParallaxError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The input video is missing, corrupt, or yields no frames.
    #[error("source unreadable: {path}: {reason}")]
    SourceUnreadable { path: PathBuf, reason: String },

    /// A depth cache record is truncated or fails its checksum.
    #[error("depth cache corrupt: {path}: {reason}")]
    CacheCorrupt { path: PathBuf, reason: String },

    /// Another run holds the cache lock for the same (video, model) key.
    #[error("depth cache busy: {0}")]
    CacheBusy(String),

    #[error(
        "dimension mismatch ({what}{}): expected {expected}, got {actual}",
        at_frame(.index)
    )]
    DimensionMismatch {
        what: &'static str,
        index: Option<u64>,
        expected: Dims,
        actual: Dims,
    },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// The depth estimator could not produce a depth map.
    #[error("Depth estimation failed: {0}")]
    Estimator(String),

    #[error("Decoder error: {0}")]
    Decoder(String),

    #[error("Encoder failure: {0}")]
    EncoderFailure(String),

    #[error("Audio mux failure: {0}")]
    MuxFailure(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("cancelled")]
    Cancelled,
}

impl ParallaxError {
    /// Convenience constructor for [`ParallaxError::SourceUnreadable`].
    pub fn unreadable(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::SourceUnreadable {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error is recovered locally by the cache layer.
    pub fn is_cache_recoverable(&self) -> bool {
        matches!(self, Self::CacheCorrupt { .. })
    }
}

/// A (width, height) pair rendered as `WxH`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dims(pub u32, pub u32);

impl From<(u32, u32)> for Dims {
    fn from((w, h): (u32, u32)) -> Self {
        Self(w, h)
    }
}

impl fmt::Display for Dims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.0, self.1)
    }
}

fn at_frame(index: &Option<u64>) -> String {
    index.map(|i| format!(" at frame {i}")).unwrap_or_default()
}

/// Result type alias for Parallax operations.
pub type Result<T> = std::result::Result<T, ParallaxError>;
