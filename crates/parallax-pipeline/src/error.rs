//! Run-level error: what failed, where, and at which frame.

use crate::stage::PipelineStage;
use parallax_core::ParallaxError;
use thiserror::Error;

/// A fatal conversion error.
///
/// Partial outputs and the depth cache written so far are left on disk.
#[derive(Debug, Error)]
#[error("{stage} failed{}: {source}", at_frame(.frame))]
pub struct PipelineError {
    pub stage: PipelineStage,
    /// Decode index being processed, when the failure is tied to a frame.
    pub frame: Option<u64>,
    #[source]
    pub source: ParallaxError,
}

fn at_frame(frame: &Option<u64>) -> String {
    frame.map(|i| format!(" at frame {i}")).unwrap_or_default()
}

impl PipelineError {
    pub fn new(stage: PipelineStage, frame: Option<u64>, source: impl Into<ParallaxError>) -> Self {
        Self {
            stage,
            frame,
            source: source.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.source, ParallaxError::Cancelled)
    }
}
