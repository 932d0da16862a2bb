//! Conversion state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stage of a conversion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelineStage {
    /// Validating configuration and loading the depth model.
    Initializing,
    /// Frame source opened, frame count and rate known.
    Decoding,
    /// Depth maps are computed per frame (and appended to the cache).
    EstimatingDepth,
    /// A complete depth cache is replayed; the estimator is not used.
    LoadingCachedDepth,
    /// Frames are turned into composite stereo frames.
    Synthesizing,
    /// Sinks are being finalized.
    Encoding,
    /// Source audio is attached to the silent stereo video.
    Muxing,
    Done,
    Failed,
}

impl PipelineStage {
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Initializing => "Initializing",
            Self::Decoding => "Opening video",
            Self::EstimatingDepth => "Estimating depth",
            Self::LoadingCachedDepth => "Loading cached depth",
            Self::Synthesizing => "Synthesizing stereo",
            Self::Encoding => "Encoding",
            Self::Muxing => "Muxing audio",
            Self::Done => "Done",
            Self::Failed => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Whether `next` may follow `self`.
    ///
    /// Depth-only runs go straight from a depth stage to `Encoding`, and runs
    /// without a muxed output go from `Encoding` to `Done`.
    pub fn can_advance_to(self, next: PipelineStage) -> bool {
        use PipelineStage::*;
        match (self, next) {
            (Done | Failed, _) => false,
            (_, Failed) => true,
            (Initializing, Decoding) => true,
            (Decoding, EstimatingDepth | LoadingCachedDepth) => true,
            (EstimatingDepth | LoadingCachedDepth, Synthesizing | Encoding) => true,
            (Synthesizing, Encoding) => true,
            (Encoding, Muxing | Done) => true,
            (Muxing, Done) => true,
            _ => false,
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

#[cfg(test)]
mod tests {
    use super::PipelineStage::*;

    #[test]
    fn test_happy_path_is_allowed() {
        let path = [
            Initializing,
            Decoding,
            EstimatingDepth,
            Synthesizing,
            Encoding,
            Muxing,
            Done,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_advance_to(pair[1]), "{:?} -> {:?}", pair[0], pair[1]);
        }
        assert!(Decoding.can_advance_to(LoadingCachedDepth));
        assert!(LoadingCachedDepth.can_advance_to(Encoding));
    }

    #[test]
    fn test_failed_reachable_from_any_live_stage() {
        for stage in [Initializing, Decoding, EstimatingDepth, Synthesizing, Encoding, Muxing] {
            assert!(stage.can_advance_to(Failed));
        }
        assert!(!Done.can_advance_to(Failed));
        assert!(!Failed.can_advance_to(Decoding));
    }

    #[test]
    fn test_skipping_stages_is_rejected() {
        assert!(!Initializing.can_advance_to(Synthesizing));
        assert!(!Decoding.can_advance_to(Encoding));
        assert!(!Synthesizing.can_advance_to(Muxing));
        assert!(!Muxing.can_advance_to(Encoding));
    }
}
