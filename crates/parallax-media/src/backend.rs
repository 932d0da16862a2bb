//! The seam between the pipeline and concrete media tooling.

use crate::decoder::{FrameSource, VideoDecoder};
use crate::export::{FfmpegSink, SinkSpec, VideoSink};
use parallax_core::{ParallaxError, Result};
use std::path::Path;
use tracing::info;

/// Opens frame sources, creates encoders, and reattaches audio.
pub trait MediaBackend: Send + Sync {
    /// Open a video for a single decode pass. May be called again for the
    /// same path to restart the sequence.
    fn open_source(&self, path: &Path) -> Result<Box<dyn FrameSource>>;

    /// Create an encoder writing to `path`.
    fn create_sink(&self, path: &Path, spec: SinkSpec) -> Result<Box<dyn VideoSink>>;

    /// Copy the audio of `source_with_audio` onto `silent`, writing `output`.
    fn mux_audio(&self, source_with_audio: &Path, silent: &Path, output: &Path) -> Result<()>;

    /// Copy a finished output to another name.
    fn copy_output(&self, from: &Path, to: &Path) -> Result<()>;

    /// Delete a finished output.
    fn remove_output(&self, path: &Path) -> Result<()>;
}

/// Production backend: ffprobe + ffmpeg subprocesses.
#[derive(Debug, Default, Clone, Copy)]
pub struct FfmpegBackend;

impl FfmpegBackend {
    /// Create the backend, checking that `ffmpeg` and `ffprobe` are on PATH.
    pub fn new() -> Result<Self> {
        for tool in ["ffmpeg", "ffprobe"] {
            let path = which::which(tool).map_err(|e| {
                ParallaxError::InvalidParameter(format!("{tool} not found on PATH: {e}"))
            })?;
            info!(tool, path = %path.display(), "Found media tool");
        }
        Ok(Self)
    }
}

impl MediaBackend for FfmpegBackend {
    fn open_source(&self, path: &Path) -> Result<Box<dyn FrameSource>> {
        Ok(Box::new(VideoDecoder::open(path)?))
    }

    fn create_sink(&self, path: &Path, spec: SinkSpec) -> Result<Box<dyn VideoSink>> {
        Ok(Box::new(FfmpegSink::create(path, spec)?))
    }

    fn mux_audio(&self, source_with_audio: &Path, silent: &Path, output: &Path) -> Result<()> {
        crate::mux::mux_audio(source_with_audio, silent, output)
    }

    fn copy_output(&self, from: &Path, to: &Path) -> Result<()> {
        std::fs::copy(from, to)?;
        Ok(())
    }

    fn remove_output(&self, path: &Path) -> Result<()> {
        std::fs::remove_file(path)?;
        Ok(())
    }
}
