//! In-process media backend.
//!
//! Videos are registered as frame lists; sinks collect frames into shared
//! storage and muxing is recorded instead of executed. Used by the test
//! suites and for dry runs that should not touch ffmpeg.

use crate::backend::MediaBackend;
use crate::decoder::{FrameSource, SourceInfo};
use crate::export::{SinkSpec, VideoSink};
use parallax_core::{ensure_same_dims, Frame, FrameRate, ParallaxError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A registered in-memory video.
#[derive(Debug, Clone)]
pub struct MemoryVideo {
    pub frames: Vec<Frame>,
    pub frame_rate: FrameRate,
    pub has_audio: bool,
}

/// Output written by a memory sink.
#[derive(Debug, Clone, Default)]
pub struct WrittenVideo {
    pub spec: Option<SinkSpec>,
    pub frames: Vec<Frame>,
    pub finished: bool,
}

#[derive(Default)]
struct State {
    videos: HashMap<PathBuf, MemoryVideo>,
    outputs: HashMap<PathBuf, WrittenVideo>,
    muxes: Vec<(PathBuf, PathBuf, PathBuf)>,
    opens: HashMap<PathBuf, usize>,
    fail_sink_after: Option<u64>,
    fail_mux: bool,
}

/// Backend that keeps every video in memory.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<State>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `video` under `path`.
    pub fn insert(&self, path: impl Into<PathBuf>, video: MemoryVideo) {
        self.state.lock().videos.insert(path.into(), video);
    }

    /// Frames written to `path`, if a sink was created for it.
    pub fn output(&self, path: &Path) -> Option<WrittenVideo> {
        self.state.lock().outputs.get(path).cloned()
    }

    /// Recorded `(source, silent, output)` mux calls.
    pub fn muxes(&self) -> Vec<(PathBuf, PathBuf, PathBuf)> {
        self.state.lock().muxes.clone()
    }

    /// How many times `path` was opened as a source.
    pub fn open_count(&self, path: &Path) -> usize {
        self.state.lock().opens.get(path).copied().unwrap_or(0)
    }

    /// Make every sink reject frames after `frames` have been written.
    pub fn fail_sinks_after(&self, frames: u64) {
        self.state.lock().fail_sink_after = Some(frames);
    }

    /// Make audio muxing fail.
    pub fn fail_mux(&self) {
        self.state.lock().fail_mux = true;
    }
}

impl MediaBackend for MemoryBackend {
    fn open_source(&self, path: &Path) -> Result<Box<dyn FrameSource>> {
        let mut state = self.state.lock();
        let video = state
            .videos
            .get(path)
            .cloned()
            .ok_or_else(|| ParallaxError::unreadable(path, "file not found"))?;
        let first = video
            .frames
            .first()
            .ok_or_else(|| ParallaxError::unreadable(path, "video yields zero frames"))?;
        let info = SourceInfo {
            path: path.to_path_buf(),
            width: first.width,
            height: first.height,
            frame_rate: video.frame_rate,
            frame_count: video.frames.len() as u64,
            has_audio: video.has_audio,
        };
        *state.opens.entry(path.to_path_buf()).or_default() += 1;
        Ok(Box::new(MemorySource {
            info,
            frames: video.frames.into_iter(),
        }))
    }

    fn create_sink(&self, path: &Path, spec: SinkSpec) -> Result<Box<dyn VideoSink>> {
        let fail_after = {
            let mut state = self.state.lock();
            state.outputs.insert(
                path.to_path_buf(),
                WrittenVideo {
                    spec: Some(spec.clone()),
                    ..Default::default()
                },
            );
            state.fail_sink_after
        };
        Ok(Box::new(MemorySink {
            path: path.to_path_buf(),
            spec,
            state: Arc::clone(&self.state),
            written: 0,
            fail_after,
        }))
    }

    fn mux_audio(&self, source_with_audio: &Path, silent: &Path, output: &Path) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_mux {
            return Err(ParallaxError::MuxFailure("simulated mux failure".into()));
        }
        let video = state
            .outputs
            .get(silent)
            .cloned()
            .ok_or_else(|| ParallaxError::MuxFailure(format!("{} missing", silent.display())))?;
        state.outputs.insert(output.to_path_buf(), video);
        state.muxes.push((
            source_with_audio.to_path_buf(),
            silent.to_path_buf(),
            output.to_path_buf(),
        ));
        Ok(())
    }

    fn copy_output(&self, from: &Path, to: &Path) -> Result<()> {
        let mut state = self.state.lock();
        let video = state
            .outputs
            .get(from)
            .cloned()
            .ok_or_else(|| ParallaxError::Io(std::io::ErrorKind::NotFound.into()))?;
        state.outputs.insert(to.to_path_buf(), video);
        Ok(())
    }

    fn remove_output(&self, path: &Path) -> Result<()> {
        self.state
            .lock()
            .outputs
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| ParallaxError::Io(std::io::ErrorKind::NotFound.into()))
    }
}

/// Frame source over a registered in-memory video.
pub struct MemorySource {
    info: SourceInfo,
    frames: std::vec::IntoIter<Frame>,
}

impl Iterator for MemorySource {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        self.frames.next().map(Ok)
    }
}

impl FrameSource for MemorySource {
    fn info(&self) -> &SourceInfo {
        &self.info
    }
}

struct MemorySink {
    path: PathBuf,
    spec: SinkSpec,
    state: Arc<Mutex<State>>,
    written: u64,
    fail_after: Option<u64>,
}

impl VideoSink for MemorySink {
    fn push(&mut self, frame: &Frame) -> Result<()> {
        if self.fail_after.is_some_and(|n| self.written >= n) {
            return Err(ParallaxError::EncoderFailure(format!(
                "simulated encoder failure at frame {}",
                self.written
            )));
        }
        ensure_same_dims(
            "sink frame",
            Some(self.written),
            (self.spec.width, self.spec.height),
            frame.dims(),
        )?;
        let mut state = self.state.lock();
        if let Some(out) = state.outputs.get_mut(&self.path) {
            out.frames.push(frame.clone());
        }
        self.written += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(out) = state.outputs.get_mut(&self.path) {
            out.finished = true;
        }
        Ok(())
    }

    fn frames_written(&self) -> u64 {
        self.written
    }
}
