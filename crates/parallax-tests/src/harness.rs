//! Shared fixtures: synthetic videos, instrumented estimators, and a
//! workspace that ties a memory backend to a real input file on disk.

use parallax_core::{Frame, FrameRate, Rgb};
use parallax_depth::{
    DepthContext, DepthEstimator, DepthResult, HeuristicDepthEstimator, RawDepth,
};
use parallax_media::{MemoryBackend, MemoryVideo};
use parallax_pipeline::{ConvertConfig, Pipeline};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

pub const FPS: FrameRate = FrameRate::FPS_29_97;

/// Textured frame without any pure black pixel. `seed` shifts the texture so
/// consecutive frames differ.
pub fn textured_frame(width: u32, height: u32, seed: u32) -> Frame {
    let mut frame = Frame::new(width, height);
    for y in 0..height {
        for x in 0..width {
            let v = |k: u32| (16 + (x * k + y * 13 + seed * 5) % 200) as u8;
            frame.set_pixel(x, y, Rgb([v(7), v(3), v(11)]));
        }
    }
    frame
}

pub fn textured_video(frames: usize, width: u32, height: u32, has_audio: bool) -> MemoryVideo {
    MemoryVideo {
        frames: (0..frames as u32)
            .map(|i| textured_frame(width, height, i))
            .collect(),
        frame_rate: FPS,
        has_audio,
    }
}

/// Heuristic estimator that counts its invocations.
#[derive(Default)]
pub struct Counting {
    inner: HeuristicDepthEstimator,
    calls: AtomicU64,
}

impl Counting {
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl DepthEstimator for Counting {
    fn predict(&self, frame: &Frame) -> DepthResult<RawDepth> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.predict(frame)
    }

    fn name(&self) -> &str {
        "counting-heuristic"
    }
}

/// Estimator that reports the same depth everywhere.
pub struct Flat(pub f32);

impl DepthEstimator for Flat {
    fn predict(&self, frame: &Frame) -> DepthResult<RawDepth> {
        RawDepth::new(
            frame.width,
            frame.height,
            vec![self.0; frame.width as usize * frame.height as usize],
        )
    }

    fn name(&self) -> &str {
        "flat"
    }
}

pub fn context_with(estimator: Arc<dyn DepthEstimator>) -> Arc<DepthContext> {
    Arc::new(DepthContext::with_factory(move |_| Ok(Arc::clone(&estimator))))
}

/// A temp directory with an input video registered in a memory backend.
///
/// The input path also exists on disk so it can be content-hashed for the
/// depth cache.
pub struct Workspace {
    pub dir: TempDir,
    pub backend: MemoryBackend,
    pub input: PathBuf,
}

impl Workspace {
    pub fn new(video: MemoryVideo) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("clip.mp4");
        std::fs::write(&input, format!("{} frames", video.frames.len())).unwrap();
        let backend = MemoryBackend::new();
        backend.insert(&input, video);
        Self {
            dir,
            backend,
            input,
        }
    }

    /// Register another video (e.g. a depth video) next to the input.
    pub fn add(&self, name: &str, video: MemoryVideo) -> PathBuf {
        let path = self.dir.path().join(name);
        self.backend.insert(&path, video);
        path
    }

    /// Single-worker config writing to `<dir>/out`.
    pub fn config(&self) -> ConvertConfig {
        let mut config = ConvertConfig::new(&self.input, self.dir.path().join("out"));
        config.depth_workers = 1;
        config
    }

    pub fn pipeline(&self, config: ConvertConfig, depth: Arc<DepthContext>) -> Pipeline {
        Pipeline::new(config, Arc::new(self.backend.clone()), depth)
    }

    /// Frames written to `path`.
    pub fn frames(&self, path: &std::path::Path) -> Vec<Frame> {
        self.backend
            .output(path)
            .map(|out| out.frames)
            .unwrap_or_default()
    }
}
