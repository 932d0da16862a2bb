//! Video decoder using FFmpeg via ffmpeg-sidecar.

use crate::probe::MediaProbe;
use ffmpeg_sidecar::child::FfmpegChild;
use ffmpeg_sidecar::command::FfmpegCommand;
use ffmpeg_sidecar::event::{FfmpegEvent, LogLevel};
use ffmpeg_sidecar::iter::FfmpegIterator;
use parallax_core::{ensure_same_dims, Frame, FrameRate, ParallaxError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// What is known about a frame source before decoding starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub frame_rate: FrameRate,
    /// Expected frame count. The decoded count is authoritative.
    pub frame_count: u64,
    pub has_audio: bool,
}

/// An ordered, lazily decoded sequence of frames.
///
/// A source is consumed once; a second pass over the same video opens it
/// again through the backend.
pub trait FrameSource: Iterator<Item = Result<Frame>> + Send {
    fn info(&self) -> &SourceInfo;
}

/// Video decoder using FFmpeg.
///
/// Uses ffmpeg-sidecar to spawn FFmpeg as a subprocess emitting `rgb24`
/// rawvideo. Frames are converted one at a time as they are pulled.
pub struct VideoDecoder {
    info: SourceInfo,
    child: FfmpegChild,
    events: FfmpegIterator,
    next_index: u64,
    finished: bool,
}

impl VideoDecoder {
    /// Open a video file for decoding.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let probe = MediaProbe::probe(path)?;
        let video = probe
            .primary_video()
            .ok_or_else(|| ParallaxError::unreadable(path, "no video stream"))?;
        if video.frame_count == 0 {
            return Err(ParallaxError::unreadable(path, "video reports zero frames"));
        }

        let info = SourceInfo {
            path: path.to_path_buf(),
            width: video.width,
            height: video.height,
            frame_rate: video.frame_rate,
            frame_count: video.frame_count,
            has_audio: probe.has_audio(),
        };

        info!(
            path = %path.display(),
            width = info.width,
            height = info.height,
            fps = %info.frame_rate,
            frames = info.frame_count,
            "Opening video file"
        );

        let mut child = FfmpegCommand::new()
            .hide_banner()
            .input(&*path.to_string_lossy())
            .args(["-an", "-sn"])
            .rawvideo()
            .spawn()
            .map_err(|e| ParallaxError::unreadable(path, format!("failed to spawn ffmpeg: {e}")))?;

        let events = child
            .iter()
            .map_err(|e| ParallaxError::unreadable(path, format!("ffmpeg output: {e}")))?;

        Ok(Self {
            info,
            child,
            events,
            next_index: 0,
            finished: false,
        })
    }

    /// Number of frames decoded so far.
    pub fn decoded(&self) -> u64 {
        self.next_index
    }

    fn finish(&mut self) {
        if !self.finished {
            self.finished = true;
            if let Err(e) = self.child.wait() {
                warn!(error = %e, "Failed to reap ffmpeg decoder");
            }
            debug!(frames = self.next_index, "Decoder finished");
        }
    }
}

impl Iterator for VideoDecoder {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        for event in self.events.by_ref() {
            match event {
                FfmpegEvent::OutputFrame(out) => {
                    let index = self.next_index;
                    self.next_index += 1;
                    if let Err(e) = ensure_same_dims(
                        "decoded frame",
                        Some(index),
                        (self.info.width, self.info.height),
                        (out.width, out.height),
                    ) {
                        return Some(Err(e));
                    }
                    return Some(Frame::from_raw(out.width, out.height, out.data));
                }
                FfmpegEvent::Log(LogLevel::Fatal, msg) | FfmpegEvent::Error(msg) => {
                    self.finished = true;
                    let _ = self.child.kill();
                    let _ = self.child.wait();
                    return Some(Err(ParallaxError::Decoder(format!(
                        "{} at frame {}: {msg}",
                        self.info.path.display(),
                        self.next_index
                    ))));
                }
                FfmpegEvent::Log(LogLevel::Error, msg) => {
                    warn!(frame = self.next_index, "ffmpeg: {msg}");
                }
                _ => {}
            }
        }

        self.finish();
        None
    }
}

impl FrameSource for VideoDecoder {
    fn info(&self) -> &SourceInfo {
        &self.info
    }
}

impl Drop for VideoDecoder {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}
