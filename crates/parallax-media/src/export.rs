//! Encoding composite frames to a video file.
//!
//! Raw RGB frames are piped into an FFmpeg subprocess at a fixed rate.

use parallax_core::{ensure_same_dims, Frame, FrameRate, ParallaxError, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::thread::JoinHandle;
use tracing::{debug, info, trace};

/// Encoder stderr lines kept for error reports.
const STDERR_TAIL_LINES: usize = 8;

// ── Format presets ──────────────────────────────────────────────

/// Video codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VideoCodec {
    #[default]
    H264,
    H265,
    Mpeg4,
}

impl VideoCodec {
    /// FFmpeg encoder name.
    pub fn ffmpeg_encoder(self) -> &'static str {
        match self {
            Self::H264 => "libx264",
            Self::H265 => "libx265",
            Self::Mpeg4 => "mpeg4",
        }
    }

    /// Whether the encoder understands `-crf`.
    pub fn supports_crf(self) -> bool {
        matches!(self, Self::H264 | Self::H265)
    }
}

/// Encoder configuration shared by every sink of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderSettings {
    pub codec: VideoCodec,
    /// CRF value for H.264/H.265 (0-51, lower = better).
    pub crf: u32,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            codec: VideoCodec::H264,
            crf: 18,
        }
    }
}

/// Geometry and rate of an output stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkSpec {
    pub width: u32,
    pub height: u32,
    pub frame_rate: FrameRate,
    pub encoder: EncoderSettings,
}

impl SinkSpec {
    /// Build the FFmpeg command arguments for encoding to `output`.
    pub fn ffmpeg_args(&self, output: &Path) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-y".into(),
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-nostats".into(),
            // Input from pipe (raw frames)
            "-f".into(),
            "rawvideo".into(),
            "-pixel_format".into(),
            "rgb24".into(),
            "-video_size".into(),
            format!("{}x{}", self.width, self.height),
            "-framerate".into(),
            format!(
                "{}/{}",
                self.frame_rate.numerator, self.frame_rate.denominator
            ),
            "-i".into(),
            "pipe:0".into(),
            "-c:v".into(),
            self.encoder.codec.ffmpeg_encoder().into(),
        ];

        if self.encoder.codec.supports_crf() {
            args.extend_from_slice(&["-crf".into(), self.encoder.crf.to_string()]);
        }

        // yuv420p needs even dimensions; a separator strip can make the width odd
        if self.width % 2 != 0 || self.height % 2 != 0 {
            args.extend_from_slice(&["-vf".into(), "pad=ceil(iw/2)*2:ceil(ih/2)*2".into()]);
        }

        args.extend_from_slice(&["-pix_fmt".into(), "yuv420p".into()]);
        args.push(output.to_string_lossy().into_owned());
        args
    }
}

/// Consumer of an ordered frame sequence.
pub trait VideoSink: Send {
    /// Append one frame. Frames must match the sink's dimensions.
    fn push(&mut self, frame: &Frame) -> Result<()>;

    /// Flush and close the output. Called once after the last frame.
    fn finish(&mut self) -> Result<()>;

    /// Number of frames accepted so far.
    fn frames_written(&self) -> u64;
}

/// Sink that pipes frames into an FFmpeg encoder process.
pub struct FfmpegSink {
    path: PathBuf,
    spec: SinkSpec,
    child: Child,
    stdin: Option<ChildStdin>,
    stderr: Option<JoinHandle<VecDeque<String>>>,
    written: u64,
}

impl FfmpegSink {
    /// Spawn the encoder for `path`.
    pub fn create(path: &Path, spec: SinkSpec) -> Result<Self> {
        if spec.width == 0 || spec.height == 0 {
            return Err(ParallaxError::InvalidParameter(format!(
                "sink dimensions must be positive, got {}x{}",
                spec.width, spec.height
            )));
        }

        let args = spec.ffmpeg_args(path);
        debug!(?args, "Spawning ffmpeg encoder");

        let mut child = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ParallaxError::EncoderFailure(format!("Failed to spawn ffmpeg: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ParallaxError::EncoderFailure("Failed to open ffmpeg stdin".into()))?;
        let stderr = child.stderr.take().map(drain_stderr);

        info!(
            path = %path.display(),
            width = spec.width,
            height = spec.height,
            fps = %spec.frame_rate,
            "Encoder started"
        );

        Ok(Self {
            path: path.to_path_buf(),
            spec,
            child,
            stdin: Some(stdin),
            stderr,
            written: 0,
        })
    }

    /// Last lines the encoder printed. Only valid once the process exited.
    fn stderr_tail(&mut self) -> String {
        self.stderr
            .take()
            .and_then(|handle| handle.join().ok())
            .map(|tail| Vec::from(tail).join(" | "))
            .unwrap_or_default()
    }
}

/// Drain encoder stderr on its own thread. The pipe must not fill while
/// frames are pushed. Yields the last few non-empty lines.
fn drain_stderr<R: Read + Send + 'static>(stderr: R) -> JoinHandle<VecDeque<String>> {
    std::thread::spawn(move || {
        let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
        for line in BufReader::new(stderr).split(b'\n') {
            let Ok(line) = line else { break };
            let line = String::from_utf8_lossy(&line).trim().to_string();
            if line.is_empty() {
                continue;
            }
            trace!(target: "ffmpeg", "{line}");
            if tail.len() == STDERR_TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line);
        }
        tail
    })
}

impl VideoSink for FfmpegSink {
    fn push(&mut self, frame: &Frame) -> Result<()> {
        ensure_same_dims(
            "sink frame",
            Some(self.written),
            (self.spec.width, self.spec.height),
            frame.dims(),
        )?;

        let stdin = self.stdin.as_mut().ok_or_else(|| {
            ParallaxError::EncoderFailure(format!("{} already finished", self.path.display()))
        })?;

        stdin.write_all(&frame.data).map_err(|e| {
            ParallaxError::EncoderFailure(format!(
                "Failed to write frame {} to {}: {e}",
                self.written,
                self.path.display()
            ))
        })?;

        self.written += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        // Close stdin to signal end-of-stream
        let Some(stdin) = self.stdin.take() else {
            return Ok(());
        };
        drop(stdin);

        let status = self.child.wait().map_err(|e| {
            ParallaxError::EncoderFailure(format!("Failed to wait for ffmpeg: {e}"))
        })?;

        if !status.success() {
            let detail = self.stderr_tail();
            return Err(ParallaxError::EncoderFailure(format!(
                "ffmpeg exited with {status} for {}: {detail}",
                self.path.display()
            )));
        }

        info!(path = %self.path.display(), frames = self.written, "Encoder finished");
        Ok(())
    }

    fn frames_written(&self) -> u64 {
        self.written
    }
}

impl Drop for FfmpegSink {
    fn drop(&mut self) {
        if self.stdin.take().is_some() {
            // Unfinished sink: let ffmpeg close the container with what it has.
            let _ = self.child.wait();
        }
    }
}
