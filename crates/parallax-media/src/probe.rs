//! Media file probing to get metadata without a full decode.

use parallax_core::{FrameRate, ParallaxError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

/// Information about a media file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaProbe {
    /// File path
    pub path: PathBuf,
    /// Duration in seconds, when the container reports one
    pub duration_secs: Option<f64>,
    /// Video streams
    pub video_streams: Vec<VideoStreamInfo>,
    /// Audio streams
    pub audio_streams: Vec<AudioStreamInfo>,
    /// Container format
    pub format: String,
}

/// Information about a video stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoStreamInfo {
    pub index: usize,
    pub codec: String,
    pub width: u32,
    pub height: u32,
    pub frame_rate: FrameRate,
    /// Frame count reported by the container, or estimated from duration.
    pub frame_count: u64,
}

/// Information about an audio stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioStreamInfo {
    pub index: usize,
    pub codec: String,
    pub sample_rate: u32,
    pub channels: u16,
}

// Raw ffprobe `-print_format json` output. Numbers arrive as strings.
#[derive(Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    format: Option<FfprobeFormat>,
}

#[derive(Deserialize)]
struct FfprobeStream {
    index: usize,
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    nb_frames: Option<String>,
    duration: Option<String>,
    sample_rate: Option<String>,
    channels: Option<u16>,
}

#[derive(Deserialize)]
struct FfprobeFormat {
    format_name: Option<String>,
    duration: Option<String>,
}

impl MediaProbe {
    /// Probe a media file with `ffprobe`.
    pub fn probe<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(ParallaxError::unreadable(path, "file not found"));
        }

        let output = Command::new("ffprobe")
            .args(["-v", "error", "-print_format", "json", "-show_streams", "-show_format"])
            .arg(path)
            .output()
            .map_err(|e| ParallaxError::unreadable(path, format!("failed to run ffprobe: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ParallaxError::unreadable(path, stderr.trim().to_string()));
        }

        let json = String::from_utf8_lossy(&output.stdout);
        Self::from_ffprobe_json(path, &json)
    }

    /// Build a probe result from ffprobe's JSON output.
    pub fn from_ffprobe_json(path: &Path, json: &str) -> Result<Self> {
        let raw: FfprobeOutput = serde_json::from_str(json)
            .map_err(|e| ParallaxError::Serialization(format!("ffprobe output: {e}")))?;

        let container_duration = raw
            .format
            .as_ref()
            .and_then(|f| f.duration.as_deref())
            .and_then(|d| d.parse::<f64>().ok());

        let mut video_streams = Vec::new();
        let mut audio_streams = Vec::new();

        for stream in raw.streams {
            match stream.codec_type.as_deref() {
                Some("video") => {
                    let (Some(width), Some(height)) = (stream.width, stream.height) else {
                        continue;
                    };
                    let frame_rate = stream
                        .avg_frame_rate
                        .as_deref()
                        .and_then(FrameRate::parse)
                        .or_else(|| stream.r_frame_rate.as_deref().and_then(FrameRate::parse))
                        .unwrap_or_default();
                    let duration = stream
                        .duration
                        .as_deref()
                        .and_then(|d| d.parse::<f64>().ok())
                        .or(container_duration);
                    let frame_count = stream
                        .nb_frames
                        .as_deref()
                        .and_then(|n| n.parse::<u64>().ok())
                        .filter(|&n| n > 0)
                        .or_else(|| {
                            duration.map(|d| (d * frame_rate.to_fps_f64()).round().max(0.0) as u64)
                        })
                        .unwrap_or(0);

                    video_streams.push(VideoStreamInfo {
                        index: stream.index,
                        codec: stream.codec_name.unwrap_or_default(),
                        width,
                        height,
                        frame_rate,
                        frame_count,
                    });
                }
                Some("audio") => audio_streams.push(AudioStreamInfo {
                    index: stream.index,
                    codec: stream.codec_name.unwrap_or_default(),
                    sample_rate: stream
                        .sample_rate
                        .as_deref()
                        .and_then(|s| s.parse().ok())
                        .unwrap_or(0),
                    channels: stream.channels.unwrap_or(0),
                }),
                _ => {}
            }
        }

        debug!(
            path = %path.display(),
            video = video_streams.len(),
            audio = audio_streams.len(),
            "Probed media"
        );

        Ok(Self {
            path: path.to_path_buf(),
            duration_secs: container_duration,
            video_streams,
            audio_streams,
            format: raw
                .format
                .and_then(|f| f.format_name)
                .unwrap_or_default(),
        })
    }

    /// Check if the file has video.
    pub fn has_video(&self) -> bool {
        !self.video_streams.is_empty()
    }

    /// Check if the file has audio.
    pub fn has_audio(&self) -> bool {
        !self.audio_streams.is_empty()
    }

    /// Get the primary video stream info.
    pub fn primary_video(&self) -> Option<&VideoStreamInfo> {
        self.video_streams.first()
    }
}
