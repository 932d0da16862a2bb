//! Parallax Media - FFmpeg integration for video I/O
//!
//! This crate handles:
//! - Media file probing (ffprobe)
//! - Lazy frame decoding (ffmpeg via ffmpeg-sidecar)
//! - Raw frame encoding to a container file
//! - Reattaching the source audio track
//!
//! Everything the pipeline touches goes through [`MediaBackend`] so tests can
//! swap in the in-process [`memory`] backend.

pub mod backend;
pub mod decoder;
pub mod export;
pub mod memory;
pub mod mux;
pub mod probe;

pub use backend::{FfmpegBackend, MediaBackend};
pub use decoder::{FrameSource, SourceInfo, VideoDecoder};
pub use export::{EncoderSettings, FfmpegSink, SinkSpec, VideoCodec, VideoSink};
pub use memory::{MemoryBackend, MemoryVideo, WrittenVideo};
pub use mux::mux_audio;
pub use probe::MediaProbe;
