//! Reattaching the source audio track to an encoded silent video.

use parallax_core::{ParallaxError, Result};
use std::path::Path;
use std::process::Command;
use tracing::info;

/// Build the FFmpeg arguments that copy the video stream of `silent` and
/// the first audio stream of `source_with_audio` into `output`.
pub fn mux_args(source_with_audio: &Path, silent: &Path, output: &Path) -> Vec<String> {
    vec![
        "-y".into(),
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-i".into(),
        silent.to_string_lossy().into_owned(),
        "-i".into(),
        source_with_audio.to_string_lossy().into_owned(),
        "-map".into(),
        "0:v:0".into(),
        "-map".into(),
        "1:a:0?".into(),
        "-c:v".into(),
        "copy".into(),
        "-c:a".into(),
        "aac".into(),
        "-shortest".into(),
        output.to_string_lossy().into_owned(),
    ]
}

/// Mux the audio of `source_with_audio` onto `silent`, writing `output`.
///
/// On failure the silent video is left untouched.
pub fn mux_audio(source_with_audio: &Path, silent: &Path, output: &Path) -> Result<()> {
    if output == silent {
        return Err(ParallaxError::InvalidParameter(
            "mux output must differ from the silent input".into(),
        ));
    }

    let result = Command::new("ffmpeg")
        .args(mux_args(source_with_audio, silent, output))
        .output()
        .map_err(|e| ParallaxError::MuxFailure(format!("Failed to spawn ffmpeg: {e}")))?;

    if !result.status.success() {
        let stderr = String::from_utf8_lossy(&result.stderr);
        return Err(ParallaxError::MuxFailure(format!(
            "ffmpeg exited with {}: {}",
            result.status,
            stderr.trim()
        )));
    }

    info!(output = %output.display(), "Audio reattached");
    Ok(())
}
