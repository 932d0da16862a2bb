//! Command-line arguments and their mapping onto [`ConvertConfig`].

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use parallax_core::Rgb;
use parallax_depth::{DepthModel, NormalizationMode};
use parallax_media::VideoCodec;
use parallax_pipeline::ConvertConfig;
use parallax_stereo::{DepthCurve, SynthesisMode};
use std::path::PathBuf;

/// Parallax - convert a 2D video into side-by-side stereo.
///
/// Depth is estimated per frame (or read from a depth video), each frame is
/// split into left and right views displaced by depth, and the views are
/// placed side by side. The source audio is reattached at the end.
#[derive(Parser, Debug)]
#[command(name = "parallax", version, about)]
pub struct Cli {
    /// Input video.
    #[arg(short = 'i', long = "input-video")]
    pub input_video: Option<PathBuf>,

    /// Directory for the outputs and the default depth cache.
    #[arg(short = 'o', long = "output-dir")]
    pub output_dir: Option<PathBuf>,

    /// Depth model.
    #[arg(short = 'm', long = "depth-model", value_enum)]
    pub depth_model: Option<ModelArg>,

    /// Also write a depth visualization video.
    #[arg(long)]
    pub save_depth: bool,

    /// Only write the depth visualization video.
    #[arg(long)]
    pub save_depth_only: bool,

    /// Precomputed depth video to use instead of estimating depth.
    #[arg(long)]
    pub input_depth_map: Option<PathBuf>,

    /// JSON settings file. Flags given on the command line take precedence.
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Maximum displacement as a fraction of frame width.
    #[arg(long = "baseline")]
    pub baseline_distance: Option<f32>,

    /// Divisor applied to depth before normalization.
    #[arg(long = "depth-scale")]
    pub depth_scale_factor: Option<f32>,

    #[arg(long, value_enum)]
    pub curve: Option<CurveArg>,

    /// How displaced pixels are produced.
    #[arg(long, value_enum)]
    pub mode: Option<ModeArg>,

    /// Inpainting radius in pixels.
    #[arg(long)]
    pub inpaint_radius: Option<u32>,

    /// Width of the strip between the two views.
    #[arg(long)]
    pub separator_width: Option<u32>,

    /// Separator color as `R,G,B` or `#rrggbb`.
    #[arg(long, value_parser = parse_color)]
    pub separator_color: Option<Rgb>,

    /// Depth bit depth (8 or 16).
    #[arg(long)]
    pub depth_bits: Option<u8>,

    /// Depth normalization across frames.
    #[arg(long, value_enum)]
    pub normalization: Option<NormalizationArg>,

    /// Frames estimated concurrently (defaults to the CPU count).
    #[arg(short = 'j', long = "workers")]
    pub depth_workers: Option<usize>,

    /// Depth cache directory.
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Neither read nor write the depth cache.
    #[arg(long)]
    pub no_cache: bool,

    /// Delete the silent stereo video after muxing.
    #[arg(long)]
    pub remove_intermediate: bool,

    #[arg(long, value_enum)]
    pub codec: Option<CodecArg>,

    /// Encoder CRF (H.264/H.265 only).
    #[arg(long)]
    pub crf: Option<u32>,

    /// Directory holding the depth model weights.
    #[arg(long)]
    pub model_dir: Option<PathBuf>,

    /// Print the effective settings as JSON and exit.
    #[arg(long)]
    pub print_config: bool,

    /// Debug logging.
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModelArg {
    Large,
    Hybrid,
    Small,
}

impl From<ModelArg> for DepthModel {
    fn from(arg: ModelArg) -> Self {
        match arg {
            ModelArg::Large => DepthModel::Large,
            ModelArg::Hybrid => DepthModel::Hybrid,
            ModelArg::Small => DepthModel::Small,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CurveArg {
    Linear,
    Emphasis,
}

impl From<CurveArg> for DepthCurve {
    fn from(arg: CurveArg) -> Self {
        match arg {
            CurveArg::Linear => DepthCurve::Linear,
            CurveArg::Emphasis => DepthCurve::Emphasis,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    Inpaint,
    Remap,
}

impl From<ModeArg> for SynthesisMode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::Inpaint => SynthesisMode::Inpaint,
            ModeArg::Remap => SynthesisMode::Remap,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum NormalizationArg {
    PerFrame,
    Running,
}

impl From<NormalizationArg> for NormalizationMode {
    fn from(arg: NormalizationArg) -> Self {
        match arg {
            NormalizationArg::PerFrame => NormalizationMode::PerFrame,
            NormalizationArg::Running => NormalizationMode::Running,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CodecArg {
    H264,
    H265,
    Mpeg4,
}

impl From<CodecArg> for VideoCodec {
    fn from(arg: CodecArg) -> Self {
        match arg {
            CodecArg::H264 => VideoCodec::H264,
            CodecArg::H265 => VideoCodec::H265,
            CodecArg::Mpeg4 => VideoCodec::Mpeg4,
        }
    }
}

fn parse_color(s: &str) -> std::result::Result<Rgb, String> {
    if let Some(hex) = s.strip_prefix('#') {
        if hex.len() != 6 || !hex.is_ascii() {
            return Err(format!("expected #rrggbb, got {s}"));
        }
        let channel = |i: usize| {
            u8::from_str_radix(&hex[i..i + 2], 16).map_err(|e| format!("{s}: {e}"))
        };
        return Ok(Rgb([channel(0)?, channel(2)?, channel(4)?]));
    }
    let parts: Vec<_> = s.split(',').map(str::trim).collect();
    let [r, g, b] = parts.as_slice() else {
        return Err(format!("expected R,G,B, got {s}"));
    };
    let channel = |v: &str| v.parse::<u8>().map_err(|e| format!("{s}: {e}"));
    Ok(Rgb([channel(*r)?, channel(*g)?, channel(*b)?]))
}

impl Cli {
    /// Settings from `--config` (or defaults) with command-line overrides.
    pub fn to_config(&self) -> Result<ConvertConfig> {
        let mut config = match &self.config {
            Some(path) => ConvertConfig::from_json_file(path)
                .with_context(|| format!("Failed to load settings from {}", path.display()))?,
            None => ConvertConfig::default(),
        };

        if let Some(v) = &self.input_video {
            config.input_video = v.clone();
        }
        if let Some(v) = &self.output_dir {
            config.output_dir = v.clone();
        }
        if let Some(v) = self.depth_model {
            config.depth_model = v.into();
        }
        config.save_depth |= self.save_depth;
        config.save_depth_only |= self.save_depth_only;
        if let Some(v) = &self.input_depth_map {
            config.input_depth_map = Some(v.clone());
        }
        if let Some(v) = self.baseline_distance {
            config.stereo.baseline_distance = v;
        }
        if let Some(v) = self.depth_scale_factor {
            config.stereo.depth_scale_factor = v;
        }
        if let Some(v) = self.curve {
            config.stereo.curve = v.into();
        }
        if let Some(v) = self.mode {
            config.stereo.mode = v.into();
        }
        if let Some(v) = self.inpaint_radius {
            config.stereo.inpaint_radius = v;
        }
        if let Some(v) = self.separator_width {
            config.separator.width = v;
        }
        if let Some(v) = self.separator_color {
            config.separator.color = v;
        }
        if let Some(v) = self.depth_bits {
            config.depth_bits = v;
        }
        if let Some(v) = self.normalization {
            config.normalization = v.into();
        }
        if let Some(v) = self.depth_workers {
            config.depth_workers = v;
        }
        if let Some(v) = &self.cache_dir {
            config.cache_dir = Some(v.clone());
        }
        if self.no_cache {
            config.use_cache = false;
        }
        config.remove_intermediate |= self.remove_intermediate;
        if let Some(v) = self.codec {
            config.encoder.codec = v.into();
        }
        if let Some(v) = self.crf {
            config.encoder.crf = v;
        }
        if let Some(v) = &self.model_dir {
            config.model_dir = Some(v.clone());
        }

        if config.input_video.as_os_str().is_empty() {
            bail!("No input video: pass --input-video or set input_video in --config");
        }
        if config.output_dir.as_os_str().is_empty() {
            bail!("No output directory: pass --output-dir or set output_dir in --config");
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("parallax").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_command_surface() {
        let cli = parse(&[
            "-i",
            "in.mp4",
            "-o",
            "out",
            "--depth-model",
            "small",
            "--save-depth",
            "--input-depth-map",
            "depth.mp4",
        ]);
        let config = cli.to_config().unwrap();
        assert_eq!(config.input_video, PathBuf::from("in.mp4"));
        assert_eq!(config.output_dir, PathBuf::from("out"));
        assert_eq!(config.depth_model, DepthModel::Small);
        assert!(config.save_depth);
        assert!(!config.save_depth_only);
        assert_eq!(config.input_depth_map, Some(PathBuf::from("depth.mp4")));
    }

    #[test]
    fn test_tuning_flags() {
        let cli = parse(&[
            "-i",
            "in.mp4",
            "-o",
            "out",
            "--baseline",
            "0.02",
            "--mode",
            "remap",
            "--normalization",
            "running",
            "--depth-bits",
            "16",
            "--separator-width",
            "4",
            "--separator-color",
            "#00ff10",
            "--no-cache",
            "-j",
            "3",
            "--codec",
            "h265",
            "--crf",
            "23",
        ]);
        let config = cli.to_config().unwrap();
        assert_eq!(config.stereo.baseline_distance, 0.02);
        assert_eq!(config.stereo.mode, SynthesisMode::Remap);
        assert_eq!(config.normalization, NormalizationMode::Running);
        assert_eq!(config.depth_bits, 16);
        assert_eq!(config.separator.width, 4);
        assert_eq!(config.separator.color, Rgb([0, 255, 16]));
        assert!(!config.use_cache);
        assert_eq!(config.depth_workers, 3);
        assert_eq!(config.encoder.codec, VideoCodec::H265);
        assert_eq!(config.encoder.crf, 23);
    }

    #[test]
    fn test_flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{ "input_video": "a.mp4", "output_dir": "o", "depth_model": "Hybrid", "save_depth": true }"#,
        )
        .unwrap();
        let cli = parse(&["--config", path.to_str().unwrap(), "-m", "large"]);
        let config = cli.to_config().unwrap();
        assert_eq!(config.input_video, PathBuf::from("a.mp4"));
        assert_eq!(config.depth_model, DepthModel::Large);
        assert!(config.save_depth);
    }

    #[test]
    fn test_missing_paths_rejected() {
        assert!(parse(&["-o", "out"]).to_config().is_err());
        assert!(parse(&["-i", "in.mp4"]).to_config().is_err());
    }

    #[test]
    fn test_color_parsing() {
        assert_eq!(parse_color("255, 0, 0"), Ok(Rgb([255, 0, 0])));
        assert_eq!(parse_color("#0a0B0c"), Ok(Rgb([10, 11, 12])));
        assert!(parse_color("1,2").is_err());
        assert!(parse_color("#12345").is_err());
        assert!(parse_color("300,0,0").is_err());
    }
}
