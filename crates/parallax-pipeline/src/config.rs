//! Conversion settings.

use parallax_core::{BitDepth, ParallaxError, Result};
use parallax_depth::{DepthModel, ModelManager, NormalizationMode};
use parallax_media::EncoderSettings;
use parallax_stereo::{SeparatorConfig, StereoParams};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Everything one conversion run needs to know.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvertConfig {
    pub input_video: PathBuf,
    pub output_dir: PathBuf,
    pub depth_model: DepthModel,
    /// Also write a depth visualization video.
    pub save_depth: bool,
    /// Write only the depth visualization video; no stereo output, no mux.
    pub save_depth_only: bool,
    /// Precomputed depth video used instead of the estimator.
    pub input_depth_map: Option<PathBuf>,
    pub stereo: StereoParams,
    pub separator: SeparatorConfig,
    /// Depth quantization, 8 or 16.
    pub depth_bits: u8,
    pub normalization: NormalizationMode,
    /// Frames estimated concurrently.
    pub depth_workers: usize,
    /// Defaults to `<output_dir>/.depth-cache`.
    pub cache_dir: Option<PathBuf>,
    pub use_cache: bool,
    /// Delete the silent stereo video after a successful mux.
    pub remove_intermediate: bool,
    pub encoder: EncoderSettings,
    /// Defaults to the per-user model directory.
    pub model_dir: Option<PathBuf>,
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            input_video: PathBuf::new(),
            output_dir: PathBuf::new(),
            depth_model: DepthModel::default(),
            save_depth: false,
            save_depth_only: false,
            input_depth_map: None,
            stereo: StereoParams::default(),
            separator: SeparatorConfig::default(),
            depth_bits: 8,
            normalization: NormalizationMode::default(),
            depth_workers: num_cpus::get(),
            cache_dir: None,
            use_cache: true,
            remove_intermediate: false,
            encoder: EncoderSettings::default(),
            model_dir: None,
        }
    }
}

/// Files a run may produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    /// Stereo video with the source audio.
    pub output: PathBuf,
    /// Stereo video before muxing.
    pub silent: PathBuf,
    /// Depth visualization video.
    pub depth: PathBuf,
}

impl ConvertConfig {
    pub fn new(input_video: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            input_video: input_video.into(),
            output_dir: output_dir.into(),
            ..Default::default()
        }
    }

    /// Load settings from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text)
            .map_err(|e| ParallaxError::Serialization(format!("{}: {e}", path.display())))
    }

    /// Reject unusable settings before any work starts.
    pub fn validate(&self) -> Result<()> {
        if self.input_video.as_os_str().is_empty() {
            return Err(ParallaxError::InvalidParameter("input_video is required".into()));
        }
        if self.output_dir.as_os_str().is_empty() {
            return Err(ParallaxError::InvalidParameter("output_dir is required".into()));
        }
        if self.input_video.file_stem().is_none() {
            return Err(ParallaxError::InvalidParameter(format!(
                "input_video has no file name: {}",
                self.input_video.display()
            )));
        }
        self.stereo.validate()?;
        self.bit_depth()?;
        if self.depth_workers == 0 {
            return Err(ParallaxError::InvalidParameter(
                "depth_workers must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn bit_depth(&self) -> Result<BitDepth> {
        BitDepth::from_bits(self.depth_bits)
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(|| self.output_dir.join(".depth-cache"))
    }

    pub fn model_dir(&self) -> PathBuf {
        self.model_dir.clone().unwrap_or_else(ModelManager::default_dir)
    }

    /// Cache key component for the depth settings.
    ///
    /// Depth maps differ by model, normalization and bit depth, so each
    /// combination gets its own cache file.
    pub fn cache_variant(&self) -> String {
        let mut variant = self.depth_model.id().to_string();
        if self.normalization == NormalizationMode::Running {
            variant.push_str("-running");
        }
        if self.depth_bits == 16 {
            variant.push_str("-16bit");
        }
        variant
    }

    /// `res_<model>_<stem>.mp4`, its `.silent.mp4` sibling and
    /// `depth_<model>_<stem>.mp4` under `output_dir`.
    pub fn output_paths(&self) -> OutputPaths {
        let stem = self
            .input_video
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let model = self.depth_model.id();
        OutputPaths {
            output: self.output_dir.join(format!("res_{model}_{stem}.mp4")),
            silent: self.output_dir.join(format!("res_{model}_{stem}.silent.mp4")),
            depth: self.output_dir.join(format!("depth_{model}_{stem}.mp4")),
        }
    }
}
