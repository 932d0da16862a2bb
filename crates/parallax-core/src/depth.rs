//! Depth map type: one scalar intensity per pixel of its source frame.

use crate::error::{ParallaxError, Result};
use crate::frame::{Frame, Rgb};
use serde::{Deserialize, Serialize};

/// Quantization of depth samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BitDepth {
    #[default]
    Eight,
    Sixteen,
}

impl BitDepth {
    /// Parse a bit count. Only 8 and 16 are supported.
    pub fn from_bits(bits: u8) -> Result<Self> {
        match bits {
            8 => Ok(Self::Eight),
            16 => Ok(Self::Sixteen),
            other => Err(ParallaxError::InvalidParameter(format!(
                "only bit depths of 8 or 16 are supported, got {other}"
            ))),
        }
    }

    pub fn bits(self) -> u8 {
        match self {
            Self::Eight => 8,
            Self::Sixteen => 16,
        }
    }

    /// Largest representable sample value.
    pub fn max_value(self) -> u16 {
        match self {
            Self::Eight => u8::MAX as u16,
            Self::Sixteen => u16::MAX,
        }
    }

    /// Bytes per serialized sample.
    pub fn sample_size(self) -> usize {
        match self {
            Self::Eight => 1,
            Self::Sixteen => 2,
        }
    }
}

/// A H×W grid of quantized depth intensities.
///
/// Samples are kept widened to `u16` for both bit depths; values never
/// exceed `bit_depth.max_value()`. Larger values are nearer to the camera.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepthMap {
    pub width: u32,
    pub height: u32,
    pub bit_depth: BitDepth,
    samples: Vec<u16>,
}

impl DepthMap {
    /// Build an 8-bit depth map.
    pub fn from_u8(width: u32, height: u32, samples: Vec<u8>) -> Result<Self> {
        Self::check_len(width, height, samples.len())?;
        Ok(Self {
            width,
            height,
            bit_depth: BitDepth::Eight,
            samples: samples.into_iter().map(u16::from).collect(),
        })
    }

    /// Build a 16-bit depth map.
    pub fn from_u16(width: u32, height: u32, samples: Vec<u16>) -> Result<Self> {
        Self::check_len(width, height, samples.len())?;
        Ok(Self {
            width,
            height,
            bit_depth: BitDepth::Sixteen,
            samples,
        })
    }

    /// Build a depth map from widened samples, validating the range.
    pub fn from_samples(
        width: u32,
        height: u32,
        bit_depth: BitDepth,
        samples: Vec<u16>,
    ) -> Result<Self> {
        Self::check_len(width, height, samples.len())?;
        let max = bit_depth.max_value();
        if let Some(v) = samples.iter().find(|&&v| v > max) {
            return Err(ParallaxError::InvalidParameter(format!(
                "depth sample {v} exceeds {}-bit range",
                bit_depth.bits()
            )));
        }
        Ok(Self {
            width,
            height,
            bit_depth,
            samples,
        })
    }

    /// A depth map with every sample set to `value`.
    pub fn uniform(width: u32, height: u32, bit_depth: BitDepth, value: u16) -> Self {
        Self {
            width,
            height,
            bit_depth,
            samples: vec![value.min(bit_depth.max_value()); width as usize * height as usize],
        }
    }

    fn check_len(width: u32, height: u32, len: usize) -> Result<()> {
        if width == 0 || height == 0 {
            return Err(ParallaxError::InvalidParameter(format!(
                "depth map dimensions must be positive, got {width}x{height}"
            )));
        }
        if len != width as usize * height as usize {
            return Err(ParallaxError::InvalidParameter(format!(
                "depth map {width}x{height} needs {} samples, got {len}",
                width as usize * height as usize
            )));
        }
        Ok(())
    }

    #[inline]
    pub fn dims(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> u16 {
        self.samples[y as usize * self.width as usize + x as usize]
    }

    /// All samples, row-major.
    #[inline]
    pub fn samples(&self) -> &[u16] {
        &self.samples
    }

    /// True when every sample holds the same value.
    pub fn is_uniform(&self) -> bool {
        self.samples.windows(2).all(|w| w[0] == w[1])
    }

    /// Grayscale RGB rendering for the depth-visualization video.
    pub fn to_visual_frame(&self) -> Frame {
        let mut data = Vec::with_capacity(self.samples.len() * 3);
        for &v in &self.samples {
            let g = match self.bit_depth {
                BitDepth::Eight => v as u8,
                BitDepth::Sixteen => (v / 257) as u8,
            };
            data.extend_from_slice(&[g, g, g]);
        }
        Frame {
            width: self.width,
            height: self.height,
            data,
        }
    }

    /// Interpret a frame's luma as an 8-bit depth map.
    ///
    /// Used for externally supplied depth videos.
    pub fn from_frame_luma(frame: &Frame) -> Self {
        let samples = frame
            .data
            .chunks_exact(3)
            .map(|px| Rgb([px[0], px[1], px[2]]).luma().round().clamp(0.0, 255.0) as u16)
            .collect();
        Self {
            width: frame.width,
            height: frame.height,
            bit_depth: BitDepth::Eight,
            samples,
        }
    }
}
