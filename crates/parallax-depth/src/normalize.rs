//! Quantizing raw model output into depth maps.
//!
//! Min-max normalization maps the nearest sample to the top of the bit
//! depth's range and the farthest to zero. With [`NormalizationMode::PerFrame`]
//! the range is recomputed for every frame, so the same physical distance can
//! land on different intensities in neighbouring frames. `Running` widens one
//! range across the sequence instead.

use crate::error::{DepthError, DepthResult};
use parallax_core::{BitDepth, DepthMap};
use serde::{Deserialize, Serialize};

/// Unnormalized model output at frame resolution. Larger values are nearer.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDepth {
    pub width: u32,
    pub height: u32,
    values: Vec<f32>,
}

impl RawDepth {
    pub fn new(width: u32, height: u32, values: Vec<f32>) -> DepthResult<Self> {
        if width == 0 || height == 0 || values.len() != width as usize * height as usize {
            return Err(DepthError::Preprocess(format!(
                "raw depth {width}x{height} with {} values",
                values.len()
            )));
        }
        Ok(Self {
            width,
            height,
            values,
        })
    }

    #[inline]
    pub fn dims(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Min and max over finite values; `None` if there are none.
    pub fn range(&self) -> Option<DepthRange> {
        self.values
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .fold(None, |acc: Option<DepthRange>, v| {
                Some(match acc {
                    Some(r) => DepthRange {
                        min: r.min.min(v),
                        max: r.max.max(v),
                    },
                    None => DepthRange { min: v, max: v },
                })
            })
    }
}

/// Inclusive value range used for min-max normalization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthRange {
    pub min: f32,
    pub max: f32,
}

impl DepthRange {
    pub fn union(self, other: DepthRange) -> DepthRange {
        DepthRange {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }
}

/// How the normalization range is chosen across a sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizationMode {
    /// Independent min-max per frame.
    #[default]
    PerFrame,
    /// Running min/max over every frame seen so far.
    Running,
}

/// Quantize `raw` into `bit_depth` using `range`.
///
/// Values are truncated toward zero after scaling. A degenerate range
/// (constant input) yields an all-zero map; non-finite samples map to zero.
pub fn normalize_depth(
    raw: &RawDepth,
    bit_depth: BitDepth,
    range: DepthRange,
) -> DepthResult<DepthMap> {
    let span = range.max - range.min;
    let max_value = f32::from(bit_depth.max_value());
    let samples: Vec<u16> = if span > f32::EPSILON {
        raw.values
            .iter()
            .map(|&v| {
                if v.is_finite() {
                    (((v - range.min) / span).clamp(0.0, 1.0) * max_value) as u16
                } else {
                    0
                }
            })
            .collect()
    } else {
        vec![0; raw.values.len()]
    };
    Ok(DepthMap::from_samples(
        raw.width,
        raw.height,
        bit_depth,
        samples,
    )?)
}

/// Stateful normalizer applied to depth maps in decode order.
#[derive(Debug, Clone)]
pub struct DepthNormalizer {
    mode: NormalizationMode,
    bit_depth: BitDepth,
    running: Option<DepthRange>,
}

impl DepthNormalizer {
    pub fn new(mode: NormalizationMode, bit_depth: BitDepth) -> Self {
        Self {
            mode,
            bit_depth,
            running: None,
        }
    }

    pub fn mode(&self) -> NormalizationMode {
        self.mode
    }

    pub fn bit_depth(&self) -> BitDepth {
        self.bit_depth
    }

    /// Normalize the next map in sequence.
    pub fn normalize(&mut self, raw: &RawDepth) -> DepthResult<DepthMap> {
        let Some(frame_range) = raw.range() else {
            return Ok(DepthMap::uniform(raw.width, raw.height, self.bit_depth, 0));
        };
        let range = match self.mode {
            NormalizationMode::PerFrame => frame_range,
            NormalizationMode::Running => {
                let r = self.running.map_or(frame_range, |r| r.union(frame_range));
                self.running = Some(r);
                r
            }
        };
        normalize_depth(raw, self.bit_depth, range)
    }
}
