//! Side-by-side compositing of a stereo pair.

use parallax_core::{ensure_same_dims, Frame, ParallaxError, Result, Rgb};
use serde::{Deserialize, Serialize};

/// Optional solid strip between the two views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeparatorConfig {
    /// Strip width in pixels; 0 places the views edge to edge.
    pub width: u32,
    pub color: Rgb,
}

impl Default for SeparatorConfig {
    fn default() -> Self {
        Self {
            width: 0,
            color: Rgb::RED,
        }
    }
}

/// Width of the composite for views of `view_width`.
pub fn composite_width(view_width: u32, separator: &SeparatorConfig) -> u32 {
    2 * view_width + separator.width
}

/// Concatenate `left | separator | right` into one frame of width `2W + S`.
pub fn composite(left: &Frame, right: &Frame, separator: &SeparatorConfig) -> Result<Frame> {
    ensure_same_dims("left/right", None, left.dims(), right.dims())?;
    let width = u64::from(left.width) * 2 + u64::from(separator.width);
    let width = u32::try_from(width).map_err(|_| {
        ParallaxError::InvalidParameter(format!("composite width {width} overflows"))
    })?;

    let strip: Vec<u8> = separator.color.0.repeat(separator.width as usize);
    let mut data = Vec::with_capacity(width as usize * left.height as usize * 3);
    for y in 0..left.height {
        data.extend_from_slice(left.row(y));
        data.extend_from_slice(&strip);
        data.extend_from_slice(right.row(y));
    }
    Frame::from_raw(width, left.height, data)
}
