//! Depth-to-parallax view synthesis.
//!
//! Depth is rescaled, min-max normalized to `[0, 1]`, and turned into a
//! per-pixel horizontal displacement of at most `baseline_distance * width`.
//! The left view samples the source at `x - d`, the right view at `x + d`.

use crate::inpaint::inpaint_telea;
use parallax_core::frame::CHANNELS;
use parallax_core::{ensure_same_dims, DepthMap, Frame, ParallaxError, Result, Rgb};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Written into exposed pixels before they are filled.
pub const SENTINEL: Rgb = Rgb::BLACK;

/// Curve applied to depth after dividing by `depth_scale_factor`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepthCurve {
    /// Plain division.
    #[default]
    Linear,
    /// Square after division, normalize, then square root. Spreads the
    /// parallax of far-away content.
    Emphasis,
}

/// How displaced samples are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynthesisMode {
    /// Integer shift; pixels with no source are inpainted.
    #[default]
    Inpaint,
    /// Sub-pixel linear interpolation with edge clamping. Leaves no holes.
    Remap,
}

/// Parameters for [`synthesize`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StereoParams {
    /// Maximum displacement as a fraction of frame width.
    pub baseline_distance: f32,
    /// Divisor applied to raw depth before normalization.
    pub depth_scale_factor: f32,
    pub curve: DepthCurve,
    pub mode: SynthesisMode,
    /// Neighbourhood radius for inpainting, in pixels.
    pub inpaint_radius: u32,
}

impl Default for StereoParams {
    fn default() -> Self {
        Self {
            baseline_distance: 0.01,
            depth_scale_factor: 0.5,
            curve: DepthCurve::Linear,
            mode: SynthesisMode::Inpaint,
            inpaint_radius: 3,
        }
    }
}

impl StereoParams {
    pub fn validate(&self) -> Result<()> {
        if !(self.baseline_distance > 0.0 && self.baseline_distance <= 0.5) {
            return Err(ParallaxError::InvalidParameter(format!(
                "baseline_distance must be in (0, 0.5], got {}",
                self.baseline_distance
            )));
        }
        if !(self.depth_scale_factor > 0.0 && self.depth_scale_factor.is_finite()) {
            return Err(ParallaxError::InvalidParameter(format!(
                "depth_scale_factor must be positive, got {}",
                self.depth_scale_factor
            )));
        }
        if self.mode == SynthesisMode::Inpaint && self.inpaint_radius == 0 {
            return Err(ParallaxError::InvalidParameter(
                "inpaint_radius must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Largest displacement in pixels for a frame of `width`.
    pub fn max_displacement(&self, width: u32) -> f32 {
        self.baseline_distance * width as f32
    }
}

/// Left and right views of one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StereoPair {
    pub left: Frame,
    pub right: Frame,
}

/// Rescaled, min-max normalized depth in `[0, 1]`, row-major.
///
/// A uniform map normalizes to all zeros.
pub fn parallax_depth(depth: &DepthMap, params: &StereoParams) -> Vec<f32> {
    let scale = params.depth_scale_factor;
    let scaled: Vec<f32> = depth
        .samples()
        .iter()
        .map(|&v| {
            let v = f32::from(v) / scale;
            match params.curve {
                DepthCurve::Linear => v,
                DepthCurve::Emphasis => v * v,
            }
        })
        .collect();

    let (min, max) = scaled
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let span = max - min;
    if !(span > 0.0) {
        return vec![0.0; scaled.len()];
    }
    scaled
        .into_iter()
        .map(|v| {
            let n = ((v - min) / span).clamp(0.0, 1.0);
            match params.curve {
                DepthCurve::Linear => n,
                DepthCurve::Emphasis => n.sqrt(),
            }
        })
        .collect()
}

/// Per-pixel displacement in pixels, as applied by `params.mode`.
///
/// Always within `[0, baseline_distance * width]`.
pub fn displacement_map(depth: &DepthMap, params: &StereoParams) -> Vec<f32> {
    let max = params.max_displacement(depth.width);
    parallax_depth(depth, params)
        .into_iter()
        .map(|n| match params.mode {
            SynthesisMode::Inpaint => (max * n).trunc(),
            SynthesisMode::Remap => max * n,
        })
        .collect()
}

#[derive(Clone, Copy)]
enum Eye {
    Left,
    Right,
}

impl Eye {
    #[inline]
    fn sign(self) -> f32 {
        match self {
            Self::Left => -1.0,
            Self::Right => 1.0,
        }
    }
}

/// Synthesize the stereo pair for one frame.
pub fn synthesize(frame: &Frame, depth: &DepthMap, params: &StereoParams) -> Result<StereoPair> {
    ensure_same_dims("frame/depth", None, frame.dims(), depth.dims())?;
    params.validate()?;
    if frame.width == 0 || frame.height == 0 {
        return Ok(StereoPair {
            left: frame.clone(),
            right: frame.clone(),
        });
    }

    let shift = displacement_map(depth, params);
    let (left, right) = match params.mode {
        SynthesisMode::Inpaint => rayon::join(
            || shift_view(frame, &shift, Eye::Left, params.inpaint_radius),
            || shift_view(frame, &shift, Eye::Right, params.inpaint_radius),
        ),
        SynthesisMode::Remap => rayon::join(
            || remap_view(frame, &shift, Eye::Left),
            || remap_view(frame, &shift, Eye::Right),
        ),
    };
    Ok(StereoPair { left, right })
}

/// Integer shift; samples that fall outside the frame become holes.
fn shift_view(frame: &Frame, shift: &[f32], eye: Eye, radius: u32) -> Frame {
    let w = frame.width as usize;
    let stride = frame.stride();
    let mut out = Frame::new(frame.width, frame.height);
    let mut mask = vec![false; shift.len()];

    out.data
        .par_chunks_mut(stride)
        .zip(mask.par_chunks_mut(w))
        .enumerate()
        .for_each(|(y, (row, holes))| {
            let src = frame.row(y as u32);
            let shifts = &shift[y * w..(y + 1) * w];
            for x in 0..w {
                let sx = x as i64 + (eye.sign() * shifts[x]) as i64;
                let dst = &mut row[x * CHANNELS..(x + 1) * CHANNELS];
                if (0..w as i64).contains(&sx) {
                    let s = sx as usize * CHANNELS;
                    dst.copy_from_slice(&src[s..s + CHANNELS]);
                } else {
                    dst.copy_from_slice(&SENTINEL.0);
                    holes[x] = true;
                }
            }
        });

    let filled = inpaint_telea(&mut out, &mask, radius);
    trace!(filled, "Exposed pixels inpainted");
    out
}

/// Linear interpolation along the row, clamped at the edges.
fn remap_view(frame: &Frame, shift: &[f32], eye: Eye) -> Frame {
    let w = frame.width as usize;
    let stride = frame.stride();
    let last = (w - 1) as f32;
    let mut out = Frame::new(frame.width, frame.height);

    out.data
        .par_chunks_mut(stride)
        .enumerate()
        .for_each(|(y, row)| {
            let src = frame.row(y as u32);
            let shifts = &shift[y * w..(y + 1) * w];
            for x in 0..w {
                let sx = (x as f32 + eye.sign() * shifts[x]).clamp(0.0, last);
                let x0 = sx.floor() as usize;
                let x1 = (x0 + 1).min(w - 1);
                let t = sx - x0 as f32;
                for c in 0..CHANNELS {
                    let a = f32::from(src[x0 * CHANNELS + c]);
                    let b = f32::from(src[x1 * CHANNELS + c]);
                    row[x * CHANNELS + c] = (a + (b - a) * t).round() as u8;
                }
            }
        });
    out
}
