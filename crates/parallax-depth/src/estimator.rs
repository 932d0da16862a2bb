//! Depth estimators: frame in, unnormalized depth out.

use crate::error::DepthResult;
use crate::normalize::RawDepth;
use parallax_core::Frame;

/// A monocular depth model.
///
/// Implementations must be deterministic for a given frame and return a
/// grid at the frame's resolution where larger values are nearer.
pub trait DepthEstimator: Send + Sync {
    fn predict(&self, frame: &Frame) -> DepthResult<RawDepth>;

    /// Short name for logs.
    fn name(&self) -> &str;
}

/// Bilinear resample of a single-channel f32 grid (pixel-center aligned).
pub fn resize_bilinear(src: &[f32], sw: u32, sh: u32, dw: u32, dh: u32) -> Vec<f32> {
    let (sw_us, sh_us) = (sw as usize, sh as usize);
    let scale_x = sw as f32 / dw as f32;
    let scale_y = sh as f32 / dh as f32;
    let mut out = Vec::with_capacity(dw as usize * dh as usize);
    for y in 0..dh {
        let fy = ((y as f32 + 0.5) * scale_y - 0.5).clamp(0.0, (sh - 1) as f32);
        let y0 = fy.floor() as usize;
        let y1 = (y0 + 1).min(sh_us - 1);
        let ty = fy - y0 as f32;
        for x in 0..dw {
            let fx = ((x as f32 + 0.5) * scale_x - 0.5).clamp(0.0, (sw - 1) as f32);
            let x0 = fx.floor() as usize;
            let x1 = (x0 + 1).min(sw_us - 1);
            let tx = fx - x0 as f32;
            let top = src[y0 * sw_us + x0] * (1.0 - tx) + src[y0 * sw_us + x1] * tx;
            let bottom = src[y1 * sw_us + x0] * (1.0 - tx) + src[y1 * sw_us + x1] * tx;
            out.push(top * (1.0 - ty) + bottom * ty);
        }
    }
    out
}

/// CPU fallback estimator.
///
/// Blends a vertical position prior (lower rows are nearer) with smoothed
/// luminance (brighter is nearer). Used when no ONNX runtime is available.
#[derive(Debug, Clone)]
pub struct HeuristicDepthEstimator {
    /// Weight of the vertical prior in `[0, 1]`.
    pub vertical_weight: f32,
    /// Downsampling factor used to smooth luminance.
    pub smoothing: u32,
}

impl Default for HeuristicDepthEstimator {
    fn default() -> Self {
        Self {
            vertical_weight: 0.6,
            smoothing: 8,
        }
    }
}

impl DepthEstimator for HeuristicDepthEstimator {
    fn predict(&self, frame: &Frame) -> DepthResult<RawDepth> {
        let (w, h) = frame.dims();
        let luma = frame.luma();
        let cw = (w / self.smoothing.max(1)).max(1);
        let ch = (h / self.smoothing.max(1)).max(1);
        let coarse = resize_bilinear(&luma, w, h, cw, ch);
        let smooth = resize_bilinear(&coarse, cw, ch, w, h);

        let weight = self.vertical_weight.clamp(0.0, 1.0);
        let denom = (h.max(2) - 1) as f32;
        let values = smooth
            .iter()
            .enumerate()
            .map(|(i, &l)| {
                let y = (i / w as usize) as f32;
                weight * (y / denom) + (1.0 - weight) * (l / 255.0)
            })
            .collect();
        RawDepth::new(w, h, values)
    }

    fn name(&self) -> &str {
        "heuristic"
    }
}

#[cfg(feature = "onnx")]
pub use onnx::OnnxDepthEstimator;

#[cfg(feature = "onnx")]
mod onnx {
    use super::{resize_bilinear, DepthEstimator};
    use crate::error::{DepthError, DepthResult};
    use crate::model_manager::{DepthModel, ModelSpec};
    use crate::normalize::RawDepth;
    use crate::session::OnnxSession;
    use parallax_core::Frame;
    use std::path::Path;

    /// MiDaS / DPT depth estimation through ONNX Runtime.
    pub struct OnnxDepthEstimator {
        session: OnnxSession,
        spec: ModelSpec,
    }

    impl OnnxDepthEstimator {
        pub fn load(model_path: &Path, model: DepthModel) -> DepthResult<Self> {
            let session = OnnxSession::load(model_path, model)?;
            Ok(Self {
                session,
                spec: model.spec(),
            })
        }

        /// Resize to the network input, normalize, and lay out as NCHW.
        fn preprocess(&self, frame: &Frame) -> DepthResult<ndarray::Array4<f32>> {
            let size = self.spec.input_size;
            let (w, h) = frame.dims();
            let mean = self.spec.preprocess.mean();
            let std = self.spec.preprocess.std();
            let n = size as usize;
            let mut arr = ndarray::Array4::<f32>::zeros((1, 3, n, n));
            for c in 0..3 {
                let plane: Vec<f32> = frame
                    .data
                    .chunks_exact(3)
                    .map(|px| f32::from(px[c]) / 255.0)
                    .collect();
                let resized = resize_bilinear(&plane, w, h, size, size);
                for (i, v) in resized.into_iter().enumerate() {
                    arr[[0, c, i / n, i % n]] = (v - mean[c]) / std[c];
                }
            }
            Ok(arr)
        }
    }

    impl DepthEstimator for OnnxDepthEstimator {
        fn predict(&self, frame: &Frame) -> DepthResult<RawDepth> {
            let input = self.preprocess(frame)?;
            let (shape, values) = self.session.run(input.view())?;
            // [1, H, W] or [1, 1, H, W]
            let (oh, ow) = match shape.as_slice() {
                [.., h, w] => (*h as u32, *w as u32),
                _ => {
                    return Err(DepthError::Preprocess(format!(
                        "unexpected output shape {shape:?}"
                    )))
                }
            };
            if values.len() != (oh * ow) as usize {
                return Err(DepthError::Preprocess(format!(
                    "output shape {shape:?} does not match {} values",
                    values.len()
                )));
            }
            let (w, h) = frame.dims();
            RawDepth::new(w, h, resize_bilinear(&values, ow, oh, w, h))
        }

        fn name(&self) -> &str {
            self.spec.model.id()
        }
    }
}
