//! Parallax Core - Foundation types for 2D → stereo conversion
//!
//! This crate provides the fundamental types used throughout Parallax:
//! - Frames (packed RGB8) and depth maps (8/16-bit)
//! - Frame rates (FrameRate)
//! - The shared error taxonomy

pub mod depth;
pub mod error;
pub mod frame;
pub mod time;

pub use depth::{BitDepth, DepthMap};
pub use error::{Dims, ParallaxError, Result};
pub use frame::{Frame, Rgb};
pub use time::FrameRate;

/// Validate that two grids share the same (width, height).
///
/// `what` names the pair being compared and ends up in the error message.
pub fn ensure_same_dims(
    what: &'static str,
    index: Option<u64>,
    expected: (u32, u32),
    actual: (u32, u32),
) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(ParallaxError::DimensionMismatch {
            what,
            index,
            expected: expected.into(),
            actual: actual.into(),
        })
    }
}
