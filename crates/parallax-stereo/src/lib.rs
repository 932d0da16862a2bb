//! Parallax Stereo - single image + depth map → side-by-side stereo frame
//!
//! - [`synthesize`] shifts pixels horizontally by depth into a left and a
//!   right view, filling exposed pixels by inpainting or avoiding them with
//!   linear remapping.
//! - [`composite`] places the two views next to each other.

pub mod compositor;
pub mod inpaint;
pub mod synth;

pub use compositor::{composite, composite_width, SeparatorConfig};
pub use inpaint::inpaint_telea;
pub use synth::{
    displacement_map, parallax_depth, synthesize, DepthCurve, StereoPair, StereoParams,
    SynthesisMode,
};
