//! Parallax Pipeline - 2D video to side-by-side stereo
//!
//! Wires the pieces together as a single pull-based pass:
//! frame source → depth (cache, estimator or external video) → view
//! synthesis → compositing → encoder → audio mux.
//!
//! At most one batch of `depth_workers` frames is resident at a time.

pub mod cancel;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod stage;

pub use cancel::CancelToken;
pub use config::{ConvertConfig, OutputPaths};
pub use error::PipelineError;
pub use pipeline::{Pipeline, PipelineProgress, RunReport};
pub use stage::PipelineStage;
