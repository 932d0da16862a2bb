//! Fatal errors: where they surface and what they leave behind.

use crate::harness::{context_with, textured_video, Counting, Workspace, FPS};
use parallax_core::{Frame, ParallaxError, Rgb};
use parallax_depth::{DepthEstimator, DepthResult, RawDepth};
use parallax_media::MemoryVideo;
use parallax_pipeline::PipelineStage;
use std::sync::Arc;

fn gray_video(frames: usize, width: u32, height: u32) -> MemoryVideo {
    MemoryVideo {
        frames: vec![Frame::filled(width, height, Rgb([90, 90, 90])); frames],
        frame_rate: FPS,
        has_audio: false,
    }
}

#[test]
fn external_depth_with_other_shape_is_rejected_up_front() {
    let ws = Workspace::new(textured_video(4, 32, 16, false));
    let mut config = ws.config();
    config.input_depth_map = Some(ws.add("depth.mp4", gray_video(4, 16, 16)));
    let paths = config.output_paths();

    let err = ws
        .pipeline(config, context_with(Arc::new(Counting::default())))
        .run(|_| {})
        .unwrap_err();
    assert!(matches!(err.source, ParallaxError::DimensionMismatch { .. }));
    assert_eq!(err.stage, PipelineStage::Decoding);
    assert!(ws.backend.output(&paths.silent).is_none());
}

#[test]
fn short_external_depth_fails_at_the_missing_frame() {
    let ws = Workspace::new(textured_video(5, 32, 16, false));
    let mut config = ws.config();
    config.input_depth_map = Some(ws.add("depth.mp4", gray_video(3, 32, 16)));
    let paths = config.output_paths();

    let err = ws
        .pipeline(config, context_with(Arc::new(Counting::default())))
        .run(|_| {})
        .unwrap_err();
    match err.source {
        ParallaxError::DimensionMismatch { index, .. } => assert_eq!(index, Some(3)),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.frame, Some(3));
    assert_eq!(err.stage, PipelineStage::EstimatingDepth);
    let partial = ws.backend.output(&paths.silent).unwrap();
    assert_eq!(partial.frames.len(), 3);
    assert!(partial.finished);
}

#[test]
fn estimator_shape_mismatch_aborts_and_keeps_cache_prefix() {
    struct HalfWidthAfter(u64, std::sync::atomic::AtomicU64);
    impl DepthEstimator for HalfWidthAfter {
        fn predict(&self, frame: &Frame) -> DepthResult<RawDepth> {
            let n = self.1.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let w = if n >= self.0 { frame.width / 2 } else { frame.width };
            RawDepth::new(w, frame.height, vec![n as f32; (w * frame.height) as usize])
        }
        fn name(&self) -> &str {
            "half-width"
        }
    }

    let ws = Workspace::new(textured_video(5, 32, 16, false));
    let config = ws.config();
    let estimator = Arc::new(HalfWidthAfter(2, Default::default()));
    let err = ws
        .pipeline(config.clone(), context_with(estimator))
        .run(|_| {})
        .unwrap_err();
    assert!(matches!(err.source, ParallaxError::DimensionMismatch { .. }));
    assert_eq!(err.frame, Some(2));
    assert_eq!(err.stage, PipelineStage::EstimatingDepth);

    let retry = Arc::new(Counting::default());
    let report = ws
        .pipeline(config, context_with(retry.clone()))
        .run(|_| {})
        .unwrap();
    assert_eq!(report.depth_from_cache, 2);
    assert_eq!(retry.calls(), 3);
}

#[test]
fn mux_failure_leaves_a_usable_silent_video() {
    let ws = Workspace::new(textured_video(4, 32, 16, true));
    ws.backend.fail_mux();
    let config = ws.config();
    let paths = config.output_paths();

    let err = ws
        .pipeline(config, context_with(Arc::new(Counting::default())))
        .run(|_| {})
        .unwrap_err();
    assert_eq!(err.stage, PipelineStage::Muxing);
    assert!(matches!(err.source, ParallaxError::MuxFailure(_)));
    let silent = ws.backend.output(&paths.silent).unwrap();
    assert!(silent.finished);
    assert_eq!(silent.frames.len(), 4);
}

#[test]
fn depth_only_run_never_muxes() {
    let ws = Workspace::new(textured_video(4, 32, 16, true));
    let mut config = ws.config();
    config.save_depth_only = true;
    let paths = config.output_paths();

    let report = ws
        .pipeline(config, context_with(Arc::new(Counting::default())))
        .run(|_| {})
        .unwrap();
    assert!(ws.backend.muxes().is_empty());
    assert_eq!(report.output, None);
    assert_eq!(report.depth_output.as_deref(), Some(paths.depth.as_path()));
    assert_eq!(ws.frames(&paths.depth).len(), 4);
}

#[test]
fn zero_frame_source_is_unreadable() {
    let ws = Workspace::new(textured_video(0, 32, 16, false));
    let err = ws
        .pipeline(ws.config(), context_with(Arc::new(Counting::default())))
        .run(|_| {})
        .unwrap_err();
    assert!(matches!(err.source, ParallaxError::SourceUnreadable { .. }));
}
