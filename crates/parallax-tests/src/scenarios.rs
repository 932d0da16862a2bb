//! End-to-end conversions: constant depth, a near object, and an
//! interrupted run that resumes from the depth cache.

use crate::harness::{context_with, textured_frame, textured_video, Counting, Flat, Workspace, FPS};
use parallax_core::{DepthMap, Frame, Rgb};
use parallax_media::MemoryVideo;
use parallax_pipeline::PipelineStage;
use parallax_stereo::{composite, displacement_map, SeparatorConfig, StereoParams};
use std::sync::Arc;

// ── Helpers ────────────────────────────────────────────────────

fn side_by_side(frame: &Frame) -> Frame {
    composite(frame, frame, &SeparatorConfig::default()).unwrap()
}

/// Depth and stereo frames of an uninterrupted, uncached, single-worker
/// conversion.
fn reference_run(frames: usize, width: u32, height: u32) -> (Vec<Frame>, Vec<Frame>) {
    let ws = Workspace::new(textured_video(frames, width, height, true));
    let mut config = ws.config();
    config.save_depth = true;
    config.use_cache = false;
    let paths = config.output_paths();
    ws.pipeline(config, context_with(Arc::new(Counting::default())))
        .run(|_| {})
        .unwrap();
    (ws.frames(&paths.depth), ws.frames(&paths.output))
}

/// White discs on black, one touching each vertical edge.
fn disc_depth_frame(width: u32, height: u32, radius: u32) -> Frame {
    let mut frame = Frame::new(width, height);
    let centers = [(0i64, height as i64 / 2), (width as i64 - 1, height as i64 / 2)];
    for y in 0..height {
        for x in 0..width {
            let inside = centers.iter().any(|&(cx, cy)| {
                let (dx, dy) = (x as i64 - cx, y as i64 - cy);
                dx * dx + dy * dy <= (radius * radius) as i64
            });
            if inside {
                frame.set_pixel(x, y, Rgb([255, 255, 255]));
            }
        }
    }
    frame
}

// ── Scenario A: constant depth ─────────────────────────────────

#[test]
fn constant_external_depth_reproduces_source_in_both_halves() {
    let ws = Workspace::new(textured_video(10, 48, 24, true));
    let gray = MemoryVideo {
        frames: vec![Frame::filled(48, 24, Rgb([128, 128, 128])); 10],
        frame_rate: FPS,
        has_audio: false,
    };
    let mut config = ws.config();
    config.input_depth_map = Some(ws.add("gray_depth.mp4", gray));
    let paths = config.output_paths();

    let report = ws
        .pipeline(config, context_with(Arc::new(Counting::default())))
        .run(|_| {})
        .unwrap();

    assert_eq!(report.frames, 10);
    assert_eq!(report.depth_external, 10);
    assert_eq!(report.depth_computed, 0);
    assert!(report.audio_muxed);

    let out = ws.backend.output(&paths.output).unwrap();
    let spec = out.spec.unwrap();
    assert_eq!((spec.width, spec.height), (96, 24));
    assert_eq!(spec.frame_rate, FPS);
    assert_eq!(out.frames.len(), 10);
    for (i, frame) in out.frames.iter().enumerate() {
        assert_eq!(*frame, side_by_side(&textured_frame(48, 24, i as u32)), "frame {i}");
    }
}

#[test]
fn constant_estimated_depth_reproduces_source_in_both_halves() {
    let ws = Workspace::new(textured_video(10, 40, 20, false));
    let config = ws.config();
    let paths = config.output_paths();

    let report = ws
        .pipeline(config, context_with(Arc::new(Flat(0.5))))
        .run(|_| {})
        .unwrap();

    assert_eq!(report.depth_computed, 10);
    let frames = ws.frames(&paths.output);
    assert_eq!(frames.len(), 10);
    for (i, frame) in frames.iter().enumerate() {
        assert_eq!(frame.width, 80);
        assert_eq!(*frame, side_by_side(&textured_frame(40, 20, i as u32)));
    }
}

// ── Scenario B: near object ────────────────────────────────────

#[test]
fn bright_region_is_displaced_and_no_hole_survives() {
    let (w, h) = (256, 64);
    let depth_frame = disc_depth_frame(w, h, 20);

    let depth = DepthMap::from_frame_luma(&depth_frame);
    let params = StereoParams::default();
    let disp = displacement_map(&depth, &params);
    let at = |x: u32, y: u32| disp[(y * w + x) as usize];
    assert!(at(0, h / 2) > at(w / 2, h / 2));
    assert_eq!(at(w / 2, h / 2), 0.0);
    assert!(at(0, h / 2) <= params.max_displacement(w));

    let ws = Workspace::new(MemoryVideo {
        frames: vec![textured_frame(w, h, 3)],
        frame_rate: FPS,
        has_audio: false,
    });
    let mut config = ws.config();
    config.input_depth_map = Some(ws.add(
        "discs.mp4",
        MemoryVideo {
            frames: vec![depth_frame],
            frame_rate: FPS,
            has_audio: false,
        },
    ));
    let paths = config.output_paths();
    ws.pipeline(config, context_with(Arc::new(Counting::default())))
        .run(|_| {})
        .unwrap();

    let frames = ws.frames(&paths.output);
    assert_eq!(frames.len(), 1);
    let sbs = &frames[0];
    assert_eq!((sbs.width, sbs.height), (2 * w, h));
    for y in 0..h {
        for x in 0..sbs.width {
            assert_ne!(sbs.pixel(x, y), Rgb::BLACK, "unfilled pixel at ({x}, {y})");
        }
    }

    let source = textured_frame(w, h, 3);
    let left_row = |y| &sbs.row(y)[..(w * 3) as usize];
    assert_ne!(left_row(h / 2), source.row(h / 2), "disc rows are shifted");
    assert_eq!(left_row(0), source.row(0), "rows clear of the discs are untouched");
}

// ── Scenario C: interrupted and resumed ────────────────────────

#[test]
fn resumed_run_computes_only_the_missing_tail() {
    const TOTAL: u64 = 12;
    const DONE_BEFORE_CANCEL: u64 = 5;

    let ws = Workspace::new(textured_video(TOTAL as usize, 32, 16, true));
    let mut config = ws.config();
    config.save_depth = true;
    let paths = config.output_paths();

    // First run, cancelled after five frames.
    let first = Arc::new(Counting::default());
    let pipeline = ws.pipeline(config.clone(), context_with(first.clone()));
    let token = pipeline.cancel_token();
    let err = pipeline
        .run(|p| {
            if p.frame == DONE_BEFORE_CANCEL {
                token.cancel();
            }
        })
        .unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(first.calls(), DONE_BEFORE_CANCEL);

    // Second run resumes from the cache.
    let second = Arc::new(Counting::default());
    let mut stages = Vec::new();
    let report = ws
        .pipeline(config.clone(), context_with(second.clone()))
        .run(|p| stages.push(p.stage))
        .unwrap();
    assert_eq!(report.depth_from_cache, DONE_BEFORE_CANCEL);
    assert_eq!(report.depth_computed, TOTAL - DONE_BEFORE_CANCEL);
    assert_eq!(second.calls(), TOTAL - DONE_BEFORE_CANCEL);
    assert!(stages.contains(&PipelineStage::EstimatingDepth));
    let resumed_depth = ws.frames(&paths.depth);
    let resumed_stereo = ws.frames(&paths.output);

    let (ref_depth, ref_stereo) = reference_run(TOTAL as usize, 32, 16);
    assert_eq!(resumed_depth.len() as u64, TOTAL);
    assert_eq!(resumed_depth, ref_depth);
    assert_eq!(resumed_stereo, ref_stereo);
}

// ── Parallel estimation ────────────────────────────────────────

#[test]
fn four_workers_match_a_single_worker_run() {
    const TOTAL: usize = 11;

    let ws = Workspace::new(textured_video(TOTAL, 32, 16, true));
    let mut config = ws.config();
    config.depth_workers = 4;
    config.save_depth = true;
    let paths = config.output_paths();

    let estimator = Arc::new(Counting::default());
    let mut frames_seen = Vec::new();
    let report = ws
        .pipeline(config, context_with(estimator.clone()))
        .run(|p| {
            if frames_seen.last() != Some(&p.frame) {
                frames_seen.push(p.frame);
            }
        })
        .unwrap();
    assert_eq!(report.depth_computed, TOTAL as u64);
    assert_eq!(estimator.calls(), TOTAL as u64);
    assert_eq!(frames_seen, (0..=TOTAL as u64).collect::<Vec<_>>());

    let (ref_depth, ref_stereo) = reference_run(TOTAL, 32, 16);
    assert_eq!(ws.frames(&paths.depth), ref_depth);
    assert_eq!(ws.frames(&paths.output), ref_stereo);
}

#[test]
fn resume_starting_mid_batch_matches_reference() {
    const TOTAL: u64 = 11;

    let ws = Workspace::new(textured_video(TOTAL as usize, 32, 16, true));
    let mut config = ws.config();
    config.save_depth = true;
    let paths = config.output_paths();

    // Three workers, cancelled after four frames: the second batch
    // (frames 3..6) is already estimated and cached.
    let mut first_config = config.clone();
    first_config.depth_workers = 3;
    let first = Arc::new(Counting::default());
    let pipeline = ws.pipeline(first_config, context_with(first.clone()));
    let token = pipeline.cancel_token();
    let err = pipeline
        .run(|p| {
            if p.frame == 4 {
                token.cancel();
            }
        })
        .unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(first.calls(), 6);

    // Four workers resume from record 6, so batches are 6..10 and 10..11.
    config.depth_workers = 4;
    let second = Arc::new(Counting::default());
    let report = ws
        .pipeline(config.clone(), context_with(second.clone()))
        .run(|_| {})
        .unwrap();
    assert_eq!(report.depth_from_cache, 6);
    assert_eq!(report.depth_computed, TOTAL - 6);
    assert_eq!(second.calls(), TOTAL - 6);

    let (ref_depth, ref_stereo) = reference_run(TOTAL as usize, 32, 16);
    assert_eq!(ws.frames(&paths.depth), ref_depth);
    assert_eq!(ws.frames(&paths.output), ref_stereo);

    // The appended tail was sealed: a third run is a pure replay.
    let third = Arc::new(Counting::default());
    let replay = ws
        .pipeline(config, context_with(third.clone()))
        .run(|_| {})
        .unwrap();
    assert_eq!(replay.depth_from_cache, TOTAL);
    assert_eq!(third.calls(), 0);
    assert_eq!(ws.frames(&paths.output), ref_stereo);
}

#[test]
fn sixteen_bit_depth_runs_end_to_end() {
    let ws = Workspace::new(textured_video(3, 24, 12, false));
    let mut config = ws.config();
    config.depth_bits = 16;
    config.save_depth = true;
    let paths = config.output_paths();
    let report = ws
        .pipeline(config, context_with(Arc::new(Counting::default())))
        .run(|_| {})
        .unwrap();
    assert_eq!(report.frames, 3);
    assert!(report
        .cache_file
        .unwrap()
        .to_string_lossy()
        .contains("-16bit"));
    let depth = ws.frames(&paths.depth);
    assert_eq!(depth.len(), 3);
    assert_eq!(depth[0].dims(), (24, 12));
    assert!(depth[0].data.contains(&255), "full-range depth maps to white");
}
