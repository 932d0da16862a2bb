//! Depth cache behavior seen through whole conversions: replay, damage
//! recovery, and keying.

use crate::harness::{context_with, textured_video, Counting, Workspace};
use parallax_depth::{DepthModel, NormalizationMode};
use parallax_pipeline::{ConvertConfig, PipelineStage, RunReport};
use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::Arc;

const FRAMES: usize = 6;

// ── Helpers ────────────────────────────────────────────────────

fn run(ws: &Workspace, config: &ConvertConfig) -> (RunReport, Arc<Counting>, Vec<PipelineStage>) {
    let estimator = Arc::new(Counting::default());
    let mut stages = Vec::new();
    let report = ws
        .pipeline(config.clone(), context_with(estimator.clone()))
        .run(|p| {
            if stages.last() != Some(&p.stage) {
                stages.push(p.stage);
            }
        })
        .unwrap();
    (report, estimator, stages)
}

fn cache_file(report: &RunReport) -> PathBuf {
    report.cache_file.clone().expect("cache in use")
}

// ── Replay ─────────────────────────────────────────────────────

#[test]
fn second_run_replays_cache_bit_identically() {
    let ws = Workspace::new(textured_video(FRAMES, 32, 16, true));
    let mut config = ws.config();
    config.save_depth = true;
    let paths = config.output_paths();

    let (first, _, _) = run(&ws, &config);
    assert_eq!(first.depth_computed, FRAMES as u64);
    let fresh_depth = ws.frames(&paths.depth);
    let fresh_stereo = ws.frames(&paths.output);

    let (second, estimator, stages) = run(&ws, &config);
    assert_eq!(second.depth_from_cache, FRAMES as u64);
    assert_eq!(second.depth_computed, 0);
    assert_eq!(estimator.calls(), 0);
    assert!(stages.contains(&PipelineStage::LoadingCachedDepth));
    assert!(!stages.contains(&PipelineStage::EstimatingDepth));
    assert_eq!(ws.frames(&paths.depth), fresh_depth);
    assert_eq!(ws.frames(&paths.output), fresh_stereo);
}

#[test]
fn cache_is_keyed_by_model() {
    let ws = Workspace::new(textured_video(FRAMES, 32, 16, false));
    let config = ws.config();
    let (large, _, _) = run(&ws, &config);

    let mut small = config.clone();
    small.depth_model = DepthModel::Small;
    let (report, estimator, _) = run(&ws, &small);
    assert_eq!(report.depth_from_cache, 0);
    assert_eq!(estimator.calls(), FRAMES as u64);
    assert_ne!(cache_file(&large), cache_file(&report));
}

#[test]
fn disabled_cache_writes_nothing() {
    let ws = Workspace::new(textured_video(FRAMES, 32, 16, false));
    let mut config = ws.config();
    config.use_cache = false;
    let (report, _, _) = run(&ws, &config);
    assert_eq!(report.cache_file, None);
    assert!(!config.cache_dir().exists());
}

// ── Damage recovery ────────────────────────────────────────────

#[test]
fn checksum_damage_discards_cache_and_recomputes() {
    let ws = Workspace::new(textured_video(FRAMES, 32, 16, false));
    let config = ws.config();
    let paths = config.output_paths();
    let (first, _, _) = run(&ws, &config);
    let fresh = ws.frames(&paths.output);

    // Flip a payload byte of the first record.
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(cache_file(&first))
        .unwrap();
    file.seek(SeekFrom::Start(30)).unwrap();
    file.write_all(&[0xA5]).unwrap();
    drop(file);

    let (report, estimator, _) = run(&ws, &config);
    assert_eq!(report.depth_from_cache, 0);
    assert_eq!(estimator.calls(), FRAMES as u64);
    assert_eq!(ws.frames(&paths.output), fresh);

    let (replay, estimator, _) = run(&ws, &config);
    assert_eq!(replay.depth_from_cache, FRAMES as u64);
    assert_eq!(estimator.calls(), 0);
}

#[test]
fn torn_tail_is_dropped_and_recomputed() {
    let ws = Workspace::new(textured_video(FRAMES, 32, 16, false));
    let config = ws.config();
    let paths = config.output_paths();
    let (first, _, _) = run(&ws, &config);
    let fresh = ws.frames(&paths.output);

    // Cut off the seal and the end of the last record.
    let path = cache_file(&first);
    let len = std::fs::metadata(&path).unwrap().len();
    OpenOptions::new()
        .write(true)
        .open(&path)
        .unwrap()
        .set_len(len - 20)
        .unwrap();

    let (report, estimator, _) = run(&ws, &config);
    assert_eq!(report.depth_from_cache, FRAMES as u64 - 1);
    assert_eq!(estimator.calls(), 1);
    assert_eq!(ws.frames(&paths.output), fresh);
}

#[test]
fn running_normalization_does_not_resume_a_partial_cache() {
    let ws = Workspace::new(textured_video(FRAMES, 32, 16, false));
    let mut config = ws.config();
    config.normalization = NormalizationMode::Running;

    let pipeline = ws.pipeline(config.clone(), context_with(Arc::new(Counting::default())));
    let token = pipeline.cancel_token();
    let err = pipeline
        .run(|p| {
            if p.frame == 2 {
                token.cancel();
            }
        })
        .unwrap_err();
    assert!(err.is_cancelled());

    let (report, estimator, _) = run(&ws, &config);
    assert_eq!(report.depth_from_cache, 0);
    assert_eq!(estimator.calls(), FRAMES as u64);
    assert!(cache_file(&report).to_string_lossy().contains("-running"));
}
