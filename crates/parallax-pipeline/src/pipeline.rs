//! The conversion run.
//!
//! One pass over the source: every decoded frame is paired with its depth
//! map, synthesized into a stereo pair, composited side by side and pushed
//! to the encoder before the next frame is pulled. The silent result is
//! then muxed with the source audio.

use crate::cancel::CancelToken;
use crate::config::ConvertConfig;
use crate::error::PipelineError;
use crate::stage::PipelineStage;
use parallax_core::{BitDepth, ParallaxError};
use parallax_depth::{
    content_key, CacheEntry, CacheKey, CacheStatus, DepthCache, DepthContext, DepthError,
    DepthNormalizer, DepthStats, DepthStream, Estimation, EstimatorPool,
};
use parallax_media::{FrameSource, MediaBackend, SinkSpec, VideoSink};
use parallax_stereo::{composite, composite_width, synthesize};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Progress report passed to the run callback.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineProgress {
    pub stage: PipelineStage,
    /// Frames fully processed so far.
    pub frame: u64,
    /// Expected frame count; 0 until the source is open.
    pub total_frames: u64,
    pub message: String,
}

impl PipelineProgress {
    /// Completed fraction in `[0, 1]`.
    pub fn fraction(&self) -> f32 {
        if self.total_frames == 0 {
            0.0
        } else {
            (self.frame as f32 / self.total_frames as f32).min(1.0)
        }
    }
}

/// Summary of a successful run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub frames: u64,
    pub depth_from_cache: u64,
    pub depth_computed: u64,
    pub depth_external: u64,
    /// Final stereo video; `None` for depth-only runs.
    pub output: Option<PathBuf>,
    /// Silent stereo video, unless removed after muxing.
    pub silent_output: Option<PathBuf>,
    pub depth_output: Option<PathBuf>,
    pub cache_file: Option<PathBuf>,
    pub audio_muxed: bool,
}

/// A configured conversion.
pub struct Pipeline {
    config: ConvertConfig,
    backend: Arc<dyn MediaBackend>,
    depth: Arc<DepthContext>,
    cancel: CancelToken,
}

impl Pipeline {
    pub fn new(
        config: ConvertConfig,
        backend: Arc<dyn MediaBackend>,
        depth: Arc<DepthContext>,
    ) -> Self {
        Self {
            config,
            backend,
            depth,
            cancel: CancelToken::new(),
        }
    }

    /// Use an externally owned cancel token.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &ConvertConfig {
        &self.config
    }

    /// Run the conversion, reporting progress at every stage transition
    /// and after every frame.
    ///
    /// On failure, partial outputs are finished and left in place, and the
    /// depth cache keeps every record appended so far.
    pub fn run(
        &self,
        progress: impl FnMut(&PipelineProgress),
    ) -> Result<RunReport, PipelineError> {
        let mut run = Run {
            stage: PipelineStage::Initializing,
            frame: 0,
            total: 0,
            progress,
        };
        run.emit("Validating settings");
        match self.execute(&mut run) {
            Ok(report) => Ok(report),
            Err(err) => {
                warn!(error = %err, "Conversion failed");
                run.advance(PipelineStage::Failed, err.to_string());
                Err(err)
            }
        }
    }

    fn execute<F: FnMut(&PipelineProgress)>(
        &self,
        run: &mut Run<F>,
    ) -> Result<RunReport, PipelineError> {
        use PipelineStage::*;
        let config = &self.config;
        let init = |e: ParallaxError| PipelineError::new(Initializing, None, e);

        config.validate().map_err(init)?;
        let bit_depth = config.bit_depth().map_err(init)?;
        std::fs::create_dir_all(&config.output_dir).map_err(|e| init(e.into()))?;
        let paths = config.output_paths();

        let source = self
            .backend
            .open_source(&config.input_video)
            .map_err(|e| PipelineError::new(Decoding, None, e))?;
        let info = source.info().clone();
        run.total = info.frame_count;
        run.advance(
            Decoding,
            format!(
                "{}x{} at {:.3} fps, {} frames",
                info.width,
                info.height,
                info.frame_rate.to_fps_f64(),
                info.frame_count
            ),
        );

        let (stream, depth_stage) = self.depth_stream(source, bit_depth)?;
        let cache_file = stream.cache_path();

        let mut sinks = Sinks::default();
        let sink_err = |e: ParallaxError| PipelineError::new(Encoding, None, e);
        if !config.save_depth_only {
            let spec = SinkSpec {
                width: composite_width(info.width, &config.separator),
                height: info.height,
                frame_rate: info.frame_rate,
                encoder: config.encoder.clone(),
            };
            sinks.stereo = Some(self.backend.create_sink(&paths.silent, spec).map_err(sink_err)?);
        }
        if config.save_depth || config.save_depth_only {
            let spec = SinkSpec {
                width: info.width,
                height: info.height,
                frame_rate: info.frame_rate,
                encoder: config.encoder.clone(),
            };
            sinks.depth = Some(self.backend.create_sink(&paths.depth, spec).map_err(sink_err)?);
        }

        let message = match depth_stage {
            LoadingCachedDepth => "Replaying cached depth maps",
            _ if config.input_depth_map.is_some() => "Reading external depth video",
            _ => "Estimating depth maps",
        };
        run.advance(depth_stage, message);

        let streamed = self.stream_frames(run, stream, &mut sinks, depth_stage);
        let finished = sinks.finish();
        let (frames, stats) = match streamed {
            Ok(done) => done,
            Err(err) => {
                if let Err(e) = finished {
                    warn!(error = %e, "Could not finalize partial output");
                }
                return Err(err);
            }
        };
        if run.stage != Encoding {
            run.advance(Encoding, "Finalizing outputs");
        }
        finished.map_err(sink_err)?;

        let mut report = RunReport {
            frames,
            depth_from_cache: stats.from_cache,
            depth_computed: stats.computed,
            depth_external: stats.external,
            depth_output: sinks.depth.is_some().then(|| paths.depth.clone()),
            cache_file,
            ..Default::default()
        };

        if config.save_depth_only {
            run.advance(Done, "Depth video written");
            info!(?report, "Conversion finished");
            return Ok(report);
        }

        run.advance(Muxing, "Attaching source audio");
        let mux_err = |e: ParallaxError| PipelineError::new(Muxing, None, e);
        if info.has_audio {
            self.backend
                .mux_audio(&config.input_video, &paths.silent, &paths.output)
                .map_err(mux_err)?;
            report.audio_muxed = true;
        } else {
            info!("Source has no audio track, copying the silent video");
            self.backend
                .copy_output(&paths.silent, &paths.output)
                .map_err(mux_err)?;
        }
        report.output = Some(paths.output.clone());
        report.silent_output = Some(paths.silent.clone());

        if config.remove_intermediate {
            match self.backend.remove_output(&paths.silent) {
                Ok(()) => report.silent_output = None,
                Err(e) => warn!(path = %paths.silent.display(), error = %e, "Could not remove silent video"),
            }
        }

        run.advance(Done, format!("Wrote {}", paths.output.display()));
        info!(?report, "Conversion finished");
        Ok(report)
    }

    /// Depth producer for this run and the stage it runs in.
    fn depth_stream(
        &self,
        source: Box<dyn FrameSource>,
        bit_depth: BitDepth,
    ) -> Result<(DepthStream, PipelineStage), PipelineError> {
        use PipelineStage::*;
        let config = &self.config;

        if let Some(depth_path) = &config.input_depth_map {
            info!(path = %depth_path.display(), "Using external depth video");
            let stream = self
                .backend
                .open_source(depth_path)
                .and_then(|depth| DepthStream::external(source, depth))
                .map_err(|e| PipelineError::new(Decoding, None, e))?;
            return Ok((stream, EstimatingDepth));
        }

        let cache = if config.use_cache {
            self.open_cache()?
        } else {
            None
        };
        let stage = match cache.as_ref().map(CacheEntry::status) {
            Some(CacheStatus::Complete(_)) => LoadingCachedDepth,
            _ => EstimatingDepth,
        };
        let depth_err = |e: DepthError| PipelineError::new(stage, None, e);
        let estimation = Estimation {
            estimator: self.depth.estimator(config.depth_model).map_err(depth_err)?,
            normalizer: DepthNormalizer::new(config.normalization, bit_depth),
            pool: EstimatorPool::new(config.depth_workers).map_err(depth_err)?,
        };
        let stream = DepthStream::estimated(source, estimation, cache)
            .map_err(|e| PipelineError::new(stage, None, e))?;
        Ok((stream, stage))
    }

    /// Lock and open the cache for this video and depth settings.
    ///
    /// Only a held lock is fatal; any other problem runs without a cache.
    fn open_cache(&self) -> Result<Option<CacheEntry>, PipelineError> {
        let config = &self.config;
        let content = match content_key(&config.input_video) {
            Ok(content) => content,
            Err(e) => {
                warn!(error = %e, "Cannot hash input video, depth cache disabled");
                return Ok(None);
            }
        };
        let key = CacheKey::new(config.cache_variant(), content);
        match DepthCache::new(config.cache_dir()).open(&key) {
            Ok(entry) => Ok(Some(entry)),
            Err(e @ DepthError::CacheBusy(_)) => {
                Err(PipelineError::new(PipelineStage::Decoding, None, e))
            }
            Err(e) => {
                warn!(error = %e, "Depth cache unavailable, continuing without it");
                Ok(None)
            }
        }
    }

    fn stream_frames<F: FnMut(&PipelineProgress)>(
        &self,
        run: &mut Run<F>,
        mut stream: DepthStream,
        sinks: &mut Sinks,
        depth_stage: PipelineStage,
    ) -> Result<(u64, DepthStats), PipelineError> {
        use PipelineStage::*;
        let config = &self.config;
        let mut index = 0u64;

        loop {
            if self.cancel.is_cancelled() {
                info!(frame = index, "Conversion cancelled");
                return Err(PipelineError::new(
                    run.stage,
                    Some(index),
                    ParallaxError::Cancelled,
                ));
            }
            let Some(pair) = stream.next() else {
                break;
            };
            let at = |stage| move |e: ParallaxError| PipelineError::new(stage, Some(index), e);
            let (frame, depth) = pair.map_err(at(depth_stage))?;

            if index == 0 {
                if sinks.stereo.is_some() {
                    run.advance(Synthesizing, "Synthesizing stereo frames");
                } else {
                    run.advance(Encoding, "Encoding depth video");
                }
            }

            if let Some(sink) = sinks.depth.as_mut() {
                sink.push(&depth.to_visual_frame()).map_err(at(Encoding))?;
            }
            if let Some(sink) = sinks.stereo.as_mut() {
                let views = synthesize(&frame, &depth, &config.stereo).map_err(at(Synthesizing))?;
                let sbs = composite(&views.left, &views.right, &config.separator)
                    .map_err(at(Synthesizing))?;
                sink.push(&sbs).map_err(at(Encoding))?;
            }

            debug!(frame = index, "Frame written");
            index += 1;
            run.frame = index;
            run.emit(format!("Frame {index}/{}", run.total));
        }

        if index == 0 {
            return Err(PipelineError::new(
                Decoding,
                None,
                ParallaxError::unreadable(&config.input_video, "decoded zero frames"),
            ));
        }
        if index != run.total {
            warn!(decoded = index, expected = run.total, "Decoded frame count differs from probe");
        }
        Ok((index, stream.stats()))
    }
}

/// Stage bookkeeping and the progress callback for one run.
struct Run<F> {
    stage: PipelineStage,
    frame: u64,
    total: u64,
    progress: F,
}

impl<F: FnMut(&PipelineProgress)> Run<F> {
    fn advance(&mut self, next: PipelineStage, message: impl Into<String>) {
        debug_assert!(
            self.stage.can_advance_to(next),
            "invalid transition {:?} -> {:?}",
            self.stage,
            next
        );
        info!(from = %self.stage, to = %next, "Stage transition");
        self.stage = next;
        self.emit(message);
    }

    fn emit(&mut self, message: impl Into<String>) {
        (self.progress)(&PipelineProgress {
            stage: self.stage,
            frame: self.frame,
            total_frames: self.total,
            message: message.into(),
        });
    }
}

#[derive(Default)]
struct Sinks {
    stereo: Option<Box<dyn VideoSink>>,
    depth: Option<Box<dyn VideoSink>>,
}

impl Sinks {
    /// Finish every open sink, returning the first failure.
    fn finish(&mut self) -> parallax_core::Result<()> {
        let mut first_err = None;
        for sink in [self.stereo.as_mut(), self.depth.as_mut()]
            .into_iter()
            .flatten()
        {
            if let Err(e) = sink.finish() {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parallax_core::{Frame, FrameRate, Rgb};
    use parallax_depth::{DepthEstimator, HeuristicDepthEstimator};
    use parallax_media::{MemoryBackend, MemoryVideo};
    use std::path::Path;

    fn context() -> Arc<DepthContext> {
        Arc::new(DepthContext::with_factory(|_| {
            Ok(Arc::new(HeuristicDepthEstimator::default()) as Arc<dyn DepthEstimator>)
        }))
    }

    fn setup(frames: usize, has_audio: bool) -> (tempfile::TempDir, MemoryBackend, ConvertConfig) {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("clip.mp4");
        let backend = MemoryBackend::new();
        backend.insert(
            &input,
            MemoryVideo {
                frames: (0..frames)
                    .map(|i| {
                        let mut f = Frame::test_pattern(32, 16);
                        f.set_pixel(0, 0, Rgb([i as u8, 0, 0]));
                        f
                    })
                    .collect(),
                frame_rate: FrameRate::FPS_25,
                has_audio,
            },
        );
        let mut config = ConvertConfig::new(&input, dir.path().join("out"));
        config.use_cache = false;
        config.depth_workers = 2;
        (dir, backend, config)
    }

    fn pipeline(backend: &MemoryBackend, config: ConvertConfig) -> Pipeline {
        Pipeline::new(config, Arc::new(backend.clone()), context())
    }

    #[test]
    fn test_stereo_run_without_audio_copies_silent_video() {
        let (_dir, backend, config) = setup(4, false);
        let paths = config.output_paths();
        let report = pipeline(&backend, config).run(|_| {}).unwrap();

        assert_eq!(report.frames, 4);
        assert_eq!(report.depth_computed, 4);
        assert!(!report.audio_muxed);
        assert!(backend.muxes().is_empty());
        let out = backend.output(&paths.output).unwrap();
        assert_eq!(out.frames.len(), 4);
        assert!(out.frames.iter().all(|f| f.width == 64 && f.height == 16));
        assert!(backend.output(&paths.silent).unwrap().finished);
        assert_eq!(report.silent_output, Some(paths.silent));
    }

    #[test]
    fn test_audio_is_muxed_and_intermediate_removed() {
        let (_dir, backend, mut config) = setup(2, true);
        config.remove_intermediate = true;
        config.save_depth = true;
        let paths = config.output_paths();
        let report = pipeline(&backend, config.clone()).run(|_| {}).unwrap();

        assert!(report.audio_muxed);
        assert_eq!(
            backend.muxes(),
            vec![(config.input_video.clone(), paths.silent.clone(), paths.output.clone())]
        );
        assert!(backend.output(&paths.silent).is_none());
        assert_eq!(report.silent_output, None);
        assert_eq!(backend.output(&paths.depth).unwrap().frames.len(), 2);
    }

    #[test]
    fn test_depth_only_skips_stereo_and_mux() {
        let (_dir, backend, mut config) = setup(3, true);
        config.save_depth_only = true;
        let paths = config.output_paths();
        let mut stages = Vec::new();
        let report = pipeline(&backend, config)
            .run(|p| {
                if stages.last() != Some(&p.stage) {
                    stages.push(p.stage);
                }
            })
            .unwrap();

        assert_eq!(report.output, None);
        assert!(backend.muxes().is_empty());
        assert!(backend.output(&paths.silent).is_none());
        let depth = backend.output(&paths.depth).unwrap();
        assert_eq!(depth.frames.len(), 3);
        assert_eq!(depth.frames[0].dims(), (32, 16));
        use PipelineStage::*;
        assert_eq!(stages, vec![Initializing, Decoding, EstimatingDepth, Encoding, Done]);
    }

    #[test]
    fn test_progress_walks_the_stages_in_order() {
        let (_dir, backend, config) = setup(3, true);
        let mut seen = Vec::new();
        pipeline(&backend, config).run(|p| seen.push(p.clone())).unwrap();

        let mut stages: Vec<_> = seen.iter().map(|p| p.stage).collect();
        stages.dedup();
        use PipelineStage::*;
        assert_eq!(
            stages,
            vec![Initializing, Decoding, EstimatingDepth, Synthesizing, Encoding, Muxing, Done]
        );
        let frames: Vec<_> = seen
            .iter()
            .filter(|p| p.stage == Synthesizing)
            .map(|p| p.frame)
            .collect();
        assert_eq!(frames, vec![0, 1, 2, 3]);
        let last = seen.last().unwrap();
        assert_eq!(last.fraction(), 1.0);
    }

    #[test]
    fn test_invalid_settings_fail_before_opening_source() {
        let (_dir, backend, mut config) = setup(2, false);
        config.depth_bits = 10;
        let input = config.input_video.clone();
        let mut last = None;
        let err = pipeline(&backend, config).run(|p| last = Some(p.stage)).unwrap_err();

        assert_eq!(err.stage, PipelineStage::Initializing);
        assert!(matches!(err.source, ParallaxError::InvalidParameter(_)));
        assert_eq!(backend.open_count(&input), 0);
        assert_eq!(last, Some(PipelineStage::Failed));
    }

    #[test]
    fn test_missing_source_is_unreadable() {
        let (dir, backend, _) = setup(1, false);
        let config = ConvertConfig::new(dir.path().join("nope.mp4"), dir.path().join("out"));
        let err = pipeline(&backend, config).run(|_| {}).unwrap_err();
        assert_eq!(err.stage, PipelineStage::Decoding);
        assert!(matches!(err.source, ParallaxError::SourceUnreadable { .. }));
    }

    #[test]
    fn test_encoder_failure_reports_frame_and_keeps_partial_output() {
        let (_dir, backend, config) = setup(5, false);
        let paths = config.output_paths();
        backend.fail_sinks_after(2);
        let err = pipeline(&backend, config).run(|_| {}).unwrap_err();

        assert_eq!(err.stage, PipelineStage::Encoding);
        assert_eq!(err.frame, Some(2));
        assert!(matches!(err.source, ParallaxError::EncoderFailure(_)));
        let partial = backend.output(&paths.silent).unwrap();
        assert_eq!(partial.frames.len(), 2);
        assert!(partial.finished);
    }

    #[test]
    fn test_mux_failure_keeps_silent_video() {
        let (_dir, backend, config) = setup(2, true);
        let paths = config.output_paths();
        backend.fail_mux();
        let err = pipeline(&backend, config).run(|_| {}).unwrap_err();

        assert_eq!(err.stage, PipelineStage::Muxing);
        assert!(matches!(err.source, ParallaxError::MuxFailure(_)));
        assert_eq!(backend.output(&paths.silent).unwrap().frames.len(), 2);
        assert!(backend.output(&paths.output).is_none());
    }

    #[test]
    fn test_cancel_stops_between_frames() {
        let (_dir, backend, mut config) = setup(6, false);
        config.depth_workers = 1;
        let paths = config.output_paths();
        let pipeline = pipeline(&backend, config);
        let token = pipeline.cancel_token();
        let err = pipeline
            .run(|p| {
                if p.frame == 2 {
                    token.cancel();
                }
            })
            .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(err.frame, Some(2));
        assert_eq!(backend.output(&paths.silent).unwrap().frames.len(), 2);
        assert!(backend.output(&paths.output).is_none());
    }

    #[test]
    fn test_cache_lock_held_elsewhere_is_fatal() {
        let (_dir, backend, mut config) = setup(2, false);
        config.use_cache = true;
        std::fs::write(&config.input_video, b"source bytes").unwrap();
        let key = CacheKey::new(
            config.cache_variant(),
            content_key(&config.input_video).unwrap(),
        );
        let _held = DepthCache::new(config.cache_dir()).open(&key).unwrap();

        let err = pipeline(&backend, config).run(|_| {}).unwrap_err();
        assert!(matches!(err.source, ParallaxError::CacheBusy(_)));
    }

    #[test]
    fn test_unhashable_input_runs_without_cache() {
        let (_dir, backend, mut config) = setup(2, false);
        config.use_cache = true;
        let report = pipeline(&backend, config).run(|_| {}).unwrap();
        assert_eq!(report.cache_file, None);
        assert_eq!(report.depth_computed, 2);
    }

    #[test]
    fn test_frame_dims_reach_sink_spec() {
        let (_dir, backend, mut config) = setup(1, false);
        config.separator.width = 3;
        let paths = config.output_paths();
        pipeline(&backend, config).run(|_| {}).unwrap();
        let spec = backend.output(Path::new(&paths.silent)).unwrap().spec.unwrap();
        assert_eq!((spec.width, spec.height), (67, 16));
        assert_eq!(spec.frame_rate, FrameRate::FPS_25);
    }
}
