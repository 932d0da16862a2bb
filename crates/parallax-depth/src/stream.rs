//! Lockstep (frame, depth map) pairing.
//!
//! [`DepthStream`] pulls frames from a [`FrameSource`] and yields each one
//! together with the depth map for the same decode index. Depth comes from
//! the cache while it has records, then from the estimator (appending to the
//! cache), or from an external depth video.

use crate::cache::{CacheEntry, CacheStatus};
use crate::error::DepthError;
use crate::estimator::DepthEstimator;
use crate::normalize::{DepthNormalizer, NormalizationMode};
use crate::pool::EstimatorPool;
use parallax_core::{ensure_same_dims, DepthMap, Frame, ParallaxError, Result};
use parallax_media::{FrameSource, SourceInfo};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Where depth maps were obtained from, by count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DepthStats {
    pub from_cache: u64,
    pub computed: u64,
    pub external: u64,
}

/// Estimator-side state for [`DepthStream::estimated`].
pub struct Estimation {
    pub estimator: Arc<dyn DepthEstimator>,
    pub normalizer: DepthNormalizer,
    pub pool: EstimatorPool,
}

enum Producer {
    Estimate {
        estimation: Estimation,
        cache: Option<CacheEntry>,
        reading_cache: bool,
    },
    External {
        depth: Box<dyn FrameSource>,
    },
}

pub struct DepthStream {
    frames: Box<dyn FrameSource>,
    producer: Producer,
    pending: VecDeque<(Frame, DepthMap)>,
    carry: Option<Frame>,
    pulled: u64,
    stats: DepthStats,
    done: bool,
}

impl DepthStream {
    /// Pair frames with estimated depth, reusing and extending `cache`.
    pub fn estimated(
        frames: Box<dyn FrameSource>,
        estimation: Estimation,
        mut cache: Option<CacheEntry>,
    ) -> Result<Self> {
        if let Some(entry) = cache.as_mut() {
            // A running range cannot be rebuilt from a quantized prefix.
            if estimation.normalizer.mode() == NormalizationMode::Running
                && matches!(entry.status(), CacheStatus::Partial(_))
            {
                info!("Running normalization cannot resume a partial cache, recomputing");
                entry.truncate_from(0)?;
            }
        }
        let reading_cache = cache.as_ref().is_some_and(|c| c.records() > 0);
        Ok(Self::new(
            frames,
            Producer::Estimate {
                estimation,
                cache,
                reading_cache,
            },
        ))
    }

    /// Pair frames with the luma of an external depth video.
    pub fn external(frames: Box<dyn FrameSource>, depth: Box<dyn FrameSource>) -> Result<Self> {
        ensure_same_dims(
            "external depth video",
            None,
            (frames.info().width, frames.info().height),
            (depth.info().width, depth.info().height),
        )?;
        Ok(Self::new(frames, Producer::External { depth }))
    }

    fn new(frames: Box<dyn FrameSource>, producer: Producer) -> Self {
        Self {
            frames,
            producer,
            pending: VecDeque::new(),
            carry: None,
            pulled: 0,
            stats: DepthStats::default(),
            done: false,
        }
    }

    pub fn info(&self) -> &SourceInfo {
        self.frames.info()
    }

    pub fn stats(&self) -> DepthStats {
        self.stats
    }

    /// Cache state found on open, when a cache is in use.
    pub fn cache_status(&self) -> Option<CacheStatus> {
        match &self.producer {
            Producer::Estimate {
                cache: Some(entry), ..
            } => Some(entry.status()),
            _ => None,
        }
    }

    /// Path of the cache file in use.
    pub fn cache_path(&self) -> Option<PathBuf> {
        match &self.producer {
            Producer::Estimate {
                cache: Some(entry), ..
            } => Some(entry.path().to_path_buf()),
            _ => None,
        }
    }

    fn next_pair(&mut self) -> Result<Option<(Frame, DepthMap)>> {
        if let Some(pair) = self.pending.pop_front() {
            return Ok(Some(pair));
        }
        if self.done {
            return Ok(None);
        }

        let frame = match self.carry.take() {
            Some(frame) => Some(frame),
            None => pull(&mut self.frames, &mut self.pulled)?,
        };
        let Some(frame) = frame else {
            self.finish()?;
            return Ok(None);
        };
        let index = self.pulled - 1;

        match &mut self.producer {
            Producer::External { depth } => {
                let depth_frame = depth.next().transpose()?.ok_or_else(|| {
                    ParallaxError::DimensionMismatch {
                        what: "external depth video ended",
                        index: Some(index),
                        expected: frame.dims().into(),
                        actual: (0, 0).into(),
                    }
                })?;
                ensure_same_dims(
                    "external depth frame",
                    Some(index),
                    frame.dims(),
                    depth_frame.dims(),
                )?;
                self.stats.external += 1;
                Ok(Some((frame, DepthMap::from_frame_luma(&depth_frame))))
            }
            Producer::Estimate {
                estimation,
                cache,
                reading_cache,
            } => {
                if *reading_cache {
                    if let Some(entry) = cache.as_mut() {
                        match read_cached(entry, &frame, estimation, index) {
                            Ok(Some(map)) => {
                                self.stats.from_cache += 1;
                                debug!(frame = index, "Depth loaded from cache");
                                return Ok(Some((frame, map)));
                            }
                            Ok(None) => {
                                info!(frame = index, "Cached depth exhausted, estimating the rest");
                            }
                            Err(e) => {
                                warn!(frame = index, error = %e, "Unreadable cached depth, recomputing from here");
                                entry.truncate_from(index)?;
                            }
                        }
                    }
                    *reading_cache = false;
                }

                let mut batch = vec![frame];
                while batch.len() < estimation.pool.workers() {
                    match pull(&mut self.frames, &mut self.pulled)? {
                        Some(f) => batch.push(f),
                        None => break,
                    }
                }
                let raws = estimation
                    .pool
                    .predict_batch(estimation.estimator.as_ref(), &batch);
                for (offset, (frame, raw)) in batch.into_iter().zip(raws).enumerate() {
                    let i = index + offset as u64;
                    let raw = raw.map_err(ParallaxError::from)?;
                    ensure_same_dims("frame/depth", Some(i), frame.dims(), raw.dims())?;
                    let map = estimation.normalizer.normalize(&raw)?;
                    if let Some(entry) = cache.as_mut() {
                        entry.append(&map)?;
                    }
                    self.stats.computed += 1;
                    debug!(frame = i, "Depth estimated");
                    self.pending.push_back((frame, map));
                }
                Ok(self.pending.pop_front())
            }
        }
    }

    /// Source exhausted: reconcile and seal the cache.
    fn finish(&mut self) -> Result<()> {
        self.done = true;
        match &mut self.producer {
            Producer::Estimate {
                cache: Some(entry), ..
            } => {
                if entry.read_index() < entry.records() {
                    warn!(
                        frames = self.pulled,
                        cached = entry.records(),
                        "Cache holds more depth maps than the source has frames"
                    );
                    entry.truncate_from(entry.read_index())?;
                }
                if entry.records() > 0 {
                    entry.seal()?;
                } else {
                    debug!("No depth records written, leaving cache unsealed");
                }
            }
            Producer::External { depth } => {
                if depth.next().is_some() {
                    warn!(frames = self.pulled, "External depth video is longer than the source");
                }
            }
            Producer::Estimate { cache: None, .. } => {}
        }
        info!(frames = self.pulled, stats = ?self.stats, "Depth stream finished");
        Ok(())
    }
}

impl Iterator for DepthStream {
    type Item = Result<(Frame, DepthMap)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_pair() {
            Ok(pair) => pair.map(Ok),
            Err(e) => {
                self.done = true;
                self.pending.clear();
                Some(Err(e))
            }
        }
    }
}

fn pull(frames: &mut Box<dyn FrameSource>, pulled: &mut u64) -> Result<Option<Frame>> {
    let Some(frame) = frames.next().transpose()? else {
        return Ok(None);
    };
    let info = frames.info();
    ensure_same_dims(
        "decoded frame",
        Some(*pulled),
        (info.width, info.height),
        frame.dims(),
    )?;
    *pulled += 1;
    Ok(Some(frame))
}

/// Next cached map, validated against the frame it will be paired with.
fn read_cached(
    entry: &mut CacheEntry,
    frame: &Frame,
    estimation: &Estimation,
    index: u64,
) -> std::result::Result<Option<DepthMap>, DepthError> {
    let Some(map) = entry.next_cached()? else {
        return Ok(None);
    };
    if map.dims() != frame.dims() || map.bit_depth != estimation.normalizer.bit_depth() {
        return Err(DepthError::corrupt(
            entry.path(),
            format!(
                "record {index} is {}x{} at {} bits, frame is {}x{}",
                map.width,
                map.height,
                map.bit_depth.bits(),
                frame.width,
                frame.height
            ),
        ));
    }
    Ok(Some(map))
}
