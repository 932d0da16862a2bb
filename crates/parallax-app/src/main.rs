//! Parallax - 2D to side-by-side stereo video converter
//!
//! ```bash
//! parallax -i holiday.mp4 -o out/
//! parallax -i holiday.mp4 -o out/ -m small --save-depth --separator-width 8
//! parallax -c settings.json --input-depth-map holiday_depth.mp4
//! ```

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use cli::Cli;
use parallax_depth::{DepthContext, ModelManager};
use parallax_media::FfmpegBackend;
use parallax_pipeline::{Pipeline, PipelineStage};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over -v
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    let config = cli.to_config()?;
    if cli.print_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }
    config.validate().context("Invalid settings")?;

    info!(
        input = %config.input_video.display(),
        output_dir = %config.output_dir.display(),
        model = %config.depth_model,
        "Parallax starting"
    );

    let backend = FfmpegBackend::new().context("FFmpeg is required")?;
    let depth = Arc::new(DepthContext::new(ModelManager::new(config.model_dir())));
    let pipeline = Pipeline::new(config, Arc::new(backend), Arc::clone(&depth));

    let started = Instant::now();
    let mut last_stage = None;
    let result = pipeline.run(|progress| {
        if last_stage != Some(progress.stage) {
            last_stage = Some(progress.stage);
            info!(stage = %progress.stage, "{}", progress.message);
        } else if progress.stage != PipelineStage::Failed {
            debug!(
                frame = progress.frame,
                total = progress.total_frames,
                percent = %format!("{:.1}", progress.fraction() * 100.0),
                "{}",
                progress.message
            );
        }
    });
    depth.release();

    let report = result?;
    info!(
        frames = report.frames,
        from_cache = report.depth_from_cache,
        computed = report.depth_computed,
        external = report.depth_external,
        elapsed_secs = %format!("{:.1}", started.elapsed().as_secs_f64()),
        "Conversion complete"
    );
    for path in [&report.output, &report.silent_output, &report.depth_output]
        .into_iter()
        .flatten()
    {
        info!(path = %path.display(), "Wrote");
    }
    Ok(())
}
