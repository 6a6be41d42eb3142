// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands
//!
//! This module provides command-line functionality for:
//! - Capturing frames from a device or the synthetic source
//! - Brightening a saved image
//! - Writing the negative of a saved image

use framepipe::backends::{FrameSource, SyntheticSource, V4l2Source};
use framepipe::config::PipelineConfig;
use framepipe::constants::{DEFAULT_ALPHA, DEFAULT_BETA};
use framepipe::media::tools;
use framepipe::pipelines::{self, RunSummary};
use framepipe::stats::StageId;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, warn};

/// Run a capture with `config`
pub fn capture(config: PipelineConfig, synthetic: bool) -> Result<(), Box<dyn std::error::Error>> {
    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);
    if let Err(e) = ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst)) {
        warn!(error = %e, "Ctrl-C handler not installed, the run can only end on its budget");
    }

    let mut source: Box<dyn FrameSource> = if synthetic {
        Box::new(SyntheticSource::new(
            config.width,
            config.height,
            config.pixel_format,
        ))
    } else {
        let device = config.device.to_string_lossy().into_owned();
        match V4l2Source::open(&device, config.strategy) {
            Ok(source) => Box::new(source),
            Err(e) => {
                error!(device = %device, error = %e, "Cannot open device");
                return Err(e.into());
            }
        }
    };

    let output_dir = config.output_dir.clone();
    let summary = pipelines::run(config, source.as_mut(), Some(stop.as_ref()))?;
    print_summary(&summary);
    println!("Frames saved in {}", output_dir.display());
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!();
    println!(
        "{:<12} {:>8} {:>12} {:>12}",
        "stage", "samples", "worst fps", "average fps"
    );
    for stage in StageId::ALL {
        let stats = summary.stats.stage(stage);
        match (stats.worst_rate, stats.average()) {
            (Some(worst), Some(average)) => println!(
                "{:<12} {:>8} {:>12.2} {:>12.2}",
                stage.to_string(),
                stats.count,
                worst,
                average
            ),
            _ => println!("{:<12} {:>8} {:>12} {:>12}", stage.to_string(), 0, "-", "-"),
        }
    }
    if let Some(fps) = summary.overall_fps() {
        println!(
            "\n{} frames in {:.3}s, {:.2} fps overall",
            summary.frames_acquired.saturating_sub(summary.stats.warmup()),
            summary.measured_elapsed.as_secs_f64(),
            fps
        );
    }
}

/// Apply the brightness transform to an image file
pub fn brighten(
    input: &Path,
    output: &Path,
    alpha: Option<f64>,
    beta: Option<u8>,
) -> Result<(), Box<dyn std::error::Error>> {
    tools::brighten_file(
        input,
        output,
        alpha.unwrap_or(DEFAULT_ALPHA),
        beta.unwrap_or(DEFAULT_BETA),
    )?;
    println!("Brightened image saved: {}", output.display());
    Ok(())
}

/// Write the negative of an image file
pub fn negative(input: &Path, output: &Path) -> Result<(), Box<dyn std::error::Error>> {
    tools::negative_file(input, output)?;
    println!("Negative image saved: {}", output.display());
    Ok(())
}
