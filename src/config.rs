// SPDX-License-Identifier: GPL-3.0-only

use crate::backends::PixelFormat;
use crate::constants::*;
use crate::errors::{PipelineError, PipelineResult};
use crate::media::HeaderStyle;
use crate::pipelines::BufferStrategy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Settings of one capture run, fixed once the run starts
///
/// Missing fields in a JSON file take their defaults, so a config file only
/// needs to name what it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Capture device node
    pub device: PathBuf,
    /// Requested frame width
    pub width: u32,
    /// Requested frame height
    pub height: u32,
    /// Requested pixel layout
    pub pixel_format: PixelFormat,
    /// Apply the requested format instead of keeping the device's current one
    pub force_format: bool,
    /// Output channels: 3 writes RGB pixmaps, 1 writes greymaps
    pub channels: u8,
    /// How frame memory is shared with the source
    pub strategy: BufferStrategy,
    /// Buffers to request (strategy default when unset)
    pub buffer_count: Option<u32>,
    /// Frames to acquire in total, warm-up included
    pub frame_budget: u32,
    /// Leading frames excluded from statistics and not written
    pub warmup_frames: u32,
    /// Brightness gain
    pub alpha: f64,
    /// Brightness bias
    pub beta: u8,
    pub output_dir: PathBuf,
    pub file_prefix: String,
    /// Zero padding of the frame tag
    pub tag_digits: usize,
    pub header_style: HeaderStyle,
    /// Longest wait for a frame before the run fails
    pub ready_timeout_ms: u64,
    /// Pause after each processed frame
    pub frame_delay_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            device: PathBuf::from(DEFAULT_DEVICE),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            pixel_format: PixelFormat::default(),
            force_format: false,
            channels: 3,
            strategy: BufferStrategy::default(),
            buffer_count: None,
            frame_budget: DEFAULT_FRAME_BUDGET,
            warmup_frames: DEFAULT_WARMUP_FRAMES,
            alpha: DEFAULT_ALPHA,
            beta: DEFAULT_BETA,
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            file_prefix: DEFAULT_FILE_PREFIX.to_string(),
            tag_digits: DEFAULT_TAG_DIGITS,
            header_style: HeaderStyle::default(),
            ready_timeout_ms: DEFAULT_READY_TIMEOUT.as_millis() as u64,
            frame_delay_ms: 0,
        }
    }
}

impl PipelineConfig {
    /// Load a configuration from a JSON file
    pub fn load(path: &Path) -> PipelineResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| PipelineError::storage(path, e))?;
        let config: Self = serde_json::from_str(&text)?;
        Ok(config)
    }

    /// Buffers to request from the source
    pub fn buffer_count(&self) -> u32 {
        match self.strategy {
            BufferStrategy::DirectCopy => 1,
            _ => self
                .buffer_count
                .unwrap_or_else(|| self.strategy.default_buffer_count()),
        }
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn frame_delay(&self) -> Option<Duration> {
        (self.frame_delay_ms > 0).then(|| Duration::from_millis(self.frame_delay_ms))
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> PipelineResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(PipelineError::Config(format!(
                "frame size {}x{} is empty",
                self.width, self.height
            )));
        }
        if self.pixel_format == PixelFormat::PackedLuma422 && self.width % 2 != 0 {
            return Err(PipelineError::Config(format!(
                "YUYV needs an even width, got {}",
                self.width
            )));
        }
        if self.channels != 1 && self.channels != 3 {
            return Err(PipelineError::Config(format!(
                "channels must be 1 or 3, got {}",
                self.channels
            )));
        }
        check_output_combination(self.pixel_format, self.channels)?;
        if !TAG_DIGITS_RANGE.contains(&self.tag_digits) {
            return Err(PipelineError::Config(format!(
                "tag digits must be within {}..={}, got {}",
                TAG_DIGITS_RANGE.start(),
                TAG_DIGITS_RANGE.end(),
                self.tag_digits
            )));
        }
        if !self.alpha.is_finite() || self.alpha < 0.0 {
            return Err(PipelineError::Config(format!(
                "alpha must be a non-negative number, got {}",
                self.alpha
            )));
        }
        if self.strategy.is_streaming() && self.buffer_count() < MIN_STREAMING_BUFFERS {
            return Err(PipelineError::Config(format!(
                "{} streaming needs at least {} buffers, got {}",
                self.strategy,
                MIN_STREAMING_BUFFERS,
                self.buffer_count()
            )));
        }
        if self.frame_budget == 0 {
            return Err(PipelineError::Config("frame budget is zero".to_string()));
        }
        if self.ready_timeout_ms == 0 {
            return Err(PipelineError::Config("ready timeout is zero".to_string()));
        }
        if self.file_prefix.contains(std::path::MAIN_SEPARATOR) {
            return Err(PipelineError::Config(format!(
                "file prefix '{}' contains a path separator",
                self.file_prefix
            )));
        }
        Ok(())
    }
}

/// RGB frames cannot be written as greymaps without a luma conversion the
/// pipeline does not perform
pub fn check_output_combination(pixel_format: PixelFormat, channels: u8) -> PipelineResult<()> {
    if pixel_format == PixelFormat::PackedRgb24 && channels == 1 {
        return Err(PipelineError::Config(
            "RGB24 input cannot be written with 1 channel".to_string(),
        ));
    }
    Ok(())
}
