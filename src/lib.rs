// SPDX-License-Identifier: GPL-3.0-only

//! framepipe - staged frame capture with per-stage frame rate statistics
//!
//! Frames are pulled from a streaming capture source, converted from YUYV to
//! RGB, brightened and written as timestamped PPM files, while each stage's
//! worst-case and average frame rate is tracked.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`backends`]: Frame source abstraction (V4L2 and synthetic)
//! - [`pipelines`]: Buffer pool, acquisition stage and pipeline driver
//! - [`media`]: Color conversion, brightness transform, PPM serialization and file tools
//! - [`stats`]: Per-stage frame rate statistics
//! - [`storage`]: Output file naming
//! - [`config`]: Run configuration
//!
//! # Example
//!
//! ```no_run
//! use framepipe::backends::{PixelFormat, SyntheticSource};
//! use framepipe::config::PipelineConfig;
//!
//! let mut source = SyntheticSource::new(640, 480, PixelFormat::PackedLuma422);
//! let summary = framepipe::pipelines::run(PipelineConfig::default(), &mut source, None)?;
//! println!("{} frames written", summary.frames_written);
//! # Ok::<(), framepipe::errors::PipelineError>(())
//! ```

pub mod backends;
pub mod config;
pub mod constants;
pub mod errors;
pub mod media;
pub mod pipelines;
pub mod stats;
pub mod storage;

// Re-export commonly used types
pub use config::PipelineConfig;
pub use errors::{PipelineError, PipelineResult};
pub use pipelines::{BufferStrategy, RunSummary};
