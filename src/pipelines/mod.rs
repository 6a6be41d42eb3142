// SPDX-License-Identifier: GPL-3.0-only

//! Frame capture pipeline
//!
//! One frame at a time flows through four timed stages:
//!
//! ```text
//! ┌─────────────┐     ┌────────────┐     ┌───────────┐     ┌───────────┐
//! │ Acquisition │ ──▶ │ Conversion │ ──▶ │ Transform │ ──▶ │ Writeback │
//! │ (dequeue)   │     │ YUYV→RGB   │     │ α·x + β   │     │ PPM/PGM   │
//! └──────▲──────┘     └────────────┘     └───────────┘     └─────┬─────┘
//!        │                                                       │
//!        └────────────────────── requeue ◀───────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`buffer_pool`]: buffer arena and ownership state machine
//! - [`acquisition`]: bounded wait, dequeue and requeue
//! - [`driver`]: the frame loop, warm-up and shutdown

pub mod acquisition;
pub mod buffer_pool;
pub mod driver;

pub use acquisition::{AcquireOutcome, Acquisition, FrameRecord};
pub use buffer_pool::{BufferHandle, BufferPool, BufferState, BufferStrategy, FrameBuffer};
pub use driver::{PipelineContext, RunSummary, run};
