// SPDX-License-Identifier: GPL-3.0-only

//! Frame source abstraction
//!
//! The pipeline talks to capture hardware only through [`FrameSource`].
//!
//! ```text
//! ┌─────────────────────┐
//! │   Pipeline Driver   │
//! └──────────┬──────────┘
//!            │
//!            ▼
//! ┌─────────────────────┐
//! │  FrameSource trait  │  ← negotiate / buffers / wait / dequeue / enqueue
//! └──────────┬──────────┘
//!            │
//!       ┌────┴──────┐
//!       ▼           ▼
//!   ┌──────┐   ┌─────────┐
//!   │ V4L2 │   │Synthetic│
//!   └──────┘   └─────────┘
//! ```

pub mod synthetic;
pub mod types;
pub mod v4l2;

pub use synthetic::SyntheticSource;
pub use types::*;
pub use v4l2::V4l2Source;

use crate::errors::PipelineResult;
use crate::pipelines::BufferStrategy;
use std::io;
use std::time::Duration;

/// Capability set of a streaming capture source
///
/// Opening happens in each backend's constructor and closing on drop.
/// Methods that the pipeline must classify as transient or fatal
/// (`dequeue`, `read_into`) return raw [`io::Error`]s; everything else is
/// fatal and already wrapped in a [`crate::errors::PipelineError`].
pub trait FrameSource {
    /// Agree on geometry and pixel layout
    ///
    /// With `force` set the requested values are applied; otherwise the
    /// source's current settings are kept and reported.
    fn negotiate(
        &mut self,
        width: u32,
        height: u32,
        pixel_format: PixelFormat,
        force: bool,
    ) -> PipelineResult<ActualFormat>;

    /// Ask the source for `count` buffers of the given kind
    ///
    /// Returns the number actually granted, which may be lower.
    /// Not called for [`BufferStrategy::DirectCopy`].
    fn request_buffers(&mut self, strategy: BufferStrategy, count: u32) -> PipelineResult<u32>;

    /// Map a source-owned buffer into the process
    fn map_buffer(&mut self, index: usize) -> PipelineResult<Box<dyn MappedMemory>>;

    /// Begin streaming
    fn start(&mut self) -> PipelineResult<()>;

    /// Block until a frame is ready or `timeout` elapses
    fn wait_ready(&mut self, timeout: Duration) -> PipelineResult<Readiness>;

    /// Take the oldest filled buffer from the source
    fn dequeue(&mut self) -> io::Result<Dequeued>;

    /// Hand buffer `index` back to the source for filling
    ///
    /// `memory` is the buffer's storage; user-pointer sources register its
    /// address, mapped sources ignore it.
    fn enqueue(&mut self, index: usize, memory: &mut [u8]) -> PipelineResult<()>;

    /// Copy the next frame into `memory`, returning the byte count
    fn read_into(&mut self, memory: &mut [u8]) -> io::Result<usize>;

    /// Stop streaming; queued buffers return to the application
    fn stop(&mut self) -> PipelineResult<()>;

    /// Short name used in logs
    fn name(&self) -> &str;
}
