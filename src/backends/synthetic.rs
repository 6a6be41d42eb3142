// SPDX-License-Identifier: GPL-3.0-only

//! Synthetic frame source
//!
//! Produces a deterministic moving gradient in any supported pixel format and
//! honours all three buffering strategies. Used for dry runs without a camera
//! and by the test-suite, which can inject transient dequeue failures, stalls,
//! short buffer grants and mapping failures.

use std::cell::Cell;
use std::collections::VecDeque;
use std::io;
use std::rc::Rc;
use std::time::Duration;

use tracing::debug;

use super::types::*;
use super::FrameSource;
use crate::errors::{PipelineError, PipelineResult};
use crate::pipelines::BufferStrategy;

/// Heap region standing in for device memory
struct SyntheticRegion {
    data: Box<[u8]>,
    unmaps: Rc<Cell<usize>>,
}

impl MappedMemory for SyntheticRegion {
    fn as_slice(&self) -> &[u8] {
        &self.data
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl Drop for SyntheticRegion {
    fn drop(&mut self) {
        self.unmaps.set(self.unmaps.get() + 1);
    }
}

/// Deterministic in-process frame source
pub struct SyntheticSource {
    format: ActualFormat,
    strategy: Option<BufferStrategy>,
    granted: usize,
    /// Filled buffers in fill order
    queue: VecDeque<usize>,
    /// Buffers currently held by the source
    queued: Vec<bool>,
    frames_produced: u64,
    dequeue_attempts: u64,
    streaming: bool,
    // Fault injection
    max_buffers: u32,
    transient_every: Option<u64>,
    stall_after: Option<u64>,
    fail_map_index: Option<usize>,
    unmaps: Rc<Cell<usize>>,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32, pixel_format: PixelFormat) -> Self {
        Self {
            format: ActualFormat::packed(width, height, pixel_format),
            strategy: None,
            granted: 0,
            queue: VecDeque::new(),
            queued: Vec::new(),
            frames_produced: 0,
            dequeue_attempts: 0,
            streaming: false,
            max_buffers: u32::MAX,
            transient_every: None,
            stall_after: None,
            fail_map_index: None,
            unmaps: Rc::new(Cell::new(0)),
        }
    }

    /// Grant at most `max` buffers on request
    pub fn with_max_buffers(mut self, max: u32) -> Self {
        self.max_buffers = max;
        self
    }

    /// Make every `n`-th dequeue (or read) fail with `WouldBlock`
    pub fn with_transient_every(mut self, n: u64) -> Self {
        self.transient_every = Some(n.max(1));
        self
    }

    /// Stop delivering frames after `frames` have been produced
    pub fn with_stall_after(mut self, frames: u64) -> Self {
        self.stall_after = Some(frames);
        self
    }

    /// Fail the mapping of buffer `index`
    pub fn with_failing_map(mut self, index: usize) -> Self {
        self.fail_map_index = Some(index);
        self
    }

    /// Counter incremented each time a mapped region is released
    pub fn unmap_counter(&self) -> Rc<Cell<usize>> {
        Rc::clone(&self.unmaps)
    }

    /// Frames handed out so far
    pub fn frames_produced(&self) -> u64 {
        self.frames_produced
    }

    fn stalled(&self) -> bool {
        self.stall_after
            .is_some_and(|limit| self.frames_produced >= limit)
    }

    fn inject_transient(&mut self) -> io::Result<()> {
        self.dequeue_attempts += 1;
        match self.transient_every {
            Some(n) if self.dequeue_attempts % n == 0 => Err(io::Error::new(
                io::ErrorKind::WouldBlock,
                "Resource temporarily unavailable",
            )),
            _ => Ok(()),
        }
    }

    /// Paint frame number `sequence` into `memory`, returning bytes written
    fn paint(&self, memory: &mut [u8], sequence: u64) -> usize {
        let size = self.format.payload_size().min(memory.len());
        let width = self.format.width as usize;
        let shift = (sequence % 256) as usize;
        let frame = &mut memory[..size];

        match self.format.pixel_format {
            PixelFormat::PackedLuma422 => {
                for (pair, chunk) in frame.chunks_exact_mut(4).enumerate() {
                    let x = (pair * 2) % width.max(1);
                    chunk[0] = luma_ramp(x + shift);
                    chunk[1] = 128;
                    chunk[2] = luma_ramp(x + 1 + shift);
                    chunk[3] = 128;
                }
            }
            PixelFormat::PackedRgb24 => {
                for (i, px) in frame.chunks_exact_mut(3).enumerate() {
                    let x = i % width.max(1);
                    px[0] = ((x + shift) % 256) as u8;
                    px[1] = ((i / width.max(1)) % 256) as u8;
                    px[2] = (255 - (x + shift) % 256) as u8;
                }
            }
            PixelFormat::PlanarLuma8 => {
                for (i, px) in frame.iter_mut().enumerate() {
                    *px = ((i % width.max(1) + shift) % 256) as u8;
                }
            }
        }
        size
    }
}

/// Video-range luma ramp (16..=235)
fn luma_ramp(x: usize) -> u8 {
    (16 + x % 220) as u8
}

impl FrameSource for SyntheticSource {
    fn negotiate(
        &mut self,
        width: u32,
        height: u32,
        pixel_format: PixelFormat,
        force: bool,
    ) -> PipelineResult<ActualFormat> {
        if force {
            self.format = ActualFormat::packed(width, height, pixel_format);
        }
        Ok(self.format)
    }

    fn request_buffers(&mut self, strategy: BufferStrategy, count: u32) -> PipelineResult<u32> {
        if strategy == BufferStrategy::DirectCopy {
            return Err(PipelineError::Lifecycle(
                "read i/o does not use source buffers".to_string(),
            ));
        }
        let granted = count.min(self.max_buffers);
        self.strategy = Some(strategy);
        self.granted = granted as usize;
        self.queued = vec![false; self.granted];
        debug!(requested = count, granted, "Synthetic buffers granted");
        Ok(granted)
    }

    fn map_buffer(&mut self, index: usize) -> PipelineResult<Box<dyn MappedMemory>> {
        if self.strategy != Some(BufferStrategy::SourceMapped) || index >= self.granted {
            return Err(PipelineError::Allocation(format!(
                "buffer {} is not a mappable source buffer",
                index
            )));
        }
        if self.fail_map_index == Some(index) {
            return Err(PipelineError::Allocation(format!(
                "mmap of buffer {} failed: injected",
                index
            )));
        }
        Ok(Box::new(SyntheticRegion {
            data: vec![0u8; self.format.size_image].into_boxed_slice(),
            unmaps: Rc::clone(&self.unmaps),
        }))
    }

    fn start(&mut self) -> PipelineResult<()> {
        self.streaming = true;
        Ok(())
    }

    fn wait_ready(&mut self, _timeout: Duration) -> PipelineResult<Readiness> {
        if self.stalled() {
            return Ok(Readiness::TimedOut);
        }
        let ready = match self.strategy {
            None => self.streaming,
            Some(_) => !self.queue.is_empty(),
        };
        Ok(if ready {
            Readiness::Ready
        } else {
            Readiness::TimedOut
        })
    }

    fn dequeue(&mut self) -> io::Result<Dequeued> {
        self.inject_transient()?;
        let index = self.queue.pop_front().ok_or_else(|| {
            io::Error::new(io::ErrorKind::WouldBlock, "Resource temporarily unavailable")
        })?;
        self.queued[index] = false;
        self.frames_produced += 1;
        Ok(Dequeued {
            index,
            bytes_used: self.format.payload_size(),
        })
    }

    fn enqueue(&mut self, index: usize, memory: &mut [u8]) -> PipelineResult<()> {
        if index >= self.granted {
            return Err(PipelineError::Lifecycle(format!(
                "buffer {} was never granted",
                index
            )));
        }
        if self.queued[index] {
            return Err(PipelineError::io(
                "VIDIOC_QBUF",
                io::Error::new(io::ErrorKind::InvalidInput, "buffer already queued"),
            ));
        }
        // The frame a buffer will carry is decided by its position in the queue
        let sequence = self.frames_produced + self.queue.len() as u64;
        self.paint(memory, sequence);
        self.queued[index] = true;
        self.queue.push_back(index);
        Ok(())
    }

    fn read_into(&mut self, memory: &mut [u8]) -> io::Result<usize> {
        self.inject_transient()?;
        let written = self.paint(memory, self.frames_produced);
        self.frames_produced += 1;
        Ok(written)
    }

    fn stop(&mut self) -> PipelineResult<()> {
        self.streaming = false;
        self.queue.clear();
        self.queued.iter_mut().for_each(|q| *q = false);
        Ok(())
    }

    fn name(&self) -> &str {
        "synthetic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enqueue_then_dequeue_in_order() {
        let mut source = SyntheticSource::new(4, 2, PixelFormat::PackedLuma422);
        assert_eq!(source.request_buffers(BufferStrategy::AppAllocated, 3).unwrap(), 3);
        let mut a = vec![0u8; 16];
        let mut b = vec![0u8; 16];
        source.enqueue(1, &mut a).unwrap();
        source.enqueue(0, &mut b).unwrap();
        source.start().unwrap();

        assert_eq!(source.wait_ready(Duration::ZERO).unwrap(), Readiness::Ready);
        assert_eq!(source.dequeue().unwrap().index, 1);
        assert_eq!(source.dequeue().unwrap().index, 0);
        assert_eq!(
            source.dequeue().unwrap_err().kind(),
            io::ErrorKind::WouldBlock
        );
        // Painted YUYV has neutral chroma
        assert_eq!(a[1], 128);
        assert_eq!(a[3], 128);
    }

    #[test]
    fn test_double_enqueue_rejected() {
        let mut source = SyntheticSource::new(2, 1, PixelFormat::PackedLuma422);
        source.request_buffers(BufferStrategy::AppAllocated, 2).unwrap();
        let mut mem = vec![0u8; 4];
        source.enqueue(0, &mut mem).unwrap();
        assert!(source.enqueue(0, &mut mem).is_err());
    }

    #[test]
    fn test_stall_times_out() {
        let mut source = SyntheticSource::new(2, 1, PixelFormat::PlanarLuma8).with_stall_after(0);
        source.start().unwrap();
        assert_eq!(
            source.wait_ready(Duration::from_millis(1)).unwrap(),
            Readiness::TimedOut
        );
    }

    #[test]
    fn test_mapped_regions_count_unmaps() {
        let mut source = SyntheticSource::new(2, 1, PixelFormat::PackedRgb24);
        source.request_buffers(BufferStrategy::SourceMapped, 2).unwrap();
        let counter = source.unmap_counter();
        let region = source.map_buffer(0).unwrap();
        assert_eq!(region.as_slice().len(), 6);
        drop(region);
        assert_eq!(counter.get(), 1);
    }
}
