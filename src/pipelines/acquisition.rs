// SPDX-License-Identifier: GPL-3.0-only

//! Acquisition stage: wait for the source, take a filled buffer, give it back

use std::io;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::buffer_pool::{BufferHandle, BufferPool, BufferStrategy};
use crate::backends::{Dequeued, FrameSource, Readiness};
use crate::errors::{PipelineError, PipelineResult};

/// Per-frame metadata passed through the processing stages
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameRecord {
    /// Position of the frame in the run, warm-up included
    pub sequence: u64,
    /// Bytes the source filled
    pub bytes_used: usize,
    /// Wall-clock capture time, written into the file header
    pub captured_at: DateTime<Utc>,
}

/// Result of one acquisition attempt
#[derive(Debug)]
pub enum AcquireOutcome {
    /// A frame was claimed; its handle must be released exactly once
    Frame(FrameRecord, BufferHandle),
    /// The source had nothing after all; wait again without consuming a frame
    Retry,
}

/// Whether a dequeue/read failure only means "try again"
pub fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

/// Acquisition stage state
#[derive(Debug, Default)]
pub struct Acquisition {
    next_sequence: u64,
    retries: u64,
}

impl Acquisition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transient failures seen so far
    pub fn retries(&self) -> u64 {
        self.retries
    }

    /// Frames claimed so far
    pub fn acquired(&self) -> u64 {
        self.next_sequence
    }

    /// Wait up to `timeout` for the source and claim the next filled buffer
    ///
    /// A timeout is fatal: the capture rate has stalled.
    pub fn wait_and_acquire(
        &mut self,
        source: &mut dyn FrameSource,
        pool: &mut BufferPool,
        timeout: Duration,
    ) -> PipelineResult<AcquireOutcome> {
        if source.wait_ready(timeout)? == Readiness::TimedOut {
            return Err(PipelineError::Timeout(timeout));
        }

        let filled = match pool.strategy() {
            BufferStrategy::DirectCopy => {
                let memory = pool.source_memory_mut(0)?;
                source.read_into(memory).map(|bytes_used| Dequeued {
                    index: 0,
                    bytes_used,
                })
            }
            BufferStrategy::SourceMapped | BufferStrategy::AppAllocated => source.dequeue(),
        };

        let filled = match filled {
            Ok(filled) => filled,
            Err(e) if is_transient(&e) => {
                self.retries += 1;
                warn!(error = %e, retries = self.retries, "No frame available yet");
                return Ok(AcquireOutcome::Retry);
            }
            Err(e) => {
                let operation = match pool.strategy() {
                    BufferStrategy::DirectCopy => "read",
                    _ => "VIDIOC_DQBUF",
                };
                return Err(PipelineError::io(operation, e));
            }
        };

        pool.mark_ready(filled.index, filled.bytes_used)?;
        let handle = pool.claim(filled.index)?;

        let record = FrameRecord {
            sequence: self.next_sequence,
            bytes_used: filled.bytes_used,
            captured_at: Utc::now(),
        };
        self.next_sequence += 1;

        debug!(
            frame = record.sequence,
            index = handle.index(),
            bytes = record.bytes_used,
            "Acquired frame"
        );
        Ok(AcquireOutcome::Frame(record, handle))
    }

    /// Give a claimed buffer back to the source
    pub fn release(
        &mut self,
        source: &mut dyn FrameSource,
        pool: &mut BufferPool,
        handle: BufferHandle,
    ) -> PipelineResult<()> {
        pool.requeue(handle, source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{ActualFormat, PixelFormat, SyntheticSource};
    use crate::pipelines::BufferState;

    const WAIT: Duration = Duration::from_millis(10);

    fn streaming_setup(source: &mut SyntheticSource, strategy: BufferStrategy) -> BufferPool {
        let format = ActualFormat::packed(4, 2, PixelFormat::PackedLuma422);
        let mut pool = BufferPool::allocate(strategy, &format, 3, source).unwrap();
        pool.register_all(source).unwrap();
        source.start().unwrap();
        pool
    }

    #[test]
    fn test_acquire_and_release_cycle() {
        for strategy in BufferStrategy::ALL {
            let mut source = SyntheticSource::new(4, 2, PixelFormat::PackedLuma422);
            let mut pool = streaming_setup(&mut source, strategy);
            let mut stage = Acquisition::new();

            for expected in 0..10u64 {
                let AcquireOutcome::Frame(record, handle) =
                    stage.wait_and_acquire(&mut source, &mut pool, WAIT).unwrap()
                else {
                    panic!("no transient failures configured");
                };
                assert_eq!(record.sequence, expected);
                assert_eq!(record.bytes_used, 16);
                assert_eq!(pool.frame(&handle).len(), 16);
                stage.release(&mut source, &mut pool, handle).unwrap();
            }
            assert!(pool.states().iter().all(|s| *s == BufferState::SourceOwned));
        }
    }

    #[test]
    fn test_transient_failure_does_not_consume_frame() {
        let mut source =
            SyntheticSource::new(4, 2, PixelFormat::PackedLuma422).with_transient_every(2);
        let mut pool = streaming_setup(&mut source, BufferStrategy::SourceMapped);
        let mut stage = Acquisition::new();

        let first = stage.wait_and_acquire(&mut source, &mut pool, WAIT).unwrap();
        let AcquireOutcome::Frame(record, handle) = first else {
            panic!("first attempt should succeed");
        };
        assert_eq!(record.sequence, 0);
        stage.release(&mut source, &mut pool, handle).unwrap();

        let second = stage.wait_and_acquire(&mut source, &mut pool, WAIT).unwrap();
        assert!(matches!(second, AcquireOutcome::Retry));
        assert_eq!(stage.retries(), 1);
        assert_eq!(stage.acquired(), 1);

        let third = stage.wait_and_acquire(&mut source, &mut pool, WAIT).unwrap();
        let AcquireOutcome::Frame(record, handle) = third else {
            panic!("retry should succeed");
        };
        assert_eq!(record.sequence, 1);
        stage.release(&mut source, &mut pool, handle).unwrap();
    }

    #[test]
    fn test_stall_is_fatal_timeout() {
        let mut source =
            SyntheticSource::new(4, 2, PixelFormat::PackedLuma422).with_stall_after(1);
        let mut pool = streaming_setup(&mut source, BufferStrategy::AppAllocated);
        let mut stage = Acquisition::new();

        let AcquireOutcome::Frame(_, handle) =
            stage.wait_and_acquire(&mut source, &mut pool, WAIT).unwrap()
        else {
            panic!("first frame should arrive");
        };
        stage.release(&mut source, &mut pool, handle).unwrap();

        let err = stage
            .wait_and_acquire(&mut source, &mut pool, WAIT)
            .unwrap_err();
        assert!(matches!(err, PipelineError::Timeout(_)));
    }

    #[test]
    fn test_unreleased_buffers_starve_source() {
        let mut source = SyntheticSource::new(4, 2, PixelFormat::PackedLuma422);
        let mut pool = streaming_setup(&mut source, BufferStrategy::SourceMapped);
        let mut stage = Acquisition::new();

        let mut held = Vec::new();
        for _ in 0..pool.len() {
            match stage.wait_and_acquire(&mut source, &mut pool, WAIT).unwrap() {
                AcquireOutcome::Frame(_, handle) => held.push(handle),
                AcquireOutcome::Retry => panic!("unexpected retry"),
            }
        }
        // Every buffer is application owned, nothing left to fill
        let err = stage
            .wait_and_acquire(&mut source, &mut pool, WAIT)
            .unwrap_err();
        assert!(matches!(err, PipelineError::Timeout(_)));

        for handle in held {
            stage.release(&mut source, &mut pool, handle).unwrap();
        }
    }

    #[test]
    fn test_transient_classification() {
        assert!(is_transient(&io::ErrorKind::WouldBlock.into()));
        assert!(is_transient(&io::ErrorKind::Interrupted.into()));
        assert!(!is_transient(&io::Error::from_raw_os_error(libc::EIO)));
    }
}
