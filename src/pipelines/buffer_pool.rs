// SPDX-License-Identifier: GPL-3.0-only

//! Frame buffer pool and ownership state machine
//!
//! The pool owns every byte of frame memory for the lifetime of a run. Stages
//! never hold buffers directly: the acquisition stage mints a move-only
//! [`BufferHandle`] when a buffer is claimed, and the only way to give it back
//! is [`BufferPool::requeue`], which consumes the handle. Using a buffer twice
//! without returning it therefore does not compile.
//!
//! Each buffer cycles through
//!
//! ```text
//! Free ──register──▶ SourceOwned ──filled──▶ Ready ──claim──▶ AppOwned
//!                        ▲                                        │
//!                        └────────────────requeue─────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::backends::{ActualFormat, FrameSource, MappedMemory, PixelFormat};
use crate::constants::{MIN_STREAMING_BUFFERS, MMAP_BUFFER_COUNT, USERPTR_BUFFER_COUNT};
use crate::errors::{PipelineError, PipelineResult};

/// How frame memory is shared between the source and the application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BufferStrategy {
    /// The source copies each frame into one application buffer (`read()` i/o)
    DirectCopy,
    /// Source-owned buffers mapped into the process (`mmap` streaming)
    #[default]
    SourceMapped,
    /// Application-allocated buffers registered with the source (user pointers)
    AppAllocated,
}

impl BufferStrategy {
    pub const ALL: [BufferStrategy; 3] = [
        BufferStrategy::DirectCopy,
        BufferStrategy::SourceMapped,
        BufferStrategy::AppAllocated,
    ];

    /// Buffers requested when the configuration does not say
    pub fn default_buffer_count(&self) -> u32 {
        match self {
            BufferStrategy::DirectCopy => 1,
            BufferStrategy::SourceMapped => MMAP_BUFFER_COUNT,
            BufferStrategy::AppAllocated => USERPTR_BUFFER_COUNT,
        }
    }

    /// Whether buffers are handed back to the source after each frame
    pub fn is_streaming(&self) -> bool {
        !matches!(self, BufferStrategy::DirectCopy)
    }
}

impl std::fmt::Display for BufferStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BufferStrategy::DirectCopy => write!(f, "read"),
            BufferStrategy::SourceMapped => write!(f, "mmap"),
            BufferStrategy::AppAllocated => write!(f, "userptr"),
        }
    }
}

/// Who currently owns a frame buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    /// In the pool, unknown to the source
    Free,
    /// Registered with the source, waiting to be filled
    SourceOwned,
    /// Filled by the source, not yet claimed
    Ready,
    /// Claimed by the pipeline
    AppOwned,
}

/// Storage behind a frame buffer
enum Backing {
    /// Heap memory owned by the pool
    Owned(Box<[u8]>),
    /// Source memory mapped into the process, unmapped on drop
    Mapped(Box<dyn MappedMemory>),
}

impl Backing {
    fn as_slice(&self) -> &[u8] {
        match self {
            Backing::Owned(data) => &data[..],
            Backing::Mapped(region) => region.as_slice(),
        }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        match self {
            Backing::Owned(data) => &mut data[..],
            Backing::Mapped(region) => region.as_mut_slice(),
        }
    }
}

/// One fixed-capacity frame buffer
pub struct FrameBuffer {
    backing: Backing,
    length_used: usize,
    state: BufferState,
    pixel_format: PixelFormat,
    width: u32,
    height: u32,
}

impl FrameBuffer {
    fn new(backing: Backing, format: &ActualFormat) -> Self {
        Self {
            backing,
            length_used: 0,
            state: BufferState::Free,
            pixel_format: format.pixel_format,
            width: format.width,
            height: format.height,
        }
    }

    pub fn capacity(&self) -> usize {
        self.backing.as_slice().len()
    }

    pub fn state(&self) -> BufferState {
        self.state
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl std::fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.backing {
            Backing::Owned(_) => "owned",
            Backing::Mapped(_) => "mapped",
        };
        f.debug_struct("FrameBuffer")
            .field("backing", &kind)
            .field("capacity", &self.capacity())
            .field("length_used", &self.length_used)
            .field("state", &self.state)
            .finish()
    }
}

/// Proof of application ownership of one pool buffer
///
/// Not `Clone`/`Copy`: it is minted by [`BufferPool::claim`] and consumed by
/// [`BufferPool::requeue`].
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a claimed buffer must be requeued or the source starves"]
pub struct BufferHandle {
    index: usize,
}

impl BufferHandle {
    pub fn index(&self) -> usize {
        self.index
    }
}

/// Arena of frame buffers indexed by handle
#[derive(Debug)]
pub struct BufferPool {
    strategy: BufferStrategy,
    buffers: Vec<FrameBuffer>,
}

impl BufferPool {
    /// Create the pool for `strategy`
    ///
    /// Streaming strategies request `count` buffers from the source and fail
    /// with [`PipelineError::Allocation`] when fewer than two are granted.
    /// A failed mapping aborts the whole allocation; regions mapped before it
    /// are released on the way out.
    pub fn allocate(
        strategy: BufferStrategy,
        format: &ActualFormat,
        count: u32,
        source: &mut dyn FrameSource,
    ) -> PipelineResult<Self> {
        let buffer_size = format.size_image;
        if buffer_size == 0 {
            return Err(PipelineError::Allocation("zero-sized frame buffer".to_string()));
        }

        let buffers = match strategy {
            BufferStrategy::DirectCopy => {
                vec![FrameBuffer::new(Backing::Owned(owned_region(buffer_size)?), format)]
            }
            BufferStrategy::SourceMapped => {
                let granted = source.request_buffers(strategy, count)?;
                ensure_enough(granted, source.name())?;
                let mut buffers = Vec::with_capacity(granted as usize);
                for index in 0..granted as usize {
                    let region = source.map_buffer(index)?;
                    buffers.push(FrameBuffer::new(Backing::Mapped(region), format));
                }
                buffers
            }
            BufferStrategy::AppAllocated => {
                let granted = source.request_buffers(strategy, count)?;
                ensure_enough(granted, source.name())?;
                let mut buffers = Vec::with_capacity(granted as usize);
                for _ in 0..granted {
                    buffers.push(FrameBuffer::new(
                        Backing::Owned(owned_region(buffer_size)?),
                        format,
                    ));
                }
                buffers
            }
        };

        info!(
            strategy = %strategy,
            count = buffers.len(),
            buffer_size,
            "Allocated buffer pool"
        );

        Ok(Self { strategy, buffers })
    }

    pub fn strategy(&self) -> BufferStrategy {
        self.strategy
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn buffer(&self, index: usize) -> Option<&FrameBuffer> {
        self.buffers.get(index)
    }

    /// Current state of every buffer, in pool order
    pub fn states(&self) -> Vec<BufferState> {
        self.buffers.iter().map(|b| b.state).collect()
    }

    /// Hand every free buffer to the source (`Free → SourceOwned`)
    pub fn register_all(&mut self, source: &mut dyn FrameSource) -> PipelineResult<()> {
        let streaming = self.strategy.is_streaming();
        for (index, buffer) in self.buffers.iter_mut().enumerate() {
            if buffer.state != BufferState::Free {
                return Err(PipelineError::Lifecycle(format!(
                    "buffer {} registered twice (state {:?})",
                    index, buffer.state
                )));
            }
            if streaming {
                source.enqueue(index, buffer.backing.as_mut_slice())?;
            }
            buffer.state = BufferState::SourceOwned;
            debug!(index, "Registered buffer");
        }
        Ok(())
    }

    /// Memory of a buffer the source currently owns, for copy-in sources
    pub fn source_memory_mut(&mut self, index: usize) -> PipelineResult<&mut [u8]> {
        let buffer = self.expect_state(index, BufferState::SourceOwned)?;
        Ok(buffer.backing.as_mut_slice())
    }

    /// Record that the source filled buffer `index` (`SourceOwned → Ready`)
    pub fn mark_ready(&mut self, index: usize, bytes_used: usize) -> PipelineResult<()> {
        let buffer = self.expect_state(index, BufferState::SourceOwned)?;
        if bytes_used > buffer.capacity() {
            return Err(PipelineError::Lifecycle(format!(
                "buffer {} reports {} bytes used but holds {}",
                index,
                bytes_used,
                buffer.capacity()
            )));
        }
        buffer.length_used = bytes_used;
        buffer.state = BufferState::Ready;
        Ok(())
    }

    /// Take ownership of a ready buffer (`Ready → AppOwned`)
    pub fn claim(&mut self, index: usize) -> PipelineResult<BufferHandle> {
        let buffer = self.expect_state(index, BufferState::Ready)?;
        buffer.state = BufferState::AppOwned;
        Ok(BufferHandle { index })
    }

    /// Bytes the source wrote into a claimed buffer
    pub fn frame(&self, handle: &BufferHandle) -> &[u8] {
        let buffer = &self.buffers[handle.index];
        &buffer.backing.as_slice()[..buffer.length_used]
    }

    /// Return a claimed buffer to the source (`AppOwned → SourceOwned`)
    pub fn requeue(
        &mut self,
        handle: BufferHandle,
        source: &mut dyn FrameSource,
    ) -> PipelineResult<()> {
        let streaming = self.strategy.is_streaming();
        let index = handle.index;
        let buffer = self.expect_state(index, BufferState::AppOwned)?;
        if streaming {
            source.enqueue(index, buffer.backing.as_mut_slice())?;
        }
        buffer.state = BufferState::SourceOwned;
        buffer.length_used = 0;
        Ok(())
    }

    /// Destroy the pool, unmapping or freeing each buffer once
    ///
    /// The source must have stopped streaming first.
    pub fn release(self) {
        let count = self.buffers.len();
        let strategy = self.strategy;
        drop(self.buffers);
        info!(strategy = %strategy, count, "Released buffer pool");
    }

    fn expect_state(
        &mut self,
        index: usize,
        expected: BufferState,
    ) -> PipelineResult<&mut FrameBuffer> {
        let count = self.buffers.len();
        let buffer = self.buffers.get_mut(index).ok_or_else(|| {
            PipelineError::Lifecycle(format!("buffer index {} out of range ({})", index, count))
        })?;
        if buffer.state != expected {
            return Err(PipelineError::Lifecycle(format!(
                "buffer {} is {:?}, expected {:?}",
                index, buffer.state, expected
            )));
        }
        Ok(buffer)
    }
}

fn ensure_enough(granted: u32, source: &str) -> PipelineResult<()> {
    if granted < MIN_STREAMING_BUFFERS {
        return Err(PipelineError::Allocation(format!(
            "Insufficient buffer memory on {} ({} granted)",
            source, granted
        )));
    }
    Ok(())
}

fn owned_region(size: usize) -> PipelineResult<Box<[u8]>> {
    let mut data = Vec::new();
    data.try_reserve_exact(size)
        .map_err(|e| PipelineError::Allocation(format!("Out of memory: {}", e)))?;
    data.resize(size, 0);
    Ok(data.into_boxed_slice())
}
