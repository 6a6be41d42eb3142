// SPDX-License-Identifier: GPL-3.0-only

//! V4L2 frame source
//!
//! Device opening, capability checks and format negotiation go through the
//! `v4l` crate. Buffer management is done with raw `VIDIOC_*` ioctls on the
//! kernel structs because the pipeline, not the crate's stream helpers, owns
//! the buffer lifecycle.

use std::io;
use std::mem;
use std::os::raw::{c_ulong, c_void};
use std::ptr;
use std::time::Duration;

use tracing::{debug, error, info, warn};
use v4l::capability::Flags;
use v4l::format::FieldOrder;
use v4l::v4l_sys::{v4l2_buffer, v4l2_requestbuffers};
use v4l::v4l2;
use v4l::video::Capture;
use v4l::{Device, Format, FourCC};

use super::types::*;
use super::FrameSource;
use crate::errors::{PipelineError, PipelineResult};
use crate::pipelines::BufferStrategy;

// ===== V4L2 enum values (videodev2.h) =====
const V4L2_BUF_TYPE_VIDEO_CAPTURE: u32 = 1;
const V4L2_MEMORY_MMAP: u32 = 1;
const V4L2_MEMORY_USERPTR: u32 = 2;

/// Issue an ioctl, restarting it when interrupted by a signal
macro_rules! xioctl {
    ($fd:expr, $request:ident, $arg:expr) => {
        retry_interrupted(|| unsafe {
            v4l2::ioctl(
                $fd,
                v4l2::vidioc::$request,
                $arg as *mut _ as *mut c_void,
            )
        })
    };
}

fn retry_interrupted(mut op: impl FnMut() -> io::Result<()>) -> io::Result<()> {
    loop {
        match op() {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

/// Kernel buffer memory mapped into the process
struct MmapRegion {
    ptr: *mut u8,
    len: usize,
}

impl MappedMemory for MmapRegion {
    fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
    }
}

impl Drop for MmapRegion {
    fn drop(&mut self) {
        let result = unsafe { libc::munmap(self.ptr as *mut c_void, self.len) };
        if result == -1 {
            error!(error = %io::Error::last_os_error(), len = self.len, "munmap failed");
        }
    }
}

/// Capture device driven through the V4L2 streaming or read() API
pub struct V4l2Source {
    device: Device,
    path: String,
    /// `V4L2_MEMORY_*` in use once buffers were requested
    memory: Option<u32>,
    /// Buffers granted by `VIDIOC_REQBUFS`
    granted: usize,
    /// Registered user pointer regions by index (address, length)
    user_regions: Vec<Option<(usize, usize)>>,
    streaming: bool,
}

impl V4l2Source {
    /// Open a capture device and check it supports the chosen strategy
    pub fn open(path: &str, strategy: BufferStrategy) -> PipelineResult<Self> {
        let device = Device::with_path(path).map_err(|e| PipelineError::io("open", e))?;
        let caps = device
            .query_caps()
            .map_err(|e| PipelineError::io("VIDIOC_QUERYCAP", e))?;

        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
            return Err(PipelineError::Config(format!(
                "{} is no video capture device",
                path
            )));
        }

        let (needed, label) = match strategy {
            BufferStrategy::DirectCopy => (Flags::READ_WRITE, "read i/o"),
            BufferStrategy::SourceMapped | BufferStrategy::AppAllocated => {
                (Flags::STREAMING, "streaming i/o")
            }
        };
        if !caps.capabilities.contains(needed) {
            return Err(PipelineError::Config(format!(
                "{} does not support {}",
                path, label
            )));
        }

        info!(
            path,
            card = %caps.card,
            driver = %caps.driver,
            strategy = %strategy,
            "Opened capture device"
        );

        Ok(Self {
            device,
            path: path.to_string(),
            memory: None,
            granted: 0,
            user_regions: Vec::new(),
            streaming: false,
        })
    }

    fn fd(&self) -> std::os::raw::c_int {
        self.device.handle().fd()
    }

    fn buffer_desc(&self, memory: u32, index: usize) -> v4l2_buffer {
        let mut buf: v4l2_buffer = unsafe { mem::zeroed() };
        buf.type_ = V4L2_BUF_TYPE_VIDEO_CAPTURE;
        buf.memory = memory;
        buf.index = index as u32;
        buf
    }

    fn stream_off(&mut self) -> io::Result<()> {
        let mut buf_type = V4L2_BUF_TYPE_VIDEO_CAPTURE;
        xioctl!(self.fd(), VIDIOC_STREAMOFF, &mut buf_type)?;
        self.streaming = false;
        Ok(())
    }
}

impl FrameSource for V4l2Source {
    fn negotiate(
        &mut self,
        width: u32,
        height: u32,
        pixel_format: PixelFormat,
        force: bool,
    ) -> PipelineResult<ActualFormat> {
        let format = if force {
            info!(width, height, format = %pixel_format, "Forcing format");
            let mut requested = Format::new(width, height, FourCC::new(&pixel_format.fourcc()));
            requested.field_order = FieldOrder::Progressive;
            // VIDIOC_S_FMT may change width and height
            self.device
                .set_format(&requested)
                .map_err(|e| PipelineError::io("VIDIOC_S_FMT", e))?
        } else {
            info!("Keeping current device format");
            self.device
                .format()
                .map_err(|e| PipelineError::io("VIDIOC_G_FMT", e))?
        };

        let actual_format = PixelFormat::from_fourcc(&format.fourcc.repr).ok_or_else(|| {
            PipelineError::Config(format!(
                "{} delivers unsupported pixel format {}",
                self.path,
                String::from_utf8_lossy(&format.fourcc.repr)
            ))
        })?;

        let actual = ActualFormat::sanitized(
            format.width,
            format.height,
            actual_format,
            format.stride as usize,
            format.size as usize,
        );
        debug!(?actual, "Negotiated format");
        Ok(actual)
    }

    fn request_buffers(&mut self, strategy: BufferStrategy, count: u32) -> PipelineResult<u32> {
        let memory = match strategy {
            BufferStrategy::SourceMapped => V4L2_MEMORY_MMAP,
            BufferStrategy::AppAllocated => V4L2_MEMORY_USERPTR,
            BufferStrategy::DirectCopy => {
                return Err(PipelineError::Lifecycle(
                    "read i/o does not use source buffers".to_string(),
                ));
            }
        };

        let mut req: v4l2_requestbuffers = unsafe { mem::zeroed() };
        req.count = count;
        req.type_ = V4L2_BUF_TYPE_VIDEO_CAPTURE;
        req.memory = memory;

        xioctl!(self.fd(), VIDIOC_REQBUFS, &mut req).map_err(|e| {
            if e.raw_os_error() == Some(libc::EINVAL) {
                PipelineError::Allocation(format!("{} does not support {}", self.path, strategy))
            } else {
                PipelineError::io("VIDIOC_REQBUFS", e)
            }
        })?;

        self.memory = Some(memory);
        self.granted = req.count as usize;
        self.user_regions = vec![None; self.granted];
        debug!(requested = count, granted = req.count, "Requested buffers");
        Ok(req.count)
    }

    fn map_buffer(&mut self, index: usize) -> PipelineResult<Box<dyn MappedMemory>> {
        if self.memory != Some(V4L2_MEMORY_MMAP) || index >= self.granted {
            return Err(PipelineError::Allocation(format!(
                "buffer {} is not a mappable source buffer",
                index
            )));
        }

        let mut buf = self.buffer_desc(V4L2_MEMORY_MMAP, index);
        xioctl!(self.fd(), VIDIOC_QUERYBUF, &mut buf)
            .map_err(|e| PipelineError::io("VIDIOC_QUERYBUF", e))?;

        let len = buf.length as usize;
        let offset = unsafe { buf.m.offset };
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                self.fd(),
                offset as libc::off_t,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(PipelineError::Allocation(format!(
                "mmap of buffer {} failed: {}",
                index,
                io::Error::last_os_error()
            )));
        }

        debug!(index, len, "Mapped buffer");
        Ok(Box::new(MmapRegion {
            ptr: ptr as *mut u8,
            len,
        }))
    }

    fn start(&mut self) -> PipelineResult<()> {
        if self.memory.is_none() {
            // read() i/o streams implicitly
            return Ok(());
        }
        let mut buf_type = V4L2_BUF_TYPE_VIDEO_CAPTURE;
        xioctl!(self.fd(), VIDIOC_STREAMON, &mut buf_type)
            .map_err(|e| PipelineError::io("VIDIOC_STREAMON", e))?;
        self.streaming = true;
        info!(path = %self.path, "Streaming started");
        Ok(())
    }

    fn wait_ready(&mut self, timeout: Duration) -> PipelineResult<Readiness> {
        let mut pfd = libc::pollfd {
            fd: self.fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let timeout_ms = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;

        loop {
            let result = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
            if result == -1 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(PipelineError::io("select", err));
            }
            return Ok(if result == 0 {
                Readiness::TimedOut
            } else {
                Readiness::Ready
            });
        }
    }

    fn dequeue(&mut self) -> io::Result<Dequeued> {
        let memory = self.memory.ok_or_else(|| {
            io::Error::new(io::ErrorKind::Unsupported, "no streaming buffers requested")
        })?;

        let mut buf = self.buffer_desc(memory, 0);
        xioctl!(self.fd(), VIDIOC_DQBUF, &mut buf)?;

        let index = buf.index as usize;
        if index >= self.granted {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("driver returned buffer index {} of {}", index, self.granted),
            ));
        }

        if memory == V4L2_MEMORY_USERPTR {
            let userptr = unsafe { buf.m.userptr } as usize;
            let registered = self.user_regions[index];
            if registered.map(|(addr, _)| addr) != Some(userptr) {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("user pointer {:#x} does not match buffer {}", userptr, index),
                ));
            }
        }

        Ok(Dequeued {
            index,
            bytes_used: buf.bytesused as usize,
        })
    }

    fn enqueue(&mut self, index: usize, memory: &mut [u8]) -> PipelineResult<()> {
        let kind = self.memory.ok_or_else(|| {
            PipelineError::Lifecycle("enqueue before buffers were requested".to_string())
        })?;
        if index >= self.granted {
            return Err(PipelineError::Lifecycle(format!(
                "buffer {} was never granted by the device",
                index
            )));
        }

        let mut buf = self.buffer_desc(kind, index);
        if kind == V4L2_MEMORY_USERPTR {
            let addr = memory.as_mut_ptr() as usize;
            buf.m.userptr = addr as c_ulong;
            buf.length = memory.len() as u32;
            self.user_regions[index] = Some((addr, memory.len()));
        }

        xioctl!(self.fd(), VIDIOC_QBUF, &mut buf).map_err(|e| PipelineError::io("VIDIOC_QBUF", e))
    }

    fn read_into(&mut self, memory: &mut [u8]) -> io::Result<usize> {
        let read =
            unsafe { libc::read(self.fd(), memory.as_mut_ptr() as *mut c_void, memory.len()) };
        if read < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(read as usize)
        }
    }

    fn stop(&mut self) -> PipelineResult<()> {
        if self.streaming {
            self.stream_off()
                .map_err(|e| PipelineError::io("VIDIOC_STREAMOFF", e))?;
            info!(path = %self.path, "Streaming stopped");
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.path
    }
}

impl Drop for V4l2Source {
    fn drop(&mut self) {
        if self.streaming
            && let Err(e) = self.stream_off()
        {
            warn!(path = %self.path, error = %e, "Failed to stop streaming on close");
        }
    }
}
