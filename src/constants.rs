// SPDX-License-Identifier: GPL-3.0-only

//! Pipeline-wide constants and defaults

use std::time::Duration;

/// Default capture device
pub const DEFAULT_DEVICE: &str = "/dev/video0";

/// Default horizontal resolution requested from the source
pub const DEFAULT_WIDTH: u32 = 640;
/// Default vertical resolution requested from the source
pub const DEFAULT_HEIGHT: u32 = 480;

/// Frames discarded from statistics while the device settles
pub const DEFAULT_WARMUP_FRAMES: u32 = 8;
/// Trailing frame kept so the last measured frame is fully written
pub const TRAILING_FRAMES: u32 = 1;
/// Frames measured per run
pub const MEASURED_FRAMES: u32 = 100 + TRAILING_FRAMES;
/// Default total frame budget, warm-up included
pub const DEFAULT_FRAME_BUDGET: u32 = MEASURED_FRAMES + DEFAULT_WARMUP_FRAMES + TRAILING_FRAMES;

/// Brightness gain
pub const DEFAULT_ALPHA: f64 = 1.25;
/// Brightness bias
pub const DEFAULT_BETA: u8 = 25;

/// Upper bound on waiting for a frame before the capture is considered stalled
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(2);

/// Buffers requested for memory-mapped streaming
pub const MMAP_BUFFER_COUNT: u32 = 6;
/// Buffers allocated for user-pointer streaming
pub const USERPTR_BUFFER_COUNT: u32 = 4;
/// Fewer buffers than this cannot keep the source streaming
pub const MIN_STREAMING_BUFFERS: u32 = 2;

/// Output directory for frame files
pub const DEFAULT_OUTPUT_DIR: &str = "frames";
/// File name prefix for frame files
pub const DEFAULT_FILE_PREFIX: &str = "test";
/// Zero padding of the frame tag in file names
pub const DEFAULT_TAG_DIGITS: usize = 4;
/// Accepted range for the frame tag padding
pub const TAG_DIGITS_RANGE: std::ops::RangeInclusive<usize> = 4..=8;

/// Maximum sample value written in PNM headers
pub const PNM_MAXVAL: u8 = 255;

/// Consecutive zero-progress writes tolerated before giving up on a file
pub const MAX_STALLED_WRITES: u32 = 1024;

/// Default output of the standalone brighten tool
pub const BRIGHTEN_OUTPUT: &str = "brighter.ppm";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_covers_warmup() {
        assert!(DEFAULT_FRAME_BUDGET > DEFAULT_WARMUP_FRAMES);
        assert_eq!(DEFAULT_FRAME_BUDGET, 110);
    }

    #[test]
    fn test_default_buffer_counts_stream() {
        assert!(MMAP_BUFFER_COUNT >= MIN_STREAMING_BUFFERS);
        assert!(USERPTR_BUFFER_COUNT >= MIN_STREAMING_BUFFERS);
    }
}
