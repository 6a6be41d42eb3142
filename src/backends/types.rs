// SPDX-License-Identifier: GPL-3.0-only
// Shared types for frame source backends

//! Shared types for frame source backends

use serde::{Deserialize, Serialize};

/// Pixel layouts the pipeline understands
///
/// Only [`PixelFormat::PackedLuma422`] goes through the conversion stage; the
/// other two are already displayable and bypass it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
pub enum PixelFormat {
    /// YUYV 4:2:2, two pixels per 4 bytes (`Y1 U Y2 V`)
    #[default]
    #[value(name = "yuyv")]
    PackedLuma422,
    /// Interleaved 8-bit RGB
    #[value(name = "rgb24")]
    PackedRgb24,
    /// 8-bit greyscale
    #[value(name = "grey")]
    PlanarLuma8,
}

impl PixelFormat {
    pub const ALL: [PixelFormat; 3] = [
        PixelFormat::PackedLuma422,
        PixelFormat::PackedRgb24,
        PixelFormat::PlanarLuma8,
    ];

    /// V4L2 fourcc code for this layout
    pub fn fourcc(&self) -> [u8; 4] {
        match self {
            PixelFormat::PackedLuma422 => *b"YUYV",
            PixelFormat::PackedRgb24 => *b"RGB3",
            PixelFormat::PlanarLuma8 => *b"GREY",
        }
    }

    /// Reverse of [`PixelFormat::fourcc`]
    pub fn from_fourcc(code: &[u8; 4]) -> Option<Self> {
        Self::ALL.into_iter().find(|f| &f.fourcc() == code)
    }

    /// Bytes needed to store one row of `width` pixels
    pub fn bytes_per_line(&self, width: u32) -> usize {
        let width = width as usize;
        match self {
            PixelFormat::PackedLuma422 => width * 2,
            PixelFormat::PackedRgb24 => width * 3,
            PixelFormat::PlanarLuma8 => width,
        }
    }

    /// Tightly packed frame size
    pub fn frame_size(&self, width: u32, height: u32) -> usize {
        self.bytes_per_line(width) * height as usize
    }

    /// Whether frames must be converted to be written with `channels` channels
    ///
    /// RGB24 written as RGB and greyscale written as greymaps pass through.
    pub fn needs_conversion(&self, channels: u8) -> bool {
        !matches!(
            (self, channels),
            (PixelFormat::PlanarLuma8, 1) | (PixelFormat::PackedRgb24, 3)
        )
    }
}

impl std::fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let code = self.fourcc();
        write!(f, "{}", String::from_utf8_lossy(&code))
    }
}

/// Format the source actually agreed to deliver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActualFormat {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    /// Row pitch reported by the source
    pub bytes_per_line: usize,
    /// Size of one frame buffer as reported by the source
    pub size_image: usize,
}

impl ActualFormat {
    /// Build a format from source-reported values, correcting drivers that
    /// report a pitch or image size smaller than the pixel layout needs.
    pub fn sanitized(
        width: u32,
        height: u32,
        pixel_format: PixelFormat,
        bytes_per_line: usize,
        size_image: usize,
    ) -> Self {
        let bytes_per_line = bytes_per_line.max(pixel_format.bytes_per_line(width));
        let size_image = size_image.max(bytes_per_line * height as usize);
        Self {
            width,
            height,
            pixel_format,
            bytes_per_line,
            size_image,
        }
    }

    /// Format with tight rows and no padding
    pub fn packed(width: u32, height: u32, pixel_format: PixelFormat) -> Self {
        Self::sanitized(width, height, pixel_format, 0, 0)
    }

    /// Bytes of pixel data in one frame, excluding driver padding
    pub fn payload_size(&self) -> usize {
        self.pixel_format.frame_size(self.width, self.height)
    }
}

/// Result of waiting for the source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// A frame can be dequeued (or read) without blocking
    Ready,
    /// The wait elapsed without the source becoming ready
    TimedOut,
}

/// A filled buffer handed back by the source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dequeued {
    /// Pool index of the filled buffer
    pub index: usize,
    /// Bytes the source wrote into it
    pub bytes_used: usize,
}

/// Memory owned by the source and mapped into the process
///
/// Dropping the value unmaps the region, so ownership guarantees a single
/// unmap per buffer.
pub trait MappedMemory {
    fn as_slice(&self) -> &[u8];
    fn as_mut_slice(&mut self) -> &mut [u8];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fourcc_round_trip_names() {
        assert_eq!(PixelFormat::from_fourcc(b"YUYV"), Some(PixelFormat::PackedLuma422));
        assert_eq!(PixelFormat::from_fourcc(b"RGB3"), Some(PixelFormat::PackedRgb24));
        assert_eq!(PixelFormat::from_fourcc(b"MJPG"), None);
        assert_eq!(PixelFormat::PlanarLuma8.to_string(), "GREY");
    }

    #[test]
    fn test_pass_through_combinations() {
        assert!(PixelFormat::PackedLuma422.needs_conversion(3));
        assert!(PixelFormat::PackedLuma422.needs_conversion(1));
        assert!(PixelFormat::PlanarLuma8.needs_conversion(3));
        assert!(!PixelFormat::PlanarLuma8.needs_conversion(1));
        assert!(!PixelFormat::PackedRgb24.needs_conversion(3));
    }

    #[test]
    fn test_sanitized_fixes_short_pitch() {
        // Driver claims a 10-byte pitch and no image size for 640x480 YUYV
        let fmt = ActualFormat::sanitized(640, 480, PixelFormat::PackedLuma422, 10, 0);
        assert_eq!(fmt.bytes_per_line, 1280);
        assert_eq!(fmt.size_image, 1280 * 480);
        assert_eq!(fmt.payload_size(), 640 * 480 * 2);
    }

    #[test]
    fn test_sanitized_keeps_padding() {
        let fmt = ActualFormat::sanitized(4, 2, PixelFormat::PlanarLuma8, 8, 32);
        assert_eq!(fmt.bytes_per_line, 8);
        assert_eq!(fmt.size_image, 32);
        assert_eq!(fmt.payload_size(), 8);
    }
}
