// SPDX-License-Identifier: GPL-3.0-only

//! Per-frame media processing
//!
//! # Color Space Conversion
//!
//! Capture sources usually deliver YUYV (YUV 4:2:2). The [`convert`] module
//! turns it into RGB24 with integer BT.601 arithmetic, or extracts the luma
//! plane for greyscale output.
//!
//! # Transforms
//!
//! [`transform`] holds the brightness gain/bias and the negative.
//!
//! # Serialization
//!
//! [`ppm`] writes binary PPM/PGM files through a retrying writer and reads
//! them back for the standalone [`tools`].

pub mod convert;
pub mod ppm;
pub mod tools;
pub mod transform;

pub use ppm::HeaderStyle;
pub use transform::Brightness;
