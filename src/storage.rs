// SPDX-License-Identifier: GPL-3.0-only

//! Output file naming and frame persistence

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::errors::{PipelineError, PipelineResult};
use crate::media::ppm::{self, HeaderStyle};

/// Destination for processed frames
///
/// Files are named `<prefix><tag>.ppm` (`.pgm` for single-channel output),
/// where the tag counts written frames from zero, zero padded to `digits`.
#[derive(Debug, Clone)]
pub struct FrameSink {
    dir: PathBuf,
    prefix: String,
    digits: usize,
    channels: u8,
    style: HeaderStyle,
    next_tag: u64,
}

impl FrameSink {
    pub fn new(
        dir: impl Into<PathBuf>,
        prefix: impl Into<String>,
        digits: usize,
        channels: u8,
        style: HeaderStyle,
    ) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
            digits,
            channels,
            style,
            next_tag: 0,
        }
    }

    /// Frames written so far
    pub fn written(&self) -> u64 {
        self.next_tag
    }

    /// Create the output directory if it does not exist
    pub fn ensure_dir(&self) -> PipelineResult<()> {
        if !self.dir.exists() {
            std::fs::create_dir_all(&self.dir).map_err(|e| PipelineError::storage(&self.dir, e))?;
            info!(path = %self.dir.display(), "Created output directory");
        }
        Ok(())
    }

    fn extension(&self) -> &'static str {
        if self.channels == 1 { "pgm" } else { "ppm" }
    }

    /// Path the next frame will be written to
    pub fn next_path(&self) -> PathBuf {
        self.dir.join(format!(
            "{}{:0width$}.{}",
            self.prefix,
            self.next_tag,
            self.extension(),
            width = self.digits
        ))
    }

    /// Serialize one frame to the next file, returning its path and size
    pub fn write(
        &mut self,
        width: u32,
        height: u32,
        captured_at: DateTime<Utc>,
        payload: &[u8],
    ) -> PipelineResult<(PathBuf, usize)> {
        let expected = width as usize * height as usize * self.channels as usize;
        if payload.len() != expected {
            return Err(PipelineError::InputContract(format!(
                "{}x{} frame with {} channel(s) needs {} bytes, got {}",
                width,
                height,
                self.channels,
                expected,
                payload.len()
            )));
        }

        let path = self.next_path();
        let header = ppm::pnm_header(self.channels, width, height, self.style, captured_at);
        let bytes = ppm::write_frame(&path, header.as_bytes(), payload)?;
        self.next_tag += 1;
        Ok((path, bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_names() {
        let sink = FrameSink::new("out", "test", 4, 3, HeaderStyle::Simple);
        assert_eq!(sink.next_path(), PathBuf::from("out/test0000.ppm"));

        let grey = FrameSink::new("out", "cap", 8, 1, HeaderStyle::Simple);
        assert_eq!(grey.next_path(), PathBuf::from("out/cap00000000.pgm"));
    }

    #[test]
    fn test_write_advances_tag() {
        let dir = std::env::temp_dir().join(format!("framepipe-sink-{}", uuid::Uuid::new_v4()));
        let mut sink = FrameSink::new(&dir, "t", 4, 3, HeaderStyle::Simple);
        sink.ensure_dir().unwrap();

        let (path, bytes) = sink.write(2, 1, Utc::now(), &[1, 2, 3, 4, 5, 6]).unwrap();
        assert_eq!(path, dir.join("t0000.ppm"));
        assert_eq!(bytes, "P6\n2 1\n255\n".len() + 6);
        assert_eq!(sink.next_path(), dir.join("t0001.ppm"));

        let contents = std::fs::read(&path).unwrap();
        assert!(contents.ends_with(&[1, 2, 3, 4, 5, 6]));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_wrong_payload_size_rejected() {
        let mut sink = FrameSink::new("unused", "t", 4, 3, HeaderStyle::Simple);
        let err = sink.write(2, 2, Utc::now(), &[0; 6]).unwrap_err();
        assert!(matches!(err, PipelineError::InputContract(_)));
        assert_eq!(sink.written(), 0);
    }
}
