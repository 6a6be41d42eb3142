// SPDX-License-Identifier: GPL-3.0-only

//! Netpbm (PPM/PGM) serialization for the writeback stage

use std::fs::File;
use std::io::{self, Cursor, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use image::{DynamicImage, ImageReader};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::constants::{MAX_STALLED_WRITES, PNM_MAXVAL};
use crate::errors::{PipelineError, PipelineResult};

/// Header variant written before each frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HeaderStyle {
    /// Capture time as a comment line between magic and dimensions
    #[default]
    Timestamped,
    /// Magic, dimensions and maxval only
    Simple,
}

/// Build the header for a `channels`-channel (1 or 3) binary Netpbm image
pub fn pnm_header(
    channels: u8,
    width: u32,
    height: u32,
    style: HeaderStyle,
    captured_at: DateTime<Utc>,
) -> String {
    let magic = if channels == 1 { "P5" } else { "P6" };
    match style {
        HeaderStyle::Timestamped => format!(
            "{}\n# {:010} sec {:010} msec \n{} {}\n{}\n",
            magic,
            captured_at.timestamp(),
            captured_at.timestamp_subsec_millis(),
            width,
            height,
            PNM_MAXVAL
        ),
        HeaderStyle::Simple => format!("{}\n{} {}\n{}\n", magic, width, height, PNM_MAXVAL),
    }
}

/// Write all of `buf`, retrying short, empty and interrupted writes
///
/// Gives up with [`io::ErrorKind::WriteZero`] once the writer has made no
/// progress for [`MAX_STALLED_WRITES`] consecutive attempts.
pub fn write_fully<W: Write + ?Sized>(writer: &mut W, buf: &[u8]) -> io::Result<usize> {
    let mut written = 0;
    let mut stalled = 0u32;

    while written < buf.len() {
        match writer.write(&buf[written..]) {
            Ok(0) => stalled += 1,
            Ok(n) => {
                written += n;
                stalled = 0;
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
                ) =>
            {
                stalled += 1;
            }
            Err(e) => return Err(e),
        }

        if stalled >= MAX_STALLED_WRITES {
            warn!(written, total = buf.len(), "Writer stopped making progress");
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("no progress after {} attempts", MAX_STALLED_WRITES),
            ));
        }
    }

    Ok(written)
}

/// Write header then payload to a new file at `path`
pub fn write_frame(path: &Path, header: &[u8], payload: &[u8]) -> PipelineResult<usize> {
    let mut file = File::create(path).map_err(|e| PipelineError::storage(path, e))?;
    let header_len = write_fully(&mut file, header).map_err(|e| PipelineError::storage(path, e))?;
    let payload_len =
        write_fully(&mut file, payload).map_err(|e| PipelineError::storage(path, e))?;
    debug!(path = %path.display(), bytes = header_len + payload_len, "Wrote frame");
    Ok(header_len + payload_len)
}

/// Decoded 8-bit Netpbm image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PnmImage {
    pub width: u32,
    pub height: u32,
    /// 1 for greymaps, 3 for pixmaps
    pub channels: u8,
    /// Header comment lines without their leading `#`
    pub comments: Vec<String>,
    pub data: Vec<u8>,
}

impl PnmImage {
    /// Binary header for this image, comment lines included
    pub fn header(&self) -> String {
        let magic = if self.channels == 1 { "P5" } else { "P6" };
        let mut header = format!("{}\n", magic);
        for comment in &self.comments {
            header.push('#');
            header.push_str(comment);
            header.push('\n');
        }
        header.push_str(&format!("{} {}\n{}\n", self.width, self.height, PNM_MAXVAL));
        header
    }
}

/// Comment lines of a Netpbm header, in order
///
/// Scanning stops after the fourth token (magic, width, height, maxval) so
/// raster bytes are never taken for a comment.
fn header_comments(bytes: &[u8]) -> Vec<String> {
    let mut comments = Vec::new();
    let mut tokens = 0;
    let mut pos = 0;

    while tokens < 4 && pos < bytes.len() {
        match bytes[pos] {
            b'#' => {
                let end = bytes[pos..]
                    .iter()
                    .position(|&b| b == b'\n')
                    .map_or(bytes.len(), |n| pos + n);
                comments.push(String::from_utf8_lossy(&bytes[pos + 1..end]).into_owned());
                pos = end;
            }
            b if b.is_ascii_whitespace() => pos += 1,
            _ => {
                while pos < bytes.len() && !bytes[pos].is_ascii_whitespace() && bytes[pos] != b'#'
                {
                    pos += 1;
                }
                tokens += 1;
            }
        }
    }

    comments
}

/// Read a PPM or PGM file
pub fn read_pnm(path: &Path) -> PipelineResult<PnmImage> {
    let bytes = std::fs::read(path).map_err(|e| PipelineError::storage(path, e))?;
    let comments = header_comments(&bytes);
    let image = ImageReader::new(Cursor::new(&bytes[..]))
        .with_guessed_format()
        .map_err(|e| PipelineError::storage(path, e))?
        .decode()
        .map_err(|e| PipelineError::InputContract(format!("{}: {}", path.display(), e)))?;

    let (width, height) = (image.width(), image.height());
    let (channels, data) = match image {
        DynamicImage::ImageLuma8(buf) => (1, buf.into_raw()),
        other => (3, other.to_rgb8().into_raw()),
    };

    Ok(PnmImage {
        width,
        height,
        channels,
        comments,
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    /// Accepts nothing for the first `zeros` calls, then at most `chunk` bytes
    struct Grudging {
        zeros: u32,
        chunk: usize,
        out: Vec<u8>,
    }

    impl Write for Grudging {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.zeros > 0 {
                self.zeros -= 1;
                return Ok(0);
            }
            let n = buf.len().min(self.chunk);
            self.out.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Alternates between interrupted and one-byte writes
    struct Interrupting {
        toggle: bool,
        out: Vec<u8>,
    }

    impl Write for Interrupting {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.toggle = !self.toggle;
            if self.toggle {
                return Err(io::ErrorKind::Interrupted.into());
            }
            self.out.push(buf[0]);
            Ok(1)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_timestamped_header() {
        let at = Utc.timestamp_opt(1_700_000_000, 42_000_000).unwrap();
        let header = pnm_header(3, 640, 480, HeaderStyle::Timestamped, at);
        assert_eq!(
            header,
            "P6\n# 1700000000 sec 0000000042 msec \n640 480\n255\n"
        );
    }

    #[test]
    fn test_simple_and_grey_headers() {
        let at = Utc.timestamp_opt(0, 0).unwrap();
        assert_eq!(pnm_header(3, 2, 1, HeaderStyle::Simple, at), "P6\n2 1\n255\n");
        assert!(pnm_header(1, 2, 1, HeaderStyle::Timestamped, at).starts_with("P5\n# "));
    }

    #[test]
    fn test_zero_writes_are_retried() {
        let mut writer = Grudging {
            zeros: 5,
            chunk: 3,
            out: Vec::new(),
        };
        let data: Vec<u8> = (0..20).collect();
        assert_eq!(write_fully(&mut writer, &data).unwrap(), 20);
        assert_eq!(writer.out, data);
    }

    #[test]
    fn test_interrupted_writes_are_retried() {
        let mut writer = Interrupting {
            toggle: false,
            out: Vec::new(),
        };
        assert_eq!(write_fully(&mut writer, b"P6\n").unwrap(), 3);
        assert_eq!(writer.out, b"P6\n");
    }

    #[test]
    fn test_header_comments_stop_at_raster() {
        let mut bytes = b"P6\n# 0000000012 sec 0000000034 msec \n2 1\n# late\n255\n".to_vec();
        bytes.extend_from_slice(b"#\n\x00#abc\n");
        assert_eq!(
            header_comments(&bytes),
            vec![" 0000000012 sec 0000000034 msec ".to_string(), " late".to_string()]
        );
        assert!(header_comments(b"P5\n2 2\n255\n####").is_empty());
    }

    #[test]
    fn test_image_header_round_trips_timestamp() {
        let at = Utc.timestamp_opt(1_700_000_000, 42_000_000).unwrap();
        let written = pnm_header(3, 2, 1, HeaderStyle::Timestamped, at);
        let image = PnmImage {
            width: 2,
            height: 1,
            channels: 3,
            comments: header_comments(written.as_bytes()),
            data: vec![0; 6],
        };
        assert_eq!(image.header(), written);
    }

    #[test]
    fn test_stuck_writer_gives_up() {
        let mut writer = Grudging {
            zeros: u32::MAX,
            chunk: 1,
            out: Vec::new(),
        };
        let err = write_fully(&mut writer, b"abc").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WriteZero);
    }
}
