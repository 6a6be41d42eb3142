// SPDX-License-Identifier: GPL-3.0-only

//! End-to-end runs of the capture pipeline against the synthetic source

use framepipe::backends::{PixelFormat, SyntheticSource};
use framepipe::media::{Brightness, HeaderStyle, convert, ppm};
use framepipe::pipelines::{self, BufferStrategy};
use framepipe::stats::StageId;
use framepipe::{PipelineConfig, PipelineError};
use std::path::{Path, PathBuf};

const WIDTH: u32 = 8;
const HEIGHT: u32 = 4;

fn temp_dir() -> PathBuf {
    std::env::temp_dir().join(format!("framepipe-test-{}", uuid::Uuid::new_v4()))
}

fn config(dir: &Path, strategy: BufferStrategy) -> PipelineConfig {
    PipelineConfig {
        width: WIDTH,
        height: HEIGHT,
        strategy,
        frame_budget: 20,
        warmup_frames: 8,
        output_dir: dir.to_path_buf(),
        ready_timeout_ms: 100,
        ..Default::default()
    }
}

fn source() -> SyntheticSource {
    SyntheticSource::new(WIDTH, HEIGHT, PixelFormat::PackedLuma422)
}

/// Split a binary Netpbm file into its header lines and payload
fn split_pnm(bytes: &[u8], header_lines: usize) -> (Vec<String>, &[u8]) {
    let mut lines = Vec::new();
    let mut offset = 0;
    for _ in 0..header_lines {
        let end = offset + bytes[offset..].iter().position(|&b| b == b'\n').unwrap();
        lines.push(String::from_utf8(bytes[offset..end].to_vec()).unwrap());
        offset = end + 1;
    }
    (lines, &bytes[offset..])
}

#[test]
fn test_every_strategy_writes_post_warmup_frames() {
    for strategy in BufferStrategy::ALL {
        let dir = temp_dir();
        let mut src = source();
        let summary = pipelines::run(config(&dir, strategy), &mut src, None).unwrap();

        assert_eq!(summary.frames_acquired, 20, "{}", strategy);
        assert_eq!(summary.frames_written, 12, "{}", strategy);
        assert!(!summary.stopped_early);
        let written = summary.stats.stage(StageId::Writeback).count;
        assert_eq!(written, 12, "{}", strategy);
        assert_eq!(written, summary.frames_acquired - 8, "{}", strategy);

        let mut files: Vec<_> = std::fs::read_dir(&dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        files.sort();
        let expected: Vec<String> = (0..12).map(|n| format!("test{:04}.ppm", n)).collect();
        assert_eq!(files, expected, "{}", strategy);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}

#[test]
fn test_frame_file_contents() {
    for strategy in BufferStrategy::ALL {
        let dir = temp_dir();
        let mut src = source();
        pipelines::run(config(&dir, strategy), &mut src, None).unwrap();

        let bytes = std::fs::read(dir.join("test0000.ppm")).unwrap();
        let (header, payload) = split_pnm(&bytes, 4);
        assert_eq!(header[0], "P6");
        let comment: Vec<&str> = header[1].split(' ').collect();
        assert_eq!(comment[0], "#");
        assert_eq!(comment[1].len(), 10);
        assert_eq!(comment[2], "sec");
        assert_eq!(comment[3].len(), 10);
        assert_eq!(comment[4], "msec");
        assert_eq!(header[2], format!("{} {}", WIDTH, HEIGHT));
        assert_eq!(header[3], "255");
        assert_eq!(payload.len(), (WIDTH * HEIGHT * 3) as usize);

        // First written frame is frame 8: luma 24 with neutral chroma,
        // converted to 9 and brightened to round(9 * 1.25) + 25
        assert_eq!(&payload[..3], &[36, 36, 36], "{}", strategy);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}

#[test]
fn test_luma_output_writes_greymaps() {
    let dir = temp_dir();
    let mut src = source();
    let config = PipelineConfig {
        channels: 1,
        header_style: HeaderStyle::Simple,
        frame_budget: 10,
        ..config(&dir, BufferStrategy::AppAllocated)
    };
    let summary = pipelines::run(config, &mut src, None).unwrap();
    assert_eq!(summary.frames_written, 2);

    let bytes = std::fs::read(dir.join("test0001.pgm")).unwrap();
    let (header, payload) = split_pnm(&bytes, 3);
    assert_eq!(header, vec!["P5", "8 4", "255"]);
    assert_eq!(payload.len(), (WIDTH * HEIGHT) as usize);
    // Frame 9 starts at luma 25: round(25 * 1.25) + 25
    assert_eq!(payload[0], 56);

    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_simple_header_file_reads_back() {
    let dir = temp_dir();
    let mut src = SyntheticSource::new(WIDTH, HEIGHT, PixelFormat::PackedRgb24);
    let config = PipelineConfig {
        pixel_format: PixelFormat::PackedRgb24,
        header_style: HeaderStyle::Simple,
        alpha: 1.0,
        beta: 0,
        frame_budget: 9,
        ..config(&dir, BufferStrategy::DirectCopy)
    };
    pipelines::run(config, &mut src, None).unwrap();

    let image = ppm::read_pnm(&dir.join("test0000.ppm")).unwrap();
    assert_eq!((image.width, image.height, image.channels), (WIDTH, HEIGHT, 3));
    // Identity transform leaves the pass-through pattern untouched
    assert_eq!(&image.data[..3], &[8, 0, 247]);

    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_stalled_source_times_out_and_releases_buffers() {
    let dir = temp_dir();
    let mut src = source().with_stall_after(5);
    let unmaps = src.unmap_counter();

    let err = pipelines::run(config(&dir, BufferStrategy::SourceMapped), &mut src, None)
        .unwrap_err();
    assert!(matches!(err, PipelineError::Timeout(_)));
    assert!(err.to_string().starts_with("select timeout"));
    assert_eq!(unmaps.get(), 6);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_transient_failures_are_retried() {
    for strategy in BufferStrategy::ALL {
        let dir = temp_dir();
        let mut src = source().with_transient_every(3);
        let summary = pipelines::run(config(&dir, strategy), &mut src, None).unwrap();

        assert_eq!(summary.frames_acquired, 20);
        assert_eq!(summary.frames_written, 12);
        assert!(summary.retries > 0, "{}", strategy);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}

#[test]
fn test_insufficient_buffers_fail_before_streaming() {
    let dir = temp_dir();
    let mut src = source().with_max_buffers(1);
    let err = pipelines::run(config(&dir, BufferStrategy::AppAllocated), &mut src, None)
        .unwrap_err();
    assert!(matches!(err, PipelineError::Allocation(_)));
    assert!(err.to_string().contains("Insufficient buffer memory"));
    assert_eq!(src.frames_produced(), 0);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_dark_pixel_pair_through_stages() {
    let rgb = convert::yuyv_to_rgb(&[16, 128, 16, 128]).unwrap();
    let mut out = [0u8; 6];
    Brightness::new(1.25, 25).apply_into(&rgb, &mut out).unwrap();
    assert_eq!(out, [25; 6]);
}
