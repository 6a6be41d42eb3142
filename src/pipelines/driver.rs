// SPDX-License-Identifier: GPL-3.0-only

//! Pipeline driver
//!
//! Owns everything a run needs ([`PipelineContext`]) and drives frames through
//! acquisition, conversion, transform and writeback until the frame budget is
//! spent, a stop is requested, or a stage fails. However the loop ends, the
//! source is stopped and the buffer pool is released before returning.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, error, info};

use super::acquisition::{AcquireOutcome, Acquisition, FrameRecord};
use super::buffer_pool::{BufferPool, FrameBuffer};
use crate::backends::{ActualFormat, FrameSource, PixelFormat};
use crate::config::{PipelineConfig, check_output_combination};
use crate::errors::{PipelineError, PipelineResult};
use crate::media::Brightness;
use crate::media::convert;
use crate::stats::{StageId, StatisticsTracker};
use crate::storage::FrameSink;

/// Outcome of a completed run
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Format the source delivered
    pub format: ActualFormat,
    /// Frames claimed from the source, warm-up included
    pub frames_acquired: u64,
    /// Frames written to disk
    pub frames_written: u64,
    /// Transient acquisition failures that were retried
    pub retries: u64,
    /// Wall time spent on post-warm-up frames
    pub measured_elapsed: Duration,
    /// The run ended on a stop request before the budget was spent
    pub stopped_early: bool,
    pub stats: StatisticsTracker,
}

impl RunSummary {
    /// Post-warm-up frames over the time they took
    pub fn overall_fps(&self) -> Option<f64> {
        let measured = self.frames_acquired.saturating_sub(self.stats.warmup());
        let secs = self.measured_elapsed.as_secs_f64();
        (measured > 0 && secs > 0.0).then(|| measured as f64 / secs)
    }

    /// Log the per-stage table and the overall acquisition rate
    pub fn log(&self) {
        self.stats.log_report();
        info!(
            frames = self.frames_acquired,
            written = self.frames_written,
            retries = self.retries,
            elapsed_s = self.measured_elapsed.as_secs_f64(),
            overall_fps = %self
                .overall_fps()
                .map_or_else(|| "n/a".to_string(), |fps| format!("{:.2}", fps)),
            stopped_early = self.stopped_early,
            "Capture finished"
        );
    }
}

/// Scratch memory and settings of the processing stages
struct Stages {
    format: ActualFormat,
    channels: u8,
    brightness: Brightness,
    /// Rows copied out of a padded source buffer
    compact: Vec<u8>,
    converted: Vec<u8>,
    transformed: Vec<u8>,
}

impl Stages {
    fn new(format: ActualFormat, config: &PipelineConfig) -> Self {
        let output = format.width as usize * format.height as usize * config.channels as usize;
        let padded = format.bytes_per_line != format.pixel_format.bytes_per_line(format.width);
        let needs_conversion = format.pixel_format.needs_conversion(config.channels);

        Self {
            format,
            channels: config.channels,
            brightness: Brightness::new(config.alpha, config.beta),
            compact: if padded {
                vec![0; format.payload_size()]
            } else {
                Vec::new()
            },
            converted: if needs_conversion {
                vec![0; output]
            } else {
                Vec::new()
            },
            transformed: vec![0; output],
        }
    }

    /// Reject a claimed buffer laid out for another format than the negotiated one
    fn check_buffer(&self, buffer: &FrameBuffer) -> PipelineResult<()> {
        let expected = (self.format.width, self.format.height);
        if buffer.pixel_format() != self.format.pixel_format || buffer.dimensions() != expected {
            let (width, height) = buffer.dimensions();
            return Err(PipelineError::InputContract(format!(
                "buffer holds {}x{} {}, negotiated {}x{} {}",
                width,
                height,
                buffer.pixel_format(),
                self.format.width,
                self.format.height,
                self.format.pixel_format
            )));
        }
        Ok(())
    }

    /// Run conversion, transform and (after warm-up) writeback on one frame
    fn process(
        &mut self,
        frame: &[u8],
        record: &FrameRecord,
        stats: &mut StatisticsTracker,
        sink: &mut FrameSink,
    ) -> PipelineResult<bool> {
        let n = record.sequence;
        let tight = self.format.pixel_format.bytes_per_line(self.format.width);
        let pitch = self.format.bytes_per_line;
        let rows = self.format.height as usize;
        let needed = pitch * rows.saturating_sub(1) + tight;

        if frame.len() < needed {
            return Err(PipelineError::InputContract(format!(
                "frame {} carries {} bytes, {}x{} {} needs {}",
                n,
                frame.len(),
                self.format.width,
                self.format.height,
                self.format.pixel_format,
                needed
            )));
        }

        let pixels: &[u8] = if pitch == tight {
            &frame[..self.format.payload_size()]
        } else {
            for (row, out) in self.compact.chunks_exact_mut(tight).enumerate() {
                out.copy_from_slice(&frame[row * pitch..row * pitch + tight]);
            }
            &self.compact
        };

        let started = Instant::now();
        let (converted, ran): (&[u8], bool) = match (self.format.pixel_format, self.channels) {
            (PixelFormat::PackedLuma422, 3) => {
                let len = convert::yuyv_to_rgb_into(pixels, &mut self.converted)?;
                (&self.converted[..len], true)
            }
            (PixelFormat::PackedLuma422, _) => {
                let len = convert::yuyv_to_luma_into(pixels, &mut self.converted)?;
                (&self.converted[..len], true)
            }
            (PixelFormat::PlanarLuma8, 3) => {
                let len = convert::grey_to_rgb_into(pixels, &mut self.converted)?;
                (&self.converted[..len], true)
            }
            (PixelFormat::PlanarLuma8, _) | (PixelFormat::PackedRgb24, 3) => (pixels, false),
            (PixelFormat::PackedRgb24, channels) => {
                return Err(PipelineError::InputContract(format!(
                    "cannot write RGB24 frames with {} channel(s)",
                    channels
                )));
            }
        };
        // Pass-through formats have no conversion cost to report
        if ran {
            let elapsed = started.elapsed();
            stats.record(StageId::Conversion, n, elapsed);
            debug!(frame = n, stage = %StageId::Conversion, duration_s = elapsed.as_secs_f64());
        }

        let started = Instant::now();
        let len = self.brightness.apply_into(converted, &mut self.transformed)?;
        let elapsed = started.elapsed();
        stats.record(StageId::Transform, n, elapsed);
        debug!(frame = n, stage = %StageId::Transform, duration_s = elapsed.as_secs_f64());

        if stats.in_warmup(n) {
            return Ok(false);
        }

        let started = Instant::now();
        let (path, bytes) = sink.write(
            self.format.width,
            self.format.height,
            record.captured_at,
            &self.transformed[..len],
        )?;
        let elapsed = started.elapsed();
        stats.record(StageId::Writeback, n, elapsed);
        debug!(
            frame = n,
            stage = %StageId::Writeback,
            duration_s = elapsed.as_secs_f64(),
            path = %path.display(),
            bytes
        );
        Ok(true)
    }
}

/// Everything one run owns
pub struct PipelineContext {
    config: PipelineConfig,
    format: ActualFormat,
    pool: BufferPool,
    acquisition: Acquisition,
    stats: StatisticsTracker,
    stages: Stages,
    sink: FrameSink,
}

impl PipelineContext {
    /// Validate the configuration, agree on a format and allocate buffers
    pub fn new(config: PipelineConfig, source: &mut dyn FrameSource) -> PipelineResult<Self> {
        config.validate()?;

        let format = source.negotiate(
            config.width,
            config.height,
            config.pixel_format,
            config.force_format,
        )?;
        check_output_combination(format.pixel_format, config.channels)?;
        if format.width == 0 || format.height == 0 {
            return Err(PipelineError::InputContract(format!(
                "{} reports an empty {}x{} format",
                source.name(),
                format.width,
                format.height
            )));
        }
        info!(
            source = source.name(),
            width = format.width,
            height = format.height,
            pixel_format = %format.pixel_format,
            bytes_per_line = format.bytes_per_line,
            size_image = format.size_image,
            "Negotiated format"
        );

        let sink = FrameSink::new(
            &config.output_dir,
            config.file_prefix.clone(),
            config.tag_digits,
            config.channels,
            config.header_style,
        );
        sink.ensure_dir()?;

        let pool = BufferPool::allocate(config.strategy, &format, config.buffer_count(), source)?;

        Ok(Self {
            stats: StatisticsTracker::new(config.warmup_frames as u64),
            stages: Stages::new(format, &config),
            acquisition: Acquisition::new(),
            config,
            format,
            pool,
            sink,
        })
    }

    /// Stream frames until the budget is spent or `stop` is raised
    fn stream(
        &mut self,
        source: &mut dyn FrameSource,
        stop: Option<&AtomicBool>,
    ) -> PipelineResult<(Duration, bool)> {
        self.pool.register_all(source)?;
        source.start()?;

        let budget = self.config.frame_budget as u64;
        let timeout = self.config.ready_timeout();
        let delay = self.config.frame_delay();
        let mut measure_start: Option<Instant> = None;
        let mut measure_end: Option<Instant> = None;
        let mut pending_wait: Option<Instant> = None;

        while self.acquisition.acquired() < budget {
            if stop.is_some_and(|flag| flag.load(Ordering::SeqCst)) {
                info!(frames = self.acquisition.acquired(), "Stop requested");
                let elapsed = elapsed_between(measure_start, measure_end);
                return Ok((elapsed, true));
            }

            // Retries count towards the acquisition time of the frame they delay
            let wait_started = *pending_wait.get_or_insert_with(Instant::now);
            let (record, handle) = match self.acquisition.wait_and_acquire(
                source,
                &mut self.pool,
                timeout,
            )? {
                AcquireOutcome::Frame(record, handle) => (record, handle),
                AcquireOutcome::Retry => continue,
            };
            pending_wait = None;

            let n = record.sequence;
            let waited = wait_started.elapsed();
            self.stats.record(StageId::Acquisition, n, waited);
            debug!(frame = n, stage = %StageId::Acquisition, duration_s = waited.as_secs_f64());
            if !self.stats.in_warmup(n) && measure_start.is_none() {
                measure_start = Some(wait_started);
            }

            let processed = match self.pool.buffer(handle.index()) {
                Some(buffer) => self.stages.check_buffer(buffer),
                None => Err(PipelineError::Lifecycle(format!(
                    "claimed buffer {} is not in the pool",
                    handle.index()
                ))),
            }
            .and_then(|()| {
                self.stages.process(
                    self.pool.frame(&handle),
                    &record,
                    &mut self.stats,
                    &mut self.sink,
                )
            });
            // The buffer goes back to the source even when processing failed
            let released = self.acquisition.release(source, &mut self.pool, handle);
            processed?;
            released?;

            if measure_start.is_some() {
                measure_end = Some(Instant::now());
            }
            if let Some(delay) = delay {
                std::thread::sleep(delay);
            }
        }

        Ok((elapsed_between(measure_start, measure_end), false))
    }

    /// Stop the source and free every buffer, then report
    fn finish(
        self,
        source: &mut dyn FrameSource,
        streamed: PipelineResult<(Duration, bool)>,
    ) -> PipelineResult<RunSummary> {
        let stopped = source.stop();
        let Self {
            format,
            pool,
            acquisition,
            stats,
            sink,
            ..
        } = self;
        pool.release();

        let (measured_elapsed, stopped_early) = streamed?;
        stopped?;

        Ok(RunSummary {
            format,
            frames_acquired: acquisition.acquired(),
            frames_written: sink.written(),
            retries: acquisition.retries(),
            measured_elapsed,
            stopped_early,
            stats,
        })
    }
}

fn elapsed_between(start: Option<Instant>, end: Option<Instant>) -> Duration {
    match (start, end) {
        (Some(start), Some(end)) => end.duration_since(start),
        _ => Duration::ZERO,
    }
}

/// Run one capture with `config` against `source`
///
/// `stop` is polled between frames; raising it ends the run cleanly.
pub fn run(
    config: PipelineConfig,
    source: &mut dyn FrameSource,
    stop: Option<&AtomicBool>,
) -> PipelineResult<RunSummary> {
    info!(
        strategy = %config.strategy,
        budget = config.frame_budget,
        warmup = config.warmup_frames,
        channels = config.channels,
        output = %config.output_dir.display(),
        "Starting capture"
    );

    let mut context = match PipelineContext::new(config, source) {
        Ok(context) => context,
        Err(e) => {
            error!(error = %e, "Capture setup failed");
            return Err(e);
        }
    };
    let streamed = context.stream(source, stop);
    if let Err(e) = &streamed {
        error!(error = %e, "Capture aborted");
    }
    let summary = context.finish(source, streamed)?;
    summary.log();
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::SyntheticSource;
    use crate::pipelines::BufferStrategy;
    use std::path::PathBuf;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("framepipe-driver-{}", uuid::Uuid::new_v4()))
    }

    fn small_config(dir: &PathBuf) -> PipelineConfig {
        PipelineConfig {
            width: 4,
            height: 2,
            frame_budget: 5,
            warmup_frames: 2,
            output_dir: dir.clone(),
            ready_timeout_ms: 50,
            ..Default::default()
        }
    }

    #[test]
    fn test_run_writes_post_warmup_frames() {
        let dir = temp_dir();
        let mut source = SyntheticSource::new(4, 2, PixelFormat::PackedLuma422);
        let summary = run(small_config(&dir), &mut source, None).unwrap();

        assert_eq!(summary.frames_acquired, 5);
        assert_eq!(summary.frames_written, 3);
        let written = summary.stats.stage(StageId::Writeback).count;
        assert_eq!(written, 3);
        assert_eq!(written, summary.frames_acquired - summary.stats.warmup());
        assert!(dir.join("test0002.ppm").exists());
        assert!(!dir.join("test0003.ppm").exists());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_stop_flag_ends_run() {
        let dir = temp_dir();
        let mut source = SyntheticSource::new(4, 2, PixelFormat::PackedLuma422);
        let stop = AtomicBool::new(true);
        let summary = run(small_config(&dir), &mut source, Some(&stop)).unwrap();
        assert!(summary.stopped_early);
        assert_eq!(summary.frames_acquired, 0);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_padded_rows_are_compacted() {
        let format = ActualFormat::sanitized(2, 2, PixelFormat::PlanarLuma8, 4, 8);
        let config = PipelineConfig {
            channels: 1,
            alpha: 1.0,
            beta: 0,
            ..Default::default()
        };
        let mut stages = Stages::new(format, &config);
        let mut stats = StatisticsTracker::new(1);
        let mut sink = FrameSink::new("unused", "t", 4, 1, config.header_style);
        let record = FrameRecord {
            sequence: 0,
            bytes_used: 8,
            captured_at: chrono::Utc::now(),
        };

        // Frame 0 is warm-up, so nothing reaches the sink
        let written = stages
            .process(&[1, 2, 0xAA, 0xAA, 3, 4, 0xAA, 0xAA], &record, &mut stats, &mut sink)
            .unwrap();
        assert!(!written);
        assert_eq!(&stages.transformed[..4], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_short_frame_is_contract_violation() {
        let format = ActualFormat::packed(4, 2, PixelFormat::PackedLuma422);
        let config = PipelineConfig::default();
        let mut stages = Stages::new(format, &config);
        let mut stats = StatisticsTracker::new(8);
        let mut sink = FrameSink::new("unused", "t", 4, 3, config.header_style);
        let record = FrameRecord {
            sequence: 0,
            bytes_used: 8,
            captured_at: chrono::Utc::now(),
        };
        let err = stages.process(&[0; 8], &record, &mut stats, &mut sink).unwrap_err();
        assert!(matches!(err, PipelineError::InputContract(_)));
    }

    #[test]
    fn test_buffer_of_other_format_is_rejected() {
        let mut source = SyntheticSource::new(4, 2, PixelFormat::PackedLuma422);
        let allocated = ActualFormat::packed(4, 2, PixelFormat::PackedLuma422);
        let pool = BufferPool::allocate(BufferStrategy::DirectCopy, &allocated, 1, &mut source)
            .unwrap();
        let config = PipelineConfig::default();

        let matching = Stages::new(allocated, &config);
        matching.check_buffer(pool.buffer(0).unwrap()).unwrap();

        let grey = ActualFormat::packed(2, 2, PixelFormat::PlanarLuma8);
        let mismatched = Stages::new(grey, &PipelineConfig { channels: 1, ..config });
        let err = mismatched.check_buffer(pool.buffer(0).unwrap()).unwrap_err();
        assert!(matches!(err, PipelineError::InputContract(_)));
        pool.release();
    }

    #[test]
    fn test_allocation_failure_reported_before_streaming() {
        let dir = temp_dir();
        let mut source = SyntheticSource::new(4, 2, PixelFormat::PackedLuma422).with_max_buffers(1);
        let config = PipelineConfig {
            strategy: BufferStrategy::SourceMapped,
            ..small_config(&dir)
        };
        let err = run(config, &mut source, None).unwrap_err();
        assert!(matches!(err, PipelineError::Allocation(_)));
        assert_eq!(source.frames_produced(), 0);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
