// SPDX-License-Identifier: GPL-3.0-only

//! Per-stage frame rate statistics
//!
//! Every stage reports how long it spent on a frame. The instantaneous rate
//! `1 / duration` feeds a running minimum (worst case) and a running sum, so
//! the average is the mean of per-frame rates rather than frames over total
//! time. Frames inside the warm-up window and zero durations are ignored.

use std::time::Duration;

use tracing::info;

/// Timed stages of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageId {
    Acquisition,
    Conversion,
    Transform,
    Writeback,
}

impl StageId {
    pub const ALL: [StageId; 4] = [
        StageId::Acquisition,
        StageId::Conversion,
        StageId::Transform,
        StageId::Writeback,
    ];

    fn slot(self) -> usize {
        match self {
            StageId::Acquisition => 0,
            StageId::Conversion => 1,
            StageId::Transform => 2,
            StageId::Writeback => 3,
        }
    }
}

impl std::fmt::Display for StageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StageId::Acquisition => "acquisition",
            StageId::Conversion => "conversion",
            StageId::Transform => "transform",
            StageId::Writeback => "writeback",
        };
        f.write_str(name)
    }
}

/// Accumulated statistics of one stage
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StageStatistics {
    pub count: u64,
    pub rate_sum: f64,
    /// Lowest rate seen; `None` until the first sample
    pub worst_rate: Option<f64>,
    pub last_duration: Option<Duration>,
}

impl StageStatistics {
    /// Mean of the recorded per-frame rates
    pub fn average(&self) -> Option<f64> {
        (self.count > 0).then(|| self.rate_sum / self.count as f64)
    }

    fn add(&mut self, duration: Duration) {
        let rate = 1.0 / duration.as_secs_f64();
        self.worst_rate = Some(self.worst_rate.map_or(rate, |w| w.min(rate)));
        self.rate_sum += rate;
        self.count += 1;
        self.last_duration = Some(duration);
    }
}

/// Statistics for every stage of one run
#[derive(Debug, Clone)]
pub struct StatisticsTracker {
    warmup: u64,
    stages: [StageStatistics; 4],
}

impl StatisticsTracker {
    pub fn new(warmup: u64) -> Self {
        Self {
            warmup,
            stages: [StageStatistics::default(); 4],
        }
    }

    pub fn warmup(&self) -> u64 {
        self.warmup
    }

    /// Whether `frame_number` is still inside the warm-up window
    pub fn in_warmup(&self, frame_number: u64) -> bool {
        frame_number < self.warmup
    }

    /// Record one stage duration; returns whether the sample was kept
    pub fn record(&mut self, stage: StageId, frame_number: u64, duration: Duration) -> bool {
        if self.in_warmup(frame_number) || duration.is_zero() {
            return false;
        }
        self.stages[stage.slot()].add(duration);
        true
    }

    pub fn stage(&self, stage: StageId) -> &StageStatistics {
        &self.stages[stage.slot()]
    }

    /// Log the per-stage table
    pub fn log_report(&self) {
        for stage in StageId::ALL {
            let stats = self.stage(stage);
            match (stats.worst_rate, stats.average()) {
                (Some(worst), Some(average)) => info!(
                    stage = %stage,
                    samples = stats.count,
                    worst_fps = %format!("{:.2}", worst),
                    average_fps = %format!("{:.2}", average),
                    "Stage frame rate"
                ),
                _ => info!(stage = %stage, "Stage frame rate: no samples"),
            }
        }
    }
}
