//! Throttled, smoothed progress reporting
//!
//! A [`ProgressReporter`] belongs to one job. It is fed raw samples from both
//! the download and the upload stage and decides when a status line is worth
//! emitting. The throttle clock is reporter state, keyed on sample
//! timestamps, so two jobs never interfere and tests can drive it with
//! synthetic instants.

use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

use crate::core::job::ProgressSample;
use crate::core::size::{format_duration, format_rate, format_size};

/// Weight of the previous smoothed rate in the moving average
const EMA_PREVIOUS_WEIGHT: f64 = 0.7;
/// Weight of the newest instantaneous rate
const EMA_CURRENT_WEIGHT: f64 = 0.3;
/// Cells in the rendered progress bar
pub const BAR_WIDTH: usize = 20;

/// Default minimum spacing between two emitted statuses
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_secs(5);

/// Which transfer the samples describe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Downloading,
    Uploading,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Downloading => f.write_str("⬇️ Downloading"),
            Phase::Uploading => f.write_str("⬆️ Uploading"),
        }
    }
}

/// A formatted-ready progress snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressStatus {
    pub phase: Phase,
    pub label: String,
    pub percent: f64,
    pub completed: u64,
    pub total: u64,
    /// Smoothed bytes per second, 0 while unknown
    pub rate: f64,
    /// `None` while the rate is still being calculated
    pub eta: Option<Duration>,
}

impl fmt::Display for ProgressStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.phase)?;
        if !self.label.is_empty() {
            writeln!(f, "{}", self.label)?;
        }
        writeln!(f, "{}", render_bar(self.percent))?;
        writeln!(f, "Progress: {:.1}%", self.percent)?;
        if self.total > 0 {
            writeln!(f, "Processed: {} / {}", format_size(self.completed), format_size(self.total))?;
        } else {
            writeln!(f, "Processed: {} / unknown", format_size(self.completed))?;
        }
        writeln!(f, "Speed: {}", format_rate(self.rate))?;
        match self.eta {
            Some(eta) => write!(f, "ETA: {}", format_duration(eta)),
            None => write!(f, "ETA: calculating"),
        }
    }
}

/// Renders a fixed-width block bar for `percent`, clamped to `[0, 100]`
pub fn render_bar(percent: f64) -> String {
    let percent = if percent.is_finite() { percent.clamp(0.0, 100.0) } else { 0.0 };
    let filled = ((percent / 100.0) * BAR_WIDTH as f64).floor() as usize;
    let filled = filled.min(BAR_WIDTH);
    format!("{}{}", "■".repeat(filled), "□".repeat(BAR_WIDTH - filled))
}

/// Percentage of `completed` over `total`; 0 while the total is unknown
pub fn percent_of(completed: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (completed as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
}

/// Per-job progress state: throttle clock, smoothed rate, monotonic percentage
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    min_interval: Duration,
    phase: Phase,
    label: String,
    last_emit: Option<Instant>,
    last_sample: Option<ProgressSample>,
    smoothed_rate: Option<f64>,
    last_percent: f64,
}

impl ProgressReporter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            phase: Phase::Downloading,
            label: String::new(),
            last_emit: None,
            last_sample: None,
            smoothed_rate: None,
            last_percent: 0.0,
        }
    }

    /// Starts a new transfer phase.
    ///
    /// Rate and percentage restart from scratch; the throttle clock is kept so
    /// the minimum spacing holds across phase boundaries.
    pub fn begin_phase(&mut self, phase: Phase, label: impl Into<String>) {
        self.phase = phase;
        self.label = label.into();
        self.last_sample = None;
        self.smoothed_rate = None;
        self.last_percent = 0.0;
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Current smoothed rate in bytes per second, if one has been established
    pub fn smoothed_rate(&self) -> Option<f64> {
        self.smoothed_rate
    }

    /// Records a sample and returns a status if the throttle allows one
    pub fn observe(&mut self, sample: ProgressSample) -> Option<ProgressStatus> {
        self.update_rate(&sample);
        self.last_sample = Some(sample);

        let percent = percent_of(sample.bytes_transferred, sample.total_bytes).max(self.last_percent);
        self.last_percent = percent;

        if let Some(last) = self.last_emit {
            if sample.timestamp.saturating_duration_since(last) < self.min_interval {
                return None;
            }
        }
        self.last_emit = Some(sample.timestamp);

        Some(self.status_for(&sample, percent))
    }

    fn update_rate(&mut self, sample: &ProgressSample) {
        let Some(previous) = self.last_sample else {
            return;
        };
        let elapsed = sample.timestamp.saturating_duration_since(previous.timestamp).as_secs_f64();
        if elapsed <= 0.0 {
            return;
        }
        let delta = sample.bytes_transferred.saturating_sub(previous.bytes_transferred) as f64;
        let instantaneous = delta / elapsed;

        self.smoothed_rate = Some(match self.smoothed_rate {
            None => instantaneous,
            Some(prev) => EMA_PREVIOUS_WEIGHT * prev + EMA_CURRENT_WEIGHT * instantaneous,
        });
    }

    fn status_for(&self, sample: &ProgressSample, percent: f64) -> ProgressStatus {
        let rate = self.smoothed_rate.unwrap_or(0.0).max(0.0);
        let eta = if rate > 0.0 && sample.total_bytes > 0 {
            let remaining = sample.total_bytes.saturating_sub(sample.bytes_transferred) as f64;
            Some(Duration::from_secs_f64(remaining / rate))
        } else {
            None
        };

        ProgressStatus {
            phase: self.phase,
            label: self.label.clone(),
            percent,
            completed: sample.bytes_transferred,
            total: sample.total_bytes,
            rate,
            eta,
        }
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_INTERVAL)
    }
}
