//! Cancellable timers used for polling and backoff
//!
//! Polling the engine, sampling upload progress and waiting out rate limits
//! all go through here instead of raw sleeps, so a job's cancellation token
//! interrupts any of them promptly.

use std::time::Duration;
use tokio::time::{self, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Fixed-period ticker that stops yielding once its token is cancelled
pub struct Ticker {
    interval: Interval,
    cancel: CancellationToken,
}

impl Ticker {
    /// The first tick completes immediately, later ticks every `period`
    pub fn new(period: Duration, cancel: CancellationToken) -> Self {
        let mut interval = time::interval(period.max(Duration::from_millis(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval, cancel }
    }

    /// Waits for the next tick. Returns `false` if cancelled instead.
    pub async fn tick(&mut self) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = self.interval.tick() => true,
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Sleeps for `duration` unless `cancel` fires first. Returns `true` if the full duration elapsed.
pub async fn sleep_cancellable(duration: Duration, cancel: &CancellationToken) -> bool {
    if cancel.is_cancelled() {
        return false;
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = time::sleep(duration) => true,
    }
}
