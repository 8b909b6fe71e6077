//! Fixed-period interval scheduler.

use std::time::Duration;

use tokio::time::{self, Instant as TokioInstant};
use tracing::{debug, trace, warn};

/// Repeating timer that skips missed periods.
///
/// One scheduler per repeating task: a session's token rotation, the
/// engine's auto-close sweep. A tick that fires late (the task was busy,
/// or the process was suspended) restarts the cadence from now, so a
/// rotation that slept through three periods rotates once, not four times
/// back to back.
pub struct IntervalScheduler {
    period: Duration,
    tick_count: u64,
    /// When the next tick should fire (Tokio instant for `sleep_until`).
    next_tick: TokioInstant,
}

impl IntervalScheduler {
    /// Smallest accepted period. Shorter periods are clamped up.
    pub const MIN_PERIOD: Duration = Duration::from_millis(10);

    /// Create a new scheduler. The first tick fires one period from now,
    /// never immediately.
    pub fn every(period: Duration) -> Self {
        let period = if period < Self::MIN_PERIOD {
            warn!(
                period_ms = period.as_millis() as u64,
                min_ms = Self::MIN_PERIOD.as_millis() as u64,
                "interval period below minimum, clamping"
            );
            Self::MIN_PERIOD
        } else {
            period
        };
        debug!(period_ms = period.as_millis() as u64, "interval scheduler created");

        Self {
            period,
            tick_count: 0,
            next_tick: TokioInstant::now() + period,
        }
    }

    /// Wait until the next tick is due. Returns the tick number, starting
    /// at 1.
    ///
    /// Cancel-safe: dropping the future (e.g. when another `select!` branch
    /// wins) leaves the schedule untouched.
    pub async fn wait_for_tick(&mut self) -> u64 {
        let next = self.next_tick;
        time::sleep_until(next).await;

        let now = TokioInstant::now();
        self.tick_count += 1;

        let late_by = now.saturating_duration_since(next);
        let skipped = late_by.as_nanos() / self.period.as_nanos();
        if skipped > 0 {
            warn!(
                tick = self.tick_count,
                skipped = skipped as u64,
                late_ms = late_by.as_millis() as u64,
                "interval overrun, skipping ahead"
            );
        }
        self.next_tick = now + self.period;

        trace!(tick = self.tick_count, "interval tick fired");
        self.tick_count
    }

    /// Number of ticks fired so far.
    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}
