//! Wall-clock sources.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeDelta, Utc};
use tokio::time::Instant as TokioInstant;

/// A source of the current UTC time.
///
/// `Send + Sync + 'static` because one clock is shared by every component
/// of an engine for its whole lifetime.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

/// The clock type components hold.
pub type SharedClock = Arc<dyn Clock>;

/// The real wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
///
/// Use it for pure business-rule tests that never touch timers.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Moves the clock forward by `delta`.
    pub fn advance(&self, delta: TimeDelta) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += delta;
    }

    /// Jumps the clock to `at`.
    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = at;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// A wall clock anchored to Tokio's (pausable) clock.
///
/// Reports `start + (tokio_now - anchor)`. Under
/// `#[tokio::test(start_paused = true)]`, `tokio::time::advance` moves this
/// clock and every [`IntervalScheduler`](crate::IntervalScheduler) together,
/// so timestamps stay consistent with timers.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    start: DateTime<Utc>,
    anchor: TokioInstant,
}

impl TokioClock {
    /// Anchors `start` to the current Tokio instant.
    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self {
            start,
            anchor: TokioInstant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = TokioInstant::now().saturating_duration_since(self.anchor);
        self.start + TimeDelta::from_std(elapsed).unwrap_or(TimeDelta::MAX)
    }
}
