//! Time for Rollcall: where "now" comes from, and how often things repeat.
//!
//! Two concerns live here:
//!
//! - [`Clock`] answers "what time is it?" for business rules (late
//!   thresholds, token expiry, auto-close deadlines). Production uses
//!   [`SystemClock`]; tests swap in [`ManualClock`] or [`TokioClock`].
//! - [`IntervalScheduler`] answers "is it time yet?" for repeating work
//!   (token rotation, the auto-close sweep). It sleeps on Tokio time so
//!   `#[tokio::test(start_paused = true)]` can drive it deterministically.
//!
//! # Integration
//!
//! The scheduler is designed to sit inside a task's `tokio::select!` loop:
//!
//! ```ignore
//! loop {
//!     tokio::select! {
//!         _ = cancel.cancelled() => break,
//!         _ = scheduler.wait_for_tick() => rotate().await,
//!     }
//! }
//! ```

mod clock;
mod interval;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock, TokioClock};
pub use interval::IntervalScheduler;
