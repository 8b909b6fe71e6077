//! Attendance session engine for Rollcall.
//!
//! A teacher opens a time-boxed attendance window for one class meeting;
//! students check in by rotating QR token, by location, or are marked by
//! hand; the window closes on its deadline and everyone who never checked
//! in stays ABSENT.
//!
//! # Components
//!
//! - [`SessionManager`]: the OPEN → CLOSED / CANCELLED state machine, one
//!   rotation task per open QR session, and the auto-close sweep.
//! - [`CheckinProcessor`]: validates evidence and commits each check-in
//!   with a conditional write, so a student checks in at most once.
//! - [`AttendanceEngine`]: the facade exposing every client-facing
//!   operation, built with [`AttendanceEngineBuilder`].
//!
//! Storage and collaborators sit behind traits
//! ([`SessionRepository`], [`RecordRepository`], [`Classroom`],
//! [`EventSink`]) with in-memory implementations in [`memory`].
//!
//! # Concurrency
//!
//! There is no global lock. Each attendance session has a gate: check-ins
//! share it, while close, cancel and token rotation take it exclusively.
//! Different sessions never contend.

mod checkin;
mod config;
mod context;
mod engine;
mod error;
pub mod memory;
mod ports;
mod repository;
mod session;

pub use checkin::CheckinProcessor;
pub use config::{EngineConfig, OpenDefaults, SessionOptions};
pub use engine::{AttendanceEngine, AttendanceEngineBuilder};
pub use error::AttendanceError;
pub use ports::{ClassSessionInfo, Classroom, CollaboratorError, EventSink};
pub use repository::{
    CheckinCommit, CheckinUpdate, RecordRepository, SessionRepository, StoreError, Transition,
};
pub use session::SessionManager;
