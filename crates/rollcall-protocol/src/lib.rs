//! Shared vocabulary for Rollcall.
//!
//! This crate defines everything the other layers agree on:
//!
//! - **Types** ([`AttendanceSession`], [`AttendanceRecord`],
//!   [`DeviceRegistration`], the identifier newtypes) — the domain model.
//! - **Events** ([`SessionEvent`], [`DomainEvent`]) — what gets pushed to
//!   subscribed clients and what gets emitted to downstream collaborators.
//! - **Messages** ([`ClientEnvelope`], [`ServerEnvelope`]) — the request and
//!   response shapes spoken by the gateway.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]) — how messages become bytes.
//! - **Errors** ([`ProtocolError`], [`ErrorKind`]).
//!
//! # Architecture
//!
//! ```text
//! Transport (bytes) → Protocol (envelopes) → Engine (sessions, records)
//! ```
//!
//! The protocol layer knows nothing about storage, timers, or sockets.

mod codec;
mod error;
mod events;
mod messages;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::{ErrorKind, ProtocolError};
pub use events::{DomainEvent, LeaveRequestApproved, SessionEvent};
pub use messages::{
    CheckinEvidence, ClientEnvelope, ClientRequest, OpenSessionRequest,
    ResponseBody, ServerEnvelope, ServerMessage,
};
pub use types::{
    AttendanceMethod, AttendanceRecord, AttendanceSession,
    AttendanceSessionId, AttendanceStatus, Caller, CheckinSource, ClassId,
    ConnectionId, Coordinates, DeviceId, DeviceMeta, DeviceRegistration,
    DeviceStatus, GeoFence, QrPayload, RecordId, RegistrationId, Role,
    SessionRef, SessionStats, SessionStatus, StudentId, TokenBinding, UserId,
};
