//! Check-in tokens for Rollcall.
//!
//! A QR session shows a short-lived opaque token that a student's phone
//! sends back when checking in. This crate owns:
//!
//! - [`TokenStore`]: the expiring key/value port tokens live in, with
//!   [`MemoryTokenStore`] for single-process deployments and tests.
//! - [`QrTokenService`]: generate, rotate, validate and invalidate tokens
//!   bound to one attendance session.
//! - [`KeyedLocks`]: per-key async read/write locks, used here to serialize
//!   rotation per session and by the engine to serialize lifecycle changes.

mod error;
mod locks;
mod service;
mod store;

pub use error::TokenError;
pub use locks::KeyedLocks;
pub use service::{QrTokenRecord, QrTokenService, generate_token};
pub use store::{MemoryTokenStore, TokenStore};
