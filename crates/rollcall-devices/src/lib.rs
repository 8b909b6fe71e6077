//! Device registry for Rollcall.
//!
//! Students register the phones they check in from. A registered, active
//! device is a cheap anti-spoofing signal: a check-in that names a device
//! must name one bound to the same student. It is not authentication.
//!
//! # Rules
//!
//! - A device id belongs to at most one student, ever.
//! - A student holds at most [`RegistryConfig::max_active_devices`] active
//!   devices at once.
//! - Blocking frees a slot; unblocking takes it back (and fails if the
//!   student has since filled it).

mod error;
mod registry;

pub use error::DeviceError;
pub use registry::{DeviceRegistry, RegistryConfig};
