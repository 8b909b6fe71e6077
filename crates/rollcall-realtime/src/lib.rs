//! Realtime notifier for Rollcall.
//!
//! Connections subscribe to the attendance sessions they care about; the
//! engine broadcasts [`SessionEvent`](rollcall_protocol::SessionEvent)s and
//! only that session's subscribers receive them. Delivery is best-effort:
//! no retry, no buffering for absent clients. A client that reconnects
//! polls for current state.
//!
//! [`Notifier`] is the capability the engine depends on.
//! [`NotifierHandle`] implements it with an actor task that owns the
//! subscription tables, so no lock is shared between connections.

mod error;
mod notifier;

pub use error::NotifierError;
pub use notifier::{EventReceiver, EventSender, Notifier, NotifierHandle, event_channel};
