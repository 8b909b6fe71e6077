//! Codec trait and implementations for serializing/deserializing messages.
//!
//! The gateway doesn't care HOW envelopes become bytes — it only needs
//! something that implements [`Codec`]. [`JsonCodec`] is the default
//! because browser and mobile clients speak JSON natively.

use serde::{de::DeserializeOwned, Serialize};

use crate::ProtocolError;

/// A codec that can encode Rust types to bytes and decode bytes back.
///
/// `Send + Sync + 'static` because one codec instance is shared by every
/// connection task for the lifetime of the server.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if serialization fails.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the bytes are malformed or don't
    /// match the expected type.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// Behind the `json` feature flag (enabled by default).
///
/// ## Example
///
/// ```rust
/// use rollcall_protocol::{ClientEnvelope, ClientRequest, Codec, JsonCodec};
///
/// let codec = JsonCodec;
/// let envelope = ClientEnvelope {
///     seq: 1,
///     request: ClientRequest::Heartbeat { client_time: 5000 },
/// };
///
/// let bytes = codec.encode(&envelope).unwrap();
/// let decoded: ClientEnvelope = codec.decode(&bytes).unwrap();
/// assert_eq!(envelope, decoded);
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}

#[cfg(all(test, feature = "json"))]
mod tests {
    use super::*;
    use crate::{AttendanceSessionId, ClientEnvelope, ClientRequest};

    #[test]
    fn test_decode_unknown_op_returns_decode_error() {
        let raw = br#"{"seq":3,"request":{"op":"teleport"}}"#;
        let result: Result<ClientEnvelope, _> = JsonCodec.decode(raw);
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }

    #[test]
    fn test_decode_truncated_input_returns_decode_error() {
        let result: Result<ClientEnvelope, _> = JsonCodec.decode(b"{\"seq\":");
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }

    #[test]
    fn test_decode_subscribe_from_client_json() {
        let id = AttendanceSessionId::new();
        let raw = format!(
            r#"{{"seq":9,"request":{{"op":"subscribe","attendance_session_id":"{id}"}}}}"#
        );
        let env: ClientEnvelope = JsonCodec.decode(raw.as_bytes()).unwrap();
        assert_eq!(env.seq, 9);
        assert_eq!(
            env.request,
            ClientRequest::Subscribe {
                attendance_session_id: id
            }
        );
    }
}
