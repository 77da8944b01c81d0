//! Codec trait and implementations for serializing/deserializing messages.
//!
//! A "codec" (coder/decoder) converts between Rust types and raw bytes.
//! The rest of the server only needs something implementing [`Codec`];
//! [`JsonCodec`] is the one shipped today.

use serde::{Serialize, de::DeserializeOwned};

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
    /// Returns `ProtocolError::Decode` if the bytes are malformed,
    /// incomplete, or don't match the expected type.
    fn decode<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError>;
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// Human-readable, so packets can be inspected in logs and browser
/// devtools. Behind the `json` feature flag (enabled by default).
///
/// ## Example
///
/// ```rust
/// use civgate_protocol::{Codec, Envelope, JsonCodec, Packet};
///
/// let codec = JsonCodec;
/// let envelope = Envelope::session(1, 5000, Packet::Heartbeat { client_time: 5000 });
///
/// let bytes = codec.encode(&envelope).unwrap();
/// let decoded: Envelope = codec.decode(&bytes).unwrap();
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

    fn decode<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}

#[cfg(all(test, feature = "json"))]
mod tests {
    use super::*;
    use crate::{Envelope, Packet, Payload};

    #[test]
    fn test_json_codec_encodes_readable_json() {
        let env = Envelope::session(
            2,
            10,
            Packet::Disconnect {
                reason: "bye".into(),
            },
        );
        let bytes = JsonCodec.encode(&env).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("\"Disconnect\""));
        assert!(text.contains("\"bye\""));
    }

    #[test]
    fn test_json_codec_decodes_game_payload() {
        let bytes = br#"{"seq":1,"timestamp":0,"payload":{"type":"Game","data":[9]}}"#;
        let env: Envelope = JsonCodec.decode(bytes).unwrap();
        assert_eq!(env.payload, Payload::Game(vec![9]));
    }

    #[test]
    fn test_json_codec_decode_garbage_returns_error() {
        let result: Result<Envelope, _> = JsonCodec.decode(b"not json");
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }
}
