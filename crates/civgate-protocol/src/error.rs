//! Error types for the protocol layer.

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a Rust type into bytes).
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed: malformed input, a missing field, or an
    /// unknown packet type.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// Deflating or inflating a snapshot failed.
    #[error("snapshot compression failed: {0}")]
    Compression(#[source] std::io::Error),

    /// The message decoded fine but breaks a protocol rule, such as a
    /// packet that is only valid before the handshake.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
