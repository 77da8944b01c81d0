//! Unified error type for the civgate server.

use std::path::PathBuf;

use civgate_protocol::ProtocolError;
use civgate_session::{SessionError, SettingsError};
use civgate_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant generates a `From` impl, so
/// `?` converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum CivgateError {
    /// A transport-level error (bind, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, invalid message).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A session-level error (rejected join, failed attach).
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The session actor is gone; the server is shutting down.
    #[error("server is shut down")]
    Shutdown,
}

/// Errors from loading a [`ServerConfig`](crate::ServerConfig).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// An initial setting value was rejected.
    #[error("setting '{name}': {source}")]
    Setting {
        name: String,
        #[source]
        source: SettingsError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_transport_error() {
        let err = TransportError::ConnectionClosed("gone".into());
        let civgate_err: CivgateError = err.into();
        assert!(matches!(civgate_err, CivgateError::Transport(_)));
        assert!(civgate_err.to_string().contains("gone"));
    }

    #[test]
    fn test_from_protocol_error() {
        let err = ProtocolError::InvalidMessage("bad".into());
        let civgate_err: CivgateError = err.into();
        assert!(matches!(civgate_err, CivgateError::Protocol(_)));
    }

    #[test]
    fn test_from_session_error() {
        let err = SessionError::Rejected(civgate_session::Rejection::AuthFailed);
        let civgate_err: CivgateError = err.into();
        assert!(matches!(civgate_err, CivgateError::Session(_)));
    }

    #[test]
    fn test_from_config_error() {
        let err = ConfigError::Setting {
            name: "maxplayers".into(),
            source: SettingsError::Unknown("maxplayers".into()),
        };
        let civgate_err: CivgateError = err.into();
        assert!(matches!(civgate_err, CivgateError::Config(_)));
        assert!(civgate_err.to_string().starts_with("setting 'maxplayers'"));
    }
}
