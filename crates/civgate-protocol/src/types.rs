//! Core protocol types for civgate's wire format.
//!
//! Everything here is serialized, sent over the network, and deserialized
//! on the other side: identity newtypes, the access-level ladder, and the
//! [`Envelope`] that wraps every message.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::Packet;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// Index of a player slot.
///
/// Slots form a fixed-size table, so the id is the slot index itself.
/// `#[serde(transparent)]` keeps it a bare number on the wire:
/// `PlayerId(3)` becomes `3`, not `{"0":3}`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize,
    Deserialize,
)]
#[serde(transparent)]
pub struct PlayerId(pub u16);

impl PlayerId {
    /// The slot index as a `usize`, for indexing the slot table.
    pub fn index(self) -> usize {
        usize::from(self.0)
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P-{}", self.0)
    }
}

/// Index of a nation in the loaded nation set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NationId(pub u16);

// ---------------------------------------------------------------------------
// Access levels
// ---------------------------------------------------------------------------

/// Command access level of a connection.
///
/// The variants are declared lowest to highest, so the derived `Ord`
/// gives the ladder directly: `AccessLevel::Info < AccessLevel::Admin`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Default,
)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    /// May not issue any command.
    None,
    /// Read-only: may look at state and chat.
    Info,
    /// Normal player: may issue game commands for their own player.
    #[default]
    Basic,
    /// Game control: start, settings, player management.
    Ctrl,
    /// Server administration: kick, cut, access levels of others.
    Admin,
    /// Unrestricted, including the server console.
    Hack,
}

impl AccessLevel {
    /// All levels, lowest first.
    pub const ALL: [AccessLevel; 6] = [
        AccessLevel::None,
        AccessLevel::Info,
        AccessLevel::Basic,
        AccessLevel::Ctrl,
        AccessLevel::Admin,
        AccessLevel::Hack,
    ];

    /// The lowercase name used on the wire and in commands.
    pub fn name(self) -> &'static str {
        match self {
            AccessLevel::None => "none",
            AccessLevel::Info => "info",
            AccessLevel::Basic => "basic",
            AccessLevel::Ctrl => "ctrl",
            AccessLevel::Admin => "admin",
            AccessLevel::Hack => "hack",
        }
    }

    /// Parses a level by exact name or unambiguous prefix, ignoring case.
    ///
    /// ```rust
    /// use civgate_protocol::AccessLevel;
    ///
    /// assert_eq!(AccessLevel::from_name("ADMIN"), Some(AccessLevel::Admin));
    /// assert_eq!(AccessLevel::from_name("ct"), Some(AccessLevel::Ctrl));
    /// assert_eq!(AccessLevel::from_name("x"), None);
    /// ```
    pub fn from_name(text: &str) -> Option<AccessLevel> {
        let wanted = text.trim().to_ascii_lowercase();
        if wanted.is_empty() {
            return None;
        }
        if let Some(level) =
            Self::ALL.into_iter().find(|l| l.name() == wanted)
        {
            return Some(level);
        }
        let mut matches =
            Self::ALL.into_iter().filter(|l| l.name().starts_with(&wanted));
        match (matches.next(), matches.next()) {
            (Some(level), None) => Some(level),
            _ => None,
        }
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Payload and Envelope
// ---------------------------------------------------------------------------

/// The content of a message: either a session packet or game data.
///
/// `#[serde(tag = "type", content = "data")]` produces adjacently tagged
/// JSON, so the server can tell at a glance whether it must handle the
/// message itself or gate it and hand it to the rules engine:
///   `{ "type": "Session", "data": { "type": "Chat", "message": "hi" } }`
///   `{ "type": "Game", "data": [1, 2, 3] }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Payload {
    /// A session-layer packet (handshake, attach state, chat, votes).
    Session(Packet),

    /// A game packet, opaque to this layer.
    Game(Vec<u8>),
}

/// The top-level message wrapper. Every message on the wire is an Envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Per-direction sequence number, starting at 1.
    pub seq: u64,

    /// Milliseconds since the sender started.
    pub timestamp: u64,

    /// The actual message content.
    pub payload: Payload,
}

impl Envelope {
    /// Wraps a session packet.
    pub fn session(seq: u64, timestamp: u64, packet: Packet) -> Self {
        Self {
            seq,
            timestamp,
            payload: Payload::Session(packet),
        }
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // =====================================================================
    // Identity types
    // =====================================================================

    #[test]
    fn test_player_id_serializes_as_plain_number() {
        let json = serde_json::to_string(&PlayerId(7)).unwrap();
        assert_eq!(json, "7");
    }

    #[test]
    fn test_player_id_display() {
        assert_eq!(PlayerId(3).to_string(), "P-3");
    }

    // =====================================================================
    // AccessLevel
    // =====================================================================

    #[test]
    fn test_access_level_ordering_is_the_ladder() {
        assert!(AccessLevel::None < AccessLevel::Info);
        assert!(AccessLevel::Info < AccessLevel::Basic);
        assert!(AccessLevel::Basic < AccessLevel::Ctrl);
        assert!(AccessLevel::Ctrl < AccessLevel::Admin);
        assert!(AccessLevel::Admin < AccessLevel::Hack);
    }

    #[test]
    fn test_access_level_serializes_lowercase() {
        let json = serde_json::to_string(&AccessLevel::Ctrl).unwrap();
        assert_eq!(json, "\"ctrl\"");
    }

    #[test]
    fn test_access_level_from_name_exact_and_prefix() {
        assert_eq!(AccessLevel::from_name("hack"), Some(AccessLevel::Hack));
        assert_eq!(AccessLevel::from_name("Bas"), Some(AccessLevel::Basic));
        assert_eq!(AccessLevel::from_name("n"), Some(AccessLevel::None));
    }

    #[test]
    fn test_access_level_from_name_rejects_unknown_or_empty() {
        assert_eq!(AccessLevel::from_name("root"), None);
        assert_eq!(AccessLevel::from_name(""), None);
    }

    #[test]
    fn test_access_level_default_is_basic() {
        assert_eq!(AccessLevel::default(), AccessLevel::Basic);
    }

    // =====================================================================
    // Payload / Envelope
    // =====================================================================

    #[test]
    fn test_payload_game_json_format() {
        let payload = Payload::Game(vec![1, 2, 3]);
        let json: serde_json::Value = serde_json::to_value(&payload).unwrap();

        assert_eq!(json["type"], "Game");
        assert_eq!(json["data"], serde_json::json!([1, 2, 3]));
    }

    #[test]
    fn test_envelope_session_json_shape() {
        let env = Envelope::session(
            4,
            100,
            Packet::Chat {
                message: "hello".into(),
            },
        );
        let json: serde_json::Value = serde_json::to_value(&env).unwrap();

        assert_eq!(json["seq"], 4);
        assert_eq!(json["payload"]["type"], "Session");
        assert_eq!(json["payload"]["data"]["type"], "Chat");
        assert_eq!(json["payload"]["data"]["message"], "hello");
    }

    #[test]
    fn test_decode_unknown_packet_type_returns_error() {
        let json = r#"{
            "seq": 1,
            "timestamp": 0,
            "payload": { "type": "Session", "data": { "type": "Teleport" } }
        }"#;
        let result: Result<Envelope, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }
}
