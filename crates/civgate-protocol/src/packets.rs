//! Session-layer packets.
//!
//! [`Packet`] is the closed set of messages the session layer sends or
//! accepts. Game packets do not appear here; they travel as opaque
//! [`Payload::Game`](crate::Payload::Game) bytes.
//!
//! `#[serde(tag = "type")]` gives internally tagged JSON, e.g.
//! `{ "type": "PlayerRemove", "player": 3 }`. Variants wrapping a struct
//! are flattened the same way, so `Packet::ConnectionInfo(info)` becomes
//! `{ "type": "ConnectionInfo", "id": 1, "used": true, ... }`.

use serde::{Deserialize, Serialize};

use crate::{AccessLevel, NationId, PlayerId};

/// Lifecycle phase of the game, as seen by clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GamePhase {
    /// Players are gathering; nothing has been played yet.
    #[default]
    Pregame,
    /// Turns are being played.
    Running,
    /// The game ended; the final state can still be inspected.
    Over,
}

/// Version triple plus free-form label, sent by both sides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    #[serde(default)]
    pub label: String,
}

/// Player colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

/// Category of a server-to-client chat message.
///
/// Clients use this to filter and colour messages; the event cache uses it
/// to decide what is worth replaying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Someone connected, disconnected, attached or detached.
    Connection,
    /// Public chat.
    Chat,
    /// Reply to a command, only visible to its issuer.
    CommandReply,
    /// A game setting changed.
    Setting,
    /// Delegation was granted, taken, restored or cancelled.
    Delegation,
    /// A vote was started or resolved.
    Vote,
    /// Player created, removed, renamed or toggled between human and AI.
    Player,
    /// Generic server report.
    Report,
}

/// Public view of one connection.
///
/// A connection that went away is announced once more with
/// `used: false`; clients drop their copy when they see that.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub id: u64,
    pub used: bool,
    pub established: bool,
    pub observer: bool,
    /// The player this connection is bound to; `None` means global
    /// observer or not attached.
    pub player: Option<PlayerId>,
    pub access_level: AccessLevel,
    pub username: String,
    pub addr: String,
    pub capability: String,
}

/// Public view of one player slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub id: PlayerId,
    pub name: String,
    pub username: String,
    pub unassigned_user: bool,
    pub is_connected: bool,
    pub is_alive: bool,
    pub ai: bool,
    pub barbarian: bool,
    pub nation: Option<NationId>,
    pub team: u16,
    pub color: Rgb,
    pub was_created: bool,
    /// Username allowed to take this player over, if any.
    pub delegate_to: Option<String>,
    /// True while the player is being played by a delegate or has been
    /// put aside by its delegating owner.
    pub delegated: bool,
}

/// Delegation status from one connection's point of view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DelegationInfo {
    /// The connection's own player, if it controls one.
    pub own_player: Option<PlayerId>,
    /// Who the own player is delegated to.
    pub delegate_to: Option<String>,
    /// The player this connection is currently playing as a delegate.
    pub delegated_player: Option<PlayerId>,
    /// Players whose owners have delegated them to this user.
    pub delegators: Vec<PlayerId>,
}

/// One game setting, as shown to a particular connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingInfo {
    pub name: String,
    /// The current value; empty when `visible` is false.
    pub value: String,
    pub help: String,
    pub visible: bool,
    /// Whether the receiving connection may change it.
    pub changeable: bool,
}

/// Summary of the game, sent during the handshake and on phase changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameInfo {
    pub phase: GamePhase,
    pub turn: u32,
    pub year: i32,
    pub max_players: u32,
    pub player_count: u32,
    pub global_observers: u32,
}

/// Every session-layer message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Packet {
    // -- Handshake --
    /// Client → Server: first packet on a fresh connection.
    ServerJoinRequest {
        username: String,
        capability: String,
        version: Version,
    },

    /// Server → Client: accepted or rejected, with a human-readable reason.
    ServerJoinReply {
        accepted: bool,
        message: String,
        capability: String,
        challenge_file: String,
        conn_id: u64,
    },

    /// Server → Client: the server's version, sent once capabilities match.
    ServerInfo {
        version: Version,
        emerg_version: u32,
    },

    // -- Connection and player state --
    ConnectionInfo(ConnectionInfo),
    PlayerInfo(PlayerInfo),
    PlayerRemove { player: PlayerId },
    DelegationInfo(DelegationInfo),

    // -- Chat --
    /// Server → Client: a notification or chat line.
    ChatMessage {
        event: EventKind,
        message: String,
        /// The connection that said it, for chat from users.
        origin: Option<u64>,
    },

    /// Client → Server: a chat line. Lines starting with `/` are commands.
    Chat { message: String },

    // -- State dump --
    RulesetInfo { name: String, version: String },
    SettingControl {
        settings_num: u32,
        categories: Vec<String>,
    },
    Setting(SettingInfo),
    ScenarioInfo { is_scenario: bool, name: String },
    ScenarioDescription { description: String },
    GameInfo(GameInfo),
    MapTopology {
        xsize: u32,
        ysize: u32,
        wrap: String,
    },
    /// Full game state for a freshly attached connection.
    GameSnapshot { compressed: bool, data: Vec<u8> },
    StartPhase { phase: u32, turn: u32 },

    // -- Votes --
    VoteNew {
        vote_no: u32,
        user: String,
        description: String,
        voters: u32,
    },
    VoteUpdate {
        vote_no: u32,
        yes: u32,
        no: u32,
        abstain: u32,
        voters: u32,
    },
    VoteResolve { vote_no: u32, passed: bool },
    VoteRemove { vote_no: u32 },

    // -- Keep-alive --
    Heartbeat { client_time: u64 },
    HeartbeatAck {
        client_time: u64,
        server_time: u64,
    },

    /// Either direction: the connection is about to close.
    Disconnect { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_join_request_json_format() {
        let json = r#"{
            "type": "ServerJoinRequest",
            "username": "alice",
            "capability": "+civgate-1.0 ping",
            "version": { "major": 3, "minor": 1, "patch": 0 }
        }"#;
        let packet: Packet = serde_json::from_str(json).unwrap();
        match packet {
            Packet::ServerJoinRequest {
                username,
                capability,
                version,
            } => {
                assert_eq!(username, "alice");
                assert_eq!(capability, "+civgate-1.0 ping");
                assert_eq!(version.major, 3);
                assert!(version.label.is_empty());
            }
            other => panic!("expected ServerJoinRequest, got {other:?}"),
        }
    }

    #[test]
    fn test_connection_info_is_flattened_under_type_tag() {
        let packet = Packet::ConnectionInfo(ConnectionInfo {
            id: 5,
            used: true,
            established: true,
            observer: false,
            player: Some(PlayerId(2)),
            access_level: AccessLevel::Basic,
            username: "bob".into(),
            addr: "10.0.0.1".into(),
            capability: String::new(),
        });
        let json: serde_json::Value = serde_json::to_value(&packet).unwrap();

        assert_eq!(json["type"], "ConnectionInfo");
        assert_eq!(json["id"], 5);
        assert_eq!(json["player"], 2);
        assert_eq!(json["access_level"], "basic");
    }

    #[test]
    fn test_connection_info_unbound_player_is_null() {
        let packet = Packet::ConnectionInfo(ConnectionInfo {
            id: 1,
            used: false,
            established: false,
            observer: false,
            player: None,
            access_level: AccessLevel::None,
            username: String::new(),
            addr: String::new(),
            capability: String::new(),
        });
        let json: serde_json::Value = serde_json::to_value(&packet).unwrap();
        assert!(json["player"].is_null());
        assert_eq!(json["used"], false);
    }

    #[test]
    fn test_chat_message_event_kind_is_snake_case() {
        let packet = Packet::ChatMessage {
            event: EventKind::CommandReply,
            message: "ok".into(),
            origin: None,
        };
        let json: serde_json::Value = serde_json::to_value(&packet).unwrap();
        assert_eq!(json["event"], "command_reply");
    }

    #[test]
    fn test_game_phase_serializes_lowercase() {
        let json = serde_json::to_string(&GamePhase::Running).unwrap();
        assert_eq!(json, "\"running\"");
    }
}
