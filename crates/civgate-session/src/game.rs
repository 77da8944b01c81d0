//! The slice of game state the session layer needs.
//!
//! Rules, units and maps belong to the rules engine. The session only
//! tracks the phase (pregame, running, over), the turn counters, and the
//! descriptive data it has to dump to every new connection. Snapshots of
//! the full game are produced by a [`SnapshotSource`] supplied by the
//! engine.

use civgate_protocol::{GamePhase, Packet, PlayerId, PlayerInfo};
use serde::{Deserialize, Serialize};

use crate::PlayerSlots;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RulesetSummary {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    pub xsize: u32,
    pub ysize: u32,
    pub wrap: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameState {
    pub phase: GamePhase,
    /// False once a saved game has been loaded.
    pub is_new_game: bool,
    pub turn: u32,
    pub year: i32,
    /// Phase number within the current turn.
    pub phase_no: u32,
    pub ruleset: RulesetSummary,
    pub scenario: Option<Scenario>,
    pub topology: Topology,
}

impl Default for GameState {
    fn default() -> Self {
        Self {
            phase: GamePhase::Pregame,
            is_new_game: true,
            turn: 0,
            year: -4000,
            phase_no: 0,
            ruleset: RulesetSummary {
                name: "classic".into(),
                version: "3.1".into(),
            },
            scenario: None,
            topology: Topology {
                xsize: 64,
                ysize: 48,
                wrap: "wrapx".into(),
            },
        }
    }
}

impl GameState {
    /// True once play has begun, or when the game was loaded from a save.
    pub fn was_started(&self) -> bool {
        !self.is_new_game || self.phase != GamePhase::Pregame
    }

    pub fn ruleset_packet(&self) -> Packet {
        Packet::RulesetInfo {
            name: self.ruleset.name.clone(),
            version: self.ruleset.version.clone(),
        }
    }

    pub fn scenario_packets(&self) -> [Packet; 2] {
        match &self.scenario {
            Some(s) => [
                Packet::ScenarioInfo {
                    is_scenario: true,
                    name: s.name.clone(),
                },
                Packet::ScenarioDescription {
                    description: s.description.clone(),
                },
            ],
            None => [
                Packet::ScenarioInfo {
                    is_scenario: false,
                    name: String::new(),
                },
                Packet::ScenarioDescription {
                    description: String::new(),
                },
            ],
        }
    }

    pub fn topology_packet(&self) -> Packet {
        Packet::MapTopology {
            xsize: self.topology.xsize,
            ysize: self.topology.ysize,
            wrap: self.topology.wrap.clone(),
        }
    }

    pub fn start_phase_packet(&self) -> Packet {
        Packet::StartPhase {
            phase: self.phase_no,
            turn: self.turn,
        }
    }
}

/// Whose eyes a snapshot is rendered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Viewer {
    Player(PlayerId),
    Global,
}

/// Produces the full-state snapshot sent to a connection that attaches
/// to a running or finished game.
///
/// The returned bytes are frozen: the server may compress them on another
/// thread after the session has moved on.
pub trait SnapshotSource: Send {
    fn snapshot(&self, viewer: Viewer, game: &GameState, players: &PlayerSlots) -> Vec<u8>;
}

/// Snapshot of the public player table, used when no rules engine is
/// plugged in.
#[derive(Debug, Clone, Copy, Default)]
pub struct PublicSnapshot;

#[derive(Serialize)]
struct PublicView<'a> {
    turn: u32,
    year: i32,
    viewer: Option<PlayerId>,
    players: Vec<PlayerInfo>,
    ruleset: &'a str,
}

impl SnapshotSource for PublicSnapshot {
    fn snapshot(&self, viewer: Viewer, game: &GameState, players: &PlayerSlots) -> Vec<u8> {
        let view = PublicView {
            turn: game.turn,
            year: game.year,
            viewer: match viewer {
                Viewer::Player(p) => Some(p),
                Viewer::Global => None,
            },
            players: players.iter().map(|p| p.info()).collect(),
            ruleset: &game.ruleset.name,
        };
        match serde_json::to_vec(&view) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize public snapshot");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_was_started_follows_phase_and_loaded_flag() {
        let mut game = GameState::default();
        assert!(!game.was_started());

        game.phase = GamePhase::Running;
        assert!(game.was_started());

        game.phase = GamePhase::Pregame;
        game.is_new_game = false;
        assert!(game.was_started());
    }

    #[test]
    fn test_scenario_packets_without_scenario() {
        let game = GameState::default();
        let [info, desc] = game.scenario_packets();
        assert_eq!(
            info,
            Packet::ScenarioInfo {
                is_scenario: false,
                name: String::new()
            }
        );
        assert!(matches!(desc, Packet::ScenarioDescription { .. }));
    }

    #[test]
    fn test_public_snapshot_is_json_with_viewer() {
        let game = GameState::default();
        let players = PlayerSlots::new(2);
        let bytes = PublicSnapshot.snapshot(Viewer::Player(PlayerId(1)), &game, &players);
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["viewer"], 1);
        assert_eq!(json["ruleset"], "classic");
        assert!(json["players"].as_array().unwrap().is_empty());
    }
}
