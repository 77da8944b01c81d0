//! The session context.
//!
//! [`Session`] owns every registry of the subsystem: the player slots, the
//! connection arena, the kick table, running votes, the event cache, the
//! settings and the slice of game state the session needs. There are no
//! globals; a test builds its own `Session` and drives it directly.
//!
//! # Single owner, no locks
//!
//! The session is plain data with `&mut self` methods. The server keeps
//! it inside one actor task and feeds it events one at a time, so each
//! attach, detach or delegation runs to completion before the next event
//! is looked at.
//!
//! # The outbox
//!
//! Nothing in here touches a socket. Every packet, snapshot and close is
//! appended to an outbox as an [`Outbound`] item. After each event the
//! owner calls [`Session::drain_outbox`] and delivers the items in order:
//!
//! ```text
//! event ──→ Session (mutates state, fills outbox) ──→ drain_outbox() ──→ writers
//! ```

use std::time::Instant;

use civgate_protocol::{
    AccessLevel, ConnectionId, EventKind, GameInfo, GamePhase, Packet, PlayerId,
    SERVER_CAPABILITY, Version,
};
use serde::{Deserialize, Serialize};

use crate::{
    Connections, ConnectionRecord, CreateLimits, EventCache, EventTarget, GameState,
    KickRegistry, Outbound, PlayerSlots, PublicSnapshot, SettingChange, SettingValue,
    Settings, SettingsError, SettingsObserver, SnapshotSource, VoteRegistry,
};

/// Static configuration of a session.
///
/// `#[serde(default)]` lets a config file name only the fields it
/// changes; everything else keeps the value from `Default`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Size of the player table.
    pub slot_count: usize,
    /// Nations that may be played under the loaded nation set.
    pub playable_nations: usize,
    /// Ask the authenticator before establishing a connection.
    pub auth_enabled: bool,
    /// Level granted to every new connection.
    pub default_access_level: AccessLevel,
    /// Level granted to a newcomer while nobody holds it.
    pub first_access_level: AccessLevel,
    /// Notifications kept for replay.
    pub event_cache_size: usize,
    pub server_version: Version,
    pub capability: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            slot_count: 64,
            playable_nations: 64,
            auth_enabled: false,
            default_access_level: AccessLevel::Basic,
            first_access_level: AccessLevel::Ctrl,
            event_cache_size: 256,
            server_version: Version {
                major: 0,
                minor: 1,
                patch: 0,
                label: "civgate".into(),
            },
            capability: SERVER_CAPABILITY.to_string(),
        }
    }
}

/// The whole connection and session state of one game server.
pub struct Session {
    pub(crate) config: SessionConfig,
    pub(crate) settings: Settings,
    pub(crate) game: GameState,
    pub(crate) players: PlayerSlots,
    pub(crate) conns: Connections,
    pub(crate) kicks: KickRegistry,
    pub(crate) votes: VoteRegistry,
    pub(crate) events: EventCache,
    /// Level granted to new connections; `/cmdlevel <level> new` changes it.
    pub(crate) default_access_level: AccessLevel,
    /// `/cmdlevel <level> first` changes it.
    pub(crate) first_access_level: AccessLevel,
    observers: Vec<Box<dyn SettingsObserver + Send>>,
    pub(crate) snapshots: Box<dyn SnapshotSource>,
    pub(crate) outbox: Vec<Outbound>,
    started_at: Instant,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        Self::with_settings(config, Settings::default())
    }

    /// Creates a session whose settings were loaded from configuration.
    pub fn with_settings(config: SessionConfig, settings: Settings) -> Self {
        Self {
            players: PlayerSlots::new(config.slot_count),
            events: EventCache::new(config.event_cache_size),
            default_access_level: config.default_access_level,
            first_access_level: config.first_access_level,
            config,
            settings,
            game: GameState::default(),
            conns: Connections::default(),
            kicks: KickRegistry::new(),
            votes: VoteRegistry::default(),
            observers: Vec::new(),
            snapshots: Box::new(PublicSnapshot),
            outbox: Vec::new(),
            started_at: Instant::now(),
        }
    }

    /// Replaces the snapshot producer (the rules engine plugs in here).
    pub fn set_snapshot_source(&mut self, source: Box<dyn SnapshotSource>) {
        self.snapshots = source;
    }

    /// Registers someone to be told about setting changes.
    pub fn add_settings_observer(&mut self, observer: Box<dyn SettingsObserver + Send>) {
        self.observers.push(observer);
    }

    // -- Accessors --

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn game(&self) -> &GameState {
        &self.game
    }

    /// Direct access for the savegame loader and the rules engine.
    pub fn game_mut(&mut self) -> &mut GameState {
        &mut self.game
    }

    pub fn players(&self) -> &PlayerSlots {
        &self.players
    }

    pub fn connections(&self) -> &Connections {
        &self.conns
    }

    pub fn connection(&self, conn: ConnectionId) -> Option<&ConnectionRecord> {
        self.conns.get(conn)
    }

    pub fn kicks(&self) -> &KickRegistry {
        &self.kicks
    }

    pub fn votes(&self) -> &VoteRegistry {
        &self.votes
    }

    pub fn events(&self) -> &EventCache {
        &self.events
    }

    pub fn default_access_level(&self) -> AccessLevel {
        self.default_access_level
    }

    pub fn first_access_level(&self) -> AccessLevel {
        self.first_access_level
    }

    /// Takes everything queued for delivery since the last call.
    pub fn drain_outbox(&mut self) -> Vec<Outbound> {
        std::mem::take(&mut self.outbox)
    }

    /// Connections watching the whole game.
    pub fn global_observers(&self) -> Vec<ConnectionId> {
        self.conns
            .iter()
            .filter(|c| c.binding.is_global_observer())
            .map(|c| c.id)
            .collect()
    }

    // -- Transport events --

    /// Registers a connection the transport just accepted.
    pub fn accept_connection(&mut self, conn: ConnectionId, addr: &str) {
        tracing::debug!(%conn, addr, "connection accepted");
        self.conns.insert(ConnectionRecord::new(conn, addr));
    }

    /// Answers a keep-alive.
    pub fn heartbeat(&mut self, conn: ConnectionId, client_time: u64, now: Instant) {
        let Some(record) = self.conns.get_mut(conn) else {
            return;
        };
        if let Some(last) = record.ping.last_heartbeat {
            record.ping.round_trip = Some(now.saturating_duration_since(last));
        }
        record.ping.last_heartbeat = Some(now);
        let server_time =
            u64::try_from(now.saturating_duration_since(self.started_at).as_millis())
                .unwrap_or(u64::MAX);
        self.send(
            conn,
            Packet::HeartbeatAck {
                client_time,
                server_time,
            },
        );
    }

    /// A chat line from a client. Lines starting with `/` are commands.
    pub fn chat(&mut self, conn: ConnectionId, message: &str, now: Instant) {
        let Some(record) = self.conns.get(conn) else {
            return;
        };
        if !record.is_established() {
            return;
        }
        let message = message.trim();
        if message.is_empty() {
            return;
        }
        if let Some(command) = message.strip_prefix('/') {
            self.execute_command(Some(conn), command, now);
            return;
        }

        let (sender, addr) = (record.username.clone(), record.addr.clone());
        let line = format!("<{sender}> {message}");
        let listeners: Vec<ConnectionId> = self
            .conns
            .established()
            .iter()
            .copied()
            .filter(|c| {
                self.conns
                    .get(*c)
                    .is_some_and(|r| !r.is_ignoring(&sender, &addr))
            })
            .collect();
        for listener in listeners {
            self.send(
                listener,
                Packet::ChatMessage {
                    event: EventKind::Chat,
                    message: line.clone(),
                    origin: Some(conn.into_inner()),
                },
            );
        }
        self.events
            .add(EventTarget::Everyone, EventKind::Chat, &line, self.game.turn);
    }

    // -- Game phase --

    /// Moves the game out of pregame.
    pub fn start_game(&mut self) {
        if self.game.phase != GamePhase::Pregame {
            return;
        }
        self.game.phase = GamePhase::Running;
        self.game.turn = 1;
        tracing::info!(players = self.players.player_count(), "game started");
        self.broadcast(Packet::GameInfo(self.game_info()));
        self.broadcast(self.game.start_phase_packet());
        self.notify_all(EventKind::Report, "The game has started.");
    }

    pub fn end_game(&mut self) {
        if self.game.phase == GamePhase::Over {
            return;
        }
        self.game.phase = GamePhase::Over;
        tracing::info!(turn = self.game.turn, "game over");
        self.broadcast(Packet::GameInfo(self.game_info()));
        self.notify_all(EventKind::Report, "Game ended.");
    }

    pub fn game_info(&self) -> GameInfo {
        GameInfo {
            phase: self.game.phase,
            turn: self.game.turn,
            year: self.game.year,
            max_players: u32::try_from(self.settings.max_players()).unwrap_or(u32::MAX),
            player_count: u32::try_from(self.players.player_count()).unwrap_or(u32::MAX),
            global_observers: u32::try_from(self.global_observers().len())
                .unwrap_or(u32::MAX),
        }
    }

    pub(crate) fn create_limits(&self) -> CreateLimits {
        CreateLimits {
            max_players: self.settings.max_players(),
            playable_nations: self.config.playable_nations,
        }
    }

    // -- Settings --

    /// Changes a setting on behalf of someone with `level`, tells every
    /// connection that may see it, and reacts to the new value.
    pub fn change_setting(
        &mut self,
        name: &str,
        raw: &str,
        level: AccessLevel,
    ) -> Result<SettingChange, SettingsError> {
        let change = self.settings.set(name, raw, level)?;
        tracing::info!(setting = change.name, old = %change.old, new = %change.new, "setting changed");

        for conn in self.conns.established().to_vec() {
            let Some(level) = self.conns.get(conn).map(|c| c.access_level) else {
                continue;
            };
            if let Some(info) = self.settings.info_for(change.name, level) {
                self.send(conn, Packet::Setting(info));
            }
        }
        self.notify_all(
            EventKind::Setting,
            &format!("Option: {} has been set to {}.", change.name, change.new),
        );

        self.on_setting_changed(change.name, &change.new);
        for observer in &mut self.observers {
            observer.on_setting_changed(change.name, &change.new);
        }
        Ok(change)
    }

    fn on_setting_changed(&mut self, name: &str, value: &SettingValue) {
        match (name, value) {
            ("autotoggle", SettingValue::Bool(true)) => self.apply_auto_toggle(),
            ("aifill" | "maxplayers", _) if !self.game.was_started() => self.aifill(),
            _ => {}
        }
    }

    /// Hands uncontrolled humans to the AI and controlled AIs back to
    /// their users.
    fn apply_auto_toggle(&mut self) {
        let mut toggled = Vec::new();
        for player in self.players.iter_mut() {
            if player.is_connected == player.is_ai() {
                player.mode = if player.is_connected {
                    crate::PlayerMode::Human
                } else {
                    crate::PlayerMode::Ai
                };
                toggled.push(player.id);
            }
        }
        for id in toggled {
            self.send_player_info_all(id);
        }
    }

    // -- Delivery helpers --

    pub(crate) fn send(&mut self, conn: ConnectionId, packet: Packet) {
        self.outbox.push(Outbound::Packet { conn, packet });
    }

    /// Sends to every established connection.
    pub(crate) fn broadcast(&mut self, packet: Packet) {
        for conn in self.conns.established().to_vec() {
            self.send(conn, packet.clone());
        }
    }

    /// A message for one connection only, not cached.
    pub(crate) fn notify_conn(&mut self, conn: ConnectionId, kind: EventKind, message: &str) {
        self.send(
            conn,
            Packet::ChatMessage {
                event: kind,
                message: message.to_string(),
                origin: None,
            },
        );
    }

    /// A message for everyone, kept in the event cache.
    pub(crate) fn notify_all(&mut self, kind: EventKind, message: &str) {
        self.notify_others(None, kind, message);
    }

    /// A message for everyone but `except`, kept in the event cache.
    pub(crate) fn notify_others(
        &mut self,
        except: Option<ConnectionId>,
        kind: EventKind,
        message: &str,
    ) {
        for conn in self.conns.established().to_vec() {
            if Some(conn) != except {
                self.notify_conn(conn, kind, message);
            }
        }
        self.events
            .add(EventTarget::Everyone, kind, message, self.game.turn);
    }

    /// A message for the connections of one player, kept in the cache.
    pub(crate) fn notify_player(&mut self, player: PlayerId, kind: EventKind, message: &str) {
        for conn in self.conns.bound_to(player) {
            self.notify_conn(conn, kind, message);
        }
        self.events
            .add(EventTarget::Player(player), kind, message, self.game.turn);
    }

    /// Announces the current state of `conn` to every established
    /// connection.
    pub(crate) fn send_conn_info_all(&mut self, conn: ConnectionId) {
        if let Some(info) = self.conns.get(conn).map(ConnectionRecord::info) {
            self.broadcast(Packet::ConnectionInfo(info));
        }
    }

    pub(crate) fn send_player_info_all(&mut self, player: PlayerId) {
        if let Some(info) = self.players.get(player).map(|p| p.info()) {
            self.broadcast(Packet::PlayerInfo(info));
        }
    }

    pub(crate) fn send_delegation_info(&mut self, conn: ConnectionId) {
        let info = self.delegation_info(conn);
        self.send(conn, Packet::DelegationInfo(info));
    }

    /// Sends the settings whose visibility or changeability differs
    /// between `old` and `new`, as seen at `new`.
    pub(crate) fn send_settings_visibility(
        &mut self,
        conn: ConnectionId,
        old: AccessLevel,
        new: AccessLevel,
    ) {
        if !self.conns.get(conn).is_some_and(ConnectionRecord::is_established) {
            return;
        }
        for name in self.settings.visibility_changes(old, new) {
            if let Some(info) = self.settings.info_for(name, new) {
                self.send(conn, Packet::Setting(info));
            }
        }
    }

    /// Connections allowed to vote.
    pub(crate) fn voters(&self) -> Vec<ConnectionId> {
        self.conns
            .established()
            .iter()
            .copied()
            .filter(|c| {
                self.conns
                    .get(*c)
                    .is_some_and(|r| r.access_level >= AccessLevel::Basic)
            })
            .collect()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("phase", &self.game.phase)
            .field("players", &self.players.player_count())
            .field("connections", &self.conns.len())
            .field("outbox", &self.outbox.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new(SessionConfig::default())
    }

    #[test]
    fn test_session_config_deserializes_with_defaults() {
        let config: SessionConfig =
            serde_json::from_str(r#"{ "slot_count": 8, "auth_enabled": true }"#).unwrap();
        assert_eq!(config.slot_count, 8);
        assert!(config.auth_enabled);
        assert_eq!(config.default_access_level, AccessLevel::Basic);
        assert_eq!(config.capability, SERVER_CAPABILITY);
    }

    #[test]
    fn test_heartbeat_replies_with_ack() {
        let mut s = session();
        let conn = ConnectionId::new(1);
        s.accept_connection(conn, "127.0.0.1");
        s.heartbeat(conn, 42, Instant::now());

        let out = s.drain_outbox();
        assert!(matches!(
            out.as_slice(),
            [Outbound::Packet {
                packet: Packet::HeartbeatAck { client_time: 42, .. },
                ..
            }]
        ));
        assert!(s.connection(conn).unwrap().ping.last_heartbeat.is_some());
    }

    #[test]
    fn test_drain_outbox_empties_it() {
        let mut s = session();
        s.accept_connection(ConnectionId::new(1), "127.0.0.1");
        s.heartbeat(ConnectionId::new(1), 1, Instant::now());
        assert_eq!(s.drain_outbox().len(), 1);
        assert!(s.drain_outbox().is_empty());
    }

    #[test]
    fn test_chat_from_unestablished_connection_is_dropped() {
        let mut s = session();
        s.accept_connection(ConnectionId::new(1), "127.0.0.1");
        s.chat(ConnectionId::new(1), "hello", Instant::now());
        assert!(s.drain_outbox().is_empty());
    }

    #[test]
    fn test_start_game_moves_to_running() {
        let mut s = session();
        s.start_game();
        assert_eq!(s.game().phase, GamePhase::Running);
        assert_eq!(s.game().turn, 1);
        assert!(s.game().was_started());
    }
}
