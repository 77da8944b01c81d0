//! Attaching connections to players and detaching them again.
//!
//! This is the core of the session layer. Every change of "who controls
//! or watches which player" goes through [`Session::attach`] or
//! [`Session::detach`], which keep these invariants:
//!
//! - a player has at most one controlling connection;
//! - `Player::is_connected` is true iff a controller is bound;
//! - a connection's current access level is re-derived after each change;
//! - every established connection hears about the change.
//!
//! Removing a player also lives here, since detaching the last controller
//! in pregame frees the player's slot.

use civgate_protocol::{AccessLevel, ConnectionId, EventKind, GamePhase, Packet, PlayerId};

use crate::{
    ANON_USER_NAME, AttachError, Binding, NewPlayer, PlayerError, PlayerMode, Session, Viewer,
};

/// On whose authority a player is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// The session itself: an unused player in pregame, or AI fill.
    Automatic,
    /// A command issued with the given level.
    Explicit(AccessLevel),
}

impl Session {
    /// Binds an unbound connection to a player or to observer status.
    ///
    /// | `player` | `observing` | effect                                  |
    /// |----------|-------------|-----------------------------------------|
    /// | `None`   | `false`     | take any uncontrolled player, or create one in pregame |
    /// | `None`   | `true`      | observe globally (idempotent)           |
    /// | `Some`   | `false`     | become the player's controller          |
    /// | `Some`   | `true`      | observe the player                      |
    ///
    /// On failure nothing has changed.
    ///
    /// # Errors
    /// - [`AttachError::AlreadyBound`] if the connection has a binding.
    ///   This is a caller bug; debug builds panic on it.
    /// - [`AttachError::PlayerControlled`] if another connection controls
    ///   the requested player.
    /// - [`AttachError::GameAlreadyStarted`] / [`AttachError::NoSlotAvailable`]
    ///   when taking any player and none can be found or created.
    pub fn attach(
        &mut self,
        conn: ConnectionId,
        player: Option<PlayerId>,
        observing: bool,
    ) -> Result<(), AttachError> {
        self.attach_real(conn, player, observing, false)
    }

    /// `connecting` is set during the handshake, which sends delegation
    /// info itself once the attach is done.
    pub(crate) fn attach_real(
        &mut self,
        conn: ConnectionId,
        player: Option<PlayerId>,
        observing: bool,
        connecting: bool,
    ) -> Result<(), AttachError> {
        let record = self
            .conns
            .get(conn)
            .ok_or(AttachError::UnknownConnection(conn))?;
        let username = record.username.clone();

        if player.is_none() && observing && record.binding.is_global_observer() {
            return Ok(());
        }
        if !record.binding.is_unbound() {
            tracing::error!(%conn, binding = ?record.binding, "attach on a bound connection");
            debug_assert!(false, "{conn} is already attached");
            return Err(AttachError::AlreadyBound(conn));
        }

        let (binding, took_any) = match (player, observing) {
            (None, true) => (Binding::Observing(None), false),
            (Some(p), observing) => {
                if !self.players.contains(p) {
                    return Err(AttachError::UnknownPlayer(p));
                }
                if !observing && self.conns.controller_of(p).is_some() {
                    return Err(AttachError::PlayerControlled(p));
                }
                (Binding::from_parts(Some(p), observing), false)
            }
            (None, false) => (Binding::Controlling(self.find_or_create_player()?), true),
        };

        if let Some(record) = self.conns.get_mut(conn) {
            record.binding = binding;
        }
        if let Binding::Controlling(p) = binding {
            self.take_player(p, &username, took_any);
        }

        self.restore_access_level(conn);
        self.send_conn_info_all(conn);
        self.flush_after_attach(conn, connecting);
        tracing::info!(%conn, username, ?binding, "connection attached");

        if !self.game.was_started() {
            self.aifill();
        }
        Ok(())
    }

    fn find_or_create_player(&mut self) -> Result<PlayerId, AttachError> {
        if let Some(p) = self.players.find_uncontrolled_player() {
            return Ok(p);
        }
        if self.game.was_started() {
            return Err(AttachError::GameAlreadyStarted);
        }
        let new = NewPlayer {
            is_new_game: self.game.is_new_game,
            ..NewPlayer::human()
        };
        self.players
            .create_player(new, self.create_limits())
            .map_err(|e| {
                tracing::debug!(error = %e, "cannot create a player for take-any");
                AttachError::NoSlotAvailable
            })
    }

    /// Makes `username` the controller of `p`.
    fn take_player(&mut self, p: PlayerId, username: &str, took_any: bool) {
        let pregame = !self.game.was_started();
        let auto_toggle = self.settings.auto_ai_toggle();
        let Some(player) = self.players.get_mut(p) else {
            return;
        };
        player.username = username.to_string();
        player.unassigned_user = false;
        player.user_turns = 0;
        player.is_connected = true;
        if pregame && !player.was_created && player.nation.is_none() {
            player.name = username.to_string();
        }
        if player.is_ai() && (took_any || pregame || auto_toggle) {
            player.mode = PlayerMode::Human;
        }

        // Another player still carrying this username loses it. Players
        // put aside by delegation keep theirs.
        let mut renamed = Vec::new();
        for other in self.players.iter_mut() {
            if other.id != p
                && !other.is_protected()
                && other.username.eq_ignore_ascii_case(username)
            {
                other.username = ANON_USER_NAME.to_string();
                other.unassigned_user = true;
                renamed.push(other.id);
            }
        }
        for other in renamed {
            tracing::debug!(player = %other, username, "username moved to another player");
            self.send_player_info_all(other);
        }
        self.send_player_info_all(p);
    }

    /// Brings a freshly attached connection up to date.
    fn flush_after_attach(&mut self, conn: ConnectionId, connecting: bool) {
        let Some(binding) = self.conns.get(conn).map(|c| c.binding) else {
            return;
        };
        if self.game.phase != GamePhase::Pregame {
            let viewer = match binding.player() {
                Some(p) => Viewer::Player(p),
                None => Viewer::Global,
            };
            let data = self.snapshots.snapshot(viewer, &self.game, &self.players);
            self.outbox.push(crate::Outbound::Snapshot { conn, data });
        }

        let replay: Vec<Packet> = self
            .events
            .replay_for(binding)
            .map(|e| Packet::ChatMessage {
                event: e.kind,
                message: e.message.clone(),
                origin: None,
            })
            .collect();
        for packet in replay {
            self.send(conn, packet);
        }
        self.send_running_votes(conn);

        if self.game.phase != GamePhase::Pregame {
            if !connecting {
                self.send_delegation_info(conn);
            }
            if self.game.phase == GamePhase::Running {
                self.send(conn, self.game.start_phase_packet());
            }
        }
    }

    /// Unbinds a connection. Idempotent.
    ///
    /// When the connection was the last controller of its player, the
    /// player is either removed (`remove_unused_player`, in pregame, not
    /// admin-created, not delegated) or, with `autotoggle`, handed to
    /// the AI.
    pub fn detach(&mut self, conn: ConnectionId, remove_unused_player: bool) {
        let Some(record) = self.conns.get_mut(conn) else {
            return;
        };
        let binding = record.binding;
        if binding.is_unbound() {
            return;
        }
        record.binding = Binding::Unbound;
        let username = record.username.clone();
        self.cancel_votes(conn);

        let mut removed = false;
        if let Binding::Controlling(p) = binding {
            let still_controlled = self.conns.controller_of(p).is_some();
            let started = self.game.was_started();
            let auto_toggle = self.settings.auto_ai_toggle();
            if let Some(player) = self.players.get_mut(p) {
                player.is_connected = still_controlled;
                if !still_controlled {
                    if remove_unused_player
                        && !player.was_created
                        && !player.is_protected()
                        && !started
                    {
                        removed = true;
                    } else if auto_toggle && player.is_human() {
                        player.mode = PlayerMode::Ai;
                    }
                }
            }
            if removed {
                if let Err(e) = self.remove_player(p, Removal::Automatic) {
                    tracing::error!(player = %p, error = %e, "failed to remove unused player");
                }
            } else {
                self.send_player_info_all(p);
            }
        }

        self.restore_access_level(conn);
        self.send_conn_info_all(conn);
        tracing::info!(%conn, username, ?binding, "connection detached");

        if removed && !self.game.was_started() {
            self.aifill();
        }
    }

    /// Frees a player's slot.
    ///
    /// A delegate playing it is sent back first, every connection bound
    /// to it is detached, and saved delegation bindings that point at it
    /// are cleared.
    ///
    /// # Errors
    /// - [`PlayerError::UnknownPlayer`] if the slot is empty.
    /// - [`PlayerError::RemovalForbidden`] after the game has started,
    ///   unless the caller is at least `Admin`.
    pub fn remove_player(&mut self, p: PlayerId, removal: Removal) -> Result<(), PlayerError> {
        if !self.players.contains(p) {
            return Err(PlayerError::UnknownPlayer(p));
        }
        let allowed = match removal {
            Removal::Automatic => !self.game.was_started(),
            Removal::Explicit(level) => !self.game.was_started() || level >= AccessLevel::Admin,
        };
        if !allowed {
            return Err(PlayerError::RemovalForbidden(p));
        }

        if let Some(delegate) = self.conns.delegate_of(p) {
            if let Err(e) = self.delegate_restore(delegate) {
                tracing::error!(%delegate, player = %p, error = %e, "restore before removal failed");
            }
        }
        for record in self.conns.iter_mut() {
            if let Some(saved) = record.delegation.as_mut() {
                if saved.player == Some(p) {
                    saved.player = None;
                }
            }
        }
        // Work list: every connection still bound, then each in turn.
        for conn in self.conns.bound_to(p) {
            self.detach(conn, false);
        }

        let player = self.players.remove_player(p)?;
        tracing::info!(player = %p, name = player.name, "player removed");
        self.broadcast(Packet::PlayerRemove { player: p });
        self.broadcast(Packet::GameInfo(self.game_info()));
        Ok(())
    }

    /// Tops the game up with AI players to the `aifill` setting, or
    /// removes surplus fillers. Pregame only.
    pub fn aifill(&mut self) {
        if self.game.was_started() {
            return;
        }
        let target = self.settings.aifill().min(self.settings.max_players());

        while self.players.normal_player_count() > target {
            let surplus = self
                .players
                .iter()
                .rev()
                .find(|p| {
                    p.is_ai()
                        && !p.is_connected
                        && !p.was_created
                        && !p.barbarian
                        && self.conns.bound_to(p.id).is_empty()
                })
                .map(|p| p.id);
            let Some(p) = surplus else {
                break;
            };
            if self.remove_player(p, Removal::Automatic).is_err() {
                break;
            }
        }

        while self.players.normal_player_count() < target {
            let new = NewPlayer {
                is_new_game: self.game.is_new_game,
                ..NewPlayer::ai()
            };
            let p = match self.players.create_player(new, self.create_limits()) {
                Ok(p) => p,
                Err(e) => {
                    tracing::debug!(error = %e, "aifill stopped");
                    break;
                }
            };
            let name = self.filler_name();
            if let Some(player) = self.players.get_mut(p) {
                player.name = name;
            }
            tracing::debug!(player = %p, "AI filler created");
            self.send_player_info_all(p);
        }
    }

    fn filler_name(&self) -> String {
        (1..)
            .map(|n| format!("AI{n}"))
            .find(|name| self.players.player_by_name(name).is_none())
            .unwrap_or_default()
    }

    /// Drops the votes `conn` started and withdraws its ballots.
    pub(crate) fn cancel_votes(&mut self, conn: ConnectionId) {
        for vote_no in self.votes.cancel_for(conn) {
            self.broadcast(Packet::VoteRemove { vote_no });
        }
    }

    fn send_running_votes(&mut self, conn: ConnectionId) {
        let voters = u32::try_from(self.voters().len()).unwrap_or(u32::MAX);
        let packets: Vec<Packet> = self
            .votes
            .running()
            .iter()
            .flat_map(|v| [v.new_packet(voters), v.update_packet(voters)])
            .collect();
        for packet in packets {
            self.send(conn, packet);
        }
    }

    /// Announces a removal or detach that was forced on a user.
    pub(crate) fn notify_detached(&mut self, conn: ConnectionId, player: PlayerId) {
        let name = self
            .players
            .get(player)
            .map(|p| p.name.clone())
            .unwrap_or_default();
        self.notify_conn(
            conn,
            EventKind::Connection,
            &format!("You are being detached from {name}."),
        );
    }
}
