//! The join handshake and connection teardown.
//!
//! ```text
//! ServerJoinRequest
//!   1. replay check          ─┐
//!   2. capabilities (→ ServerInfo)
//!   3. username syntax        │ any failure: ServerJoinReply{accepted: false}
//!   4. kick table             │              + close
//!   5. duplicate login       ─┘
//!   6. authentication (optional, asynchronous, see complete_auth)
//!   7. establish: reply, state dump, attach, announce
//! ```

use std::time::Instant;

use civgate_protocol::{
    ConnectionId, EventKind, Packet, PlayerId, Version, has_capabilities,
};
use rand::Rng;

use crate::{ANON_USER_NAME, HandshakeState, Outbound, Rejection, Session};

/// Longest username accepted.
pub const MAX_USERNAME_LEN: usize = 48;

/// Names nobody may log in as.
const RESERVED_NAMES: [&str; 2] = [ANON_USER_NAME, "Observer"];

const FORBIDDEN_CHARS: &str = "|%\",*<>";

/// What happened to a join request that was not rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// The connection is established.
    Established,
    /// The authenticator must be asked; call [`Session::complete_auth`]
    /// with its answer.
    AuthRequired,
}

/// Checks the syntax of a username.
pub fn is_valid_username(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_USERNAME_LEN
        && name.chars().all(|c| c.is_ascii_graphic() || c == ' ')
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && !name.chars().any(|c| FORBIDDEN_CHARS.contains(c))
        && !RESERVED_NAMES.iter().any(|r| r.eq_ignore_ascii_case(name))
}

impl Session {
    /// Processes a client's join request.
    ///
    /// A rejection has already been sent and the connection queued for
    /// closing when this returns `Err`.
    pub fn handle_join_request(
        &mut self,
        conn: ConnectionId,
        username: &str,
        capability: &str,
        version: &Version,
        now: Instant,
    ) -> Result<JoinOutcome, Rejection> {
        tracing::debug!(%conn, username, capability, ?version, "join request");
        match self.check_join(conn, username, capability, now) {
            Ok(()) => {}
            Err(rejection) => {
                self.reject(conn, &rejection);
                return Err(rejection);
            }
        }
        if self.config.auth_enabled {
            if let Some(record) = self.conns.get_mut(conn) {
                record.handshake = HandshakeState::AwaitingAuth;
            }
            return Ok(JoinOutcome::AuthRequired);
        }
        self.establish(conn);
        Ok(JoinOutcome::Established)
    }

    fn check_join(
        &mut self,
        conn: ConnectionId,
        username: &str,
        capability: &str,
        now: Instant,
    ) -> Result<(), Rejection> {
        let record = self
            .conns
            .get(conn)
            .ok_or(Rejection::UnknownConnection(conn))?;
        if record.handshake != HandshakeState::NotStarted {
            return Err(Rejection::Replay);
        }
        let addr = record.addr.clone();

        if !has_capabilities(&self.config.capability, capability) {
            return Err(Rejection::MissingClientCapability);
        }
        if !has_capabilities(capability, &self.config.capability) {
            return Err(Rejection::MissingServerCapability);
        }
        self.send(
            conn,
            Packet::ServerInfo {
                version: self.config.server_version.clone(),
                emerg_version: 0,
            },
        );

        let username = username.trim();
        if !is_valid_username(username) {
            return Err(Rejection::InvalidUsername(username.to_string()));
        }
        if let Some(record) = self.conns.get_mut(conn) {
            record.username = username.to_string();
            record.capability = capability.to_string();
        }

        let kick_time = self.settings.kick_time();
        if let Some(remaining) = self.kicks.check(&addr, Some(username), now, kick_time) {
            return Err(Rejection::Kicked { remaining });
        }
        self.check_duplicate(conn, username)
    }

    fn check_duplicate(&self, conn: ConnectionId, username: &str) -> Result<(), Rejection> {
        match self.conns.by_username(username) {
            Some(other) if other != conn => Err(Rejection::DuplicateLogin(username.to_string())),
            _ => Ok(()),
        }
    }

    /// Continues a handshake with the authenticator's answer.
    pub fn complete_auth(
        &mut self,
        conn: ConnectionId,
        accepted: bool,
    ) -> Result<(), Rejection> {
        let record = self
            .conns
            .get(conn)
            .ok_or(Rejection::UnknownConnection(conn))?;
        if record.handshake != HandshakeState::AwaitingAuth {
            tracing::warn!(%conn, "authentication result for a connection not waiting for it");
            return Err(Rejection::Replay);
        }
        let username = record.username.clone();
        let result = if accepted {
            self.check_duplicate(conn, &username)
        } else {
            Err(Rejection::AuthFailed)
        };
        match result {
            Ok(()) => {
                self.establish(conn);
                Ok(())
            }
            Err(rejection) => {
                self.reject(conn, &rejection);
                Err(rejection)
            }
        }
    }

    fn reject(&mut self, conn: ConnectionId, rejection: &Rejection) {
        let Some(record) = self.conns.get_mut(conn) else {
            return;
        };
        if !record.is_established() {
            record.handshake = HandshakeState::Rejected;
        }
        let describe = record.describe();
        tracing::warn!(%conn, client = describe, reason = %rejection, "join rejected");
        let message = rejection.to_string();
        self.send(
            conn,
            Packet::ServerJoinReply {
                accepted: false,
                message: message.clone(),
                capability: self.config.capability.clone(),
                challenge_file: String::new(),
                conn_id: conn.into_inner(),
            },
        );
        self.outbox.push(Outbound::Close {
            conn,
            reason: message,
        });
    }

    fn establish(&mut self, conn: ConnectionId) {
        self.conns.mark_established(conn);

        let first_free = self.first_access_level > self.default_access_level
            && !self.conns.iter().any(|c| {
                c.id != conn
                    && c.is_established()
                    && c.granted_access_level >= self.first_access_level
            });
        let level = if first_free {
            self.first_access_level
        } else {
            self.default_access_level
        };
        let Some(record) = self.conns.get_mut(conn) else {
            return;
        };
        record.granted_access_level = level;
        record.access_level = level;
        let username = record.username.clone();
        let describe = record.describe();
        tracing::info!(%conn, username, %level, "connection established");

        let challenge_file = format!("challenge_{:08x}.sav", rand::rng().random::<u32>());
        self.send(
            conn,
            Packet::ServerJoinReply {
                accepted: true,
                message: format!("{username} Welcome"),
                capability: self.config.capability.clone(),
                challenge_file,
                conn_id: conn.into_inner(),
            },
        );
        if first_free {
            self.notify_conn(
                conn,
                EventKind::Connection,
                &format!("You have been granted '{level}' access level as the first connection."),
            );
        }
        let connect_message = self.settings.connect_message().to_string();
        if !connect_message.is_empty() {
            self.notify_conn(conn, EventKind::Connection, &connect_message);
        }

        self.send_state_dump(conn);

        // Tell the newcomer who else is here.
        let others: Vec<Packet> = self
            .conns
            .established()
            .iter()
            .filter(|c| **c != conn)
            .filter_map(|c| self.conns.get(*c))
            .map(|c| Packet::ConnectionInfo(c.info()))
            .collect();
        let players: Vec<Packet> = self
            .players
            .iter()
            .map(|p| Packet::PlayerInfo(p.info()))
            .collect();
        for packet in others.into_iter().chain(players) {
            self.send(conn, packet);
        }

        // A delegate playing this user's player hands it back first.
        if let Some(p) = self.players.delegated_player_of(&username) {
            self.force_restore_delegate(p, &username);
        }

        self.attach_on_connect(conn, &username);
        self.send_delegation_info(conn);
        if self
            .conns
            .get(conn)
            .is_some_and(|c| c.binding.is_unbound())
        {
            self.send_conn_info_all(conn);
        }
        self.notify_others(
            Some(conn),
            EventKind::Connection,
            &format!("{describe} has connected."),
        );
    }

    /// Rulesets, setting control, settings, scenario info, scenario
    /// description, game info, topology. Clients depend on this order.
    fn send_state_dump(&mut self, conn: ConnectionId) {
        let Some(level) = self.conns.get(conn).map(|c| c.access_level) else {
            return;
        };
        let mut dump = vec![
            self.game.ruleset_packet(),
            Packet::SettingControl {
                settings_num: u32::try_from(self.settings.count()).unwrap_or(u32::MAX),
                categories: self.settings.categories(),
            },
        ];
        dump.extend(
            self.settings
                .names()
                .filter_map(|name| self.settings.info_for(name, level))
                .map(Packet::Setting),
        );
        dump.extend(self.game.scenario_packets());
        dump.push(Packet::GameInfo(self.game_info()));
        dump.push(self.game.topology_packet());
        for packet in dump {
            self.send(conn, packet);
        }
    }

    fn force_restore_delegate(&mut self, p: PlayerId, owner: &str) {
        let Some(delegate) = self.conns.delegate_of(p) else {
            return;
        };
        match self.delegate_restore(delegate) {
            Ok(()) => {
                tracing::info!(%delegate, player = %p, owner, "delegate restored for returning owner");
                self.notify_conn(
                    delegate,
                    EventKind::Delegation,
                    &format!("User '{owner}' is back; control of their player was returned."),
                );
            }
            Err(e) => {
                tracing::error!(%delegate, player = %p, error = %e, "could not restore delegate");
            }
        }
    }

    /// Reconnects a user to their player, or gives them a new one in
    /// pregame.
    fn attach_on_connect(&mut self, conn: ConnectionId, username: &str) {
        if let Some(p) = self.players.player_by_user(username) {
            match self.attach_real(conn, Some(p), false, true) {
                Ok(()) => return,
                Err(e) => tracing::debug!(%conn, player = %p, error = %e, "reconnect attach failed"),
            }
        }
        if self.game.was_started() {
            return;
        }
        if let Err(e) = self.attach_real(conn, None, false, true) {
            tracing::warn!(%conn, error = %e, "no player for new connection");
            self.notify_conn(
                conn,
                EventKind::Connection,
                "Couldn't attach your connection to new player.",
            );
        }
    }

    /// Closes a connection on the server's initiative: the transport is
    /// told to close and the session forgets the connection right away.
    pub fn close_connection(&mut self, conn: ConnectionId, reason: &str) {
        if !self.conns.contains(conn) {
            return;
        }
        tracing::info!(%conn, reason, "closing connection");
        self.outbox.push(Outbound::Close {
            conn,
            reason: reason.to_string(),
        });
        self.connection_lost(conn);
    }

    /// Cleans up after a connection whose transport is gone.
    ///
    /// An active delegation is restored first, then the connection is
    /// detached (removing an unused pregame player) and forgotten.
    pub fn connection_lost(&mut self, conn: ConnectionId) {
        let Some(record) = self.conns.get(conn) else {
            return;
        };
        let delegating = record.delegation.is_some();
        let was_established = record.is_established();
        let describe = record.describe();

        if delegating {
            if let Err(e) = self.delegate_restore(conn) {
                tracing::error!(%conn, error = %e, "restore on close failed");
            }
        }
        self.detach(conn, true);
        // An unbound connection skipped the cancellation inside `detach`.
        self.cancel_votes(conn);

        let Some(record) = self.conns.remove(conn) else {
            return;
        };
        tracing::info!(%conn, client = describe, "connection lost");
        if was_established {
            self.broadcast(Packet::ConnectionInfo(record.removed_info()));
            self.notify_all(
                EventKind::Connection,
                &format!("Lost connection: {describe}."),
            );
            self.recheck_votes();
        }
    }

    /// Bans the address of `target` and every user connected from it,
    /// then closes those connections.
    pub fn kick(&mut self, target: ConnectionId, now: Instant) {
        let Some(addr) = self.conns.get(target).map(|c| c.addr.clone()) else {
            return;
        };
        self.kicks.purge(now, self.settings.kick_time());
        self.kicks.kick_addr(&addr, now);
        let victims: Vec<(ConnectionId, String)> = self
            .conns
            .iter()
            .filter(|c| c.addr == addr)
            .map(|c| (c.id, c.username.clone()))
            .collect();
        for (conn, username) in victims {
            if !username.is_empty() {
                self.kicks.kick_user(&username, now);
            }
            tracing::info!(%conn, username, addr, "kicked");
            self.close_connection(conn, "You have been kicked from the server.");
        }
    }
}
