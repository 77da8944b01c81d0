//! The session actor: one task that owns the [`Session`].
//!
//! Connection tasks never touch the session. They send [`ServerEvent`]s
//! into one channel; the actor applies them one at a time and hands the
//! resulting outbox to each connection's writer. An attach, detach or
//! delegation therefore always runs to completion before the next event
//! is looked at, without any lock.
//!
//! ```text
//! reader tasks ──ServerEvent──→ actor (Session) ──Outgoing──→ writer tasks
//!                  console ──↗       │
//!            authenticator ←─spawn───┘ (answer comes back as AuthResult)
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use civgate_protocol::{ConnectionId, Packet};
use civgate_session::{Authenticator, CommandOutcome, JoinOutcome, Outbound, Session};
use tokio::sync::{mpsc, oneshot};

use crate::rules::{Recipient, RulesEngine};

/// Everything the actor reacts to.
#[derive(Debug)]
pub(crate) enum ServerEvent {
    /// The transport accepted a connection; `outgoing` feeds its writer.
    Connected {
        conn: ConnectionId,
        addr: String,
        outgoing: mpsc::UnboundedSender<Outgoing>,
    },
    /// A session packet arrived.
    Packet { conn: ConnectionId, packet: Packet },
    /// A game packet arrived.
    Game { conn: ConnectionId, data: Vec<u8> },
    /// The connection's reader is gone.
    Closed { conn: ConnectionId },
    /// The authenticator answered.
    AuthResult { conn: ConnectionId, accepted: bool },
    /// A command line typed on the server console.
    Console {
        line: String,
        reply: oneshot::Sender<CommandOutcome>,
    },
}

/// Work for one connection's writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Outgoing {
    Packet(Packet),
    /// Raw snapshot bytes, compressed by the writer.
    Snapshot(Vec<u8>),
    Game(Vec<u8>),
    /// Send a `Disconnect` with this reason, then close.
    Close(String),
}

pub(crate) struct SessionActor<A: Authenticator, R: RulesEngine> {
    session: Session,
    writers: HashMap<ConnectionId, mpsc::UnboundedSender<Outgoing>>,
    auth: Arc<A>,
    rules: R,
    /// Weak so the actor does not keep its own channel open.
    events: mpsc::WeakUnboundedSender<ServerEvent>,
}

impl<A: Authenticator, R: RulesEngine> SessionActor<A, R> {
    pub(crate) fn new(
        session: Session,
        auth: A,
        rules: R,
        events: mpsc::WeakUnboundedSender<ServerEvent>,
    ) -> Self {
        Self {
            session,
            writers: HashMap::new(),
            auth: Arc::new(auth),
            rules,
            events,
        }
    }

    /// Processes events until every sender is gone.
    pub(crate) async fn run(mut self, mut rx: mpsc::UnboundedReceiver<ServerEvent>) {
        tracing::debug!("session actor started");
        while let Some(event) = rx.recv().await {
            self.handle(event);
            self.flush();
        }
        tracing::debug!("session actor stopped");
    }

    pub(crate) fn handle(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Connected {
                conn,
                addr,
                outgoing,
            } => {
                self.writers.insert(conn, outgoing);
                self.session.accept_connection(conn, &addr);
            }
            ServerEvent::Packet { conn, packet } => self.handle_packet(conn, packet),
            ServerEvent::Game { conn, data } => self.handle_game(conn, &data),
            ServerEvent::Closed { conn } => {
                self.session.connection_lost(conn);
                self.writers.remove(&conn);
            }
            ServerEvent::AuthResult { conn, accepted } => {
                if let Err(rejection) = self.session.complete_auth(conn, accepted) {
                    tracing::debug!(%conn, %rejection, "authentication did not establish connection");
                }
            }
            ServerEvent::Console { line, reply } => {
                let outcome = self.session.execute_command(None, &line, Instant::now());
                // The console may have stopped waiting.
                let _ = reply.send(outcome);
            }
        }
    }

    fn handle_packet(&mut self, conn: ConnectionId, packet: Packet) {
        let now = Instant::now();
        match packet {
            Packet::ServerJoinRequest {
                username,
                capability,
                version,
            } => {
                let outcome = self.session.handle_join_request(
                    conn,
                    &username,
                    &capability,
                    &version,
                    now,
                );
                if let Ok(JoinOutcome::AuthRequired) = outcome {
                    self.authenticate(conn);
                }
            }
            Packet::Chat { message } => self.session.chat(conn, &message, now),
            Packet::Heartbeat { client_time } => self.session.heartbeat(conn, client_time, now),
            Packet::Disconnect { reason } => {
                tracing::info!(%conn, %reason, "client disconnected");
                self.session.close_connection(conn, "Goodbye.");
            }
            other => {
                tracing::debug!(%conn, packet = ?other, "ignoring packet not meant for the server");
            }
        }
    }

    /// Asks the authenticator on a task of its own; the answer comes back
    /// as [`ServerEvent::AuthResult`].
    fn authenticate(&self, conn: ConnectionId) {
        let Some(username) = self.session.connection(conn).map(|r| r.username.clone()) else {
            return;
        };
        let Some(events) = self.events.upgrade() else {
            return;
        };
        let auth = Arc::clone(&self.auth);
        tokio::spawn(async move {
            let accepted = auth.authenticate(conn, &username).await;
            // The server may be shutting down.
            let _ = events.send(ServerEvent::AuthResult { conn, accepted });
        });
    }

    /// Game packets are only accepted from a connection controlling a
    /// player with at least `Basic` access.
    fn handle_game(&mut self, conn: ConnectionId, data: &[u8]) {
        let Some(player) = self.session.command_player(conn) else {
            tracing::warn!(%conn, "game packet from a connection that controls no player");
            return;
        };
        for (recipient, bytes) in self.rules.handle_game_packet(player, data) {
            let targets = match recipient {
                Recipient::Player(p) => self.session.connections().bound_to(p),
                Recipient::Everyone => self.session.connections().established().to_vec(),
            };
            for target in targets {
                self.deliver(target, Outgoing::Game(bytes.clone()));
            }
        }
    }

    /// Hands the session's outbox to the writers, in order.
    pub(crate) fn flush(&mut self) {
        for item in self.session.drain_outbox() {
            let conn = item.conn();
            match item {
                Outbound::Packet { packet, .. } => self.deliver(conn, Outgoing::Packet(packet)),
                Outbound::Snapshot { data, .. } => self.deliver(conn, Outgoing::Snapshot(data)),
                Outbound::Close { reason, .. } => {
                    self.deliver(conn, Outgoing::Close(reason));
                    // Nothing may follow the close.
                    self.writers.remove(&conn);
                }
            }
        }
    }

    fn deliver(&self, conn: ConnectionId, item: Outgoing) {
        let Some(writer) = self.writers.get(&conn) else {
            tracing::trace!(%conn, "dropping outbound item for a closed connection");
            return;
        };
        if writer.send(item).is_err() {
            tracing::debug!(%conn, "writer gone");
        }
    }
}
