//! Per-connection tasks: a reader and a writer.
//!
//! Each accepted connection gets its own Tokio task running
//! [`handle_connection`]. The flow is:
//!   1. Register the connection with the session actor
//!   2. Spawn the writer: outgoing items → envelopes on the socket
//!   3. Read: envelopes from the socket → events for the actor, until
//!      the peer leaves or goes quiet for too long
//!   4. Tell the actor the connection is gone (even on panic, via guard)

use std::sync::Arc;
use std::time::Instant;

use civgate_protocol::{
    Codec, ConnectionId, Envelope, Packet, Payload, compress_snapshot,
};
use civgate_transport::{Connection, WebSocketConnection};
use tokio::sync::mpsc;

use crate::CivgateError;
use crate::actor::{Outgoing, ServerEvent};
use crate::server::ServerState;

/// Drop guard that reports the connection closed when the reader exits.
///
/// Sending on an unbounded channel is synchronous, so this works from
/// `Drop` without spawning anything.
struct ConnectionGuard {
    conn: ConnectionId,
    events: mpsc::UnboundedSender<ServerEvent>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let _ = self.events.send(ServerEvent::Closed { conn: self.conn });
    }
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<C>(
    conn: WebSocketConnection,
    state: Arc<ServerState<C>>,
) -> Result<(), CivgateError>
where
    C: Codec + Clone,
{
    let conn = Arc::new(conn);
    let conn_id = conn.id();
    tracing::debug!(%conn_id, addr = conn.peer_addr(), "handling new connection");

    let (outgoing, rx) = mpsc::unbounded_channel();
    state
        .events
        .send(ServerEvent::Connected {
            conn: conn_id,
            addr: conn.peer_addr().to_string(),
            outgoing,
        })
        .map_err(|_| CivgateError::Shutdown)?;
    let guard = ConnectionGuard {
        conn: conn_id,
        events: state.events.clone(),
    };

    let writer = tokio::spawn(write_loop(Arc::clone(&conn), state.codec.clone(), rx));
    read_loop(&conn, &state).await;

    // The actor drops the writer's channel once it hears about the close,
    // which ends the writer.
    drop(guard);
    match writer.await {
        Ok(result) => result,
        Err(e) => {
            tracing::error!(%conn_id, error = %e, "writer task failed");
            Ok(())
        }
    }
}

/// Forwards decoded envelopes to the actor.
///
/// Until the client has sent its join request the handshake timeout
/// applies; afterwards the (longer) ping timeout.
async fn read_loop<C: Codec>(conn: &WebSocketConnection, state: &ServerState<C>) {
    let conn_id = conn.id();
    let mut joined = false;

    loop {
        let limit = if joined {
            state.ping_timeout
        } else {
            state.handshake_timeout
        };
        let data = match tokio::time::timeout(limit, conn.recv()).await {
            Ok(Ok(Some(data))) => data,
            Ok(Ok(None)) => {
                tracing::info!(%conn_id, "connection closed cleanly");
                break;
            }
            Ok(Err(e)) => {
                tracing::debug!(%conn_id, error = %e, "recv error");
                break;
            }
            Err(_) => {
                tracing::info!(%conn_id, joined, "connection timed out");
                break;
            }
        };

        let envelope: Envelope = match state.codec.decode(&data) {
            Ok(env) => env,
            Err(e) => {
                tracing::debug!(%conn_id, error = %e, "failed to decode envelope");
                continue;
            }
        };

        let event = match envelope.payload {
            Payload::Session(packet) => {
                joined |= matches!(packet, Packet::ServerJoinRequest { .. });
                ServerEvent::Packet {
                    conn: conn_id,
                    packet,
                }
            }
            Payload::Game(data) => ServerEvent::Game {
                conn: conn_id,
                data,
            },
        };
        if state.events.send(event).is_err() {
            tracing::debug!(%conn_id, "session actor gone");
            break;
        }
    }
}

/// Encodes outgoing items in order and writes them to the socket.
async fn write_loop<C: Codec>(
    conn: Arc<WebSocketConnection>,
    codec: C,
    mut rx: mpsc::UnboundedReceiver<Outgoing>,
) -> Result<(), CivgateError> {
    let conn_id = conn.id();
    let start = Instant::now();
    let mut seq: u64 = 1;

    while let Some(item) = rx.recv().await {
        let payload = match item {
            Outgoing::Packet(packet) => Payload::Session(packet),
            Outgoing::Game(data) => Payload::Game(data),
            Outgoing::Snapshot(data) => Payload::Session(snapshot_packet(conn_id, data).await),
            Outgoing::Close(reason) => {
                tracing::debug!(%conn_id, %reason, "closing");
                let bye = Payload::Session(Packet::Disconnect { reason });
                // The peer may already be gone; closing is all that is left.
                let _ = send_envelope(&conn, &codec, bye, next_seq(&mut seq), &start).await;
                conn.close().await?;
                return Ok(());
            }
        };
        send_envelope(&conn, &codec, payload, next_seq(&mut seq), &start).await?;
    }

    // The actor forgot this connection.
    if let Err(e) = conn.close().await {
        tracing::trace!(%conn_id, error = %e, "close after reader exit");
    }
    Ok(())
}

/// Deflates a snapshot on the blocking pool. Falls back to the raw bytes
/// if compression fails.
async fn snapshot_packet(conn_id: ConnectionId, data: Vec<u8>) -> Packet {
    let raw_len = data.len();
    let result = tokio::task::spawn_blocking(move || {
        let packed = compress_snapshot(&data);
        (data, packed)
    })
    .await;
    match result {
        Ok((_, Ok(packed))) => {
            tracing::debug!(%conn_id, raw_len, packed_len = packed.len(), "snapshot compressed");
            Packet::GameSnapshot {
                compressed: true,
                data: packed,
            }
        }
        Ok((data, Err(e))) => {
            tracing::warn!(%conn_id, error = %e, "snapshot compression failed, sending raw");
            Packet::GameSnapshot {
                compressed: false,
                data,
            }
        }
        Err(e) => {
            tracing::error!(%conn_id, error = %e, "snapshot compression task failed");
            Packet::GameSnapshot {
                compressed: false,
                data: Vec::new(),
            }
        }
    }
}

async fn send_envelope(
    conn: &WebSocketConnection,
    codec: &impl Codec,
    payload: Payload,
    seq: u64,
    start: &Instant,
) -> Result<(), CivgateError> {
    let envelope = Envelope {
        seq,
        timestamp: millis_since(start),
        payload,
    };
    let bytes = codec.encode(&envelope)?;
    conn.send(&bytes).await?;
    Ok(())
}

fn millis_since(start: &Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Increments and returns the next sequence number.
fn next_seq(seq: &mut u64) -> u64 {
    let current = *seq;
    *seq += 1;
    current
}
