//! Wire protocol for civgate.
//!
//! This crate defines the "language" that clients and the server speak:
//!
//! - **Types** ([`Envelope`], [`Payload`], [`AccessLevel`], [`PlayerId`]):
//!   the structures that travel on the wire.
//! - **Packets** ([`Packet`]): every session-layer message, from the join
//!   handshake to chat and votes.
//! - **Capabilities** ([`has_capabilities`]): version negotiation.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how messages are
//!   converted to and from bytes.
//! - **Compression** ([`compress_snapshot`]): deflate for snapshots.
//!
//! ```text
//! Transport (bytes) → Protocol (Envelope) → Session (connection state)
//! ```

mod capability;
mod codec;
mod compress;
mod error;
mod packets;
mod types;

pub use capability::{SERVER_CAPABILITY, has_capabilities, has_capability};
pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use compress::{compress_snapshot, decompress_snapshot};
pub use error::ProtocolError;
pub use packets::{
    ConnectionInfo, DelegationInfo, EventKind, GameInfo, GamePhase, Packet,
    PlayerInfo, Rgb, SettingInfo, Version,
};
pub use types::{AccessLevel, Envelope, NationId, Payload, PlayerId};

/// Connection ids come from the transport layer; re-exported so crates
/// above the protocol need not depend on the transport directly.
pub use civgate_transport::ConnectionId;
