//! Connection lifecycle and player sessions for civgate.
//!
//! This crate decides who is connected, which player each connection
//! controls or watches, and what everyone is allowed to do:
//!
//! 1. **Handshake**: validating a join request and establishing the
//!    connection ([`Session::handle_join_request`], [`Authenticator`])
//! 2. **Player slots**: the fixed table of players ([`PlayerSlots`])
//! 3. **Attachment**: binding connections to players or to observer
//!    status ([`Session::attach`], [`Session::detach`])
//! 4. **Delegation**: temporary handover of a player to another user
//!    ([`Session::delegate_take`], [`Session::delegate_restore`])
//! 5. **Access levels**: who may run which command ([`restore_level`])
//! 6. **Commands and votes**: `/take`, `/delegate`, `/kick` and friends
//!    ([`Session::execute_command`])
//!
//! # How it fits in the stack
//!
//! ```text
//! Server (above)   ← owns one Session, feeds it events, drains its outbox
//!     ↕
//! Session Layer (this crate)  ← pure state machine, no I/O, no clocks
//!     ↕
//! Protocol Layer (below)  ← Packet, AccessLevel, PlayerId, ConnectionId
//! ```
//!
//! Everything here is synchronous. Time comes in as an `Instant`
//! argument, so tests can drive the kick table and heartbeats with a
//! simulated clock.

mod access;
pub mod allow_take;
mod attach;
mod auth;
mod commands;
mod connection;
mod delegate;
mod error;
mod events;
mod game;
mod handshake;
mod kick;
mod player;
mod session;
mod settings;
mod votes;

pub use access::restore_level;
pub use attach::Removal;
pub use auth::{AllowAll, AllowList, Authenticator};
pub use commands::{CommandOutcome, CommandStatus, tokenize};
pub use connection::{
    Binding, BindingState, ConnectionRecord, Connections, DelegationState, HandshakeState,
    IgnorePattern, PingState, wildcard_match,
};
pub use error::{
    AttachError, DelegationError, PlayerError, Rejection, SessionError, SettingsError, VoteError,
};
pub use events::{CachedEvent, EventCache, EventTarget, Outbound};
pub use game::{
    GameState, PublicSnapshot, RulesetSummary, Scenario, SnapshotSource, Topology, Viewer,
};
pub use handshake::{JoinOutcome, MAX_USERNAME_LEN, is_valid_username};
pub use kick::KickRegistry;
pub use player::{
    ANON_USER_NAME, CreateLimits, DEFAULT_PLAYER_NAME, NewPlayer, Player, PlayerMode,
    PlayerSlots,
};
pub use session::{Session, SessionConfig};
pub use settings::{SettingChange, SettingValue, Settings, SettingsObserver};
pub use votes::{Ballot, Vote, VoteRegistry, VoteStatus};
