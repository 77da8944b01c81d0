//! Error types for the session layer.
//!
//! Every operation returns one of these as a value; nothing here panics
//! across the crate boundary. The `Display` text of the user-facing
//! variants is what the issuer of a command or a rejected client sees.

use std::time::Duration;

use civgate_protocol::{AccessLevel, ConnectionId, NationId, PlayerId};

/// Why an attach could not be performed.
///
/// An attach that fails never leaves the connection half-bound.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AttachError {
    /// No uncontrolled player exists and no new one could be created.
    #[error("no player slot is available")]
    NoSlotAvailable,

    /// A new player would have to be created, but the game is underway.
    #[error("cannot create a new player after the game has started")]
    GameAlreadyStarted,

    /// The connection already has a binding. Detach it first.
    #[error("{0} is already attached")]
    AlreadyBound(ConnectionId),

    /// Another connection is the controller of this player.
    #[error("{0} is already controlled by another connection")]
    PlayerControlled(PlayerId),

    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),

    #[error("unknown player {0}")]
    UnknownPlayer(PlayerId),
}

/// Player-slot allocation and removal failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlayerError {
    /// The requested slot already holds a player.
    #[error("slot {0} is already in use")]
    SlotTaken(PlayerId),

    /// Every slot of the fixed table is occupied.
    #[error("no more player slots are free")]
    NoFreeSlot,

    #[error("the maximum of {0} players has been reached")]
    MaxPlayersReached(usize),

    /// There are as many players as nations that may be played.
    #[error("no more playable nations are available")]
    NationsExhausted,

    /// Another non-barbarian player already plays this nation.
    #[error("nation {0:?} is already taken")]
    NationTaken(NationId),

    #[error("unknown player {0}")]
    UnknownPlayer(PlayerId),

    /// The player may not be removed at this point of the game.
    #[error("{0} cannot be removed once the game has started")]
    RemovalForbidden(PlayerId),
}

/// Delegation take/restore failures. All of them are detected before any
/// state is touched, except [`DelegationError::RollbackFailed`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DelegationError {
    /// The connection is already playing a delegated player.
    #[error("{0} is already controlling a delegated player")]
    AlreadyDelegating(ConnectionId),

    /// `restore` was called without an active delegation.
    #[error("{0} is not controlling a delegated player")]
    NotDelegating(ConnectionId),

    /// The target player is already delegated or put aside.
    #[error("{0} is already under delegated control")]
    PlayerDelegated(PlayerId),

    /// The connection already controls the target.
    #[error("{0} is already controlled by this connection")]
    AlreadyControlling(PlayerId),

    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),

    #[error("unknown player {0}")]
    UnknownPlayer(PlayerId),

    /// Attaching to the delegated player (or back to the original
    /// binding on restore) failed; the prior binding is back in place.
    #[error(transparent)]
    Attach(#[from] AttachError),

    /// Reattaching the original binding after a failed take did not work.
    /// The data model was already inconsistent.
    #[error("could not roll {0} back to its original binding")]
    RollbackFailed(ConnectionId),
}

/// Why a join request was refused. The message goes to the client in the
/// rejection reply.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    /// A second join request on the same connection.
    #[error("Join request already processed for this connection.")]
    Replay,

    #[error("The client is missing a capability that this server needs.")]
    MissingClientCapability,

    #[error("The server is missing a capability that the client needs.")]
    MissingServerCapability,

    #[error("Invalid username '{0}'")]
    InvalidUsername(String),

    #[error(
        "You have been kicked from this server and cannot reconnect for {} seconds.",
        .remaining.as_secs()
    )]
    Kicked { remaining: Duration },

    #[error("'{0}' already connected.")]
    DuplicateLogin(String),

    #[error("Authentication failed.")]
    AuthFailed,

    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),
}

/// Setting lookups and changes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettingsError {
    #[error("Unknown setting '{0}'.")]
    Unknown(String),

    #[error("You are not allowed to change '{name}'; it requires '{required}'.")]
    Forbidden { name: String, required: AccessLevel },

    #[error("Value for '{name}' rejected: {reason}")]
    Invalid { name: String, reason: String },
}

/// Vote casting failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VoteError {
    #[error("There is no vote number {0}.")]
    NotFound(u32),

    /// No vote number was given and there is not exactly one running.
    #[error("Which vote do you mean? {0} are running.")]
    Ambiguous(usize),

    #[error("You are not allowed to vote.")]
    NotEligible,
}

/// Umbrella error for callers that deal with the session as a whole.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Attach(#[from] AttachError),

    #[error(transparent)]
    Player(#[from] PlayerError),

    #[error(transparent)]
    Delegation(#[from] DelegationError),

    #[error(transparent)]
    Rejected(#[from] Rejection),

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Vote(#[from] VoteError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_kicked_message_shows_seconds() {
        let err = Rejection::Kicked {
            remaining: Duration::from_secs(90),
        };
        assert_eq!(
            err.to_string(),
            "You have been kicked from this server and cannot reconnect for 90 seconds."
        );
    }

    #[test]
    fn test_delegation_error_wraps_attach_error() {
        let err: DelegationError = AttachError::NoSlotAvailable.into();
        assert!(matches!(err, DelegationError::Attach(_)));
        assert_eq!(err.to_string(), "no player slot is available");
    }

    #[test]
    fn test_session_error_from_settings_error() {
        let err: SessionError = SettingsError::Unknown("foo".into()).into();
        assert!(matches!(err, SessionError::Settings(_)));
        assert!(err.to_string().contains("foo"));
    }
}
