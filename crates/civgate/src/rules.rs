//! The hook for game packets.
//!
//! civgate decides who may send game packets but never looks inside
//! them. A [`RulesEngine`] receives the packets of connections that
//! control a player and answers with packets to deliver.

use civgate_protocol::PlayerId;

/// Who a game packet from the rules engine goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    /// Every connection attached to the player, controller and observers.
    Player(PlayerId),
    /// Every established connection.
    Everyone,
}

/// Game logic plugged into the server.
///
/// Runs on the session actor, so a call must not block: heavy work
/// belongs on a task of its own.
pub trait RulesEngine: Send + 'static {
    /// Handles a game packet sent on behalf of `sender`.
    fn handle_game_packet(&mut self, sender: PlayerId, data: &[u8]) -> Vec<(Recipient, Vec<u8>)>;
}

/// Drops every game packet. Used when the server runs without rules.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRules;

impl RulesEngine for NoRules {
    fn handle_game_packet(&mut self, sender: PlayerId, data: &[u8]) -> Vec<(Recipient, Vec<u8>)> {
        tracing::debug!(%sender, len = data.len(), "no rules engine, game packet dropped");
        Vec::new()
    }
}
