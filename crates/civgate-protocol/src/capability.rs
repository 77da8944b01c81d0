//! Capability-string negotiation.
//!
//! A capability string is a whitespace-separated list of tokens. A token
//! prefixed with `+` is mandatory: the other side must list it (with or
//! without the `+`) or the two cannot talk. Unprefixed tokens are
//! optional features either side may use if both have them.

/// Mandatory capabilities of this server build.
pub const SERVER_CAPABILITY: &str = "+civgate-1.0 +delegation ping";

/// Returns true if `token` appears in `capstr`, with or without `+`.
pub fn has_capability(token: &str, capstr: &str) -> bool {
    let token = token.trim_start_matches('+');
    capstr
        .split_whitespace()
        .any(|t| t.trim_start_matches('+') == token)
}

/// Returns true if every mandatory token of `ours` appears in `theirs`.
///
/// Run it both ways during the handshake:
/// `has_capabilities(server, client)` tells whether the client lacks
/// something the server needs, and `has_capabilities(client, server)`
/// the reverse.
pub fn has_capabilities(ours: &str, theirs: &str) -> bool {
    ours.split_whitespace()
        .filter(|t| t.starts_with('+'))
        .all(|t| has_capability(t, theirs))
}
