//! Authentication hook for the join handshake.
//!
//! civgate doesn't check passwords itself. When `auth_enabled` is set,
//! a join request that passes every other check stops in
//! [`HandshakeState::AwaitingAuth`](crate::HandshakeState::AwaitingAuth)
//! and the server asks an [`Authenticator`]. The answer comes back later
//! through [`Session::complete_auth`](crate::Session::complete_auth).
//!
//! # Why async?
//!
//! Real authenticators talk to a database or an identity service. The
//! server runs the call on its own task so the session keeps handling
//! other connections in the meantime.

use std::collections::HashSet;

use civgate_protocol::ConnectionId;

/// Decides whether a user may log in.
///
/// # Trait bounds
///
/// - `Send + Sync` → the server shares one authenticator between tasks.
/// - `'static` → it lives as long as the server.
///
/// # Example
///
/// ```rust
/// use civgate_session::Authenticator;
/// use civgate_protocol::ConnectionId;
///
/// /// Lets in everyone except "mallory".
/// struct NoMallory;
///
/// impl Authenticator for NoMallory {
///     async fn authenticate(&self, _conn: ConnectionId, username: &str) -> bool {
///         !username.eq_ignore_ascii_case("mallory")
///     }
/// }
/// ```
pub trait Authenticator: Send + Sync + 'static {
    /// Returns true if `username` may log in on `conn`.
    fn authenticate(
        &self,
        conn: ConnectionId,
        username: &str,
    ) -> impl std::future::Future<Output = bool> + Send;
}

/// Accepts every user. The default when authentication is off.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl Authenticator for AllowAll {
    async fn authenticate(&self, _conn: ConnectionId, _username: &str) -> bool {
        true
    }
}

/// Accepts only the listed users, compared case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    users: HashSet<String>,
}

impl AllowList {
    pub fn new<I, S>(users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            users: users
                .into_iter()
                .map(|u| u.as_ref().to_ascii_lowercase())
                .collect(),
        }
    }
}

impl Authenticator for AllowList {
    async fn authenticate(&self, conn: ConnectionId, username: &str) -> bool {
        let allowed = self.users.contains(&username.to_ascii_lowercase());
        if !allowed {
            tracing::warn!(%conn, username, "user not on the allow list");
        }
        allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_allow_all_accepts_anyone() {
        assert!(AllowAll.authenticate(ConnectionId::new(1), "anyone").await);
    }

    #[tokio::test]
    async fn test_allow_list_is_case_insensitive() {
        let auth = AllowList::new(["Alice", "bob"]);
        assert!(auth.authenticate(ConnectionId::new(1), "alice").await);
        assert!(auth.authenticate(ConnectionId::new(2), "BOB").await);
        assert!(!auth.authenticate(ConnectionId::new(3), "mallory").await);
    }
}
