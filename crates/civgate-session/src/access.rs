//! Access-level policy.
//!
//! A connection has a *granted* level (its ceiling, set at login or by
//! `/cmdlevel`) and a *current* level derived from it. The derivation is
//! [`restore_level`]; it runs after every attach and detach.

use civgate_protocol::{AccessLevel, ConnectionId, PlayerId};

use crate::{Binding, Session};

/// The level a connection should have right now.
///
/// Observers and unattached connections granted exactly `Basic` are held
/// at `Info`: they have no player to issue game commands for. Any other
/// granted level applies unchanged.
pub fn restore_level(granted: AccessLevel, binding: Binding) -> AccessLevel {
    let playing = matches!(binding, Binding::Controlling(_));
    if !playing && granted == AccessLevel::Basic {
        AccessLevel::Info
    } else {
        granted
    }
}

impl Session {
    /// Recomputes the current access level of `conn` from its granted
    /// level and binding.
    pub fn restore_access_level(&mut self, conn: ConnectionId) {
        let Some(record) = self.conns.get(conn) else {
            return;
        };
        let level = restore_level(record.granted_access_level, record.binding);
        self.set_access(conn, level, false);
    }

    /// Sets the current level of `conn`, and its granted level too when
    /// `granted` is true. When the current level changes, the connection
    /// is sent the settings whose visibility changed with it.
    pub fn set_access(&mut self, conn: ConnectionId, level: AccessLevel, granted: bool) {
        let Some(record) = self.conns.get_mut(conn) else {
            return;
        };
        let old = record.access_level;
        record.access_level = level;
        if granted {
            record.granted_access_level = level;
        }
        if old != level {
            tracing::debug!(%conn, %old, new = %level, "access level changed");
            self.send_settings_visibility(conn, old, level);
        }
    }

    /// Changes the granted level of `conn` and re-derives its current
    /// level from it. Everyone is told the new level.
    pub fn grant_access(&mut self, conn: ConnectionId, level: AccessLevel) {
        let Some(record) = self.conns.get_mut(conn) else {
            return;
        };
        record.granted_access_level = level;
        tracing::info!(%conn, %level, "access level granted");
        self.restore_access_level(conn);
        self.send_conn_info_all(conn);
    }

    /// The player `conn` may issue game packets for, if any.
    ///
    /// Only a controller with at least `Basic` access qualifies; observers
    /// and unattached connections may only look.
    pub fn command_player(&self, conn: ConnectionId) -> Option<PlayerId> {
        let record = self.conns.get(conn)?;
        if !record.is_established() || record.access_level < AccessLevel::Basic {
            return None;
        }
        record.binding.controlled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restore_level_observer_basic_demoted_to_info() {
        assert_eq!(
            restore_level(AccessLevel::Basic, Binding::Observing(None)),
            AccessLevel::Info
        );
        assert_eq!(
            restore_level(AccessLevel::Basic, Binding::Observing(Some(PlayerId(1)))),
            AccessLevel::Info
        );
    }

    #[test]
    fn test_restore_level_unbound_basic_demoted_to_info() {
        assert_eq!(
            restore_level(AccessLevel::Basic, Binding::Unbound),
            AccessLevel::Info
        );
    }

    #[test]
    fn test_restore_level_controller_keeps_basic() {
        assert_eq!(
            restore_level(AccessLevel::Basic, Binding::Controlling(PlayerId(0))),
            AccessLevel::Basic
        );
    }

    #[test]
    fn test_restore_level_above_basic_is_not_demoted() {
        assert_eq!(
            restore_level(AccessLevel::Ctrl, Binding::Observing(None)),
            AccessLevel::Ctrl
        );
        assert_eq!(
            restore_level(AccessLevel::Hack, Binding::Unbound),
            AccessLevel::Hack
        );
    }

    #[test]
    fn test_restore_level_below_basic_is_not_raised() {
        assert_eq!(
            restore_level(AccessLevel::None, Binding::Controlling(PlayerId(0))),
            AccessLevel::None
        );
        assert_eq!(
            restore_level(AccessLevel::Info, Binding::Unbound),
            AccessLevel::Info
        );
    }
}
