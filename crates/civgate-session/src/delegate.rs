//! Temporary handover of a player to another user.
//!
//! An owner names a delegate with `/delegate to`. The delegate may then
//! `take` the player: its own binding is saved, its own player (if any)
//! is put aside, and it becomes the delegated player's controller. A
//! `restore` puts everything back exactly as it was.
//!
//! While delegated, both the delegated player and the delegate's own
//! player carry `orig_username`. That marks them as protected: `/take`,
//! username collisions and automatic removal leave them alone.
//!
//! Delegation is one level deep. A delegate cannot take a second player,
//! and a player already delegated cannot be taken again.

use civgate_protocol::{ConnectionId, DelegationInfo, PlayerId};

use crate::{ANON_USER_NAME, Binding, DelegationError, DelegationState, Session};

impl Session {
    /// Makes `conn` the controller of `target`, saving its current
    /// binding for [`Session::delegate_restore`].
    ///
    /// All checks run before anything is touched. If the final attach
    /// fails the original binding is put back and the error returned.
    ///
    /// # Errors
    /// - [`DelegationError::AlreadyDelegating`]: `conn` already plays a
    ///   delegated player.
    /// - [`DelegationError::PlayerDelegated`]: `target` is delegated or
    ///   put aside.
    /// - [`DelegationError::AlreadyControlling`]: `conn` controls `target`.
    /// - [`DelegationError::Attach`]: someone else controls `target`, or
    ///   the attach failed.
    /// - [`DelegationError::RollbackFailed`]: the original binding could
    ///   not be restored after a failed attach. Debug builds panic.
    pub fn delegate_take(
        &mut self,
        conn: ConnectionId,
        target: PlayerId,
    ) -> Result<(), DelegationError> {
        let record = self
            .conns
            .get(conn)
            .ok_or(DelegationError::UnknownConnection(conn))?;
        if record.delegation.is_some() {
            return Err(DelegationError::AlreadyDelegating(conn));
        }
        let target_player = self
            .players
            .get(target)
            .ok_or(DelegationError::UnknownPlayer(target))?;
        if target_player.is_protected() {
            return Err(DelegationError::PlayerDelegated(target));
        }
        if record.binding == Binding::Controlling(target) {
            return Err(DelegationError::AlreadyControlling(target));
        }
        if self.conns.controller_of(target).is_some() {
            return Err(crate::AttachError::PlayerControlled(target).into());
        }

        let binding = record.binding;
        let saved = DelegationState {
            player: binding.player(),
            observer: binding.is_observer(),
        };
        let username = record.username.clone();

        // Put the delegate's own player aside.
        let own = binding.controlled();
        if let Some(player) = own.and_then(|p| self.players.get_mut(p)) {
            player.orig_username = Some(player.username.clone());
        }
        if let Some(player) = self.players.get_mut(target) {
            player.orig_username = Some(player.username.clone());
        }
        if let Some(record) = self.conns.get_mut(conn) {
            record.delegation = Some(saved);
        }

        self.detach(conn, false);
        if let Err(e) = self.attach_real(conn, Some(target), false, false) {
            tracing::warn!(%conn, player = %target, error = %e, "delegate take failed, rolling back");
            for p in own.into_iter().chain([target]) {
                if let Some(player) = self.players.get_mut(p) {
                    player.orig_username = None;
                }
            }
            if let Some(record) = self.conns.get_mut(conn) {
                record.delegation = None;
            }
            if self.reattach(conn, saved.saved_binding()).is_err() {
                tracing::error!(%conn, "rollback of delegate take failed");
                debug_assert!(false, "{conn} could not be rolled back");
                return Err(DelegationError::RollbackFailed(conn));
            }
            return Err(e.into());
        }

        if let Some(p) = own {
            self.send_player_info_all(p);
        }
        self.send_player_info_all(target);
        self.send_delegation_info(conn);
        tracing::info!(%conn, username, player = %target, "delegate took control");
        Ok(())
    }

    /// Ends `conn`'s delegation: the delegated player gets its owner's
    /// username back and `conn` returns to the binding it had before.
    ///
    /// If the original binding cannot be re-established, `conn` stays on
    /// the delegated player and the delegation remains active.
    pub fn delegate_restore(&mut self, conn: ConnectionId) -> Result<(), DelegationError> {
        let record = self
            .conns
            .get(conn)
            .ok_or(DelegationError::UnknownConnection(conn))?;
        let Some(saved) = record.delegation else {
            return Err(DelegationError::NotDelegating(conn));
        };
        let delegated = record.binding.controlled();
        let username = record.username.clone();

        self.detach(conn, false);
        let orig = delegated.and_then(|p| {
            let player = self.players.get_mut(p)?;
            let orig = player.orig_username.take()?;
            player.unassigned_user = orig == ANON_USER_NAME;
            Some(std::mem::replace(&mut player.username, orig))
        });
        let own = saved.player.filter(|_| !saved.observer);
        if let Some(player) = own.and_then(|p| self.players.get_mut(p)) {
            player.orig_username = None;
        }
        if let Some(record) = self.conns.get_mut(conn) {
            record.delegation = None;
        }

        if let Err(e) = self.reattach(conn, saved.saved_binding()) {
            tracing::error!(%conn, error = %e, "delegate restore failed, keeping delegation");
            if let Some(player) = own.and_then(|p| self.players.get_mut(p)) {
                player.orig_username = Some(player.username.clone());
            }
            if let (Some(p), Some(delegate_name)) = (delegated, orig) {
                if let Some(player) = self.players.get_mut(p) {
                    let owner = std::mem::replace(&mut player.username, delegate_name);
                    player.unassigned_user = false;
                    player.orig_username = Some(owner);
                }
            }
            if let Some(record) = self.conns.get_mut(conn) {
                record.delegation = Some(saved);
            }
            if let Some(p) = delegated {
                if self.attach_real(conn, Some(p), false, false).is_err() {
                    tracing::error!(%conn, player = %p, "could not return to delegated player");
                }
            }
            return Err(e.into());
        }

        if let Some(p) = delegated {
            self.send_player_info_all(p);
        }
        self.send_delegation_info(conn);
        tracing::info!(%conn, username, player = ?delegated, "delegation restored");
        Ok(())
    }

    /// Attaches `conn` to a saved binding. `Unbound` needs no attach.
    fn reattach(&mut self, conn: ConnectionId, binding: Binding) -> Result<(), crate::AttachError> {
        match binding {
            Binding::Unbound => Ok(()),
            other => self.attach_real(conn, other.player(), other.is_observer(), false),
        }
    }

    /// Names the user allowed to take `player` over, or clears it.
    pub fn set_delegate(
        &mut self,
        player: PlayerId,
        username: Option<&str>,
    ) -> Result<(), DelegationError> {
        let p = self
            .players
            .get_mut(player)
            .ok_or(DelegationError::UnknownPlayer(player))?;
        p.delegate_to = username.map(str::to_string);
        tracing::info!(%player, delegate = ?username, "delegate set");
        self.send_player_info_all(player);
        Ok(())
    }

    /// The player `conn` owns: the one it controls, or the one it put
    /// aside while playing a delegated player.
    pub fn own_player(&self, conn: ConnectionId) -> Option<PlayerId> {
        let record = self.conns.get(conn)?;
        match record.delegation {
            Some(saved) if !saved.observer => saved.player,
            Some(_) => None,
            None => record.binding.controlled(),
        }
    }

    /// Delegation status from `conn`'s point of view.
    pub fn delegation_info(&self, conn: ConnectionId) -> DelegationInfo {
        let Some(record) = self.conns.get(conn) else {
            return DelegationInfo::default();
        };
        let own_player = self.own_player(conn);
        let delegated_player = record
            .delegation
            .and_then(|_| record.binding.controlled());
        let delegate_to = own_player
            .and_then(|p| self.players.get(p))
            .and_then(|p| p.delegate_to.clone());
        let delegators = self
            .players
            .iter()
            .filter(|p| Some(p.id) != own_player)
            .filter(|p| {
                p.delegate_to
                    .as_deref()
                    .is_some_and(|d| d.eq_ignore_ascii_case(&record.username))
            })
            .map(|p| p.id)
            .collect();
        DelegationInfo {
            own_player,
            delegate_to,
            delegated_player,
            delegators,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AttachError, SessionConfig};
    use civgate_protocol::GamePhase;

    fn c(id: u64) -> ConnectionId {
        ConnectionId::new(id)
    }

    /// Two users, each controlling their own player, game running.
    fn running_pair() -> (Session, PlayerId, PlayerId) {
        let mut s = Session::new(SessionConfig::default());
        for (id, name) in [(1, "alice"), (2, "bob")] {
            s.accept_connection(c(id), "10.0.0.1");
            s.conns.get_mut(c(id)).unwrap().username = name.into();
            s.conns.mark_established(c(id));
            s.attach(c(id), None, false).unwrap();
        }
        s.game_mut().phase = GamePhase::Running;
        let a = s.connection(c(1)).unwrap().binding.controlled().unwrap();
        let b = s.connection(c(2)).unwrap().binding.controlled().unwrap();
        (s, a, b)
    }

    #[test]
    fn test_delegate_take_and_restore_round_trip() {
        let (mut s, alice_p, bob_p) = running_pair();
        s.detach(c(1), false);

        s.delegate_take(c(2), alice_p).unwrap();
        let bob = s.connection(c(2)).unwrap();
        assert_eq!(bob.binding, Binding::Controlling(alice_p));
        assert!(bob.delegation.is_some());
        assert_eq!(
            s.players().get(alice_p).unwrap().orig_username.as_deref(),
            Some("alice")
        );
        assert_eq!(
            s.players().get(bob_p).unwrap().orig_username.as_deref(),
            Some("bob")
        );
        // The put-aside player keeps its username despite the collision.
        assert_eq!(s.players().get(bob_p).unwrap().username, "bob");

        s.delegate_restore(c(2)).unwrap();
        let bob = s.connection(c(2)).unwrap();
        assert_eq!(bob.binding, Binding::Controlling(bob_p));
        assert!(bob.delegation.is_none());
        let alice_player = s.players().get(alice_p).unwrap();
        assert_eq!(alice_player.orig_username, None);
        assert_eq!(alice_player.username, "alice");
        assert_eq!(s.players().get(bob_p).unwrap().orig_username, None);
    }

    #[test]
    fn test_delegate_take_from_global_observer_restores_observer() {
        let (mut s, alice_p, _) = running_pair();
        s.detach(c(1), false);
        s.detach(c(2), false);
        s.attach(c(2), None, true).unwrap();

        s.delegate_take(c(2), alice_p).unwrap();
        s.delegate_restore(c(2)).unwrap();
        assert_eq!(s.connection(c(2)).unwrap().binding, Binding::Observing(None));
    }

    #[test]
    fn test_delegate_take_twice_on_same_player_fails() {
        let (mut s, alice_p, _) = running_pair();
        s.detach(c(1), false);
        s.accept_connection(c(3), "10.0.0.3");
        s.conns.get_mut(c(3)).unwrap().username = "carol".into();
        s.conns.mark_established(c(3));

        s.delegate_take(c(2), alice_p).unwrap();
        assert_eq!(
            s.delegate_take(c(3), alice_p),
            Err(DelegationError::PlayerDelegated(alice_p))
        );
        assert!(s.connection(c(3)).unwrap().binding.is_unbound());
    }

    #[test]
    fn test_delegate_take_while_delegating_fails() {
        let (mut s, alice_p, bob_p) = running_pair();
        s.detach(c(1), false);
        s.delegate_take(c(2), alice_p).unwrap();
        assert_eq!(
            s.delegate_take(c(2), bob_p),
            Err(DelegationError::AlreadyDelegating(c(2)))
        );
    }

    #[test]
    fn test_delegate_take_controlled_player_fails_without_changes() {
        let (mut s, alice_p, bob_p) = running_pair();
        assert_eq!(
            s.delegate_take(c(2), alice_p),
            Err(DelegationError::Attach(AttachError::PlayerControlled(alice_p)))
        );
        assert_eq!(s.connection(c(2)).unwrap().binding, Binding::Controlling(bob_p));
        assert_eq!(s.players().get(bob_p).unwrap().orig_username, None);
    }

    #[test]
    fn test_delegate_restore_without_delegation_fails() {
        let (mut s, _, _) = running_pair();
        assert_eq!(
            s.delegate_restore(c(2)),
            Err(DelegationError::NotDelegating(c(2)))
        );
    }

    #[test]
    fn test_delegation_info_reports_both_sides() {
        let (mut s, alice_p, bob_p) = running_pair();
        s.set_delegate(alice_p, Some("bob")).unwrap();

        let alice_view = s.delegation_info(c(1));
        assert_eq!(alice_view.own_player, Some(alice_p));
        assert_eq!(alice_view.delegate_to.as_deref(), Some("bob"));

        s.detach(c(1), false);
        s.delegate_take(c(2), alice_p).unwrap();
        let bob_view = s.delegation_info(c(2));
        assert_eq!(bob_view.own_player, Some(bob_p));
        assert_eq!(bob_view.delegated_player, Some(alice_p));
        assert_eq!(bob_view.delegators, vec![alice_p]);
    }
}
