//! End-to-end lifecycle tests driving a `Session` through its public API:
//! joins, attach and detach, delegation, kicks, commands and votes.

use std::time::{Duration, Instant};

use civgate_protocol::{AccessLevel, ConnectionId, PlayerId, SERVER_CAPABILITY, Version};
use civgate_session::{
    ANON_USER_NAME, AttachError, Binding, CommandStatus, DelegationError, JoinOutcome,
    KickRegistry, Rejection, Session, SessionConfig,
};

// =========================================================================
// Helpers
// =========================================================================

fn c(id: u64) -> ConnectionId {
    ConnectionId::new(id)
}

fn join_from(
    s: &mut Session,
    id: u64,
    name: &str,
    addr: &str,
    now: Instant,
) -> Result<JoinOutcome, Rejection> {
    s.accept_connection(c(id), addr);
    s.handle_join_request(c(id), name, SERVER_CAPABILITY, &Version::default(), now)
}

/// Joins from a distinct address per connection id.
fn join(s: &mut Session, id: u64, name: &str) -> ConnectionId {
    let outcome = join_from(s, id, name, &format!("10.0.0.{id}"), Instant::now())
        .expect("join should be accepted");
    assert_eq!(outcome, JoinOutcome::Established);
    c(id)
}

fn binding(s: &Session, conn: ConnectionId) -> Binding {
    s.connection(conn).expect("connection exists").binding
}

fn controlled(s: &Session, conn: ConnectionId) -> PlayerId {
    binding(s, conn)
        .controlled()
        .expect("connection controls a player")
}

fn controller_count(s: &Session, p: PlayerId) -> usize {
    s.connections()
        .iter()
        .filter(|c| c.binding == Binding::Controlling(p))
        .count()
}

fn assert_single_controllers(s: &Session) {
    for p in s.players().ids() {
        assert!(
            controller_count(s, p) <= 1,
            "{p} has more than one controller"
        );
    }
}

fn command(s: &mut Session, caller: ConnectionId, line: &str) -> CommandStatus {
    s.execute_command(Some(caller), line, Instant::now()).status
}

/// alice and bob each control a player named after them; game running.
fn running_game() -> (Session, ConnectionId, ConnectionId) {
    let mut s = Session::new(SessionConfig::default());
    let alice = join(&mut s, 1, "alice");
    let bob = join(&mut s, 2, "bob");
    s.start_game();
    (s, alice, bob)
}

// =========================================================================
// Attachment
// =========================================================================

#[test]
fn test_take_never_leaves_two_controllers() {
    let mut s = Session::new(SessionConfig::default());
    let alice = join(&mut s, 1, "alice");
    let bob = join(&mut s, 2, "bob");
    let a = controlled(&s, alice);
    assert_single_controllers(&s);

    assert_eq!(command(&mut s, bob, "take alice"), CommandStatus::Ok);

    assert_single_controllers(&s);
    assert_eq!(binding(&s, bob), Binding::Controlling(a));
    assert_eq!(binding(&s, alice), Binding::Unbound);
    assert_eq!(s.players().get(a).unwrap().username, "bob");
}

#[test]
fn test_attach_controlled_player_is_refused() {
    let (mut s, alice, bob) = running_game();
    let a = controlled(&s, alice);

    s.detach(bob, false);
    assert_eq!(
        s.attach(bob, Some(a), false),
        Err(AttachError::PlayerControlled(a))
    );
    assert_eq!(binding(&s, bob), Binding::Unbound);
    assert_single_controllers(&s);
}

#[test]
fn test_detach_then_attach_restores_control() {
    let (mut s, alice, _bob) = running_game();
    let a = controlled(&s, alice);

    s.detach(alice, false);
    assert!(!s.players().get(a).unwrap().is_connected);

    s.attach(alice, Some(a), false).unwrap();
    assert_eq!(controlled(&s, alice), a);
    assert!(s.players().get(a).unwrap().is_connected);
}

#[test]
fn test_attach_moves_username_off_other_player() {
    let (mut s, alice, bob) = running_game();
    let a = controlled(&s, alice);
    let b = controlled(&s, bob);

    // bob leaves; his player stays in the running game.
    s.connection_lost(bob);
    assert!(s.players().contains(b));

    s.detach(alice, false);
    s.attach(alice, Some(b), false).unwrap();

    let old = s.players().get(a).unwrap();
    assert_eq!(old.username, ANON_USER_NAME);
    assert!(old.unassigned_user);
    let new = s.players().get(b).unwrap();
    assert_eq!(new.username, "alice");
    assert!(!new.unassigned_user);
}

#[test]
fn test_take_any_in_pregame_fills_up_to_maxplayers() {
    let mut s = Session::new(SessionConfig::default());
    s.change_setting("maxplayers", "3", AccessLevel::Hack).unwrap();
    let conns: Vec<ConnectionId> = (1..=4)
        .map(|id| join(&mut s, id, &format!("user{id}")))
        .collect();

    // The fourth connection found no room on connect.
    assert_eq!(binding(&s, conns[3]), Binding::Unbound);

    for conn in &conns {
        s.detach(*conn, true);
    }
    assert_eq!(s.players().player_count(), 0);

    let mut taken = Vec::new();
    for conn in &conns[..3] {
        s.attach(*conn, None, false).unwrap();
        taken.push(controlled(&s, *conn));
    }
    taken.sort();
    taken.dedup();
    assert_eq!(taken.len(), 3);
    assert_eq!(
        s.attach(conns[3], None, false),
        Err(AttachError::NoSlotAvailable)
    );
    assert_eq!(binding(&s, conns[3]), Binding::Unbound);
}

#[test]
fn test_take_any_allowed_when_global_observing_is_not() {
    let mut s = Session::new(SessionConfig::default());
    s.change_setting("allowtake", "HAhad", AccessLevel::Hack)
        .unwrap();
    join(&mut s, 1, "alice");
    let bob = join(&mut s, 2, "bob");
    assert_eq!(command(&mut s, bob, "detach"), CommandStatus::Ok);
    assert_eq!(binding(&s, bob), Binding::Unbound);

    assert_eq!(command(&mut s, bob, "take -"), CommandStatus::Ok);
    controlled(&s, bob);
    assert_eq!(command(&mut s, bob, "observe"), CommandStatus::Fail);
}

#[test]
fn test_detach_in_pregame_frees_unused_player() {
    let mut s = Session::new(SessionConfig::default());
    let alice = join(&mut s, 1, "alice");
    let p = controlled(&s, alice);

    s.detach(alice, true);

    assert!(!s.players().contains(p));
    assert_ne!(s.players().find_uncontrolled_player(), Some(p));
}

#[test]
fn test_detach_keeps_admin_created_player() {
    let mut s = Session::new(SessionConfig::default());
    let alice = join(&mut s, 1, "alice");
    assert_eq!(
        s.execute_command(None, "create Reserved", Instant::now()).status,
        CommandStatus::Ok
    );
    assert_eq!(command(&mut s, alice, "take Reserved"), CommandStatus::Ok);
    let p = controlled(&s, alice);

    s.detach(alice, true);

    let player = s.players().get(p).expect("created player survives");
    assert!(player.was_created);
    assert!(!player.is_connected);
}

// =========================================================================
// Delegation
// =========================================================================

#[test]
fn test_delegation_round_trip_restores_controller() {
    let (mut s, alice, bob) = running_game();
    let a = controlled(&s, alice);
    let b = controlled(&s, bob);

    assert_eq!(command(&mut s, alice, "delegate to bob"), CommandStatus::Ok);
    assert_eq!(command(&mut s, alice, "detach"), CommandStatus::Ok);
    assert_eq!(command(&mut s, bob, "delegate take alice"), CommandStatus::Ok);

    assert_eq!(binding(&s, bob), Binding::Controlling(a));
    assert_eq!(
        s.players().get(a).unwrap().orig_username.as_deref(),
        Some("alice")
    );

    assert_eq!(command(&mut s, bob, "delegate restore"), CommandStatus::Ok);

    assert_eq!(binding(&s, bob), Binding::Controlling(b));
    assert!(s.connection(bob).unwrap().delegation.is_none());
    let player = s.players().get(a).unwrap();
    assert_eq!(player.orig_username, None);
    assert_eq!(player.username, "alice");
    assert_eq!(s.players().get(b).unwrap().orig_username, None);
}

#[test]
fn test_delegation_round_trip_restores_global_observer() {
    let (mut s, alice, _bob) = running_game();
    let a = controlled(&s, alice);
    let carol = join(&mut s, 3, "carol");
    s.attach(carol, None, true).unwrap();
    s.detach(alice, false);

    s.delegate_take(carol, a).unwrap();
    assert_eq!(binding(&s, carol), Binding::Controlling(a));

    s.delegate_restore(carol).unwrap();
    assert_eq!(binding(&s, carol), Binding::Observing(None));
    assert_eq!(s.players().get(a).unwrap().orig_username, None);
}

#[test]
fn test_delegate_take_twice_is_refused() {
    let (mut s, alice, bob) = running_game();
    let a = controlled(&s, alice);
    let carol = join(&mut s, 3, "carol");
    s.attach(carol, None, true).unwrap();
    s.detach(alice, false);

    s.delegate_take(bob, a).unwrap();
    assert_eq!(
        s.delegate_take(carol, a),
        Err(DelegationError::PlayerDelegated(a))
    );
    assert_eq!(binding(&s, carol), Binding::Observing(None));
    assert_single_controllers(&s);
}

#[test]
fn test_delegate_take_without_grant_is_forbidden() {
    let (mut s, alice, bob) = running_game();
    assert_eq!(command(&mut s, alice, "detach"), CommandStatus::Ok);
    assert_eq!(
        command(&mut s, bob, "delegate take alice"),
        CommandStatus::Forbidden
    );
}

#[test]
fn test_owner_reconnect_restores_delegate_first() {
    let (mut s, alice, bob) = running_game();
    let a = controlled(&s, alice);
    let b = controlled(&s, bob);

    assert_eq!(command(&mut s, alice, "delegate to bob"), CommandStatus::Ok);
    s.connection_lost(alice);
    assert_eq!(command(&mut s, bob, "delegate take alice"), CommandStatus::Ok);
    assert_eq!(binding(&s, bob), Binding::Controlling(a));

    let alice = join(&mut s, 10, "alice");

    assert_eq!(binding(&s, bob), Binding::Controlling(b));
    assert!(s.connection(bob).unwrap().delegation.is_none());
    assert_eq!(binding(&s, alice), Binding::Controlling(a));
    let player = s.players().get(a).unwrap();
    assert_eq!(player.username, "alice");
    assert_eq!(player.orig_username, None);
    assert!(player.is_connected);
    assert_single_controllers(&s);
}

#[test]
fn test_delegate_lost_connection_hands_player_back() {
    let (mut s, alice, bob) = running_game();
    let a = controlled(&s, alice);
    let b = controlled(&s, bob);
    s.detach(alice, false);
    s.delegate_take(bob, a).unwrap();

    s.connection_lost(bob);

    let owner = s.players().get(a).unwrap();
    assert_eq!(owner.username, "alice");
    assert_eq!(owner.orig_username, None);
    assert_eq!(s.players().get(b).unwrap().orig_username, None);
    assert_eq!(s.connections().delegate_of(a), None);
}

// =========================================================================
// Kicks
// =========================================================================

#[test]
fn test_kick_registry_expires_and_purges() {
    let mut kicks = KickRegistry::new();
    let t0 = Instant::now();
    let kick_time = Duration::from_secs(60);
    kicks.kick_addr("10.0.0.9", t0);

    let remaining = kicks.check("10.0.0.9", None, t0, kick_time);
    assert!(remaining.is_some_and(|r| r > Duration::ZERO));

    let later = t0 + kick_time + Duration::from_secs(1);
    assert_eq!(kicks.check("10.0.0.9", None, later, kick_time), None);
    assert!(kicks.is_empty());
}

#[test]
fn test_kicked_user_is_refused_until_kicktime_passes() {
    let mut s = Session::new(SessionConfig::default());
    join(&mut s, 1, "alice");
    let mallory = join(&mut s, 2, "mallory");
    let t0 = Instant::now();

    s.kick(mallory, t0);
    assert!(s.connection(mallory).is_none());
    assert!(!s.kicks().is_empty());

    let soon = t0 + Duration::from_secs(10);
    match join_from(&mut s, 3, "mallory", "10.0.0.2", soon) {
        Err(Rejection::Kicked { remaining }) => {
            assert_eq!(remaining, Duration::from_secs(1790));
        }
        other => panic!("expected a kick rejection, got {other:?}"),
    }
    s.connection_lost(c(3));

    let later = t0 + Duration::from_secs(1801);
    assert_eq!(
        join_from(&mut s, 4, "mallory", "10.0.0.2", later),
        Ok(JoinOutcome::Established)
    );
    assert!(s.kicks().is_empty());
}

// =========================================================================
// Commands and votes
// =========================================================================

#[test]
fn test_cmdlevel_cannot_exceed_own_level() {
    let mut s = Session::new(SessionConfig::default());
    let alice = join(&mut s, 1, "alice");
    let bob = join(&mut s, 2, "bob");
    assert_eq!(s.connection(alice).unwrap().access_level, AccessLevel::Ctrl);

    assert_eq!(
        command(&mut s, alice, "cmdlevel admin bob"),
        CommandStatus::Forbidden
    );

    let outcome = s.execute_command(None, "cmdlevel admin bob", Instant::now());
    assert_eq!(outcome.status, CommandStatus::Ok);
    assert_eq!(
        s.connection(bob).unwrap().granted_access_level,
        AccessLevel::Admin
    );
}

#[test]
fn test_kick_vote_passes_with_majority() {
    let mut s = Session::new(SessionConfig::default());
    let alice = join(&mut s, 1, "alice");
    let bob = join(&mut s, 2, "bob");
    let carol = join(&mut s, 3, "carol");
    let dave = join(&mut s, 4, "dave");

    // bob has Basic: the kick becomes a vote.
    assert_eq!(command(&mut s, bob, "kick dave"), CommandStatus::Ok);
    assert_eq!(s.votes().running().len(), 1);
    assert!(s.connection(dave).is_some());

    assert_eq!(command(&mut s, carol, "vote yes"), CommandStatus::Ok);
    assert!(s.connection(dave).is_some());
    assert_eq!(command(&mut s, alice, "vote yes"), CommandStatus::Ok);

    assert!(s.connection(dave).is_none());
    assert!(s.votes().running().is_empty());
    assert!(!s.kicks().is_empty());
}

#[test]
fn test_kick_vote_needs_three_addresses() {
    let mut s = Session::new(SessionConfig::default());
    join(&mut s, 1, "alice");
    let bob = join(&mut s, 2, "bob");

    assert_eq!(command(&mut s, bob, "kick alice"), CommandStatus::Fail);
    assert!(s.votes().running().is_empty());
}

#[test]
fn test_unknown_command_is_syntax_error() {
    let mut s = Session::new(SessionConfig::default());
    let alice = join(&mut s, 1, "alice");
    assert_eq!(command(&mut s, alice, "frobnicate"), CommandStatus::Syntax);
}

#[test]
fn test_observe_then_take_back_own_player() {
    let (mut s, alice, _bob) = running_game();
    let a = controlled(&s, alice);

    assert_eq!(command(&mut s, alice, "observe alice"), CommandStatus::Ok);
    assert_eq!(binding(&s, alice), Binding::Observing(Some(a)));
    assert!(s.players().contains(a));
    // Levels above Basic are kept while observing.
    assert_eq!(s.connection(alice).unwrap().access_level, AccessLevel::Ctrl);

    assert_eq!(command(&mut s, alice, "take alice"), CommandStatus::Ok);
    assert_eq!(binding(&s, alice), Binding::Controlling(a));
}

#[test]
fn test_observer_with_basic_is_held_at_info() {
    let (mut s, _alice, bob) = running_game();
    assert_eq!(s.connection(bob).unwrap().access_level, AccessLevel::Basic);

    assert_eq!(command(&mut s, bob, "observe"), CommandStatus::Ok);
    assert_eq!(binding(&s, bob), Binding::Observing(None));
    assert_eq!(s.connection(bob).unwrap().access_level, AccessLevel::Info);

    assert_eq!(command(&mut s, bob, "take bob"), CommandStatus::Ok);
    assert_eq!(s.connection(bob).unwrap().access_level, AccessLevel::Basic);
}
