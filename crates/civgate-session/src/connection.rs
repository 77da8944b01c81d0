//! Per-connection state.
//!
//! A [`ConnectionRecord`] lives from the moment the transport accepts a
//! socket until the socket is gone. Two state machines run side by side:
//!
//! ```text
//! handshake:  NotStarted ──→ AwaitingAuth ──→ Established
//!                  │              │
//!                  └──────────────┴──→ Rejected
//!
//! binding:    Unbound ←──→ Observing(player | global)
//!                ↑ ↓
//!             Controlling(p) ──take──→ DelegateControlling(p2)
//!                   ↑                         │
//!                   └─────────restore─────────┘
//! ```
//!
//! Players and connections refer to each other by id only. The set of
//! connections bound to a player is derived on demand by scanning the
//! [`Connections`] arena.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use civgate_protocol::{AccessLevel, ConnectionId, ConnectionInfo, PlayerId};

/// What a connection is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Binding {
    #[default]
    Unbound,
    /// Watching one player, or everything when `None`.
    Observing(Option<PlayerId>),
    /// The sole controller of a player.
    Controlling(PlayerId),
}

impl Binding {
    /// The player this binding refers to, controlled or observed.
    pub fn player(self) -> Option<PlayerId> {
        match self {
            Binding::Unbound | Binding::Observing(None) => None,
            Binding::Observing(Some(p)) | Binding::Controlling(p) => Some(p),
        }
    }

    /// The player this binding controls.
    pub fn controlled(self) -> Option<PlayerId> {
        match self {
            Binding::Controlling(p) => Some(p),
            _ => None,
        }
    }

    pub fn is_observer(self) -> bool {
        matches!(self, Binding::Observing(_))
    }

    pub fn is_unbound(self) -> bool {
        matches!(self, Binding::Unbound)
    }

    pub fn is_global_observer(self) -> bool {
        matches!(self, Binding::Observing(None))
    }

    /// Rebuilds a binding from a player reference and observer flag, the
    /// form in which delegation stores it.
    pub fn from_parts(player: Option<PlayerId>, observer: bool) -> Self {
        match (player, observer) {
            (player, true) => Binding::Observing(player),
            (Some(p), false) => Binding::Controlling(p),
            (None, false) => Binding::Unbound,
        }
    }
}

/// The binding as seen from outside, with delegation folded in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingState {
    Unbound,
    Observing(Option<PlayerId>),
    Controlling(PlayerId),
    DelegateControlling(PlayerId),
}

/// Progress of the join handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandshakeState {
    #[default]
    NotStarted,
    /// Validated; waiting for the authentication service.
    AwaitingAuth,
    Established,
    /// Refused. The transport is being closed.
    Rejected,
}

/// Binding a connection had before it started playing a delegated player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelegationState {
    pub player: Option<PlayerId>,
    pub observer: bool,
}

impl DelegationState {
    pub fn saved_binding(self) -> Binding {
        Binding::from_parts(self.player, self.observer)
    }
}

/// Keep-alive bookkeeping. The timers themselves belong to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PingState {
    pub last_heartbeat: Option<Instant>,
    pub round_trip: Option<Duration>,
}

/// One pattern of an ignore list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnorePattern {
    User(String),
    Host(String),
}

impl IgnorePattern {
    /// Parses `user=<glob>`, `host=<glob>`, or a bare glob meaning `user=`.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let (kind, glob) = match text.split_once('=') {
            Some((kind, glob)) => (kind.trim(), glob.trim()),
            None => ("user", text),
        };
        if glob.is_empty() {
            return None;
        }
        match kind.to_ascii_lowercase().as_str() {
            "user" => Some(IgnorePattern::User(glob.to_string())),
            "host" => Some(IgnorePattern::Host(glob.to_string())),
            _ => None,
        }
    }

    pub fn matches(&self, username: &str, addr: &str) -> bool {
        match self {
            IgnorePattern::User(glob) => wildcard_match(glob, username),
            IgnorePattern::Host(glob) => wildcard_match(glob, addr),
        }
    }
}

impl std::fmt::Display for IgnorePattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IgnorePattern::User(glob) => write!(f, "user={glob}"),
            IgnorePattern::Host(glob) => write!(f, "host={glob}"),
        }
    }
}

/// Case-insensitive glob match supporting `*` and `?`.
pub fn wildcard_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.to_lowercase().chars().collect();
    let t: Vec<char> = text.to_lowercase().chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;
    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((sp, st)) = star {
            pi = sp + 1;
            ti = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|&c| c == '*')
}

/// State of one live connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRecord {
    pub id: ConnectionId,
    /// Empty until the join request has been validated.
    pub username: String,
    pub addr: String,
    pub capability: String,
    pub handshake: HandshakeState,
    /// The level in effect right now.
    pub access_level: AccessLevel,
    /// The ceiling the current level is derived from.
    pub granted_access_level: AccessLevel,
    pub binding: Binding,
    /// Present while the connection plays a delegated player.
    pub delegation: Option<DelegationState>,
    pub ignore: Vec<IgnorePattern>,
    pub ping: PingState,
}

impl ConnectionRecord {
    pub fn new(id: ConnectionId, addr: impl Into<String>) -> Self {
        Self {
            id,
            username: String::new(),
            addr: addr.into(),
            capability: String::new(),
            handshake: HandshakeState::NotStarted,
            access_level: AccessLevel::None,
            granted_access_level: AccessLevel::None,
            binding: Binding::Unbound,
            delegation: None,
            ignore: Vec::new(),
            ping: PingState::default(),
        }
    }

    pub fn is_established(&self) -> bool {
        self.handshake == HandshakeState::Established
    }

    pub fn state(&self) -> BindingState {
        match (self.binding, self.delegation) {
            (Binding::Unbound, _) => BindingState::Unbound,
            (Binding::Observing(p), _) => BindingState::Observing(p),
            (Binding::Controlling(p), Some(_)) => {
                BindingState::DelegateControlling(p)
            }
            (Binding::Controlling(p), None) => BindingState::Controlling(p),
        }
    }

    pub fn is_ignoring(&self, username: &str, addr: &str) -> bool {
        self.ignore.iter().any(|p| p.matches(username, addr))
    }

    /// `"alice from 10.0.0.1"`, or just the address before login.
    pub fn describe(&self) -> String {
        if self.username.is_empty() {
            format!("connection from {}", self.addr)
        } else {
            format!("{} from {}", self.username, self.addr)
        }
    }

    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id.into_inner(),
            used: true,
            established: self.is_established(),
            observer: self.binding.is_observer(),
            player: self.binding.player(),
            access_level: self.access_level,
            username: self.username.clone(),
            addr: self.addr.clone(),
            capability: self.capability.clone(),
        }
    }

    /// The variant clients use to drop this connection from their lists.
    pub fn removed_info(&self) -> ConnectionInfo {
        ConnectionInfo {
            used: false,
            established: false,
            observer: false,
            player: None,
            ..self.info()
        }
    }
}

/// Arena of all live connections plus the established list.
#[derive(Debug, Clone, Default)]
pub struct Connections {
    records: BTreeMap<ConnectionId, ConnectionRecord>,
    /// Established connections in the order they were established.
    established: Vec<ConnectionId>,
}

impl Connections {
    pub fn insert(&mut self, record: ConnectionRecord) {
        self.records.insert(record.id, record);
    }

    pub fn remove(&mut self, id: ConnectionId) -> Option<ConnectionRecord> {
        self.established.retain(|c| *c != id);
        self.records.remove(&id)
    }

    pub fn get(&self, id: ConnectionId) -> Option<&ConnectionRecord> {
        self.records.get(&id)
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut ConnectionRecord> {
        self.records.get_mut(&id)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.records.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All records, ordered by id.
    pub fn iter(&self) -> impl Iterator<Item = &ConnectionRecord> {
        self.records.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ConnectionRecord> {
        self.records.values_mut()
    }

    pub fn established(&self) -> &[ConnectionId] {
        &self.established
    }

    /// Marks a connection established and appends it to the list.
    pub fn mark_established(&mut self, id: ConnectionId) {
        if let Some(record) = self.records.get_mut(&id) {
            record.handshake = HandshakeState::Established;
            if !self.established.contains(&id) {
                self.established.push(id);
            }
        }
    }

    /// Every connection bound to `player`, controller and observers.
    pub fn bound_to(&self, player: PlayerId) -> Vec<ConnectionId> {
        self.records
            .values()
            .filter(|c| c.binding.player() == Some(player))
            .map(|c| c.id)
            .collect()
    }

    /// The connection controlling `player`, if any.
    pub fn controller_of(&self, player: PlayerId) -> Option<ConnectionId> {
        self.records
            .values()
            .find(|c| c.binding == Binding::Controlling(player))
            .map(|c| c.id)
    }

    /// The connection playing `player` as a delegate, if any.
    pub fn delegate_of(&self, player: PlayerId) -> Option<ConnectionId> {
        self.records
            .values()
            .find(|c| c.state() == BindingState::DelegateControlling(player))
            .map(|c| c.id)
    }

    /// Established connection logged in as `username`, ignoring case.
    pub fn by_username(&self, username: &str) -> Option<ConnectionId> {
        self.established
            .iter()
            .copied()
            .find(|id| {
                self.records
                    .get(id)
                    .is_some_and(|c| c.username.eq_ignore_ascii_case(username))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: u64) -> ConnectionRecord {
        ConnectionRecord::new(ConnectionId::new(id), "10.0.0.1")
    }

    #[test]
    fn test_binding_from_parts_covers_all_shapes() {
        let p = PlayerId(1);
        assert_eq!(Binding::from_parts(Some(p), false), Binding::Controlling(p));
        assert_eq!(Binding::from_parts(Some(p), true), Binding::Observing(Some(p)));
        assert_eq!(Binding::from_parts(None, true), Binding::Observing(None));
        assert_eq!(Binding::from_parts(None, false), Binding::Unbound);
    }

    #[test]
    fn test_state_reports_delegate_controlling() {
        let mut conn = record(1);
        conn.binding = Binding::Controlling(PlayerId(3));
        assert_eq!(conn.state(), BindingState::Controlling(PlayerId(3)));

        conn.delegation = Some(DelegationState {
            player: None,
            observer: true,
        });
        assert_eq!(conn.state(), BindingState::DelegateControlling(PlayerId(3)));
    }

    #[test]
    fn test_info_observer_of_player_carries_player() {
        let mut conn = record(4);
        conn.username = "carol".into();
        conn.binding = Binding::Observing(Some(PlayerId(2)));
        let info = conn.info();
        assert!(info.used);
        assert!(info.observer);
        assert_eq!(info.player, Some(PlayerId(2)));
    }

    #[test]
    fn test_removed_info_marks_unused() {
        let mut conn = record(4);
        conn.binding = Binding::Controlling(PlayerId(2));
        let info = conn.removed_info();
        assert!(!info.used);
        assert_eq!(info.player, None);
        assert_eq!(info.id, 4);
    }

    #[test]
    fn test_wildcard_match_star_and_question_mark() {
        assert!(wildcard_match("al*", "Alice"));
        assert!(wildcard_match("b?b", "bob"));
        assert!(wildcard_match("*", ""));
        assert!(wildcard_match("*ce", "alice"));
        assert!(!wildcard_match("al?", "alice"));
        assert!(!wildcard_match("bob", "bobby"));
    }

    #[test]
    fn test_ignore_pattern_parse_defaults_to_user() {
        assert_eq!(
            IgnorePattern::parse("troll*"),
            Some(IgnorePattern::User("troll*".into()))
        );
        assert_eq!(
            IgnorePattern::parse("host=10.*"),
            Some(IgnorePattern::Host("10.*".into()))
        );
        assert_eq!(IgnorePattern::parse("nick=x"), None);
        assert_eq!(IgnorePattern::parse("user="), None);
    }

    #[test]
    fn test_is_ignoring_by_host() {
        let mut conn = record(1);
        conn.ignore.push(IgnorePattern::Host("192.168.*".into()));
        assert!(conn.is_ignoring("anyone", "192.168.0.7"));
        assert!(!conn.is_ignoring("anyone", "10.0.0.7"));
    }

    #[test]
    fn test_connections_bound_to_and_controller_of() {
        let mut conns = Connections::default();
        let mut a = record(1);
        a.binding = Binding::Controlling(PlayerId(0));
        let mut b = record(2);
        b.binding = Binding::Observing(Some(PlayerId(0)));
        let mut c = record(3);
        c.binding = Binding::Observing(None);
        conns.insert(a);
        conns.insert(b);
        conns.insert(c);

        assert_eq!(
            conns.bound_to(PlayerId(0)),
            vec![ConnectionId::new(1), ConnectionId::new(2)]
        );
        assert_eq!(conns.controller_of(PlayerId(0)), Some(ConnectionId::new(1)));
        assert_eq!(conns.controller_of(PlayerId(1)), None);
    }

    #[test]
    fn test_connections_mark_established_keeps_order_and_remove_drops() {
        let mut conns = Connections::default();
        for id in [5, 2, 9] {
            conns.insert(record(id));
        }
        conns.mark_established(ConnectionId::new(9));
        conns.mark_established(ConnectionId::new(2));
        conns.mark_established(ConnectionId::new(9));
        assert_eq!(
            conns.established(),
            &[ConnectionId::new(9), ConnectionId::new(2)]
        );

        conns.remove(ConnectionId::new(9));
        assert_eq!(conns.established(), &[ConnectionId::new(2)]);
        assert_eq!(conns.len(), 2);
    }

    #[test]
    fn test_by_username_only_matches_established() {
        let mut conns = Connections::default();
        let mut a = record(1);
        a.username = "Dave".into();
        conns.insert(a);
        assert_eq!(conns.by_username("dave"), None);

        conns.mark_established(ConnectionId::new(1));
        assert_eq!(conns.by_username("dave"), Some(ConnectionId::new(1)));
    }
}
