//! Outbound traffic and the event cache.
//!
//! The session never talks to sockets. Every operation appends
//! [`Outbound`] items to the session's outbox, which the server drains
//! after each event and delivers in order.
//!
//! Notifications meant for everyone, for one player's connections, or for
//! global observers are also kept in a bounded [`EventCache`], so someone
//! who attaches later can catch up on what happened.

use std::collections::VecDeque;

use civgate_protocol::{ConnectionId, EventKind, Packet, PlayerId};

use crate::Binding;

/// One item of outbound work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Deliver a packet to one connection.
    Packet { conn: ConnectionId, packet: Packet },
    /// Deliver a game snapshot. The bytes are final; compressing them is
    /// left to the delivering side.
    Snapshot { conn: ConnectionId, data: Vec<u8> },
    /// Tell the connection why, then close its transport.
    Close { conn: ConnectionId, reason: String },
}

impl Outbound {
    pub fn conn(&self) -> ConnectionId {
        match self {
            Outbound::Packet { conn, .. }
            | Outbound::Snapshot { conn, .. }
            | Outbound::Close { conn, .. } => *conn,
        }
    }
}

/// Who a cached event was addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTarget {
    Everyone,
    Player(PlayerId),
    GlobalObservers,
}

impl EventTarget {
    fn reaches(self, binding: Binding) -> bool {
        match self {
            EventTarget::Everyone => true,
            EventTarget::Player(p) => binding.player() == Some(p),
            EventTarget::GlobalObservers => binding.is_global_observer(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedEvent {
    pub target: EventTarget,
    pub kind: EventKind,
    pub message: String,
    pub turn: u32,
}

/// Bounded replay log of notifications.
#[derive(Debug, Clone)]
pub struct EventCache {
    events: VecDeque<CachedEvent>,
    capacity: usize,
}

impl EventCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Appends an event, dropping the oldest when full.
    pub fn add(&mut self, target: EventTarget, kind: EventKind, message: &str, turn: u32) {
        if self.capacity == 0 {
            return;
        }
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(CachedEvent {
            target,
            kind,
            message: message.to_string(),
            turn,
        });
    }

    /// The events a connection with `binding` should be shown, oldest first.
    pub fn replay_for(&self, binding: Binding) -> impl Iterator<Item = &CachedEvent> {
        self.events.iter().filter(move |e| e.target.reaches(binding))
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_drops_oldest_when_full() {
        let mut cache = EventCache::new(2);
        for msg in ["one", "two", "three"] {
            cache.add(EventTarget::Everyone, EventKind::Report, msg, 1);
        }
        let kept: Vec<_> = cache
            .replay_for(Binding::Unbound)
            .map(|e| e.message.as_str())
            .collect();
        assert_eq!(kept, vec!["two", "three"]);
    }

    #[test]
    fn test_add_with_zero_capacity_keeps_nothing() {
        let mut cache = EventCache::new(0);
        cache.add(EventTarget::Everyone, EventKind::Report, "x", 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_replay_for_filters_by_target() {
        let mut cache = EventCache::new(10);
        cache.add(EventTarget::Everyone, EventKind::Report, "all", 1);
        cache.add(EventTarget::Player(PlayerId(1)), EventKind::Player, "p1", 1);
        cache.add(EventTarget::GlobalObservers, EventKind::Report, "obs", 1);

        let seen = |binding| -> Vec<String> {
            cache.replay_for(binding).map(|e| e.message.clone()).collect()
        };
        assert_eq!(seen(Binding::Controlling(PlayerId(1))), vec!["all", "p1"]);
        assert_eq!(seen(Binding::Observing(Some(PlayerId(1)))), vec!["all", "p1"]);
        assert_eq!(seen(Binding::Observing(None)), vec!["all", "obs"]);
        assert_eq!(seen(Binding::Controlling(PlayerId(2))), vec!["all"]);
    }

    #[test]
    fn test_outbound_conn_accessor() {
        let out = Outbound::Close {
            conn: ConnectionId::new(3),
            reason: "kicked".into(),
        };
        assert_eq!(out.conn(), ConnectionId::new(3));
    }
}
