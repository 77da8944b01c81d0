//! Time-bounded kick bans.
//!
//! A kick records the moment it happened against the kicked address and
//! against every username that was connected from it. A returning client
//! is refused while the later of its address and username kicks is
//! younger than the `kicktime` setting. Stale entries are purged when
//! they are looked up, and swept from both tables on every new kick.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Kick timestamps by address and by username.
///
/// Time is always passed in by the caller so the table can be driven by
/// a simulated clock in tests.
#[derive(Debug, Clone, Default)]
pub struct KickRegistry {
    by_addr: HashMap<String, Instant>,
    by_user: HashMap<String, Instant>,
}

impl KickRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kick_addr(&mut self, addr: &str, now: Instant) {
        self.by_addr.insert(addr.to_string(), now);
    }

    pub fn kick_user(&mut self, username: &str, now: Instant) {
        self.by_user.insert(username.to_ascii_lowercase(), now);
    }

    /// Remaining ban time for a client, or `None` if it may connect.
    ///
    /// When the most recent matching kick is older than `kick_time`, both
    /// entries are removed and `None` is returned.
    pub fn check(
        &mut self,
        addr: &str,
        username: Option<&str>,
        now: Instant,
        kick_time: Duration,
    ) -> Option<Duration> {
        let user_key = username.map(str::to_ascii_lowercase);
        let addr_kick = self.by_addr.get(addr).copied();
        let user_kick = user_key.as_ref().and_then(|u| self.by_user.get(u).copied());
        let kicked_at = addr_kick.max(user_kick)?;

        let elapsed = now.saturating_duration_since(kicked_at);
        if elapsed > kick_time {
            self.by_addr.remove(addr);
            if let Some(user) = &user_key {
                self.by_user.remove(user);
            }
            return None;
        }
        Some(kick_time - elapsed)
    }

    /// Drops every entry older than `kick_time`.
    pub fn purge(&mut self, now: Instant, kick_time: Duration) {
        let live = |at: &mut Instant| now.saturating_duration_since(*at) <= kick_time;
        self.by_addr.retain(|_, at| live(at));
        self.by_user.retain(|_, at| live(at));
    }

    /// Number of entries across both tables.
    pub fn len(&self) -> usize {
        self.by_addr.len() + self.by_user.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KICK_TIME: Duration = Duration::from_secs(1800);

    #[test]
    fn test_check_unknown_client_not_kicked() {
        let mut kicks = KickRegistry::new();
        assert_eq!(
            kicks.check("1.2.3.4", Some("alice"), Instant::now(), KICK_TIME),
            None
        );
    }

    #[test]
    fn test_check_right_after_kick_reports_remaining() {
        let mut kicks = KickRegistry::new();
        let now = Instant::now();
        kicks.kick_addr("1.2.3.4", now);

        let later = now + Duration::from_secs(100);
        let remaining = kicks.check("1.2.3.4", None, later, KICK_TIME);
        assert_eq!(remaining, Some(Duration::from_secs(1700)));
    }

    #[test]
    fn test_check_after_kick_time_purges_entries() {
        let mut kicks = KickRegistry::new();
        let now = Instant::now();
        kicks.kick_addr("1.2.3.4", now);
        kicks.kick_user("alice", now);
        assert_eq!(kicks.len(), 2);

        let later = now + KICK_TIME + Duration::from_secs(1);
        assert_eq!(kicks.check("1.2.3.4", Some("alice"), later, KICK_TIME), None);
        assert!(kicks.is_empty());
    }

    #[test]
    fn test_purge_drops_only_expired_entries() {
        let mut kicks = KickRegistry::new();
        let start = Instant::now();
        kicks.kick_addr("1.2.3.4", start);
        kicks.kick_user("alice", start);
        kicks.kick_addr("5.6.7.8", start + Duration::from_secs(1000));

        kicks.purge(start + Duration::from_secs(2000), KICK_TIME);

        assert_eq!(kicks.len(), 1);
        assert!(
            kicks
                .check("5.6.7.8", None, start + Duration::from_secs(2000), KICK_TIME)
                .is_some()
        );
    }

    #[test]
    fn test_check_username_kick_applies_from_other_address() {
        let mut kicks = KickRegistry::new();
        let now = Instant::now();
        kicks.kick_user("Alice", now);

        let remaining = kicks.check("9.9.9.9", Some("alice"), now, KICK_TIME);
        assert_eq!(remaining, Some(KICK_TIME));
    }

    #[test]
    fn test_check_uses_latest_of_address_and_user_kicks() {
        let mut kicks = KickRegistry::new();
        let start = Instant::now();
        kicks.kick_addr("1.2.3.4", start);
        kicks.kick_user("alice", start + Duration::from_secs(1000));

        // The address kick alone would have expired; the user kick keeps
        // the ban alive.
        let at = start + Duration::from_secs(2000);
        let remaining = kicks.check("1.2.3.4", Some("alice"), at, KICK_TIME);
        assert_eq!(remaining, Some(Duration::from_secs(800)));
    }
}
