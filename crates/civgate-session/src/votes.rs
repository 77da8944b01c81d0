//! Command votes.
//!
//! A user without the level to run a votable command may put it to a
//! vote instead. Each user runs at most one vote at a time; starting a
//! new one replaces the old. The caller votes yes automatically.

use std::collections::BTreeMap;

use civgate_protocol::{ConnectionId, Packet};

use crate::VoteError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ballot {
    Yes,
    No,
    Abstain,
}

impl Ballot {
    pub fn parse(text: &str) -> Option<Self> {
        match text.to_ascii_lowercase().as_str() {
            "yes" | "y" => Some(Ballot::Yes),
            "no" | "n" => Some(Ballot::No),
            "abstain" | "a" => Some(Ballot::Abstain),
            _ => None,
        }
    }
}

/// Outcome of a vote after a ballot was counted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoteStatus {
    Running,
    /// Passed; carries the command to execute.
    Passed(String),
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vote {
    pub vote_no: u32,
    pub caller: ConnectionId,
    pub caller_name: String,
    pub command: String,
    ballots: BTreeMap<ConnectionId, Ballot>,
}

impl Vote {
    fn count(&self, ballot: Ballot) -> u32 {
        self.ballots.values().filter(|b| **b == ballot).count() as u32
    }

    /// Passed when yes votes are more than half of the voters, failed
    /// once no votes reach half.
    fn status(&self, voters: u32) -> VoteStatus {
        let (yes, no) = (self.count(Ballot::Yes), self.count(Ballot::No));
        if yes * 2 > voters {
            VoteStatus::Passed(self.command.clone())
        } else if voters > 0 && no * 2 >= voters {
            VoteStatus::Failed
        } else {
            VoteStatus::Running
        }
    }

    pub fn new_packet(&self, voters: u32) -> Packet {
        Packet::VoteNew {
            vote_no: self.vote_no,
            user: self.caller_name.clone(),
            description: self.command.clone(),
            voters,
        }
    }

    pub fn update_packet(&self, voters: u32) -> Packet {
        Packet::VoteUpdate {
            vote_no: self.vote_no,
            yes: self.count(Ballot::Yes),
            no: self.count(Ballot::No),
            abstain: self.count(Ballot::Abstain),
            voters,
        }
    }
}

/// All running votes.
#[derive(Debug, Clone)]
pub struct VoteRegistry {
    votes: Vec<Vote>,
    next_no: u32,
}

impl Default for VoteRegistry {
    fn default() -> Self {
        Self {
            votes: Vec::new(),
            next_no: 1,
        }
    }
}

impl VoteRegistry {
    pub fn running(&self) -> &[Vote] {
        &self.votes
    }

    pub fn get(&self, vote_no: u32) -> Option<&Vote> {
        self.votes.iter().find(|v| v.vote_no == vote_no)
    }

    /// Starts a vote. Returns its number and the number of the vote it
    /// replaced, if the caller already had one running.
    pub fn start(
        &mut self,
        caller: ConnectionId,
        caller_name: &str,
        command: &str,
    ) -> (u32, Option<u32>) {
        let replaced = self
            .votes
            .iter()
            .position(|v| v.caller == caller)
            .map(|i| self.votes.remove(i).vote_no);
        let vote_no = self.next_no;
        self.next_no += 1;
        let mut ballots = BTreeMap::new();
        ballots.insert(caller, Ballot::Yes);
        self.votes.push(Vote {
            vote_no,
            caller,
            caller_name: caller_name.to_string(),
            command: command.to_string(),
            ballots,
        });
        (vote_no, replaced)
    }

    /// Resolves which vote a ballot is for when the number was omitted.
    pub fn pick(&self, vote_no: Option<u32>) -> Result<u32, VoteError> {
        match vote_no {
            Some(n) if self.get(n).is_some() => Ok(n),
            Some(n) => Err(VoteError::NotFound(n)),
            None if self.votes.len() == 1 => Ok(self.votes[0].vote_no),
            None => Err(VoteError::Ambiguous(self.votes.len())),
        }
    }

    /// Records a ballot and evaluates the vote. A vote that is decided
    /// is removed.
    pub fn cast(
        &mut self,
        vote_no: u32,
        voter: ConnectionId,
        ballot: Ballot,
        voters: u32,
    ) -> Result<VoteStatus, VoteError> {
        let index = self
            .votes
            .iter()
            .position(|v| v.vote_no == vote_no)
            .ok_or(VoteError::NotFound(vote_no))?;
        self.votes[index].ballots.insert(voter, ballot);
        Ok(self.evaluate(index, voters))
    }

    /// Evaluates a vote, removing it if it is decided.
    pub fn check(&mut self, vote_no: u32, voters: u32) -> Option<VoteStatus> {
        let index = self.votes.iter().position(|v| v.vote_no == vote_no)?;
        Some(self.evaluate(index, voters))
    }

    fn evaluate(&mut self, index: usize, voters: u32) -> VoteStatus {
        let status = self.votes[index].status(voters);
        if status != VoteStatus::Running {
            self.votes.remove(index);
        }
        status
    }

    /// Drops the votes `conn` started and withdraws its ballots from the
    /// others. Returns the numbers of the dropped votes.
    pub fn cancel_for(&mut self, conn: ConnectionId) -> Vec<u32> {
        let mut removed = Vec::new();
        self.votes.retain(|v| {
            if v.caller == conn {
                removed.push(v.vote_no);
                false
            } else {
                true
            }
        });
        for vote in &mut self.votes {
            vote.ballots.remove(&conn);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(id: u64) -> ConnectionId {
        ConnectionId::new(id)
    }

    #[test]
    fn test_start_counts_caller_as_yes() {
        let mut votes = VoteRegistry::default();
        let (n, replaced) = votes.start(c(1), "alice", "kick bob");
        assert_eq!(n, 1);
        assert_eq!(replaced, None);
        assert_eq!(votes.check(n, 4), Some(VoteStatus::Running));
        match votes.get(n).unwrap().update_packet(4) {
            Packet::VoteUpdate { yes, .. } => assert_eq!(yes, 1),
            other => panic!("expected VoteUpdate, got {other:?}"),
        }
    }

    #[test]
    fn test_start_replaces_callers_previous_vote() {
        let mut votes = VoteRegistry::default();
        let (first, _) = votes.start(c(1), "alice", "kick bob");
        let (second, replaced) = votes.start(c(1), "alice", "kick carol");
        assert_eq!(replaced, Some(first));
        assert_eq!(votes.running().len(), 1);
        assert_eq!(votes.running()[0].vote_no, second);
    }

    #[test]
    fn test_cast_passes_on_majority() {
        let mut votes = VoteRegistry::default();
        let (n, _) = votes.start(c(1), "alice", "kick bob");
        let status = votes.cast(n, c(2), Ballot::Yes, 3).unwrap();
        assert_eq!(status, VoteStatus::Passed("kick bob".into()));
        assert!(votes.running().is_empty());
    }

    #[test]
    fn test_cast_fails_when_half_vote_no() {
        let mut votes = VoteRegistry::default();
        let (n, _) = votes.start(c(1), "alice", "kick bob");
        assert_eq!(votes.cast(n, c(2), Ballot::No, 4).unwrap(), VoteStatus::Running);
        assert_eq!(votes.cast(n, c(3), Ballot::No, 4).unwrap(), VoteStatus::Failed);
    }

    #[test]
    fn test_cast_unknown_vote() {
        let mut votes = VoteRegistry::default();
        assert_eq!(
            votes.cast(9, c(1), Ballot::Yes, 2),
            Err(VoteError::NotFound(9))
        );
    }

    #[test]
    fn test_pick_requires_number_when_several_run() {
        let mut votes = VoteRegistry::default();
        assert_eq!(votes.pick(None), Err(VoteError::Ambiguous(0)));
        let (n, _) = votes.start(c(1), "alice", "kick bob");
        assert_eq!(votes.pick(None), Ok(n));
        votes.start(c(2), "bob", "kick carol");
        assert_eq!(votes.pick(None), Err(VoteError::Ambiguous(2)));
    }

    #[test]
    fn test_cancel_for_drops_votes_and_ballots() {
        let mut votes = VoteRegistry::default();
        let (mine, _) = votes.start(c(1), "alice", "kick bob");
        let (theirs, _) = votes.start(c(2), "bob", "kick carol");
        votes.cast(theirs, c(1), Ballot::Yes, 10).unwrap();

        assert_eq!(votes.cancel_for(c(1)), vec![mine]);
        assert_eq!(votes.running().len(), 1);
        match votes.get(theirs).unwrap().update_packet(10) {
            Packet::VoteUpdate { yes, .. } => assert_eq!(yes, 1),
            other => panic!("expected VoteUpdate, got {other:?}"),
        }
    }

    #[test]
    fn test_ballot_parse() {
        assert_eq!(Ballot::parse("YES"), Some(Ballot::Yes));
        assert_eq!(Ballot::parse("n"), Some(Ballot::No));
        assert_eq!(Ballot::parse("maybe"), None);
    }
}
