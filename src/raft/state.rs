//! Peer state and role transitions.

use super::log::Log;
use crate::config::RaftConfig;
use crate::types::{LogIndex, NodeId, Term};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The role of a peer within its current term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// Passive: responds to RPCs, waits out the election timer.
    Follower,
    /// Actively soliciting votes for this term.
    Candidate,
    /// Handling client submissions and driving replication.
    Leader,
}

impl Role {
    pub fn is_leader(&self) -> bool {
        matches!(self, Role::Leader)
    }

    pub fn is_follower(&self) -> bool {
        matches!(self, Role::Follower)
    }

    pub fn is_candidate(&self) -> bool {
        matches!(self, Role::Candidate)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Follower => write!(f, "Follower"),
            Role::Candidate => write!(f, "Candidate"),
            Role::Leader => write!(f, "Leader"),
        }
    }
}

/// All mutable peer state, guarded by the peer's single mutex.
///
/// `current_term`, `voted_for`, and `log` are durable: any path that mutates
/// them must run the persister before the mutex is released.
#[derive(Debug)]
pub struct RaftState {
    /// This peer's index into the peer vector.
    pub me: NodeId,
    /// Total number of peers, including this one.
    pub cluster_size: usize,
    /// Current role; initially Follower.
    pub role: Role,
    /// Latest term this peer has seen.
    pub current_term: Term,
    /// Peer granted this peer's vote in `current_term`, if any.
    pub voted_for: Option<NodeId>,
    /// The replicated log, sentinel included.
    pub log: Log,
    /// Highest index known committed.
    pub commit_index: LogIndex,
    /// Highest index delivered to the application.
    pub last_applied: LogIndex,
    /// Best-known leader for the current term.
    pub leader_id: Option<NodeId>,
    /// Votes gathered in the current candidacy.
    pub votes_received: usize,
    /// Per-peer next log index to send (leader only, sized N).
    pub next_index: Vec<LogIndex>,
    /// Per-peer highest replicated index (leader only, sized N).
    pub match_index: Vec<LogIndex>,
    /// Current randomized election timeout.
    pub election_timeout: Duration,
    timeout_min: Duration,
    timeout_max: Duration,
}

impl RaftState {
    pub fn new(config: &RaftConfig) -> Self {
        let mut state = Self {
            me: config.node_id,
            cluster_size: config.cluster_size,
            role: Role::Follower,
            current_term: 0,
            voted_for: None,
            log: Log::new(),
            commit_index: 0,
            last_applied: 0,
            leader_id: None,
            votes_received: 0,
            next_index: vec![0; config.cluster_size],
            match_index: vec![0; config.cluster_size],
            election_timeout: config.election_timeout_min,
            timeout_min: config.election_timeout_min,
            timeout_max: config.election_timeout_max,
        };
        state.reset_election_timeout();
        state
    }

    /// Number of peers needed for a quorum.
    pub fn majority(&self) -> usize {
        self.cluster_size / 2 + 1
    }

    /// Resample the election timeout uniformly from the configured range.
    pub fn reset_election_timeout(&mut self) {
        let mut rng = rand::thread_rng();
        self.election_timeout = rng.gen_range(self.timeout_min..=self.timeout_max);
    }

    /// Step down at `term`. The recorded vote is cleared only when the term
    /// actually advances; within a term a vote is cast at most once.
    pub fn become_follower(&mut self, term: Term, leader_id: Option<NodeId>) {
        if term > self.current_term {
            self.current_term = term;
            self.voted_for = None;
        }
        self.role = Role::Follower;
        self.leader_id = leader_id;
        self.votes_received = 0;
        self.reset_election_timeout();

        tracing::info!(
            node_id = self.me,
            term = self.current_term,
            leader = ?leader_id,
            "became follower"
        );
    }

    /// Start a candidacy: bump the term, vote for ourselves, resample the
    /// timer.
    pub fn become_candidate(&mut self) {
        self.current_term += 1;
        self.role = Role::Candidate;
        self.voted_for = Some(self.me);
        self.votes_received = 1;
        self.leader_id = None;
        self.reset_election_timeout();

        tracing::info!(
            node_id = self.me,
            term = self.current_term,
            timeout = ?self.election_timeout,
            "became candidate"
        );
    }

    /// Take leadership of the current term and reset replication cursors.
    pub fn become_leader(&mut self) {
        self.role = Role::Leader;
        self.leader_id = Some(self.me);
        let next = self.log.last_index() + 1;
        for i in 0..self.cluster_size {
            self.next_index[i] = next;
            self.match_index[i] = 0;
        }

        tracing::info!(node_id = self.me, term = self.current_term, "became leader");
    }

    /// Advance the commit index: an index commits once a majority of peers
    /// hold it and its entry belongs to the current term. Earlier-term
    /// entries commit transitively. Returns true when the index moved.
    pub fn advance_commit_index(&mut self) -> bool {
        let old = self.commit_index;
        for n in (self.commit_index + 1)..=self.log.last_index() {
            if self.log.term_at(n) != Some(self.current_term) {
                continue;
            }
            let replicas = self.match_index.iter().filter(|&&m| m >= n).count();
            if replicas >= self.majority() {
                self.commit_index = n;
            }
        }
        self.commit_index > old
    }

    /// Where to resume replication after a conflict rejection: one past our
    /// last entry of the conflicting term, or the follower's hint when we
    /// hold no entry of that term.
    pub fn backup_next_index(
        &self,
        conflict_index: LogIndex,
        conflict_term: Option<Term>,
    ) -> LogIndex {
        let target = match conflict_term {
            Some(term) => self.log.next_index_after_term(term).unwrap_or(conflict_index),
            None => conflict_index,
        };
        target.clamp(1, self.log.last_index() + 1)
    }
}
