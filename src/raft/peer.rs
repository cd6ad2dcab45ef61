//! The Raft peer: role scheduling, elections, replication, and the inbound
//! RPC handlers.
//!
//! One mutex guards all peer state. It is held across persistence but never
//! across a suspension point: inbound handlers run on transport-owned tasks,
//! every outbound RPC runs on its own task that re-acquires the mutex to
//! process its reply, and a single scheduler task drives role transitions
//! and delivery of committed entries.

use super::log::{Log, LogEntry};
use super::persist::{self, Persister};
use super::rpc::{
    AppendEntriesRequest, AppendEntriesResponse, RaftTransport, RequestVoteRequest,
    RequestVoteResponse,
};
use super::state::{RaftState, Role};
use crate::config::RaftConfig;
use crate::error::{ConclaveError, Result};
use crate::types::{Committed, LogIndex, NodeId, Term};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tokio::time::sleep;
use tracing::{debug, error, warn};

/// A single Raft peer.
pub struct RaftPeer {
    config: RaftConfig,
    state: Mutex<RaftState>,
    transport: Arc<dyn RaftTransport>,
    persister: Arc<dyn Persister>,
    apply_tx: mpsc::Sender<Committed>,
    /// Raised by the AppendEntries handler when a plausible leader is heard.
    heartbeat_seen: Notify,
    /// Raised by the RequestVote handler when this peer grants a vote.
    vote_granted: Notify,
    /// Raised by a vote-reply task when this peer reaches a majority.
    won_election: Notify,
    killed: AtomicBool,
}

impl RaftPeer {
    /// Create a peer, restore its durable state from the persister, and
    /// start the scheduler task. Returns immediately.
    pub fn spawn(
        config: RaftConfig,
        transport: Arc<dyn RaftTransport>,
        persister: Arc<dyn Persister>,
        apply_tx: mpsc::Sender<Committed>,
    ) -> Result<Arc<Self>> {
        config.validate()?;

        let mut state = RaftState::new(&config);
        let blob = persister.read()?;
        if let Some(durable) = persist::decode(&blob)? {
            state.current_term = durable.current_term;
            state.voted_for = durable.voted_for;
            state.log = Log::from_entries(durable.entries);
            debug!(
                node_id = config.node_id,
                term = state.current_term,
                last_index = state.log.last_index(),
                "restored durable state"
            );
        }

        let peer = Arc::new(Self {
            config,
            state: Mutex::new(state),
            transport,
            persister,
            apply_tx,
            heartbeat_seen: Notify::new(),
            vote_granted: Notify::new(),
            won_election: Notify::new(),
            killed: AtomicBool::new(false),
        });

        tokio::spawn(Arc::clone(&peer).run());
        Ok(peer)
    }

    /// Current term and whether this peer believes it is the leader.
    pub fn get_state(&self) -> (Term, bool) {
        let state = self.state.lock();
        (state.current_term, state.role.is_leader())
    }

    /// Best-known leader for the current term, if any.
    pub fn leader(&self) -> Option<NodeId> {
        self.state.lock().leader_id
    }

    /// This peer's index into the peer vector.
    pub fn node_id(&self) -> NodeId {
        self.config.node_id
    }

    /// Submit a command for replication.
    ///
    /// On the leader the command is appended and persisted; the returned
    /// index is where it will land if it commits, which the caller observes
    /// through the apply channel. Non-leaders reject with the best-known
    /// leader as a redirect hint.
    pub fn start(&self, command: Vec<u8>) -> Result<(LogIndex, Term)> {
        let mut state = self.state.lock();
        if !state.role.is_leader() {
            return Err(ConclaveError::NotLeader {
                leader: state.leader_id,
            });
        }

        let term = state.current_term;
        state.log.append(LogEntry::new(term, command));
        let index = state.log.last_index();
        self.persist(&state);

        debug!(node_id = state.me, index, term, "accepted command");
        Ok((index, term))
    }

    /// Signal shutdown. Returns promptly; in-flight tasks drain without
    /// further replies, timer actions, or deliveries.
    pub fn kill(&self) {
        self.killed.store(true, Ordering::SeqCst);
        self.heartbeat_seen.notify_one();
        self.vote_granted.notify_one();
        self.won_election.notify_one();
    }

    /// Whether `kill` has been called.
    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    // -- role scheduler --

    async fn run(self: Arc<Self>) {
        while !self.is_killed() {
            self.deliver_committed().await;
            let role = self.state.lock().role;
            match role {
                Role::Leader => Arc::clone(&self).tick_leader().await,
                Role::Candidate => Arc::clone(&self).tick_candidate().await,
                Role::Follower => self.tick_follower().await,
            }
        }
        debug!(node_id = self.config.node_id, "scheduler stopped");
    }

    /// Apply pump: snapshot the newly committed range under the lock,
    /// deliver outside it, then advance `last_applied`.
    async fn deliver_committed(&self) {
        let batch: Vec<Committed> = {
            let state = self.state.lock();
            if state.commit_index <= state.last_applied {
                return;
            }
            (state.last_applied + 1..=state.commit_index)
                .filter_map(|index| {
                    state.log.get(index).map(|entry| Committed {
                        index,
                        command: Arc::clone(&entry.command),
                    })
                })
                .collect()
        };

        let Some(upto) = batch.last().map(|c| c.index) else {
            return;
        };

        for committed in batch {
            if self.is_killed() {
                return;
            }
            let index = committed.index;
            if self.apply_tx.send(committed).await.is_err() {
                warn!(node_id = self.config.node_id, index, "apply channel closed");
                return;
            }
        }

        self.state.lock().last_applied = upto;
    }

    /// Follower: wait out the election timer unless leader authority or a
    /// granted vote resets it.
    async fn tick_follower(&self) {
        let timeout = self.state.lock().election_timeout;
        tokio::select! {
            _ = sleep(timeout) => {
                let mut state = self.state.lock();
                if !self.is_killed() && state.role.is_follower() {
                    state.become_candidate();
                    self.persist(&state);
                }
            }
            _ = self.heartbeat_seen.notified() => {}
            _ = self.vote_granted.notified() => {}
        }
    }

    /// Candidate: solicit votes from every other peer, then wait for a
    /// majority, a leader, or the timer expiring into a fresh candidacy.
    async fn tick_candidate(self: Arc<Self>) {
        let (request, timeout) = {
            let mut state = self.state.lock();
            if !state.role.is_candidate() {
                return;
            }
            // The self-vote alone is a quorum in a single-peer cluster.
            if state.votes_received >= state.majority() {
                state.become_leader();
                return;
            }
            let request = RequestVoteRequest {
                term: state.current_term,
                candidate_id: state.me,
                last_log_index: state.log.last_index(),
                last_log_term: state.log.last_term(),
            };
            (request, state.election_timeout)
        };

        for peer in 0..self.config.cluster_size {
            if peer == self.config.node_id {
                continue;
            }
            let this = Arc::clone(&self);
            let request = request.clone();
            tokio::spawn(async move { this.solicit_vote(peer, request).await });
        }

        tokio::select! {
            _ = sleep(timeout) => {
                let mut state = self.state.lock();
                if !self.is_killed() && state.role.is_candidate() {
                    // Split or lost election: run again at a higher term.
                    state.become_candidate();
                    self.persist(&state);
                }
            }
            _ = self.heartbeat_seen.notified() => {}
            _ = self.won_election.notified() => {}
        }
    }

    /// Leader: assert authority and replicate, then sleep one heartbeat.
    async fn tick_leader(self: Arc<Self>) {
        if !Self::broadcast_append_entries(&self) {
            return;
        }
        sleep(self.config.heartbeat_interval).await;
    }

    // -- election --

    /// One outbound RequestVote. The reply is processed under the lock and
    /// discarded if the candidacy it belongs to is already over.
    async fn solicit_vote(&self, peer: NodeId, request: RequestVoteRequest) {
        let reply = match self.transport.request_vote(peer, request.clone()).await {
            Ok(reply) => reply,
            // No information; the next candidacy retries.
            Err(_) => return,
        };

        if self.is_killed() {
            return;
        }
        let mut state = self.state.lock();
        if !state.role.is_candidate() || state.current_term != request.term {
            return;
        }

        if reply.term > state.current_term {
            state.become_follower(reply.term, None);
            self.persist(&state);
            return;
        }

        if reply.vote_granted {
            state.votes_received += 1;
            debug!(
                node_id = state.me,
                from = peer,
                votes = state.votes_received,
                "vote granted"
            );
            if state.votes_received >= state.majority() {
                state.become_leader();
                self.won_election.notify_one();
            }
        }
    }

    // -- replication --

    /// Send one AppendEntries round to every follower, built from each
    /// peer's replication cursor. Returns false when no longer leader.
    fn broadcast_append_entries(this: &Arc<Self>) -> bool {
        let requests = {
            let mut state = this.state.lock();
            if !state.role.is_leader() {
                return false;
            }

            // Quorum arithmetic counts the leader as already replicated;
            // when its own slot completes a quorum, commit right here
            // rather than waiting on a follower ack.
            let last = state.log.last_index();
            let me = state.me;
            state.match_index[me] = last;
            state.next_index[me] = last + 1;
            if state.advance_commit_index() {
                debug!(
                    node_id = me,
                    commit_index = state.commit_index,
                    "commit index advanced"
                );
            }

            let mut requests = Vec::with_capacity(this.config.cluster_size);
            for peer in 0..this.config.cluster_size {
                if peer == me {
                    continue;
                }
                let next = state.next_index[peer];
                let prev_log_index = next.saturating_sub(1);
                requests.push((
                    peer,
                    AppendEntriesRequest {
                        term: state.current_term,
                        leader_id: me,
                        prev_log_index,
                        prev_log_term: state.log.term_at(prev_log_index).unwrap_or(0),
                        entries: state.log.entries_from(next),
                        leader_commit: state.commit_index,
                    },
                ));
            }
            requests
        };

        for (peer, request) in requests {
            let task = Arc::clone(this);
            tokio::spawn(async move { task.replicate(peer, request).await });
        }
        true
    }

    /// One outbound AppendEntries. Success advances the follower's cursors
    /// and possibly the commit index; a same-term rejection backs the cursor
    /// up by whole terms.
    async fn replicate(&self, peer: NodeId, request: AppendEntriesRequest) {
        let reply = match self.transport.append_entries(peer, request.clone()).await {
            Ok(reply) => reply,
            // No information; the next heartbeat retries.
            Err(_) => return,
        };

        if self.is_killed() {
            return;
        }
        let mut state = self.state.lock();
        if !state.role.is_leader() || state.current_term != request.term {
            return;
        }

        if reply.term > state.current_term {
            state.become_follower(reply.term, None);
            self.persist(&state);
            return;
        }

        if reply.success {
            let matched = request.prev_log_index + request.entries.len() as LogIndex;
            // Replies can arrive reordered; a stale ack never moves the
            // cursor backwards.
            if matched > state.match_index[peer] {
                state.match_index[peer] = matched;
                state.next_index[peer] = matched + 1;
            }
            if state.advance_commit_index() {
                debug!(
                    node_id = state.me,
                    commit_index = state.commit_index,
                    "commit index advanced"
                );
            }
        } else if reply.term == request.term {
            let conflict_index = reply
                .conflict_index
                .unwrap_or_else(|| request.prev_log_index.max(1));
            let next = state.backup_next_index(conflict_index, reply.conflict_term);
            debug!(node_id = state.me, peer, next, "backing up replication cursor");
            state.next_index[peer] = next;
        }
    }

    // -- inbound RPC handlers --

    /// Inbound RequestVote. Runs on a transport-owned task; durable state is
    /// persisted before the reply leaves the lock.
    pub fn handle_request_vote(&self, request: RequestVoteRequest) -> RequestVoteResponse {
        let mut state = self.state.lock();
        let response = self.request_vote_locked(&mut state, request);
        self.persist(&state);
        response
    }

    fn request_vote_locked(
        &self,
        state: &mut RaftState,
        request: RequestVoteRequest,
    ) -> RequestVoteResponse {
        if request.term < state.current_term {
            return RequestVoteResponse {
                term: state.current_term,
                vote_granted: false,
            };
        }

        if request.term > state.current_term {
            state.become_follower(request.term, None);
        }

        let can_vote = state
            .voted_for
            .map_or(true, |voted| voted == request.candidate_id);
        let log_ok = state
            .log
            .is_up_to_date(request.last_log_index, request.last_log_term);

        if can_vote && log_ok {
            state.voted_for = Some(request.candidate_id);
            self.vote_granted.notify_one();
            debug!(
                node_id = state.me,
                candidate = request.candidate_id,
                term = state.current_term,
                "granted vote"
            );
            RequestVoteResponse {
                term: state.current_term,
                vote_granted: true,
            }
        } else {
            RequestVoteResponse {
                term: state.current_term,
                vote_granted: false,
            }
        }
    }

    /// Inbound AppendEntries. Runs on a transport-owned task; durable state
    /// is persisted before the reply leaves the lock.
    pub fn handle_append_entries(&self, request: AppendEntriesRequest) -> AppendEntriesResponse {
        let mut state = self.state.lock();
        let response = self.append_entries_locked(&mut state, request);
        self.persist(&state);
        response
    }

    fn append_entries_locked(
        &self,
        state: &mut RaftState,
        request: AppendEntriesRequest,
    ) -> AppendEntriesResponse {
        if request.term < state.current_term {
            return AppendEntriesResponse {
                term: state.current_term,
                success: false,
                conflict_index: None,
                conflict_term: None,
            };
        }

        // The request is from a plausible leader of this or a newer term.
        self.heartbeat_seen.notify_one();

        if request.term > state.current_term {
            state.become_follower(request.term, Some(request.leader_id));
        } else if state.role.is_candidate() {
            // A leader exists for the term we were campaigning in.
            state.become_follower(state.current_term, Some(request.leader_id));
        } else {
            state.leader_id = Some(request.leader_id);
            state.reset_election_timeout();
        }

        let last = state.log.last_index();
        if request.prev_log_index > last {
            // Our log is too short to check the previous entry.
            return AppendEntriesResponse {
                term: state.current_term,
                success: false,
                conflict_index: Some(last + 1),
                conflict_term: None,
            };
        }

        let local_term = state.log.term_at(request.prev_log_index).unwrap_or(0);
        if local_term != request.prev_log_term {
            return AppendEntriesResponse {
                term: state.current_term,
                success: false,
                conflict_index: Some(state.log.first_index_of_term(local_term)),
                conflict_term: Some(local_term),
            };
        }

        if !request.entries.is_empty() {
            // Scan for the first divergence; truncation only happens there,
            // never on a pure prefix match.
            let mut offset = 0;
            while offset < request.entries.len() {
                let index = request.prev_log_index + 1 + offset as LogIndex;
                match state.log.term_at(index) {
                    Some(term) if term == request.entries[offset].term => offset += 1,
                    Some(_) => {
                        state.log.truncate_to(index);
                        break;
                    }
                    None => break,
                }
            }
            for entry in &request.entries[offset..] {
                state.log.append(entry.clone());
            }
        }

        if request.leader_commit > state.commit_index {
            state.commit_index = request.leader_commit.min(state.log.last_index());
        }

        AppendEntriesResponse {
            term: state.current_term,
            success: true,
            conflict_index: None,
            conflict_term: None,
        }
    }

    /// Write the durable triple through the persister. Must be called with
    /// the state lock held, before any reply that depends on the mutation.
    fn persist(&self, state: &RaftState) {
        match persist::encode(state.current_term, state.voted_for, &state.log) {
            Ok(blob) => {
                if let Err(e) = self.persister.save(&blob) {
                    error!(node_id = state.me, error = %e, "failed to persist state");
                }
            }
            Err(e) => error!(node_id = state.me, error = %e, "failed to encode durable state"),
        }
    }
}
