//! RPC message definitions and the transport seam.

use super::log::LogEntry;
use crate::error::Result;
use crate::types::{LogIndex, NodeId, Term};
use serde::{Deserialize, Serialize};

/// RequestVote RPC arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestVoteRequest {
    /// Candidate's term.
    pub term: Term,
    /// Candidate requesting the vote.
    pub candidate_id: NodeId,
    /// Index of the candidate's last log entry.
    pub last_log_index: LogIndex,
    /// Term of the candidate's last log entry.
    pub last_log_term: Term,
}

/// RequestVote RPC response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestVoteResponse {
    /// Replier's term after processing the request, for the candidate to
    /// update itself.
    pub term: Term,
    /// True if the candidate received the vote.
    pub vote_granted: bool,
}

/// AppendEntries RPC arguments. Empty `entries` is a heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesRequest {
    /// Leader's term.
    pub term: Term,
    /// Leader's ID so followers can redirect clients.
    pub leader_id: NodeId,
    /// Index of the log entry immediately preceding the new ones.
    pub prev_log_index: LogIndex,
    /// Term of the entry at `prev_log_index`.
    pub prev_log_term: Term,
    /// Entries to store, in log order.
    pub entries: Vec<LogEntry>,
    /// Leader's commit index.
    pub leader_commit: LogIndex,
}

/// AppendEntries RPC response.
///
/// On a log-mismatch rejection the conflict fields let the leader move its
/// replication cursor back a whole term per round trip instead of one entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesResponse {
    /// Replier's term after processing the request, for the leader to
    /// update itself.
    pub term: Term,
    /// True if the follower held a matching entry at `prev_log_index`.
    pub success: bool,
    /// On mismatch: the earliest index of the conflicting term, or the
    /// follower's log length when the log was too short.
    pub conflict_index: Option<LogIndex>,
    /// On mismatch: the term of the follower's entry at `prev_log_index`;
    /// `None` when the follower's log had no such entry.
    pub conflict_term: Option<Term>,
}

/// Transport seam: how a peer reaches the others.
///
/// The transport may drop, delay, or reorder messages; an `Err` means no
/// reply arrived and carries no information about whether the request was
/// processed. Implementations guarantee an eventual outcome for every call,
/// so callers need no timeout of their own.
#[async_trait::async_trait]
pub trait RaftTransport: Send + Sync {
    /// Send RequestVote to a peer.
    async fn request_vote(
        &self,
        target: NodeId,
        request: RequestVoteRequest,
    ) -> Result<RequestVoteResponse>;

    /// Send AppendEntries to a peer.
    async fn append_entries(
        &self,
        target: NodeId,
        request: AppendEntriesRequest,
    ) -> Result<AppendEntriesResponse>;
}
