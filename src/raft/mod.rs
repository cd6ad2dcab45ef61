//! Raft consensus core.
//!
//! This module implements a single Raft peer: leader election with
//! randomized timeouts, log replication with conflict-driven backup, commit
//! tracking, and persistence of durable state across restarts. A deployment
//! runs a fixed, odd-sized set of peers connected by an unreliable transport.

// Deny unsafe code patterns in this critical consensus module.
// unwrap() calls can cause panics that break consensus.
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

mod log;
mod peer;
mod persist;
pub mod rpc;
mod state;

pub use log::{Log, LogEntry};
pub use peer::RaftPeer;
pub use persist::{FilePersister, MemoryPersister, Persister};
pub use rpc::{
    AppendEntriesRequest, AppendEntriesResponse, RaftTransport, RequestVoteRequest,
    RequestVoteResponse,
};
pub use state::{RaftState, Role};
