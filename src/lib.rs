//! conclave - a Raft consensus peer.
//!
//! conclave gives a fixed set of networked processes a single agreed-upon,
//! totally ordered sequence of client commands despite crashes, restarts,
//! message loss, reordering, and network partitions (non-Byzantine). A
//! deployment runs an odd number of peers connected by an unreliable RPC
//! transport; each peer is one [`raft::RaftPeer`].
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        RaftPeer                          │
//! ├──────────────────────────────────────────────────────────┤
//! │  Role Scheduler: follower / candidate / leader loop      │
//! ├──────────────────────────────────────────────────────────┤
//! │  Election: randomized timers | vote fan-out | tallying   │
//! ├──────────────────────────────────────────────────────────┤
//! │  Replication: AppendEntries | conflict backup | commit   │
//! ├──────────────────────────────────────────────────────────┤
//! │  Durable state: (term, vote, log) blob via Persister     │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! The transport and the durable blob store are external collaborators
//! supplied at construction: the former as an [`raft::RaftTransport`]
//! implementation, the latter as a [`raft::Persister`]. Committed commands
//! are handed to the application over an apply channel in strict ascending
//! contiguous index order.
//!
//! # Quick Start
//!
//! ```ignore
//! use conclave::config::RaftConfig;
//! use conclave::raft::{FilePersister, RaftPeer};
//! use std::sync::Arc;
//! use tokio::sync::mpsc;
//!
//! let config = RaftConfig::new(me, peers.len());
//! let persister = Arc::new(FilePersister::new("/var/lib/conclave")?);
//! let (apply_tx, mut apply_rx) = mpsc::channel(256);
//!
//! let peer = RaftPeer::spawn(config, transport, persister, apply_tx)?;
//!
//! // Submit a command at the leader and observe commitment on the channel.
//! let (index, term) = peer.start(b"set x 1".to_vec())?;
//! while let Some(committed) = apply_rx.recv().await {
//!     println!("applied {} at index {}", committed.index, index);
//! }
//! ```

pub mod config;
pub mod error;
pub mod observability;
pub mod raft;
pub mod types;

// Re-exports
pub use error::{ConclaveError, Result};
pub use types::*;
