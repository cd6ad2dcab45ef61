// Shared test infrastructure for the integration suites.

#![allow(dead_code)]

pub mod cluster;

pub use cluster::{Cluster, DeadTransport};

use conclave::config::RaftConfig;
use conclave::raft::{MemoryPersister, RaftPeer};
use conclave::types::{Committed, NodeId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Configuration with very long election timeouts, so a peer's own timers
/// stay out of the way of handler-level tests.
pub fn isolated_config(me: NodeId, n: usize) -> RaftConfig {
    RaftConfig {
        election_timeout_min: Duration::from_secs(10),
        election_timeout_max: Duration::from_secs(20),
        ..RaftConfig::new(me, n)
    }
}

/// Spawn a peer with a dead network for driving its RPC handlers directly.
pub fn isolated_peer(
    me: NodeId,
    n: usize,
    persister: Arc<MemoryPersister>,
) -> (Arc<RaftPeer>, mpsc::Receiver<Committed>) {
    let (tx, rx) = mpsc::channel(256);
    let peer = RaftPeer::spawn(isolated_config(me, n), Arc::new(DeadTransport), persister, tx)
        .expect("spawn isolated peer");
    (peer, rx)
}
