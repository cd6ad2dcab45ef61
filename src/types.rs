//! Core type definitions for conclave.
//!
//! # Type Aliases
//!
//! Common identifiers are defined as type aliases for clarity:
//!
//! - [`NodeId`] = `usize`: a peer's index into the fixed peer vector
//! - [`Term`] = `u64`: Raft term number
//! - [`LogIndex`] = `u64`: Raft log position

use std::sync::Arc;

/// Identity of a peer: its index into the fixed peer vector of the cluster.
pub type NodeId = usize;

/// Raft term number, monotonically non-decreasing on every peer.
pub type Term = u64;

/// Raft log position. Real entries are 1-based; index 0 is the reserved
/// sentinel entry.
pub type LogIndex = u64;

/// A committed entry handed to the application.
///
/// Records arrive on the apply channel in strict ascending contiguous order
/// starting at index 1.
#[derive(Debug, Clone)]
pub struct Committed {
    /// Log index of the entry.
    pub index: LogIndex,
    /// The opaque command submitted through `start`.
    pub command: Arc<Vec<u8>>,
}

impl Committed {
    /// Get a reference to the command bytes.
    #[inline]
    pub fn command_bytes(&self) -> &[u8] {
        &self.command
    }
}
