//! Error types for conclave.
//!
//! This module provides a unified error type [`ConclaveError`] for all peer
//! operations, along with a convenient [`Result`] type alias.
//!
//! # Example
//!
//! ```rust
//! use conclave::error::ConclaveError;
//!
//! fn handle_error(err: &ConclaveError) {
//!     if err.is_retryable() {
//!         println!("Retrying at another peer...");
//!     } else {
//!         println!("Fatal error: {}", err);
//!     }
//! }
//! ```

use crate::types::NodeId;
use std::io;
use thiserror::Error;

/// Main error type for conclave operations.
#[derive(Error, Debug)]
pub enum ConclaveError {
    /// The operation requires the leader; the hint names the best-known one.
    #[error("not the leader; leader is: {leader:?}")]
    NotLeader { leader: Option<NodeId> },

    /// The transport produced no reply (dropped request or reply).
    #[error("transport error: {0}")]
    Transport(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("log error: {0}")]
    Log(String),

    #[error("invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("peer is shut down")]
    Killed,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ConclaveError {
    /// Check if the error is expected to clear on retry, possibly at a
    /// different peer.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ConclaveError::NotLeader { .. } | ConclaveError::Transport(_)
        )
    }
}

impl From<bincode::Error> for ConclaveError {
    fn from(e: bincode::Error) -> Self {
        ConclaveError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for ConclaveError {
    fn from(e: serde_json::Error) -> Self {
        ConclaveError::Serialization(e.to_string())
    }
}

/// Result type alias for conclave operations.
pub type Result<T> = std::result::Result<T, ConclaveError>;
