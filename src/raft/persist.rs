//! Durable state: the persister seam and the state blob codec.
//!
//! The durable subset of peer state is the triple `(current_term, voted_for,
//! log)`, serialized as one opaque blob and replaced atomically. A peer
//! restores the whole blob at startup and rewrites it before any RPC reply
//! that depends on a durable mutation.

use super::log::{Log, LogEntry};
use crate::error::Result;
use crate::types::{NodeId, Term};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;

/// The durable triple as it appears inside the blob.
#[derive(Debug, Serialize, Deserialize)]
pub struct DurableState {
    /// Latest term the peer had seen.
    pub current_term: Term,
    /// Vote cast in that term, if any.
    pub voted_for: Option<NodeId>,
    /// The full log, sentinel included.
    pub entries: Vec<LogEntry>,
}

/// Encode the durable subset of peer state into a blob.
pub fn encode(current_term: Term, voted_for: Option<NodeId>, log: &Log) -> Result<Vec<u8>> {
    let state = DurableState {
        current_term,
        voted_for,
        entries: log.entries().to_vec(),
    };
    Ok(bincode::serialize(&state)?)
}

/// Decode a previously saved blob; `None` for an empty blob (fresh peer).
pub fn decode(blob: &[u8]) -> Result<Option<DurableState>> {
    if blob.is_empty() {
        return Ok(None);
    }
    Ok(Some(bincode::deserialize(blob)?))
}

/// Atomic blob persistence for a peer's durable state.
pub trait Persister: Send + Sync {
    /// Atomically replace the stored blob.
    fn save(&self, state: &[u8]) -> Result<()>;

    /// Return the last saved blob, or empty when none exists.
    fn read(&self) -> Result<Vec<u8>>;
}

/// In-memory persister for tests and simulated restarts.
#[derive(Default)]
pub struct MemoryPersister {
    state: Mutex<Vec<u8>>,
}

impl MemoryPersister {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with a previously captured blob, simulating a restart from the
    /// state a crashed peer left behind.
    pub fn with_state(state: Vec<u8>) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }
}

impl Persister for MemoryPersister {
    fn save(&self, state: &[u8]) -> Result<()> {
        *self.state.lock() = state.to_vec();
        Ok(())
    }

    fn read(&self) -> Result<Vec<u8>> {
        Ok(self.state.lock().clone())
    }
}

/// File-backed persister.
///
/// Writes go to a temp file, are synced, then renamed over the live blob so
/// a crash never exposes a partial write.
pub struct FilePersister {
    path: PathBuf,
    tmp: PathBuf,
}

impl FilePersister {
    /// Create a persister rooted at `dir`, creating the directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            path: dir.join("state.bin"),
            tmp: dir.join("state.tmp"),
        })
    }
}

impl Persister for FilePersister {
    fn save(&self, state: &[u8]) -> Result<()> {
        let mut file = File::create(&self.tmp)?;
        file.write_all(state)?;
        file.sync_all()?;
        fs::rename(&self.tmp, &self.path)?;
        Ok(())
    }

    fn read(&self) -> Result<Vec<u8>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        Ok(fs::read(&self.path)?)
    }
}
