//! The replicated log.

use crate::types::{LogIndex, Term};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A single entry in the replicated log.
///
/// Commands are Arc-wrapped so replication can clone entries into outbound
/// RPCs without copying payloads. An entry's index is its position in the
/// log; it is not carried in the entry itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// The term in which the entry was appended.
    pub term: Term,
    /// The opaque application command.
    #[serde(with = "arc_bytes")]
    pub command: Arc<Vec<u8>>,
}

impl LogEntry {
    /// Create a new log entry.
    pub fn new(term: Term, command: Vec<u8>) -> Self {
        Self {
            term,
            command: Arc::new(command),
        }
    }

    /// The sentinel entry occupying index 0.
    fn sentinel() -> Self {
        Self {
            term: 0,
            command: Arc::new(Vec::new()),
        }
    }

    /// Get a reference to the command bytes.
    #[inline]
    pub fn command_bytes(&self) -> &[u8] {
        &self.command
    }
}

/// Serde helper for Arc<Vec<u8>>: raw bytes on the wire, Arc on decode.
mod arc_bytes {
    use serde::{Deserializer, Serializer};
    use std::sync::Arc;

    pub fn serialize<S>(data: &Arc<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serde_bytes::serialize(data.as_slice(), serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Arc<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bytes: Vec<u8> = serde_bytes::deserialize(deserializer)?;
        Ok(Arc::new(bytes))
    }
}

/// The replicated log.
///
/// Index 0 holds a sentinel entry with term 0 so that the "previous entry"
/// of the very first real entry is always defined. Real entries are 1-based;
/// the sentinel is never replicated, truncated, or applied.
#[derive(Debug, Clone)]
pub struct Log {
    entries: Vec<LogEntry>,
}

impl Log {
    pub fn new() -> Self {
        Self {
            entries: vec![LogEntry::sentinel()],
        }
    }

    /// Rebuild from persisted entries. An empty slice yields a fresh log
    /// with only the sentinel.
    pub fn from_entries(entries: Vec<LogEntry>) -> Self {
        if entries.is_empty() {
            Self::new()
        } else {
            Self { entries }
        }
    }

    /// All entries including the sentinel, for persistence.
    pub(crate) fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Index of the last entry (0 when only the sentinel is present).
    pub fn last_index(&self) -> LogIndex {
        (self.entries.len() - 1) as LogIndex
    }

    /// Term of the last entry (0 when only the sentinel is present).
    pub fn last_term(&self) -> Term {
        self.entries.last().map(|e| e.term).unwrap_or(0)
    }

    /// Number of entries including the sentinel.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the log holds no real entries.
    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }

    /// Get a real entry by index. The sentinel is not exposed.
    pub fn get(&self, index: LogIndex) -> Option<&LogEntry> {
        if index == 0 {
            return None;
        }
        self.entries.get(index as usize)
    }

    /// Term at an index; `Some(0)` for the sentinel, `None` beyond the log.
    pub fn term_at(&self, index: LogIndex) -> Option<Term> {
        self.entries.get(index as usize).map(|e| e.term)
    }

    /// Append a new entry at the end of the log.
    pub fn append(&mut self, entry: LogEntry) {
        self.entries.push(entry);
    }

    /// Clone the suffix starting at `start` (at least 1; the sentinel is
    /// never replicated).
    pub fn entries_from(&self, start: LogIndex) -> Vec<LogEntry> {
        if start > self.last_index() {
            return Vec::new();
        }
        let start = (start as usize).max(1);
        self.entries[start..].to_vec()
    }

    /// Drop every entry at `index` and beyond. The sentinel stays.
    pub fn truncate_to(&mut self, index: LogIndex) {
        let keep = (index as usize).max(1);
        self.entries.truncate(keep);
    }

    /// Check whether our log holds `prev_log_term` at `prev_log_index`.
    pub fn matches(&self, prev_log_index: LogIndex, prev_log_term: Term) -> bool {
        match self.term_at(prev_log_index) {
            Some(term) => term == prev_log_term,
            None => false,
        }
    }

    /// Check if a candidate's log is at least as up-to-date as ours: a
    /// higher last term wins outright, equal terms compare last indices.
    pub fn is_up_to_date(&self, last_log_index: LogIndex, last_log_term: Term) -> bool {
        let our_last_term = self.last_term();
        let our_last_index = self.last_index();

        if last_log_term != our_last_term {
            last_log_term > our_last_term
        } else {
            last_log_index >= our_last_index
        }
    }

    /// Earliest index carrying `term`. Falls past the end for a term the
    /// log does not contain.
    pub fn first_index_of_term(&self, term: Term) -> LogIndex {
        self.entries
            .iter()
            .position(|e| e.term == term)
            .map(|i| i as LogIndex)
            .unwrap_or(self.last_index() + 1)
    }

    /// One past the last entry carrying `term`, or `None` when no entry
    /// does. Used by the leader to back up a follower's cursor by whole
    /// terms.
    pub fn next_index_after_term(&self, term: Term) -> Option<LogIndex> {
        let mut found = None;
        for (i, entry) in self.entries.iter().enumerate() {
            if entry.term == term {
                found = Some(i as LogIndex + 1);
            }
        }
        found
    }
}

impl Default for Log {
    fn default() -> Self {
        Self::new()
    }
}
