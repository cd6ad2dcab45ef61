//! Configuration for a conclave peer.

use crate::error::{ConclaveError, Result};
use crate::types::NodeId;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Configuration for a single Raft peer.
///
/// The heartbeat interval must be strictly less than the minimum election
/// timeout, and the timeout range must be wide enough relative to network
/// jitter that split votes resolve probabilistically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaftConfig {
    /// This peer's index into the peer vector.
    pub node_id: NodeId,
    /// Total number of peers in the cluster, including this one.
    pub cluster_size: usize,
    /// Minimum election timeout.
    #[serde(with = "humantime_serde")]
    pub election_timeout_min: Duration,
    /// Maximum election timeout.
    #[serde(with = "humantime_serde")]
    pub election_timeout_max: Duration,
    /// Interval between leader heartbeats.
    #[serde(with = "humantime_serde")]
    pub heartbeat_interval: Duration,
}

impl Default for RaftConfig {
    fn default() -> Self {
        Self {
            node_id: 0,
            cluster_size: 1,
            election_timeout_min: Duration::from_millis(150),
            election_timeout_max: Duration::from_millis(300),
            heartbeat_interval: Duration::from_millis(50),
        }
    }
}

impl RaftConfig {
    /// Create a configuration for peer `node_id` of a cluster of
    /// `cluster_size`, with default timing.
    pub fn new(node_id: NodeId, cluster_size: usize) -> Self {
        Self {
            node_id,
            cluster_size,
            ..Self::default()
        }
    }

    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConclaveError::Config(format!("failed to read config file: {}", e)))?;

        let config: Self = serde_json::from_str(&content)
            .map_err(|e| ConclaveError::Config(format!("failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.cluster_size == 0 {
            return Err(ConclaveError::InvalidConfig {
                field: "cluster_size".to_string(),
                reason: "cluster must have at least one peer".to_string(),
            });
        }

        if self.node_id >= self.cluster_size {
            return Err(ConclaveError::InvalidConfig {
                field: "node_id".to_string(),
                reason: format!(
                    "node id {} outside peer vector of size {}",
                    self.node_id, self.cluster_size
                ),
            });
        }

        if self.election_timeout_min > self.election_timeout_max {
            return Err(ConclaveError::InvalidConfig {
                field: "election_timeout_min".to_string(),
                reason: "minimum election timeout exceeds maximum".to_string(),
            });
        }

        if self.heartbeat_interval >= self.election_timeout_min {
            return Err(ConclaveError::InvalidConfig {
                field: "heartbeat_interval".to_string(),
                reason: "heartbeat interval must be strictly less than the minimum election timeout"
                    .to_string(),
            });
        }

        Ok(())
    }

    /// Number of peers needed for a quorum.
    pub fn majority(&self) -> usize {
        self.cluster_size / 2 + 1
    }
}

/// Serde helper for Duration using humantime format.
pub mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}ms", duration.as_millis()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|e| e.to_string())
        } else if let Some(s_val) = s.strip_suffix('s') {
            s_val
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|e| e.to_string())
        } else {
            s.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|e| e.to_string())
        }
    }
}
