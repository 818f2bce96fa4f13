/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 18/10/26
******************************************************************************/

//! Replica configuration.
//!
//! A [`HeartbeatConfig`] names the replica (node and channel), where its log
//! goes, and the policies the state machine applies at its runtime boundary.
//! It deserializes from JSON; every field except `node_id` and `channel` has
//! a default.
//!
//! ```json
//! {
//!   "node_id": 0,
//!   "channel": 2,
//!   "log_dir": "/var/log/heartbeat",
//!   "seen_retention": { "kind": "window", "capacity": 100000 },
//!   "publish_retry": { "timeout_ms": 5000 },
//!   "truncated_snapshot": "fail"
//! }
//! ```

use crate::sequencer::ChannelId;
use crate::sequencer::retry::RetryPolicy;
use crate::sequencer::seen::SeenRetention;
use crate::sequencer::snapshot::TruncatedSnapshotPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while loading or validating a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config {}: {source}", path.display())]
    Io {
        /// File that was being read.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration is not valid JSON for [`HeartbeatConfig`].
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    /// A field holds a value the sequencer cannot work with.
    #[error("invalid config field `{field}`: {reason}")]
    Invalid {
        /// Name of the offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}

/// Configuration of one sequencer replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Node the replica runs on.
    pub node_id: u32,

    /// Channel the replica validates and publishes on.
    pub channel: ChannelId,

    /// Directory for the per-node, per-channel log file. `None` logs to the
    /// process-wide subscriber.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Retention of the duplicate-tracking set.
    #[serde(default)]
    pub seen_retention: SeenRetention,

    /// Retry budget for offers into the replicated log.
    #[serde(default)]
    pub publish_retry: RetryPolicy,

    /// Retry budget while waiting on a pending snapshot image.
    #[serde(default)]
    pub snapshot_retry: RetryPolicy,

    /// What to do when the startup snapshot ends early.
    #[serde(default)]
    pub truncated_snapshot: TruncatedSnapshotPolicy,
}

impl HeartbeatConfig {
    /// Creates a configuration with default policies.
    #[must_use]
    pub fn new(node_id: u32, channel: ChannelId) -> Self {
        Self {
            node_id,
            channel,
            log_dir: None,
            seen_retention: SeenRetention::default(),
            publish_retry: RetryPolicy::default(),
            snapshot_retry: RetryPolicy::default(),
            truncated_snapshot: TruncatedSnapshotPolicy::default(),
        }
    }

    /// Parses and validates a JSON configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed JSON and
    /// [`ConfigError::Invalid`] for out-of-range values.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses, and validates a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, otherwise the
    /// same errors as [`from_json_str`](Self::from_json_str).
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Checks values that the type system does not rule out.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let SeenRetention::Window { capacity: 0 } = self.seen_retention {
            return Err(ConfigError::Invalid {
                field: "seen_retention",
                reason: "window capacity must be greater than zero".to_string(),
            });
        }
        for (field, policy) in [
            ("publish_retry", &self.publish_retry),
            ("snapshot_retry", &self.snapshot_retry),
        ] {
            if policy.max_attempts == Some(0) {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "max_attempts must be at least 1".to_string(),
                });
            }
        }
        if self
            .log_dir
            .as_ref()
            .is_some_and(|dir| dir.as_os_str().is_empty())
        {
            return Err(ConfigError::Invalid {
                field: "log_dir",
                reason: "path is empty".to_string(),
            });
        }
        Ok(())
    }
}
