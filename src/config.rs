//! Configuration for the replication pipeline.
//!
//! Constructed programmatically or deserialized from YAML/JSON.
//!
//! # Configuration Structure
//!
//! ```text
//! ReplicationConfig
//! ├── natural_key: String          # natural-key property name ("uuid")
//! ├── sentinel_label: String       # created entities with this label abort capture
//! ├── replicated_label: String     # marker: entity was written by replication
//! ├── excluded_label: String       # marker: never replicate this entity
//! ├── scheduler: SchedulerConfig   # batch limit, poll interval, retention
//! └── storage: StorageConfig       # SQLite paths for records and watermarks
//! ```
//!
//! # YAML Example
//!
//! ```yaml
//! natural_key: "uuid"
//!
//! scheduler:
//!   batch_limit: 1000
//!   poll_interval: "30s"
//!   retention_days: 3
//!
//! storage:
//!   records_path: "/var/lib/app/replication_records.db"
//!   watermarks_path: "/var/lib/app/replication_watermarks.db"
//! ```

use crate::error::{ReplicationError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level configuration object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// Name of the property identifying an entity across stores.
    /// Internal identifiers are not shared, so every replayed lookup
    /// resolves by this property.
    #[serde(default = "default_natural_key")]
    pub natural_key: String,

    /// Label marking internal bookkeeping writes. A transaction creating a
    /// node with this label is not captured at all.
    #[serde(default = "default_sentinel_label")]
    pub sentinel_label: String,

    /// Label stamped on entities that arrived via replication. Transactions
    /// touching such entities are rejected by the Judge to prevent loops.
    #[serde(default = "default_replicated_label")]
    pub replicated_label: String,

    /// Label opting an entity out of replication entirely.
    #[serde(default = "default_excluded_label")]
    pub excluded_label: String,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub storage: StorageConfig,
}

fn default_natural_key() -> String {
    "uuid".to_string()
}

fn default_sentinel_label() -> String {
    "ReplicationSentinel".to_string()
}

fn default_replicated_label() -> String {
    "Replicated".to_string()
}

fn default_excluded_label() -> String {
    "NoReplication".to_string()
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            natural_key: default_natural_key(),
            sentinel_label: default_sentinel_label(),
            replicated_label: default_replicated_label(),
            excluded_label: default_excluded_label(),
            scheduler: SchedulerConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl ReplicationConfig {
    /// Create a minimal config for testing: in-memory stores, short poll
    /// interval.
    pub fn for_testing() -> Self {
        Self {
            scheduler: SchedulerConfig {
                poll_interval: "25ms".to_string(),
                ..Default::default()
            },
            storage: StorageConfig::in_memory(),
            ..Default::default()
        }
    }

    /// Validate field values. Called by the service before starting workers.
    pub fn validate(&self) -> Result<()> {
        if self.natural_key.is_empty() {
            return Err(ReplicationError::Config(
                "natural_key must not be empty".to_string(),
            ));
        }
        let labels = [
            &self.sentinel_label,
            &self.replicated_label,
            &self.excluded_label,
        ];
        if labels.iter().any(|l| l.is_empty()) {
            return Err(ReplicationError::Config(
                "marker labels must not be empty".to_string(),
            ));
        }
        humantime::parse_duration(&self.scheduler.poll_interval).map_err(|e| {
            ReplicationError::Config(format!(
                "invalid poll_interval '{}': {}",
                self.scheduler.poll_interval, e
            ))
        })?;
        Ok(())
    }
}

/// Per-stream scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum records fetched per remote call. A limit of 0 disables
    /// replay entirely (records are still pruned).
    #[serde(default = "default_batch_limit")]
    pub batch_limit: u32,

    /// Interval between ticks as a duration string (e.g. "30s").
    #[serde(default = "default_poll_interval")]
    pub poll_interval: String,

    /// Local records strictly older than this many days are pruned.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

fn default_batch_limit() -> u32 {
    1000
}

fn default_poll_interval() -> String {
    "30s".to_string()
}

fn default_retention_days() -> u32 {
    3
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            batch_limit: 1000,
            poll_interval: "30s".to_string(),
            retention_days: 3,
        }
    }
}

impl SchedulerConfig {
    /// Parse the poll interval, falling back to 30s on a malformed string.
    /// `ReplicationConfig::validate()` reports the malformed string upfront.
    pub fn poll_interval_duration(&self) -> Duration {
        humantime::parse_duration(&self.poll_interval).unwrap_or(Duration::from_secs(30))
    }

    /// Retention window in milliseconds.
    pub fn retention_ms(&self) -> i64 {
        i64::from(self.retention_days) * 24 * 60 * 60 * 1000
    }
}

/// SQLite paths for the two local stores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_records_path")]
    pub records_path: String,

    #[serde(default = "default_watermarks_path")]
    pub watermarks_path: String,
}

fn default_records_path() -> String {
    "replication_records.db".to_string()
}

fn default_watermarks_path() -> String {
    "replication_watermarks.db".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            records_path: default_records_path(),
            watermarks_path: default_watermarks_path(),
        }
    }
}

impl StorageConfig {
    /// In-memory stores for tests.
    pub fn in_memory() -> Self {
        Self {
            records_path: ":memory:".to_string(),
            watermarks_path: ":memory:".to_string(),
        }
    }
}
