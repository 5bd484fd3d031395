//! Scaling configuration: defaults, TOML loading, and validation.
//!
//! Every field except the four mandatory ones (`access_key_id`,
//! `secret_access_key`, `region`, `stream_name`) falls back to a default,
//! so a minimal config file only names the stream and its credentials.
//!
//! ```toml
//! access_key_id = "AKIA..."
//! secret_access_key = "..."
//! region = "us-west-2"
//! stream_name = "events"
//! shard_limit = 500
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Placeholder written over credentials by [`ScalingConfig::redacted`].
const REDACTED: &str = "********";

/// Autoscaler settings for a single stream.
///
/// Intervals and durations are expressed in minutes, matching the
/// one-minute granularity of the ingestion metrics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScalingConfig {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
    pub stream_name: String,

    /// Per-partition write threshold in records per second.
    pub shard_limit: u64,
    /// Splitting stops once the stream has this many open partitions.
    pub max_shard: u32,
    /// Headroom partitions an operator intends to keep. Reported in the
    /// startup summary; the decision rules do not consult it.
    pub spare_shard: u32,
    /// Consecutive breaching minutes required before a split.
    pub scaling_split_duration: u32,
    /// Consecutive under-limit minutes required before a merge.
    pub scaling_merge_duration: u32,
    /// Delay between cycles that made no change.
    pub auto_scale_interval: u64,
    /// Delay after a split attempt.
    pub split_next_interval: u64,
    /// Delay after a merge attempt; also the minimum age of a partition
    /// before it may take part in a merge.
    pub merge_next_interval: u64,
    /// Notification topic for split/merge results. `None` disables
    /// notifications.
    pub notification_topic: Option<String>,
    /// How often to poll the stream status while waiting for it to become
    /// active again, in seconds.
    pub active_poll_interval_secs: u64,
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            access_key_id: String::new(),
            secret_access_key: String::new(),
            region: String::new(),
            stream_name: String::new(),
            shard_limit: 1000,
            max_shard: 50,
            spare_shard: 0,
            scaling_split_duration: 5,
            scaling_merge_duration: 15,
            auto_scale_interval: 1,
            split_next_interval: 10,
            merge_next_interval: 15,
            notification_topic: None,
            active_poll_interval_secs: 30,
        }
    }
}

impl ScalingConfig {
    /// Load a config from a TOML file, filling unset fields with defaults.
    ///
    /// The result is not validated; call [`ScalingConfig::validate`].
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// A config for `stream_name` with placeholder credentials and all
    /// defaults, suitable as a starting point for a config file.
    pub fn scaffold(stream_name: &str, region: &str) -> Self {
        Self {
            access_key_id: "YOUR_ACCESS_KEY_ID".to_string(),
            secret_access_key: "YOUR_SECRET_ACCESS_KEY".to_string(),
            region: region.to_string(),
            stream_name: stream_name.to_string(),
            ..Default::default()
        }
    }

    /// Check every constraint and report all violations at once.
    pub fn validate(&self) -> ConfigResult<()> {
        let violations = self.violations();
        if violations.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(violations))
        }
    }

    /// All constraint violations, one message per field.
    pub fn violations(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.access_key_id.trim().is_empty() {
            errors.push("accessKeyId must be present".to_string());
        }
        if self.secret_access_key.trim().is_empty() {
            errors.push("secretAccessKey must be present".to_string());
        }
        if self.region.trim().is_empty() {
            errors.push("region must be present".to_string());
        }
        if self.stream_name.trim().is_empty() {
            errors.push("streamName must be present".to_string());
        }

        // A zero-length window would make every partition "breach" vacuously.
        if self.scaling_split_duration == 0 {
            errors.push("scalingSplitDuration must be at least 1 minute".to_string());
        }
        if self.scaling_merge_duration == 0 {
            errors.push("scalingMergeDuration must be at least 1 minute".to_string());
        }
        if self.max_shard == 0 {
            errors.push("maxShard must be at least 1".to_string());
        }

        errors
    }

    /// A copy safe to log: credentials are masked.
    pub fn redacted(&self) -> Self {
        Self {
            access_key_id: REDACTED.to_string(),
            secret_access_key: REDACTED.to_string(),
            ..self.clone()
        }
    }

    /// The split/merge threshold in records per minute.
    pub fn shard_limit_per_minute(&self) -> f64 {
        self.shard_limit as f64 * 60.0
    }

    /// Minutes of history to request per partition each cycle.
    pub fn metrics_lookback_minutes(&self) -> u32 {
        self.scaling_split_duration.max(self.scaling_merge_duration) + 10
    }

    pub fn auto_scale_delay(&self) -> Duration {
        minutes(self.auto_scale_interval)
    }

    pub fn split_next_delay(&self) -> Duration {
        minutes(self.split_next_interval)
    }

    pub fn merge_next_delay(&self) -> Duration {
        minutes(self.merge_next_interval)
    }

    pub fn active_poll_interval(&self) -> Duration {
        Duration::from_secs(self.active_poll_interval_secs)
    }
}

fn minutes(n: u64) -> Duration {
    Duration::from_secs(n.saturating_mul(60))
}
