//! First-observed times of partitions.
//!
//! A partition absent from the table when a cycle sees it was most likely
//! created by a recent split or merge (or the process just started). Its
//! entry starts the merge cooldown. Entries are never removed; retired
//! partitions simply stop being looked up.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use streamscale_core::PartitionId;

#[derive(Debug, Default)]
pub struct ShardTrackingTable {
    first_seen: HashMap<PartitionId, Instant>,
}

impl ShardTrackingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `partition_id` as seen at `now` unless already tracked.
    ///
    /// Returns `true` if this is the first observation.
    pub fn observe(&mut self, partition_id: &str, now: Instant) -> bool {
        if self.first_seen.contains_key(partition_id) {
            return false;
        }
        self.first_seen.insert(partition_id.to_string(), now);
        true
    }

    pub fn first_seen(&self, partition_id: &str) -> Option<Instant> {
        self.first_seen.get(partition_id).copied()
    }

    /// Time since first observation, or `None` for untracked partitions.
    pub fn age(&self, partition_id: &str, now: Instant) -> Option<Duration> {
        self.first_seen(partition_id)
            .map(|seen| now.saturating_duration_since(seen))
    }

    pub fn contains(&self, partition_id: &str) -> bool {
        self.first_seen.contains_key(partition_id)
    }

    pub fn len(&self) -> usize {
        self.first_seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.first_seen.is_empty()
    }
}
