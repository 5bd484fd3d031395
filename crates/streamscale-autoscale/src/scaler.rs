//! Scaling policy — picks at most one split or merge per cycle.
//!
//! Partitions are scanned in ascending hash-key order and the first match
//! wins. Every bucket of the evaluation window has to breach, not just the
//! average, so short spikes and dips are ignored. Merging is only
//! considered when nothing was selected for splitting.

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use streamscale_core::{HashKey, Partition, PartitionId, ScalingConfig};
use streamscale_metrics::{CollectedMetrics, ScalingWindows};

use crate::tracking::ShardTrackingTable;

/// Outcome of evaluating one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScaleDecision {
    /// Split `partition`; the upper child starts at `new_starting_hash_key`.
    Split {
        partition: Partition,
        new_starting_hash_key: HashKey,
    },
    /// Merge `lower` with the partition directly above it.
    Merge { lower: Partition, upper: Partition },
    /// No change needed.
    NoChange,
}

/// Why an adjacent pair was not considered for merging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    Untracked(PartitionId),
    Cooldown(PartitionId),
    NoMetrics,
}

/// One step of the evaluation, in scan order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Check {
    Split {
        shard: PartitionId,
        breaches: u32,
    },
    Merge {
        lower: PartitionId,
        upper: PartitionId,
        breaches: u32,
    },
    MergeSkipped {
        lower: PartitionId,
        upper: PartitionId,
        reason: SkipReason,
    },
}

/// A decision together with the checks that led to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub decision: ScaleDecision,
    pub checks: Vec<Check>,
}

/// Thresholds for split and merge selection.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalingPolicy {
    /// Records per minute.
    limit_per_minute: f64,
    max_shard: u32,
    split_duration: u32,
    merge_duration: u32,
    merge_cooldown: Duration,
}

impl ScalingPolicy {
    pub fn new(
        limit_per_minute: f64,
        max_shard: u32,
        split_duration: u32,
        merge_duration: u32,
        merge_cooldown: Duration,
    ) -> Self {
        Self {
            limit_per_minute,
            max_shard,
            split_duration,
            merge_duration,
            merge_cooldown,
        }
    }

    pub fn from_config(config: &ScalingConfig) -> Self {
        Self::new(
            config.shard_limit_per_minute(),
            config.max_shard,
            config.scaling_split_duration,
            config.scaling_merge_duration,
            config.merge_next_delay(),
        )
    }

    pub fn limit_per_minute(&self) -> f64 {
        self.limit_per_minute
    }

    /// Evaluate the open partitions (sorted by starting hash key).
    pub fn evaluate(
        &self,
        partitions: &[Partition],
        metrics: &CollectedMetrics,
        tracking: &ShardTrackingTable,
        windows: &ScalingWindows,
        now: Instant,
    ) -> ScaleDecision {
        self.assess(partitions, metrics, tracking, windows, now).decision
    }

    /// Like [`evaluate`](Self::evaluate), also returning every check made.
    pub fn assess(
        &self,
        partitions: &[Partition],
        metrics: &CollectedMetrics,
        tracking: &ShardTrackingTable,
        windows: &ScalingWindows,
        now: Instant,
    ) -> Evaluation {
        let mut checks = Vec::new();

        if let Some(partition) = self.scan_split(partitions, metrics, windows, &mut checks) {
            return Evaluation {
                decision: ScaleDecision::Split {
                    new_starting_hash_key: partition.split_point(),
                    partition: partition.clone(),
                },
                checks,
            };
        }

        let decision = match self.scan_merge(partitions, metrics, tracking, windows, now, &mut checks) {
            Some((lower, upper)) => ScaleDecision::Merge {
                lower: lower.clone(),
                upper: upper.clone(),
            },
            None => ScaleDecision::NoChange,
        };
        Evaluation { decision, checks }
    }

    /// First partition that breached the limit in every split-window bucket.
    pub fn select_split<'a>(
        &self,
        partitions: &'a [Partition],
        metrics: &CollectedMetrics,
        windows: &ScalingWindows,
    ) -> Option<&'a Partition> {
        self.scan_split(partitions, metrics, windows, &mut Vec::new())
    }

    /// First adjacent pair, both past cooldown, whose combined sum stayed
    /// under the limit in every merge-window bucket.
    pub fn select_merge<'a>(
        &self,
        partitions: &'a [Partition],
        metrics: &CollectedMetrics,
        tracking: &ShardTrackingTable,
        windows: &ScalingWindows,
        now: Instant,
    ) -> Option<(&'a Partition, &'a Partition)> {
        self.scan_merge(partitions, metrics, tracking, windows, now, &mut Vec::new())
    }

    /// Buckets in the split window whose sum is strictly above the limit.
    pub fn split_breaches(
        &self,
        metrics: &CollectedMetrics,
        partition_id: &str,
        windows: &ScalingWindows,
    ) -> u32 {
        windows
            .split
            .iter()
            .filter(|&&minute| metrics.sum_at(partition_id, minute) > self.limit_per_minute)
            .count() as u32
    }

    /// Buckets in the merge window whose combined sum is below the limit.
    ///
    /// Missing buckets count as `-1` on each side.
    pub fn merge_breaches(
        &self,
        metrics: &CollectedMetrics,
        lower_id: &str,
        upper_id: &str,
        windows: &ScalingWindows,
    ) -> u32 {
        windows
            .merge
            .iter()
            .filter(|&&minute| {
                metrics.sum_at(lower_id, minute) + metrics.sum_at(upper_id, minute)
                    < self.limit_per_minute
            })
            .count() as u32
    }

    // ── Scans ──────────────────────────────────────────────────────

    fn scan_split<'a>(
        &self,
        partitions: &'a [Partition],
        metrics: &CollectedMetrics,
        windows: &ScalingWindows,
        checks: &mut Vec<Check>,
    ) -> Option<&'a Partition> {
        if partitions.len() >= self.max_shard as usize {
            debug!(
                partitions = partitions.len(),
                max_shard = self.max_shard,
                "max shard count reached, not checking for splits"
            );
            return None;
        }

        partitions.iter().find(|p| {
            let breaches = self.split_breaches(metrics, &p.id, windows);
            debug!(
                shard = %p.id,
                breaches,
                required = self.split_duration,
                "split check"
            );
            checks.push(Check::Split {
                shard: p.id.clone(),
                breaches,
            });
            breaches >= self.split_duration
        })
    }

    fn scan_merge<'a>(
        &self,
        partitions: &'a [Partition],
        metrics: &CollectedMetrics,
        tracking: &ShardTrackingTable,
        windows: &ScalingWindows,
        now: Instant,
        checks: &mut Vec<Check>,
    ) -> Option<(&'a Partition, &'a Partition)> {
        if partitions.len() < 2 {
            debug!(partitions = partitions.len(), "single partition, nothing to merge");
            return None;
        }

        partitions.windows(2).find_map(|pair| {
            let (lower, upper) = (&pair[0], &pair[1]);

            let skip = self
                .cooldown_block(tracking, lower, now)
                .or_else(|| self.cooldown_block(tracking, upper, now))
                // Without this cycle's data a quiet-looking pair may just be unobserved.
                .or_else(|| {
                    (!metrics.contains(&lower.id) || !metrics.contains(&upper.id))
                        .then_some(SkipReason::NoMetrics)
                });
            if let Some(reason) = skip {
                debug!(lower = %lower.id, upper = %upper.id, reason = ?reason, "merge pair skipped");
                checks.push(Check::MergeSkipped {
                    lower: lower.id.clone(),
                    upper: upper.id.clone(),
                    reason,
                });
                return None;
            }

            let breaches = self.merge_breaches(metrics, &lower.id, &upper.id, windows);
            debug!(
                lower = %lower.id,
                upper = %upper.id,
                breaches,
                required = self.merge_duration,
                "merge check"
            );
            checks.push(Check::Merge {
                lower: lower.id.clone(),
                upper: upper.id.clone(),
                breaches,
            });
            (breaches >= self.merge_duration).then_some((lower, upper))
        })
    }

    fn cooldown_block(
        &self,
        tracking: &ShardTrackingTable,
        partition: &Partition,
        now: Instant,
    ) -> Option<SkipReason> {
        match tracking.age(&partition.id, now) {
            None => Some(SkipReason::Untracked(partition.id.clone())),
            Some(age) if age < self.merge_cooldown => Some(SkipReason::Cooldown(partition.id.clone())),
            Some(_) => None,
        }
    }
}
