//! Topology change executor — issues one split or merge and sees it through.
//!
//! ```text
//! before hook → request ──err──→ notify error ─────────────┐
//!                  │                                       │
//!                  ok → wait active ──err──→ notify error ─┤
//!                          │                               │
//!                          ok → after hook → notify ok ────┴→ next delay
//! ```
//!
//! A failed change is never retried here; the session simply waits the
//! change's retry interval and evaluates again from a fresh snapshot.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use streamscale_client::{
    wait_for_active, ClientError, MergeRequest, Notifier, SplitRequest, StreamManager,
};
use streamscale_core::{HashKey, Partition, ScalingConfig};

use crate::hooks::{self, LifecycleHooks};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Split,
    Merge,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKind::Split => write!(f, "split"),
            ChangeKind::Merge => write!(f, "merge"),
        }
    }
}

/// How a change attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeResult {
    /// Accepted and the stream is active again.
    Completed,
    /// The service refused the request.
    Rejected(ClientError),
    /// Accepted, but waiting for the stream to become active failed.
    NotConverged(ClientError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeOutcome {
    pub kind: ChangeKind,
    pub result: ChangeResult,
    /// Delay before the next cycle, the same whether or not the change succeeded.
    pub next_delay: Duration,
}

impl ChangeOutcome {
    pub fn succeeded(&self) -> bool {
        self.result == ChangeResult::Completed
    }
}

pub struct TopologyChangeExecutor {
    stream_name: String,
    notification_topic: Option<String>,
    split_delay: Duration,
    merge_delay: Duration,
    poll_interval: Duration,
    stream: Arc<dyn StreamManager>,
    notifier: Arc<dyn Notifier>,
    hooks: LifecycleHooks,
}

impl TopologyChangeExecutor {
    pub fn new(
        config: &ScalingConfig,
        stream: Arc<dyn StreamManager>,
        notifier: Arc<dyn Notifier>,
        hooks: LifecycleHooks,
    ) -> Self {
        Self {
            stream_name: config.stream_name.clone(),
            notification_topic: config.notification_topic.clone(),
            split_delay: config.split_next_delay(),
            merge_delay: config.merge_next_delay(),
            poll_interval: config.active_poll_interval(),
            stream,
            notifier,
            hooks,
        }
    }

    /// Split `partition` so the upper child starts at `new_starting_hash_key`.
    pub async fn split(
        &self,
        partition: &Partition,
        new_starting_hash_key: &HashKey,
        shutdown: &mut watch::Receiver<bool>,
    ) -> ChangeOutcome {
        let request = SplitRequest {
            stream_name: self.stream_name.clone(),
            partition_to_split: partition.id.clone(),
            new_starting_hash_key: new_starting_hash_key.clone(),
        };
        let target = format!("shard {}", partition.id);

        hooks::run(&self.hooks.before_split, &request);
        info!(
            stream = %self.stream_name,
            shard = %partition.id,
            start = %partition.starting_hash_key,
            end = %partition.ending_hash_key,
            new_start = %new_starting_hash_key,
            "splitting partition"
        );

        let result = match self.stream.split_partition(&request).await {
            Err(e) => ChangeResult::Rejected(e),
            Ok(()) => match self.await_active(shutdown).await {
                Ok(()) => {
                    hooks::run(&self.hooks.after_split, &request);
                    ChangeResult::Completed
                }
                Err(e) => ChangeResult::NotConverged(e),
            },
        };

        self.finish(ChangeKind::Split, &target, result, self.split_delay).await
    }

    /// Merge `lower` with the adjacent partition `upper`.
    pub async fn merge(
        &self,
        lower: &Partition,
        upper: &Partition,
        shutdown: &mut watch::Receiver<bool>,
    ) -> ChangeOutcome {
        let request = MergeRequest {
            stream_name: self.stream_name.clone(),
            partition_to_merge: lower.id.clone(),
            adjacent_partition_to_merge: upper.id.clone(),
        };
        let target = format!("shards {} and {}", lower.id, upper.id);

        hooks::run(&self.hooks.before_merge, &request);
        info!(
            stream = %self.stream_name,
            lower = %lower.id,
            upper = %upper.id,
            "merging partitions"
        );

        let result = match self.stream.merge_partitions(&request).await {
            Err(e) => ChangeResult::Rejected(e),
            Ok(()) => match self.await_active(shutdown).await {
                Ok(()) => {
                    hooks::run(&self.hooks.after_merge, &request);
                    ChangeResult::Completed
                }
                Err(e) => ChangeResult::NotConverged(e),
            },
        };

        self.finish(ChangeKind::Merge, &target, result, self.merge_delay).await
    }

    async fn await_active(&self, shutdown: &mut watch::Receiver<bool>) -> Result<(), ClientError> {
        wait_for_active(self.stream.as_ref(), &self.stream_name, self.poll_interval, shutdown)
            .await
            .map(|_| ())
    }

    /// Log and notify the result, then wrap it with the retry delay.
    async fn finish(
        &self,
        kind: ChangeKind,
        target: &str,
        result: ChangeResult,
        next_delay: Duration,
    ) -> ChangeOutcome {
        let at = Utc::now().to_rfc3339();
        match &result {
            ChangeResult::Completed => {
                info!(stream = %self.stream_name, %kind, partitions = target, "topology change completed");
                let message = format!("{kind} of {target} on stream {} completed at {at}", self.stream_name);
                self.notify(&subject(kind, true), &message).await;
            }
            ChangeResult::Rejected(ClientError::Cancelled)
            | ChangeResult::NotConverged(ClientError::Cancelled) => {
                info!(stream = %self.stream_name, %kind, partitions = target, "topology change wait cancelled by shutdown");
            }
            ChangeResult::Rejected(e) | ChangeResult::NotConverged(e) => {
                error!(stream = %self.stream_name, %kind, partitions = target, error = %e, "topology change failed");
                let message = format!(
                    "{kind} of {target} on stream {} failed at {at}: {e}",
                    self.stream_name
                );
                self.notify(&subject(kind, false), &message).await;
            }
        }

        ChangeOutcome {
            kind,
            result,
            next_delay,
        }
    }

    /// Best-effort publish; a failure is only logged.
    async fn notify(&self, subject: &str, message: &str) {
        let Some(topic) = &self.notification_topic else {
            return;
        };
        if let Err(e) = self.notifier.publish(topic, subject, message).await {
            warn!(topic = %topic, subject, error = %e, "notification publish failed");
        }
    }
}

fn subject(kind: ChangeKind, ok: bool) -> String {
    let status = if ok { "successful" } else { "error" };
    format!("shard {kind} notification - {status}")
}
