//! Stream-management contract and the wait-for-active poller.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::debug;

use streamscale_core::{HashKey, PartitionId, StreamDescription};

use crate::error::{ClientError, ClientResult};

/// Request to split one partition at `new_starting_hash_key`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitRequest {
    pub stream_name: String,
    pub partition_to_split: PartitionId,
    /// First hash key of the upper child.
    pub new_starting_hash_key: HashKey,
}

/// Request to merge two adjacent partitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeRequest {
    pub stream_name: String,
    /// The lower partition of the pair.
    pub partition_to_merge: PartitionId,
    /// The partition whose range starts right after `partition_to_merge`.
    pub adjacent_partition_to_merge: PartitionId,
}

/// Control-plane operations on a stream.
///
/// Split and merge are asynchronous on the service side: a successful call
/// only means the change was accepted. The stream reports
/// [`StreamStatus::Updating`](streamscale_core::StreamStatus) until it
/// converges.
#[async_trait]
pub trait StreamManager: Send + Sync {
    async fn describe_stream(&self, stream_name: &str) -> ClientResult<StreamDescription>;

    /// Turn on per-partition `IncomingRecords` metrics.
    async fn enable_enhanced_metrics(&self, stream_name: &str) -> ClientResult<()>;

    async fn split_partition(&self, request: &SplitRequest) -> ClientResult<()>;

    async fn merge_partitions(&self, request: &MergeRequest) -> ClientResult<()>;
}

/// Poll `describe_stream` every `poll_interval` until the stream is active.
///
/// Returns the first active description. A describe error ends the wait
/// with that error. Flipping `shutdown` to `true` ends it with
/// [`ClientError::Cancelled`].
pub async fn wait_for_active(
    manager: &dyn StreamManager,
    stream_name: &str,
    poll_interval: Duration,
    shutdown: &mut watch::Receiver<bool>,
) -> ClientResult<StreamDescription> {
    loop {
        if *shutdown.borrow() {
            return Err(ClientError::Cancelled);
        }

        let desc = manager.describe_stream(stream_name).await?;
        if desc.is_active() {
            debug!(stream = %stream_name, "stream is active");
            return Ok(desc);
        }

        debug!(
            stream = %stream_name,
            status = %desc.status,
            poll_secs = poll_interval.as_secs(),
            "stream not active yet, polling again"
        );

        tokio::select! {
            _ = tokio::time::sleep(poll_interval) => {}
            changed = shutdown.changed() => match changed {
                Ok(()) if *shutdown.borrow() => return Err(ClientError::Cancelled),
                Ok(()) => {}
                // Sender dropped: nobody can stop us any more, keep polling.
                Err(_) => tokio::time::sleep(poll_interval).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::{SimOp, SimulatedStream};
    use streamscale_core::Partition;

    fn sim(updating_polls: u32) -> SimulatedStream {
        let sim = SimulatedStream::new("events", vec![Partition::open("shardId-000000000000", 0u64, 99u64)]);
        sim.set_updating_polls(updating_polls);
        sim
    }

    #[tokio::test(start_paused = true)]
    async fn returns_immediately_when_active() {
        let sim = sim(0);
        let (_tx, mut rx) = watch::channel(false);

        let desc = wait_for_active(&sim, "events", Duration::from_secs(30), &mut rx)
            .await
            .unwrap();
        assert!(desc.is_active());
        assert_eq!(sim.describe_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn polls_until_active() {
        let sim = sim(2);
        sim.enable_enhanced_metrics("events").await.unwrap();
        let (_tx, mut rx) = watch::channel(false);

        let started = tokio::time::Instant::now();
        let desc = wait_for_active(&sim, "events", Duration::from_secs(30), &mut rx)
            .await
            .unwrap();

        assert!(desc.is_active());
        // Two "updating" answers, then active.
        assert_eq!(sim.describe_calls(), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn describe_error_ends_wait() {
        let sim = sim(0);
        sim.inject_failure(SimOp::Describe, ClientError::Transport("boom".into()), 1);
        let (_tx, mut rx) = watch::channel(false);

        let err = wait_for_active(&sim, "events", Duration::from_secs(30), &mut rx)
            .await
            .unwrap_err();
        assert_eq!(err, ClientError::Transport("boom".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_wait() {
        let sim = sim(u32::MAX);
        sim.enable_enhanced_metrics("events").await.unwrap();
        let (tx, mut rx) = watch::channel(false);

        let waiter = tokio::spawn(async move {
            wait_for_active(&sim, "events", Duration::from_secs(30), &mut rx).await
        });
        tokio::time::sleep(Duration::from_secs(95)).await;
        tx.send(true).unwrap();

        let result = waiter.await.unwrap();
        assert_eq!(result.unwrap_err(), ClientError::Cancelled);
    }
}
