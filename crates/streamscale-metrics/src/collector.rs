//! Partition metrics collector — fetches recent ingestion sums for every
//! open partition of a stream.
//!
//! One query per partition is issued concurrently and the cycle waits for
//! all of them. A failed query drops that partition from the cycle's data
//! instead of stalling the cycle.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use futures::future::join_all;
use tracing::{debug, warn};

use streamscale_client::{ClientResult, IngestionQuery, MetricsSource, METRIC_PERIOD_SECS};
use streamscale_core::{Partition, PartitionId, PartitionMetricsSet, MISSING_SUM};

/// Metrics gathered in one cycle, keyed by partition.
#[derive(Debug, Default)]
pub struct CollectedMetrics {
    sets: HashMap<PartitionId, PartitionMetricsSet>,
    failed: Vec<PartitionId>,
}

impl CollectedMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, set: PartitionMetricsSet) {
        self.sets.insert(set.partition_id.clone(), set);
    }

    pub fn get(&self, partition_id: &str) -> Option<&PartitionMetricsSet> {
        self.sets.get(partition_id)
    }

    pub fn contains(&self, partition_id: &str) -> bool {
        self.sets.contains_key(partition_id)
    }

    /// Sum for `partition_id` at `minute`, or [`MISSING_SUM`] when either
    /// the partition or the bucket has no data.
    pub fn sum_at(&self, partition_id: &str, minute: DateTime<Utc>) -> f64 {
        self.sets
            .get(partition_id)
            .map(|s| s.sum_at(minute))
            .unwrap_or(MISSING_SUM)
    }

    /// Partitions whose query failed this cycle.
    pub fn failed(&self) -> &[PartitionId] {
        &self.failed
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}

/// Queries a [`MetricsSource`] for the partitions of one stream.
pub struct PartitionMetricsCollector {
    source: Arc<dyn MetricsSource>,
    stream_name: String,
    lookback: TimeDelta,
}

impl PartitionMetricsCollector {
    /// Create a collector requesting `lookback_minutes` of history per query.
    pub fn new(source: Arc<dyn MetricsSource>, stream_name: &str, lookback_minutes: u32) -> Self {
        Self {
            source,
            stream_name: stream_name.to_string(),
            lookback: TimeDelta::minutes(i64::from(lookback_minutes)),
        }
    }

    /// The query issued for `partition_id` at `now`.
    pub fn query_for(&self, partition_id: &str, now: DateTime<Utc>) -> IngestionQuery {
        IngestionQuery {
            stream_name: self.stream_name.clone(),
            partition_id: partition_id.to_string(),
            start_time: now - self.lookback,
            end_time: now,
            period_secs: METRIC_PERIOD_SECS,
        }
    }

    /// Fetch and index the samples of a single partition.
    pub async fn collect_one(
        &self,
        partition: &Partition,
        now: DateTime<Utc>,
    ) -> ClientResult<PartitionMetricsSet> {
        let query = self.query_for(&partition.id, now);
        debug!(stream = %self.stream_name, shard = %partition.id, "fetching partition metrics");
        let samples = self.source.query_ingestion_sum(&query).await?;
        debug!(shard = %partition.id, samples = samples.len(), "partition metrics received");
        Ok(PartitionMetricsSet::new(partition, samples))
    }

    /// Fetch all partitions concurrently and wait for every query.
    pub async fn collect(&self, partitions: &[Partition], now: DateTime<Utc>) -> CollectedMetrics {
        let results = join_all(partitions.iter().map(|p| self.collect_one(p, now))).await;

        let mut collected = CollectedMetrics::new();
        for (partition, result) in partitions.iter().zip(results) {
            match result {
                Ok(set) => collected.insert(set),
                Err(e) => {
                    warn!(
                        stream = %self.stream_name,
                        shard = %partition.id,
                        error = %e,
                        "partition metrics fetch failed, excluding from this cycle"
                    );
                    collected.failed.push(partition.id.clone());
                }
            }
        }

        debug!(
            stream = %self.stream_name,
            collected = collected.len(),
            failed = collected.failed.len(),
            "metrics collection complete"
        );
        collected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::TimeZone;
    use streamscale_client::{ClientError, LoadProfile, SimOp, SimulatedStream};
    use streamscale_core::MetricSample;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 10, 30).unwrap()
    }

    fn sim() -> SimulatedStream {
        let sim = SimulatedStream::new(
            "events",
            vec![
                Partition::open("shardId-000000000000", 0u64, 99u64),
                Partition::open("shardId-000000000001", 100u64, 199u64),
            ],
        );
        sim.set_load("shardId-000000000000", LoadProfile::Constant(120.0));
        sim.set_load("shardId-000000000001", LoadProfile::Constant(30.0));
        sim
    }

    #[test]
    fn query_spans_lookback() {
        let collector = PartitionMetricsCollector::new(Arc::new(sim()), "events", 25);
        let q = collector.query_for("shardId-000000000000", now());
        assert_eq!(q.end_time, now());
        assert_eq!(q.start_time, now() - TimeDelta::minutes(25));
        assert_eq!(q.period_secs, 60);
        assert_eq!(q.stream_name, "events");
    }

    #[tokio::test]
    async fn collects_every_partition() {
        let sim = sim();
        let collector = PartitionMetricsCollector::new(Arc::new(sim.clone()), "events", 5);

        let collected = collector.collect(&sim.open_partitions(), now()).await;
        assert_eq!(collected.len(), 2);
        assert!(collected.failed().is_empty());

        let last_minute = Utc.with_ymd_and_hms(2024, 5, 1, 12, 9, 0).unwrap();
        assert_eq!(collected.sum_at("shardId-000000000000", last_minute), 120.0);
        assert_eq!(collected.sum_at("shardId-000000000001", last_minute), 30.0);
        // The minute still in progress has no sample.
        let current_minute = Utc.with_ymd_and_hms(2024, 5, 1, 12, 10, 0).unwrap();
        assert_eq!(collected.sum_at("shardId-000000000000", current_minute), MISSING_SUM);
    }

    #[tokio::test]
    async fn failed_partition_is_excluded_not_fatal() {
        let sim = sim();
        sim.inject_failure(
            SimOp::Query("shardId-000000000001".to_string()),
            ClientError::Transport("throttled".into()),
            1,
        );
        let collector = PartitionMetricsCollector::new(Arc::new(sim.clone()), "events", 5);

        let collected = collector.collect(&sim.open_partitions(), now()).await;
        assert_eq!(collected.len(), 1);
        assert!(collected.contains("shardId-000000000000"));
        assert_eq!(collected.failed(), &["shardId-000000000001".to_string()]);
        assert_eq!(
            collected.sum_at("shardId-000000000001", now() - TimeDelta::minutes(1)),
            MISSING_SUM
        );
    }

    /// Source that takes one second per query and tracks overlap.
    struct SlowSource {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    #[async_trait]
    impl MetricsSource for SlowSource {
        async fn query_ingestion_sum(&self, query: &IngestionQuery) -> ClientResult<Vec<MetricSample>> {
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(current, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(1)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(vec![MetricSample::new(query.end_time - TimeDelta::minutes(1), 1.0)])
        }
    }

    #[tokio::test(start_paused = true)]
    async fn queries_run_concurrently() {
        let source = Arc::new(SlowSource {
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        });
        let collector = PartitionMetricsCollector::new(source.clone(), "events", 5);
        let partitions: Vec<Partition> = (0..4u64)
            .map(|i| Partition::open(format!("p{i}"), i * 10, i * 10 + 9))
            .collect();

        let started = tokio::time::Instant::now();
        let collected = collector.collect(&partitions, now()).await;

        assert_eq!(collected.len(), 4);
        assert_eq!(source.max_in_flight.load(Ordering::SeqCst), 4);
        assert_eq!(started.elapsed(), Duration::from_secs(1));
    }
}
