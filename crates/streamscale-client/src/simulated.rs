//! In-memory stream that implements every collaborator contract.
//!
//! Partitions split and merge the way a real stream's do: parents are
//! closed (they get an ending sequence number) and children take over
//! their hash-key range. Each change leaves the stream `UPDATING` for a
//! configurable number of describe calls before it turns `ACTIVE` again.
//!
//! Ingestion sums come from a [`LoadProfile`] per partition; children
//! inherit half of a split parent's load, and a merged partition carries
//! the sum of its parents' loads.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::TimeDelta;
use num_bigint::BigUint;
use tracing::debug;

use streamscale_core::{
    truncate_to_minute, HashKey, MetricSample, Partition, PartitionId, StreamDescription,
    StreamStatus, INCOMING_RECORDS_METRIC,
};

use crate::error::{ClientError, ClientResult};
use crate::metrics::{IngestionQuery, MetricsSource};
use crate::notify::{Notification, Notifier};
use crate::stream::{MergeRequest, SplitRequest, StreamManager};

/// Minutes of history a non-constant profile is expanded to when combined.
const PROFILE_HORIZON_MINUTES: usize = 60;

/// Per-minute ingestion for one simulated partition.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadProfile {
    /// The same sum for every minute.
    Constant(f64),
    /// Explicit sums, most recent complete minute first. `None` entries
    /// and minutes past the end of the list have no sample.
    Recent(Vec<Option<f64>>),
}

impl LoadProfile {
    /// Sum for the bucket `minutes_ago + 1` minutes before the current one.
    pub fn sum_for(&self, minutes_ago: usize) -> Option<f64> {
        match self {
            LoadProfile::Constant(v) => Some(*v),
            LoadProfile::Recent(values) => values.get(minutes_ago).copied().flatten(),
        }
    }

    fn scaled(&self, factor: f64) -> LoadProfile {
        match self {
            LoadProfile::Constant(v) => LoadProfile::Constant(v * factor),
            LoadProfile::Recent(values) => {
                LoadProfile::Recent(values.iter().map(|v| v.map(|x| x * factor)).collect())
            }
        }
    }

    fn combined(&self, other: &LoadProfile) -> LoadProfile {
        if let (LoadProfile::Constant(a), LoadProfile::Constant(b)) = (self, other) {
            return LoadProfile::Constant(a + b);
        }
        let values = (0..PROFILE_HORIZON_MINUTES)
            .map(|i| match (self.sum_for(i), other.sum_for(i)) {
                (None, None) => None,
                (a, b) => Some(a.unwrap_or(0.0) + b.unwrap_or(0.0)),
            })
            .collect();
        LoadProfile::Recent(values)
    }
}

/// Operations that can be made to fail on demand.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SimOp {
    Describe,
    EnableMetrics,
    Split,
    Merge,
    /// Metrics query for the named partition.
    Query(PartitionId),
    Publish,
}

struct SimState {
    stream_name: String,
    status: StreamStatus,
    /// Describe calls that report `UPDATING` after each change.
    updating_polls: u32,
    updating_remaining: u32,
    partitions: Vec<Partition>,
    shard_level_metrics: Vec<String>,
    next_partition_index: u64,
    next_sequence: u64,
    loads: HashMap<PartitionId, LoadProfile>,
    failures: HashMap<SimOp, VecDeque<ClientError>>,
    splits: Vec<SplitRequest>,
    merges: Vec<MergeRequest>,
    notifications: Vec<Notification>,
    describe_calls: usize,
    metrics_queries: usize,
}

impl SimState {
    fn take_failure(&mut self, op: &SimOp) -> ClientResult<()> {
        match self.failures.get_mut(op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn check_stream(&self, stream_name: &str) -> ClientResult<()> {
        if stream_name == self.stream_name {
            Ok(())
        } else {
            Err(ClientError::NotFound(format!("stream {stream_name}")))
        }
    }

    fn check_active(&self) -> ClientResult<()> {
        if self.status == StreamStatus::Active {
            Ok(())
        } else {
            Err(ClientError::ResourceInUse(format!(
                "stream {} is {}",
                self.stream_name, self.status
            )))
        }
    }

    fn open_partition(&self, id: &str) -> ClientResult<Partition> {
        let partition = self
            .partitions
            .iter()
            .find(|p| p.id == id)
            .ok_or_else(|| ClientError::NotFound(format!("partition {id}")))?;
        if !partition.is_open() {
            return Err(ClientError::InvalidArgument(format!("partition {id} is closed")));
        }
        Ok(partition.clone())
    }

    fn new_partition_id(&mut self) -> PartitionId {
        let id = format!("shardId-{:012}", self.next_partition_index);
        self.next_partition_index += 1;
        id
    }

    fn close(&mut self, id: &str) {
        let seq = self.next_sequence.to_string();
        self.next_sequence += 1;
        if let Some(p) = self.partitions.iter_mut().find(|p| p.id == id) {
            p.ending_sequence_number = Some(seq);
        }
    }

    fn begin_update(&mut self) {
        self.status = StreamStatus::Updating;
        self.updating_remaining = self.updating_polls;
    }

    fn load_of(&self, id: &str) -> LoadProfile {
        self.loads
            .get(id)
            .cloned()
            .unwrap_or(LoadProfile::Constant(0.0))
    }
}

/// A thread-safe simulated stream. Clones share state.
#[derive(Clone)]
pub struct SimulatedStream {
    inner: Arc<Mutex<SimState>>,
}

impl SimulatedStream {
    /// Create an active stream with the given partitions and enhanced
    /// metrics already enabled.
    pub fn new(stream_name: &str, partitions: Vec<Partition>) -> Self {
        let next_partition_index = partitions.len() as u64;
        let state = SimState {
            stream_name: stream_name.to_string(),
            status: StreamStatus::Active,
            updating_polls: 1,
            updating_remaining: 0,
            partitions,
            shard_level_metrics: vec![INCOMING_RECORDS_METRIC.to_string()],
            next_partition_index,
            next_sequence: 1,
            loads: HashMap::new(),
            failures: HashMap::new(),
            splits: Vec::new(),
            merges: Vec::new(),
            notifications: Vec::new(),
            describe_calls: 0,
            metrics_queries: 0,
        };
        Self {
            inner: Arc::new(Mutex::new(state)),
        }
    }

    /// A stream whose `count` partitions evenly cover the 128-bit key space.
    pub fn with_even_partitions(stream_name: &str, count: u32) -> Self {
        let count = count.max(1);
        let space: BigUint = BigUint::from(1u32) << 128u32;
        let width = &space / count;

        let partitions = (0..count)
            .map(|i| {
                let start = &width * i;
                let end = if i + 1 == count {
                    &space - 1u32
                } else {
                    &width * (i + 1) - 1u32
                };
                Partition::open(
                    format!("shardId-{i:012}"),
                    HashKey::new(start),
                    HashKey::new(end),
                )
            })
            .collect();

        Self::new(stream_name, partitions)
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ── Setup ──────────────────────────────────────────────────────

    pub fn set_load(&self, partition_id: &str, profile: LoadProfile) {
        self.state().loads.insert(partition_id.to_string(), profile);
    }

    pub fn set_enhanced_metrics(&self, enabled: bool) {
        let mut st = self.state();
        st.shard_level_metrics.retain(|m| m != INCOMING_RECORDS_METRIC);
        if enabled {
            st.shard_level_metrics.push(INCOMING_RECORDS_METRIC.to_string());
        }
    }

    /// Number of `UPDATING` describe answers after each change.
    pub fn set_updating_polls(&self, polls: u32) {
        self.state().updating_polls = polls;
    }

    /// Make the next `times` calls of `op` fail with `error`.
    pub fn inject_failure(&self, op: SimOp, error: ClientError, times: usize) {
        let mut st = self.state();
        let queue = st.failures.entry(op).or_default();
        queue.extend(std::iter::repeat_n(error, times));
    }

    // ── Inspection ─────────────────────────────────────────────────

    pub fn partitions(&self) -> Vec<Partition> {
        self.state().partitions.clone()
    }

    pub fn open_partitions(&self) -> Vec<Partition> {
        self.state()
            .partitions
            .iter()
            .filter(|p| p.is_open())
            .cloned()
            .collect()
    }

    pub fn status(&self) -> StreamStatus {
        self.state().status
    }

    pub fn split_requests(&self) -> Vec<SplitRequest> {
        self.state().splits.clone()
    }

    pub fn merge_requests(&self) -> Vec<MergeRequest> {
        self.state().merges.clone()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.state().notifications.clone()
    }

    pub fn describe_calls(&self) -> usize {
        self.state().describe_calls
    }

    pub fn metrics_queries(&self) -> usize {
        self.state().metrics_queries
    }
}

#[async_trait]
impl StreamManager for SimulatedStream {
    async fn describe_stream(&self, stream_name: &str) -> ClientResult<StreamDescription> {
        let mut st = self.state();
        st.describe_calls += 1;
        st.take_failure(&SimOp::Describe)?;
        st.check_stream(stream_name)?;

        if st.status == StreamStatus::Updating {
            if st.updating_remaining == 0 {
                st.status = StreamStatus::Active;
            } else {
                st.updating_remaining -= 1;
            }
        }

        Ok(StreamDescription {
            stream_name: st.stream_name.clone(),
            status: st.status,
            partitions: st.partitions.clone(),
            shard_level_metrics: st.shard_level_metrics.clone(),
        })
    }

    async fn enable_enhanced_metrics(&self, stream_name: &str) -> ClientResult<()> {
        let mut st = self.state();
        st.take_failure(&SimOp::EnableMetrics)?;
        st.check_stream(stream_name)?;

        if !st.shard_level_metrics.iter().any(|m| m == INCOMING_RECORDS_METRIC) {
            st.shard_level_metrics.push(INCOMING_RECORDS_METRIC.to_string());
        }
        st.begin_update();
        debug!(stream = %stream_name, "simulated: enhanced metrics enabled");
        Ok(())
    }

    async fn split_partition(&self, request: &SplitRequest) -> ClientResult<()> {
        let mut st = self.state();
        st.take_failure(&SimOp::Split)?;
        st.check_stream(&request.stream_name)?;
        st.check_active()?;

        let parent = st.open_partition(&request.partition_to_split)?;
        let key = request.new_starting_hash_key.as_biguint();
        if key <= parent.starting_hash_key.as_biguint() || key > parent.ending_hash_key.as_biguint() {
            return Err(ClientError::InvalidArgument(format!(
                "new starting hash key {} is outside ({}, {}]",
                request.new_starting_hash_key, parent.starting_hash_key, parent.ending_hash_key
            )));
        }

        let lower_id = st.new_partition_id();
        let upper_id = st.new_partition_id();
        let lower = Partition::open(
            lower_id.clone(),
            parent.starting_hash_key.clone(),
            HashKey::new(key - 1u32),
        );
        let upper = Partition::open(
            upper_id.clone(),
            request.new_starting_hash_key.clone(),
            parent.ending_hash_key.clone(),
        );

        let child_load = st.load_of(&parent.id).scaled(0.5);
        st.loads.insert(lower_id, child_load.clone());
        st.loads.insert(upper_id, child_load);

        st.close(&parent.id);
        st.partitions.push(lower);
        st.partitions.push(upper);
        st.splits.push(request.clone());
        st.begin_update();

        debug!(partition = %parent.id, "simulated: partition split");
        Ok(())
    }

    async fn merge_partitions(&self, request: &MergeRequest) -> ClientResult<()> {
        let mut st = self.state();
        st.take_failure(&SimOp::Merge)?;
        st.check_stream(&request.stream_name)?;
        st.check_active()?;

        let lower = st.open_partition(&request.partition_to_merge)?;
        let upper = st.open_partition(&request.adjacent_partition_to_merge)?;
        if !lower.is_adjacent_to(&upper) {
            return Err(ClientError::InvalidArgument(format!(
                "partitions {} and {} are not adjacent",
                lower.id, upper.id
            )));
        }

        let merged_id = st.new_partition_id();
        let merged = Partition::open(
            merged_id.clone(),
            lower.starting_hash_key.clone(),
            upper.ending_hash_key.clone(),
        );
        let merged_load = st.load_of(&lower.id).combined(&st.load_of(&upper.id));
        st.loads.insert(merged_id, merged_load);

        st.close(&lower.id);
        st.close(&upper.id);
        st.partitions.push(merged);
        st.merges.push(request.clone());
        st.begin_update();

        debug!(lower = %lower.id, upper = %upper.id, "simulated: partitions merged");
        Ok(())
    }
}

#[async_trait]
impl MetricsSource for SimulatedStream {
    async fn query_ingestion_sum(&self, query: &IngestionQuery) -> ClientResult<Vec<MetricSample>> {
        let mut st = self.state();
        st.metrics_queries += 1;
        st.take_failure(&SimOp::Query(query.partition_id.clone()))?;
        st.check_stream(&query.stream_name)?;
        if !st.partitions.iter().any(|p| p.id == query.partition_id) {
            return Err(ClientError::NotFound(format!("partition {}", query.partition_id)));
        }

        let profile = st.load_of(&query.partition_id);
        let period = TimeDelta::seconds(i64::from(query.period_secs.max(1)));
        let current_bucket = truncate_to_minute(query.end_time);

        // Only complete buckets: the one in progress at `end_time` is skipped.
        let mut samples = Vec::new();
        let mut minutes_ago = 0usize;
        let mut bucket = current_bucket - period;
        while bucket >= query.start_time {
            if let Some(sum) = profile.sum_for(minutes_ago) {
                samples.push(MetricSample::new(bucket, sum));
            }
            minutes_ago += 1;
            bucket -= period;
        }

        Ok(samples)
    }
}

#[async_trait]
impl Notifier for SimulatedStream {
    async fn publish(&self, topic: &str, subject: &str, message: &str) -> ClientResult<()> {
        let mut st = self.state();
        st.take_failure(&SimOp::Publish)?;
        st.notifications.push(Notification {
            topic: topic.to_string(),
            subject: subject.to_string(),
            message: message.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn two_partitions() -> SimulatedStream {
        SimulatedStream::new(
            "events",
            vec![
                Partition::open("shardId-000000000000", 0u64, 99u64),
                Partition::open("shardId-000000000001", 100u64, 199u64),
            ],
        )
    }

    #[test]
    fn even_partitions_cover_key_space() {
        let sim = SimulatedStream::with_even_partitions("events", 3);
        let parts = sim.partitions();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].starting_hash_key, HashKey::from(0u64));
        assert_eq!(parts[2].ending_hash_key, HashKey::from(u128::MAX));
        assert!(parts[0].is_adjacent_to(&parts[1]));
        assert!(parts[1].is_adjacent_to(&parts[2]));
    }

    #[tokio::test]
    async fn split_closes_parent_and_creates_children() {
        let sim = two_partitions();
        sim.set_load("shardId-000000000000", LoadProfile::Constant(100.0));

        sim.split_partition(&SplitRequest {
            stream_name: "events".to_string(),
            partition_to_split: "shardId-000000000000".to_string(),
            new_starting_hash_key: HashKey::from(50u64),
        })
        .await
        .unwrap();

        let open = sim.open_partitions();
        assert_eq!(open.len(), 3);
        let lower = open.iter().find(|p| p.id == "shardId-000000000002").unwrap();
        let upper = open.iter().find(|p| p.id == "shardId-000000000003").unwrap();
        assert_eq!(lower.ending_hash_key, HashKey::from(49u64));
        assert_eq!(upper.starting_hash_key, HashKey::from(50u64));
        assert_eq!(sim.status(), StreamStatus::Updating);
        assert_eq!(sim.state().load_of(&upper.id), LoadProfile::Constant(50.0));
    }

    #[tokio::test]
    async fn split_rejected_while_updating() {
        let sim = two_partitions();
        sim.enable_enhanced_metrics("events").await.unwrap();

        let err = sim
            .split_partition(&SplitRequest {
                stream_name: "events".to_string(),
                partition_to_split: "shardId-000000000000".to_string(),
                new_starting_hash_key: HashKey::from(50u64),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::ResourceInUse(_)));
    }

    #[tokio::test]
    async fn split_key_must_fall_inside_range() {
        let sim = two_partitions();
        let err = sim
            .split_partition(&SplitRequest {
                stream_name: "events".to_string(),
                partition_to_split: "shardId-000000000000".to_string(),
                new_starting_hash_key: HashKey::from(0u64),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn merge_requires_adjacency() {
        let sim = SimulatedStream::new(
            "events",
            vec![
                Partition::open("a", 0u64, 9u64),
                Partition::open("b", 20u64, 29u64),
            ],
        );
        let err = sim
            .merge_partitions(&MergeRequest {
                stream_name: "events".to_string(),
                partition_to_merge: "a".to_string(),
                adjacent_partition_to_merge: "b".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn merge_combines_ranges_and_load() {
        let sim = two_partitions();
        sim.set_load("shardId-000000000000", LoadProfile::Constant(10.0));
        sim.set_load("shardId-000000000001", LoadProfile::Constant(5.0));

        sim.merge_partitions(&MergeRequest {
            stream_name: "events".to_string(),
            partition_to_merge: "shardId-000000000000".to_string(),
            adjacent_partition_to_merge: "shardId-000000000001".to_string(),
        })
        .await
        .unwrap();

        let open = sim.open_partitions();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].starting_hash_key, HashKey::from(0u64));
        assert_eq!(open[0].ending_hash_key, HashKey::from(199u64));
        assert_eq!(sim.state().load_of(&open[0].id), LoadProfile::Constant(15.0));
    }

    #[tokio::test]
    async fn query_returns_complete_minutes_only() {
        let sim = two_partitions();
        sim.set_load(
            "shardId-000000000000",
            LoadProfile::Recent(vec![Some(3.0), None, Some(1.0)]),
        );

        let end = Utc.with_ymd_and_hms(2024, 5, 1, 12, 10, 30).unwrap();
        let samples = sim
            .query_ingestion_sum(&IngestionQuery {
                stream_name: "events".to_string(),
                partition_id: "shardId-000000000000".to_string(),
                start_time: end - TimeDelta::minutes(5),
                end_time: end,
                period_secs: 60,
            })
            .await
            .unwrap();

        assert_eq!(
            samples,
            vec![
                MetricSample::new(Utc.with_ymd_and_hms(2024, 5, 1, 12, 9, 0).unwrap(), 3.0),
                MetricSample::new(Utc.with_ymd_and_hms(2024, 5, 1, 12, 7, 0).unwrap(), 1.0),
            ]
        );
    }

    #[tokio::test]
    async fn injected_failures_are_consumed_in_order() {
        let sim = two_partitions();
        sim.inject_failure(SimOp::Publish, ClientError::Transport("down".into()), 1);

        assert!(sim.publish("topic", "s", "m").await.is_err());
        assert!(sim.publish("topic", "s", "m").await.is_ok());
        assert_eq!(sim.notifications().len(), 1);
    }

    #[tokio::test]
    async fn describe_unknown_stream_is_not_found() {
        let sim = two_partitions();
        let err = sim.describe_stream("other").await.unwrap_err();
        assert!(matches!(err, ClientError::NotFound(_)));
    }
}
