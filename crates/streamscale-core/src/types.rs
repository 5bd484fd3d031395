//! Domain types for a partitioned stream.
//!
//! A stream is split into partitions (shards), each owning a contiguous,
//! inclusive range of the hash-key space. Hash keys are arbitrary-precision
//! unsigned integers; they are never coerced to floats or machine words.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Timelike, Utc};
use num_bigint::{BigUint, ParseBigIntError};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Unique identifier for a partition within a stream.
pub type PartitionId = String;

/// Shard-level metric that must be enabled for per-partition scaling.
pub const INCOMING_RECORDS_METRIC: &str = "IncomingRecords";

/// Sum reported for a minute bucket that has no sample.
///
/// Never counts as a split breach, since it can't exceed a non-negative limit.
pub const MISSING_SUM: f64 = -1.0;

// ── Hash keys ─────────────────────────────────────────────────────

/// A position in the stream's hash-key space.
///
/// Serialized as a decimal string, which is how stream APIs carry keys
/// wider than 64 bits.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct HashKey(BigUint);

impl HashKey {
    pub fn new(value: BigUint) -> Self {
        Self(value)
    }

    pub fn as_biguint(&self) -> &BigUint {
        &self.0
    }

    /// `start + floor((end - start) / 2)`.
    ///
    /// If `end` is not above `start` the range is degenerate and `start`
    /// is returned unchanged.
    pub fn midpoint(start: &HashKey, end: &HashKey) -> HashKey {
        if end.0 <= start.0 {
            return start.clone();
        }
        let half: BigUint = (&end.0 - &start.0) / 2u32;
        HashKey(&start.0 + half)
    }
}

impl fmt::Display for HashKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for HashKey {
    type Err = ParseBigIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<BigUint>().map(HashKey)
    }
}

impl From<u64> for HashKey {
    fn from(v: u64) -> Self {
        HashKey(BigUint::from(v))
    }
}

impl From<u128> for HashKey {
    fn from(v: u128) -> Self {
        HashKey(BigUint::from(v))
    }
}

impl From<BigUint> for HashKey {
    fn from(v: BigUint) -> Self {
        HashKey(v)
    }
}

impl Serialize for HashKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for HashKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ── Partition ─────────────────────────────────────────────────────

/// A single partition (shard) of the stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Partition {
    pub id: PartitionId,
    /// First hash key owned by this partition (inclusive).
    pub starting_hash_key: HashKey,
    /// Last hash key owned by this partition (inclusive).
    pub ending_hash_key: HashKey,
    /// Set once the partition has been retired by a split or merge.
    pub ending_sequence_number: Option<String>,
}

impl Partition {
    /// Create an open partition covering `[start, end]`.
    pub fn open(id: impl Into<String>, start: impl Into<HashKey>, end: impl Into<HashKey>) -> Self {
        Self {
            id: id.into(),
            starting_hash_key: start.into(),
            ending_hash_key: end.into(),
            ending_sequence_number: None,
        }
    }

    /// Open partitions accept writes; closed ones are excluded from scaling.
    pub fn is_open(&self) -> bool {
        self.ending_sequence_number.is_none()
    }

    /// Starting hash key for the upper child of a split.
    pub fn split_point(&self) -> HashKey {
        HashKey::midpoint(&self.starting_hash_key, &self.ending_hash_key)
    }

    /// Whether `other` starts right where this partition ends.
    pub fn is_adjacent_to(&self, other: &Partition) -> bool {
        self.ending_hash_key.as_biguint() + 1u32 == *other.starting_hash_key.as_biguint()
    }
}

// ── Stream ────────────────────────────────────────────────────────

/// Lifecycle status of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamStatus {
    Creating,
    Updating,
    Active,
    Deleting,
}

impl fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StreamStatus::Creating => "CREATING",
            StreamStatus::Updating => "UPDATING",
            StreamStatus::Active => "ACTIVE",
            StreamStatus::Deleting => "DELETING",
        };
        f.write_str(s)
    }
}

/// Point-in-time description of a stream's topology.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamDescription {
    pub stream_name: String,
    pub status: StreamStatus,
    /// All partitions, open and closed, in the order the service returned them.
    pub partitions: Vec<Partition>,
    /// Shard-level metrics currently enabled on the stream.
    pub shard_level_metrics: Vec<String>,
}

impl StreamDescription {
    /// Whether per-partition `IncomingRecords` metrics are enabled.
    pub fn enhanced_metrics_enabled(&self) -> bool {
        self.shard_level_metrics
            .iter()
            .any(|m| m == INCOMING_RECORDS_METRIC)
    }

    pub fn is_active(&self) -> bool {
        self.status == StreamStatus::Active
    }
}

// ── Metrics ───────────────────────────────────────────────────────

/// Ingested-record sum for one minute of one partition.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    /// Start of the minute bucket.
    pub timestamp: DateTime<Utc>,
    pub sum: f64,
}

impl MetricSample {
    /// Create a sample, truncating the timestamp to the minute.
    pub fn new(timestamp: DateTime<Utc>, sum: f64) -> Self {
        Self {
            timestamp: truncate_to_minute(timestamp),
            sum,
        }
    }
}

/// Recent ingestion samples for one partition, indexed by minute.
#[derive(Debug, Clone)]
pub struct PartitionMetricsSet {
    pub partition_id: PartitionId,
    pub starting_hash_key: HashKey,
    pub ending_hash_key: HashKey,
    /// Most recent first.
    samples: Vec<MetricSample>,
    by_minute: HashMap<DateTime<Utc>, f64>,
}

impl PartitionMetricsSet {
    pub fn new(partition: &Partition, samples: Vec<MetricSample>) -> Self {
        let mut samples: Vec<MetricSample> = samples
            .into_iter()
            .map(|s| MetricSample::new(s.timestamp, s.sum))
            .collect();
        samples.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        let by_minute = samples.iter().map(|s| (s.timestamp, s.sum)).collect();

        Self {
            partition_id: partition.id.clone(),
            starting_hash_key: partition.starting_hash_key.clone(),
            ending_hash_key: partition.ending_hash_key.clone(),
            samples,
            by_minute,
        }
    }

    /// Samples, most recent first.
    pub fn samples(&self) -> &[MetricSample] {
        &self.samples
    }

    /// The sum recorded for the minute starting at `minute`, or
    /// [`MISSING_SUM`] when there is no sample for it.
    pub fn sum_at(&self, minute: DateTime<Utc>) -> f64 {
        self.by_minute
            .get(&truncate_to_minute(minute))
            .copied()
            .unwrap_or(MISSING_SUM)
    }
}

/// Drop seconds and sub-second precision from a timestamp.
pub fn truncate_to_minute(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(ts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn key(s: &str) -> HashKey {
        s.parse().unwrap()
    }

    #[test]
    fn midpoint_of_small_range() {
        assert_eq!(HashKey::midpoint(&key("0"), &key("100")), key("50"));
        assert_eq!(HashKey::midpoint(&key("10"), &key("13")), key("11"));
    }

    #[test]
    fn midpoint_of_full_128_bit_range_is_exact() {
        let start = key("1");
        let end = key("340282366920938463463374607431768211455");
        // 1 + floor((2^128 - 2) / 2) = 2^127
        assert_eq!(
            HashKey::midpoint(&start, &end),
            key("170141183460469231731687303715884105728")
        );
    }

    #[test]
    fn midpoint_beyond_128_bits() {
        let start = key("0");
        let end = key("680564733841876926926749214863536422910"); // 2^129 - 2
        assert_eq!(
            HashKey::midpoint(&start, &end),
            key("340282366920938463463374607431768211455")
        );
    }

    #[test]
    fn midpoint_of_degenerate_range_is_start() {
        assert_eq!(HashKey::midpoint(&key("7"), &key("7")), key("7"));
        assert_eq!(HashKey::midpoint(&key("9"), &key("3")), key("9"));
    }

    #[test]
    fn hash_keys_order_numerically_not_lexically() {
        assert!(key("9") < key("10"));
        assert!(key("99999999999999999999") < key("100000000000000000000"));
    }

    #[test]
    fn hash_key_serializes_as_decimal_string() {
        let k = key("340282366920938463463374607431768211455");
        let json = serde_json::to_string(&k).unwrap();
        assert_eq!(json, "\"340282366920938463463374607431768211455\"");
        let back: HashKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, k);
        assert!(serde_json::from_str::<HashKey>("\"-4\"").is_err());
    }

    #[test]
    fn partition_open_and_closed() {
        let mut p = Partition::open("shardId-000000000000", 0u64, 99u64);
        assert!(p.is_open());
        p.ending_sequence_number = Some("4959".to_string());
        assert!(!p.is_open());
    }

    #[test]
    fn partition_adjacency() {
        let a = Partition::open("a", 0u64, 49u64);
        let b = Partition::open("b", 50u64, 99u64);
        assert!(a.is_adjacent_to(&b));
        assert!(!b.is_adjacent_to(&a));
    }

    #[test]
    fn enhanced_metrics_detection() {
        let mut desc = StreamDescription {
            stream_name: "events".to_string(),
            status: StreamStatus::Active,
            partitions: vec![],
            shard_level_metrics: vec!["OutgoingBytes".to_string()],
        };
        assert!(!desc.enhanced_metrics_enabled());
        desc.shard_level_metrics.push(INCOMING_RECORDS_METRIC.to_string());
        assert!(desc.enhanced_metrics_enabled());
    }

    #[test]
    fn metrics_set_sorts_and_indexes_by_minute() {
        let p = Partition::open("a", 0u64, 99u64);
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let samples = vec![
            MetricSample::new(t0, 10.0),
            MetricSample::new(t0 + chrono::TimeDelta::minutes(2), 30.0),
            MetricSample::new(t0 + chrono::TimeDelta::minutes(1), 20.0),
        ];
        let set = PartitionMetricsSet::new(&p, samples);

        let sums: Vec<f64> = set.samples().iter().map(|s| s.sum).collect();
        assert_eq!(sums, vec![30.0, 20.0, 10.0]);

        // Lookup ignores seconds.
        let probe = Utc.with_ymd_and_hms(2024, 5, 1, 12, 1, 42).unwrap();
        assert_eq!(set.sum_at(probe), 20.0);
        assert_eq!(set.sum_at(t0 + chrono::TimeDelta::minutes(5)), MISSING_SUM);
    }

    #[test]
    fn truncate_drops_seconds_and_nanos() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 34, 56).unwrap()
            + chrono::TimeDelta::milliseconds(789);
        assert_eq!(
            truncate_to_minute(ts),
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 34, 0).unwrap()
        );
    }
}
