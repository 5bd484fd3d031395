//! Metrics-source contract.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use streamscale_core::{MetricSample, PartitionId};

use crate::error::ClientResult;

/// Bucket width for ingestion sums.
pub const METRIC_PERIOD_SECS: u32 = 60;

/// A time-series statistics request for one partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestionQuery {
    pub stream_name: String,
    pub partition_id: PartitionId,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub period_secs: u32,
}

/// Source of per-partition `IncomingRecords` sums.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Sum of ingested records per bucket between `start_time` and
    /// `end_time`. Buckets with no data may be omitted; order is not
    /// guaranteed.
    async fn query_ingestion_sum(&self, query: &IngestionQuery) -> ClientResult<Vec<MetricSample>>;
}
