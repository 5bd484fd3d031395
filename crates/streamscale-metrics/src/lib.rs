//! streamscale-metrics — ingestion metrics for scaling decisions.
//!
//! # Architecture
//!
//! ```text
//! ScalingWindows
//!   └── build(now, split_minutes, merge_minutes) → minute-aligned timestamps
//!
//! PartitionMetricsCollector
//!   ├── collect_one() ← one MetricsSource query per partition
//!   └── collect()     → fan-out over all partitions, fan-in to CollectedMetrics
//! ```

pub mod collector;
pub mod window;

pub use collector::{CollectedMetrics, PartitionMetricsCollector};
pub use window::{minute_window, ScalingWindows};
