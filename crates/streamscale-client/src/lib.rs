//! streamscale-client — the collaborators the autoscaler talks to.
//!
//! The autoscaler never speaks a wire protocol itself. It depends on three
//! trait objects:
//!
//! ```text
//! StreamManager  — describe / enable metrics / split / merge
//! MetricsSource  — per-partition ingestion sums, 60s buckets
//! Notifier       — fire-and-forget alerts
//! ```
//!
//! [`SimulatedStream`] implements all three in memory. It backs the test
//! suites and the daemon's `simulate` mode.

pub mod error;
pub mod metrics;
pub mod notify;
pub mod simulated;
pub mod stream;

pub use error::{ClientError, ClientResult};
pub use metrics::{IngestionQuery, MetricsSource, METRIC_PERIOD_SECS};
pub use notify::{Notification, Notifier};
pub use simulated::{LoadProfile, SimOp, SimulatedStream};
pub use stream::{wait_for_active, MergeRequest, SplitRequest, StreamManager};
