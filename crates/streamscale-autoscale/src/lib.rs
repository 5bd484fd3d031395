//! streamscale-autoscale — split and merge stream partitions from
//! per-partition ingestion metrics.
//!
//! # Scaling Algorithm
//!
//! ```text
//! limit = shard_limit * 60                      (records per minute)
//!
//! split (only while open partitions < max_shard):
//!     first partition, by starting hash key, whose sum > limit in every
//!     one of the last scaling_split_duration minutes
//!     → split at start + (end - start) / 2
//!
//! merge (only if nothing was split and there are 2+ partitions):
//!     first adjacent pair, both first seen >= merge_next_interval ago,
//!     whose combined sum < limit in every one of the last
//!     scaling_merge_duration minutes
//!     → merge the pair
//!
//! next cycle after split_next_interval | merge_next_interval | auto_scale_interval
//! ```
//!
//! A session runs preflight once (enabling per-partition metrics if
//! needed) and then loops through the phases
//! `Collecting → Deciding → [Changing] → Cooldown`.

pub mod error;
pub mod executor;
pub mod hooks;
pub mod scaler;
pub mod session;
pub mod topology;
pub mod tracking;

pub use error::SessionError;
pub use executor::{ChangeKind, ChangeOutcome, ChangeResult, TopologyChangeExecutor};
pub use hooks::LifecycleHooks;
pub use scaler::{Check, Evaluation, ScaleDecision, ScalingPolicy, SkipReason};
pub use session::{Collaborators, CycleOutcome, CycleReport, ScalingSession, SessionHandle, SessionPhase};
pub use tracking::ShardTrackingTable;
