//! streamscale-core — shared types and configuration for streamscale.
//!
//! Holds the domain model of a partitioned stream (partitions identified by
//! hash-key ranges, per-minute ingestion samples) and the `ScalingConfig`
//! that drives the autoscaler. Every other crate in the workspace depends
//! on this one.

pub mod config;
pub mod error;
pub mod types;

pub use config::ScalingConfig;
pub use error::{ConfigError, ConfigResult};
pub use types::*;
