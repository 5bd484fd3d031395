//! Session error types.

use thiserror::Error;

use streamscale_client::ClientError;

/// Reasons a [`ScalingSession`](crate::ScalingSession) refuses to start.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The configuration is missing mandatory fields; one message each.
    #[error("input is invalid: {}", .0.join("; "))]
    Config(Vec<String>),

    /// Per-partition metrics could not be verified or enabled.
    #[error("shard level metrics are not enabled: {0}")]
    Preflight(#[source] ClientError),
}
