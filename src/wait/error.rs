//! Error types for readiness polling.

use std::time::Duration;

use thiserror::Error;

/// Result type for wait operations.
pub type Result<T> = std::result::Result<T, WaitError>;

/// Errors that end a readiness wait.
#[derive(Debug, Error)]
pub enum WaitError {
    /// The deadline passed while the target was still not ready.
    #[error("timed out after {elapsed:?} waiting for container {container_id} ({strategy})")]
    Timeout {
        /// Strategy that was polling.
        strategy: &'static str,
        /// Target container identifier.
        container_id: String,
        /// Time spent polling before giving up.
        elapsed: Duration,
    },

    /// The target definitively cannot become ready; polling stopped early.
    #[error("container {container_id} cannot become ready ({strategy}): {reason}")]
    PermanentFailure {
        /// Strategy that was polling.
        strategy: &'static str,
        /// Target container identifier.
        container_id: String,
        /// Why readiness is impossible.
        reason: String,
    },

    /// The engine became unreachable or the container disappeared
    /// mid-poll. Distinct from [`WaitError::Timeout`] so callers can apply
    /// a different backoff policy.
    #[error("infrastructure failure while waiting for container {container_id}: {reason}")]
    Infrastructure {
        /// Target container identifier.
        container_id: String,
        /// Underlying failure description.
        reason: String,
    },
}
