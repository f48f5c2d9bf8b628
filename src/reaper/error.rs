//! Error types for the reaper client and daemon.

use thiserror::Error;

use crate::engine::EngineError;

/// Result type for reaper operations.
pub type Result<T> = std::result::Result<T, ReaperError>;

/// Errors that can occur while guaranteeing cleanup.
#[derive(Debug, Error)]
pub enum ReaperError {
    /// The cleanup daemon could not be created or reached. Fatal unless
    /// the caller explicitly disabled lifecycle management.
    #[error("reaper unavailable after {attempts} attempt(s): {reason}")]
    Unavailable {
        /// Connection attempts made.
        attempts: u32,
        /// Last failure observed.
        reason: String,
    },

    /// The daemon answered something other than an acknowledgement.
    #[error("reaper rejected filter registration: {reply}")]
    Rejected {
        /// The daemon's reply line.
        reply: String,
    },

    /// A wire filter line could not be parsed.
    #[error("bad reap filter '{line}': {reason}")]
    BadFilter {
        /// The offending line.
        line: String,
        /// Why it was rejected.
        reason: String,
    },

    /// An engine call failed while managing the reaper container.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Connection-level I/O failure.
    #[error("reaper connection error: {0}")]
    Io(#[from] std::io::Error),
}
