//! Error type for session-level operations.

use thiserror::Error;

use crate::engine::EngineError;
use crate::ports::ResolveError;
use crate::reaper::ReaperError;
use crate::wait::WaitError;

/// Result type for session operations.
pub type Result<T> = std::result::Result<T, SessionError>;

/// Errors surfaced by the session start flow.
#[derive(Debug, Error)]
pub enum SessionError {
    /// An engine call failed.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// The cleanup guarantee could not be established. Fatal unless the
    /// caller disabled lifecycle management.
    #[error(transparent)]
    Reaper(#[from] ReaperError),

    /// The container never became ready.
    #[error(transparent)]
    Wait(#[from] WaitError),

    /// Port bindings could not be resolved.
    #[error(transparent)]
    Resolve(#[from] ResolveError),
}
