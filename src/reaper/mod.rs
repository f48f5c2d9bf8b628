//! Out-of-process cleanup guarantor.
//!
//! The reaper is a companion container started at most once per host.
//! A test process registers a label filter over one long-lived TCP
//! connection and then simply keeps the connection open; the daemon
//! destroys every matching resource when the connection closes, whether
//! the process exited cleanly, crashed, or was killed. This substitutes a
//! held-connection signal for language-level finalizers: no cleanup hook
//! has to run in the dying process.
//!
//! Client side: [`ReaperRegistration`]. Daemon side (run by the
//! `drydock-reaper` binary inside the companion container):
//! [`ReaperDaemon`]. Both speak the [`ReapFilter`] wire format.

pub mod client;
pub mod daemon;
pub mod error;
pub mod filter;

pub use client::{REAPER_CONTAINER_NAME, ReaperRegistration};
pub use daemon::ReaperDaemon;
pub use error::{ReaperError, Result};
pub use filter::{ACK, ReapFilter};
