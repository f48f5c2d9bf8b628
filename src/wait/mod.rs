//! Readiness polling for started containers.
//!
//! A [`WaitStrategy`] is a declarative readiness condition; the engine in
//! [`poll`] turns it into a bounded, deterministic poll loop against a
//! [`WaitTarget`]. Every probe classifies three ways — ready, not yet,
//! permanently failed — so that a dead target is surfaced immediately
//! instead of being polled until the deadline.
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use drydock::wait::{WaitStrategy, WaitTarget, wait_until_ready};
//!
//! # async fn example(engine: &dyn drydock::engine::ContainerEngine, target: WaitTarget) -> Result<(), drydock::wait::WaitError> {
//! let strategy = WaitStrategy::http("/health", 8080);
//! wait_until_ready(engine, &target, &strategy, Duration::from_secs(30)).await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod poll;
pub mod strategy;

pub use error::{Result, WaitError};
pub use poll::{DEFAULT_POLL_INTERVAL, wait_until_ready, wait_with_interval};
pub use strategy::{
    ExecWait, ExitPolicy, HttpWait, LogPatternWait, PortsWait, Readiness, ShellWait, StatusPolicy,
    WaitStrategy, WaitTarget,
};
