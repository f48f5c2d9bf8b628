//! drydock - disposable containerized test fixtures with guaranteed cleanup.
//!
//! Test suites use drydock to provision short-lived workloads (databases,
//! browsers, arbitrary services) in a Docker-compatible engine, wait until
//! each workload is actually ready to receive traffic, and have every
//! created resource removed even if the test process crashes before any
//! teardown code runs.
//!
//! Two subsystems carry those guarantees:
//!
//! - the [`reaper`]: an out-of-process cleanup daemon, running in a
//!   companion container, that destroys everything labeled with a session
//!   id the moment the test process's connection to it closes;
//! - the [`wait`] engine: pluggable readiness polling over heterogeneous
//!   signals (log output, TCP reachability, HTTP responses, engine health,
//!   exec exit codes) under a hard deadline.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use drydock::{ContainerRequest, DockerEngine, ReaperConfig, Session, WaitStrategy};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = Arc::new(DockerEngine::connect().await?);
//! let session = Session::new(engine, ReaperConfig::resolve()?);
//!
//! let postgres = session
//!     .start_container(
//!         ContainerRequest::new("postgres:16-alpine")
//!             .env("POSTGRES_PASSWORD", "secret")
//!             .expose(5432)
//!             .wait(WaitStrategy::log_pattern("ready to accept connections")?),
//!     )
//!     .await?;
//!
//! let binding = postgres.port(5432).expect("declared above");
//! println!("postgres is up at {binding}");
//! // No teardown required: the reaper removes everything when this
//! // process exits, however it exits.
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod ports;
pub mod reaper;
pub mod session;
pub mod testing;
pub mod wait;

pub use config::{ConfigError, DaemonConfig, ReaperConfig};
pub use engine::{
    ContainerEngine, ContainerSpec, ContainerStatus, DockerEngine, EngineError, ExecOutput,
    HealthState, connect_docker,
};
pub use ports::{PortMap, ResolveError, ResolvedPort, resolve_bindings};
pub use reaper::{ReapFilter, ReaperDaemon, ReaperError, ReaperRegistration};
pub use session::{
    ContainerHandle, ContainerRequest, Session, SessionError, SessionId, build_labels,
};
pub use wait::{Readiness, WaitError, WaitStrategy, WaitTarget, wait_until_ready};
