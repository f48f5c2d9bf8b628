//! Container-engine client boundary.
//!
//! Everything drydock does against the engine goes through the
//! [`ContainerEngine`] trait: container/network/volume lifecycle, inspect
//! snapshots, log retrieval, in-container exec, and label-scoped queries.
//! The rest of the crate is written against this trait so that sessions,
//! wait strategies, and the reaper daemon can run against the real Docker
//! API ([`DockerEngine`]) or an in-memory stand-in
//! ([`crate::testing::MockEngine`]).

pub mod docker;

pub use docker::{DockerEngine, connect_docker};

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors surfaced by the engine client.
///
/// Anything the engine reports that does not classify as a missing
/// resource or a name conflict is either an API-level failure or, when the
/// transport itself broke, [`EngineError::Unreachable`]. Callers apply
/// different backoff policy to the two, so the distinction is preserved
/// all the way up.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine itself could not be reached.
    #[error("container engine unreachable: {reason}")]
    Unreachable {
        /// Transport-level failure description.
        reason: String,
    },

    /// The referenced resource does not exist.
    #[error("no such resource: {id}")]
    NotFound {
        /// Engine-assigned identifier or name.
        id: String,
    },

    /// A resource with the requested name already exists.
    #[error("name already in use: {name}")]
    Conflict {
        /// The conflicting name.
        name: String,
    },

    /// The engine rejected the call.
    #[error("engine call failed: {reason}")]
    Api {
        /// Engine-reported failure description.
        reason: String,
    },
}

/// Engine-reported health of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    /// Health check passing.
    Healthy,
    /// Health check failing.
    Unhealthy,
    /// Health check configured but still in its start period.
    Starting,
    /// No health check configured for this container.
    Unconfigured,
}

impl HealthState {
    /// Human-readable state string.
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthState::Healthy => "healthy",
            HealthState::Unhealthy => "unhealthy",
            HealthState::Starting => "starting",
            HealthState::Unconfigured => "unconfigured",
        }
    }
}

/// Point-in-time run state of a container.
#[derive(Debug, Clone, Copy)]
pub struct ContainerStatus {
    /// Whether the container process is currently running.
    pub running: bool,
    /// Exit code, once the process has exited.
    pub exit_code: Option<i64>,
    /// Engine health-check state.
    pub health: HealthState,
}

impl ContainerStatus {
    /// True once the container has stopped running and reported an exit code.
    pub fn exited(&self) -> bool {
        !self.running && self.exit_code.is_some()
    }
}

/// Captured result of an in-container exec.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    /// Exit code; `None` while the exec process is still running.
    pub exit_code: Option<i64>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

/// Creation-time description of a container.
///
/// Ports are container-internal TCP ports; the engine assigns the host
/// side dynamically and the mapping is read back through
/// [`ContainerEngine::container_ports`] once the container is running.
#[derive(Debug, Clone, Default)]
pub struct ContainerSpec {
    /// Image reference (e.g. `postgres:16-alpine`).
    pub image: String,
    /// Command override.
    pub cmd: Option<Vec<String>>,
    /// Entrypoint override.
    pub entrypoint: Option<Vec<String>>,
    /// Environment variables: (name, value).
    pub env: Vec<(String, String)>,
    /// Container-internal TCP ports to expose with dynamic host ports.
    pub exposed_ports: Vec<u16>,
    /// Labels attached at creation time.
    pub labels: HashMap<String, String>,
    /// Volume binds in `host:container[:opts]` form.
    pub binds: Vec<String>,
    /// Network mode (engine default when `None`).
    pub network_mode: Option<String>,
}

/// Client for a Docker-compatible container engine.
///
/// Implementations must be cheap to share (`Arc<dyn ContainerEngine>`) and
/// safe to call concurrently; drydock imposes no serialization of its own
/// beyond what individual operations require.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Check that the engine is responsive.
    async fn ping(&self) -> Result<()>;

    /// Pull an image if it is not present locally.
    async fn pull_image(&self, image: &str) -> Result<()>;

    /// Create a container, optionally with a fixed name. Returns the
    /// engine-assigned id.
    async fn create_container(&self, name: Option<&str>, spec: ContainerSpec) -> Result<String>;

    /// Start a created container.
    async fn start_container(&self, id: &str) -> Result<()>;

    /// Stop a running container.
    async fn stop_container(&self, id: &str) -> Result<()>;

    /// Remove a container.
    async fn remove_container(&self, id: &str, force: bool) -> Result<()>;

    /// Inspect run state and health.
    async fn container_status(&self, id: &str) -> Result<ContainerStatus>;

    /// Declared-exposed container ports and their host bindings.
    ///
    /// Every declared port is present as a key; the value is `None` until
    /// the engine has assigned a host port. Host `0.0.0.0`/`::` bindings
    /// are reported as the loopback address.
    async fn container_ports(&self, id: &str) -> Result<HashMap<u16, Option<(String, u16)>>>;

    /// All log output (stdout + stderr) accumulated so far.
    async fn container_logs(&self, id: &str) -> Result<String>;

    /// Run a command inside a running container and capture the result.
    async fn exec(&self, id: &str, cmd: &[String]) -> Result<ExecOutput>;

    /// Create a labeled network. Returns an identifier usable with
    /// [`remove_network`](Self::remove_network).
    async fn create_network(&self, name: &str, labels: &HashMap<String, String>) -> Result<String>;

    /// Remove a network.
    async fn remove_network(&self, id: &str) -> Result<()>;

    /// Remove a volume.
    async fn remove_volume(&self, name: &str) -> Result<()>;

    /// Ids of containers (running or not) carrying every given label.
    async fn list_containers(&self, labels: &[(String, String)]) -> Result<Vec<String>>;

    /// Ids of networks carrying every given label.
    async fn list_networks(&self, labels: &[(String, String)]) -> Result<Vec<String>>;

    /// Names of volumes carrying every given label.
    async fn list_volumes(&self, labels: &[(String, String)]) -> Result<Vec<String>>;

    /// Host address on which published container ports are reachable.
    fn host(&self) -> String {
        "127.0.0.1".to_string()
    }
}
