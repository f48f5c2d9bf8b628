//! Container start requests and handles.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::engine::{ContainerEngine, ContainerSpec, ExecOutput};
use crate::ports::{PortMap, ResolvedPort};
use crate::session::error::Result;
use crate::wait::WaitStrategy;

/// Description of a disposable workload to start.
///
/// Defaults: wait for every exposed port to accept TCP connections, give
/// up after 60 seconds, pull the image when missing.
#[derive(Debug, Clone)]
pub struct ContainerRequest {
    /// Image reference.
    pub image: String,
    /// Fixed container name; engine-generated when `None`.
    pub name: Option<String>,
    /// Command override.
    pub cmd: Option<Vec<String>>,
    /// Entrypoint override.
    pub entrypoint: Option<Vec<String>>,
    /// Environment variables: (name, value).
    pub env: Vec<(String, String)>,
    /// Container-internal TCP ports to expose with dynamic host ports.
    pub exposed_ports: Vec<u16>,
    /// Extra labels; reserved drydock keys are always overwritten.
    pub labels: HashMap<String, String>,
    /// Volume binds in `host:container[:opts]` form.
    pub binds: Vec<String>,
    /// Network mode (engine default when `None`).
    pub network_mode: Option<String>,
    /// Readiness condition polled after start.
    pub wait: WaitStrategy,
    /// Absolute deadline for the readiness wait.
    pub startup_timeout: Duration,
    /// Whether to pull the image if not present locally.
    pub auto_pull: bool,
}

impl ContainerRequest {
    /// Request for `image` with the defaults above.
    pub fn new(image: &str) -> Self {
        Self {
            image: image.to_string(),
            name: None,
            cmd: None,
            entrypoint: None,
            env: Vec::new(),
            exposed_ports: Vec::new(),
            labels: HashMap::new(),
            binds: Vec::new(),
            network_mode: None,
            wait: WaitStrategy::ports(),
            startup_timeout: Duration::from_secs(60),
            auto_pull: true,
        }
    }

    /// Set an environment variable.
    pub fn env(mut self, name: &str, value: &str) -> Self {
        self.env.push((name.to_string(), value.to_string()));
        self
    }

    /// Declare a container-internal port as exposed.
    pub fn expose(mut self, port: u16) -> Self {
        self.exposed_ports.push(port);
        self
    }

    /// Override the command.
    pub fn cmd(mut self, cmd: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.cmd = Some(cmd.into_iter().map(Into::into).collect());
        self
    }

    /// Attach an extra label.
    pub fn label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }

    /// Replace the readiness condition.
    pub fn wait(mut self, strategy: WaitStrategy) -> Self {
        self.wait = strategy;
        self
    }

    /// Replace the startup timeout.
    pub fn startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    /// Add a volume bind.
    pub fn bind(mut self, bind: &str) -> Self {
        self.binds.push(bind.to_string());
        self
    }

    pub(crate) fn to_spec(&self, labels: HashMap<String, String>) -> ContainerSpec {
        ContainerSpec {
            image: self.image.clone(),
            cmd: self.cmd.clone(),
            entrypoint: self.entrypoint.clone(),
            env: self.env.clone(),
            exposed_ports: self.exposed_ports.clone(),
            labels,
            binds: self.binds.clone(),
            network_mode: self.network_mode.clone(),
        }
    }
}

/// A started, ready container.
///
/// The handle offers explicit teardown for callers who want resources
/// back early; the reaper remains the guarantee either way.
pub struct ContainerHandle {
    engine: Arc<dyn ContainerEngine>,
    id: String,
    host: String,
    ports: PortMap,
}

impl ContainerHandle {
    pub(crate) fn new(
        engine: Arc<dyn ContainerEngine>,
        id: String,
        host: String,
        ports: PortMap,
    ) -> Self {
        Self {
            engine,
            id,
            host,
            ports,
        }
    }

    /// Engine-assigned container identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Host address published ports are reachable on.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// All resolved port bindings.
    pub fn ports(&self) -> &PortMap {
        &self.ports
    }

    /// Resolved binding for one internal port, if it was declared exposed.
    pub fn port(&self, internal: u16) -> Option<&ResolvedPort> {
        self.ports.get(&internal)
    }

    /// Run a command inside the container.
    pub async fn exec(&self, cmd: &[String]) -> Result<ExecOutput> {
        Ok(self.engine.exec(&self.id, cmd).await?)
    }

    /// All log output accumulated so far.
    pub async fn logs(&self) -> Result<String> {
        Ok(self.engine.container_logs(&self.id).await?)
    }

    /// Stop the container.
    pub async fn stop(&self) -> Result<()> {
        Ok(self.engine.stop_container(&self.id).await?)
    }

    /// Force-remove the container.
    pub async fn rm(self) -> Result<()> {
        Ok(self.engine.remove_container(&self.id, true).await?)
    }
}

impl std::fmt::Debug for ContainerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerHandle")
            .field("id", &self.id)
            .field("host", &self.host)
            .field("ports", &self.ports)
            .finish_non_exhaustive()
    }
}
