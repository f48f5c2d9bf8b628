//! Bollard-backed [`ContainerEngine`] implementation.

use std::collections::HashMap;

use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::models::{ContainerStateStatusEnum, HealthStatusEnum, HostConfig, PortBinding};
use bollard::network::{CreateNetworkOptions, ListNetworksOptions};
use bollard::volume::{ListVolumesOptions, RemoveVolumeOptions};
use futures::StreamExt;

use super::{
    ContainerEngine, ContainerSpec, ContainerStatus, EngineError, ExecOutput, HealthState, Result,
};

/// Seconds before a socket connection attempt is abandoned.
const CONNECT_TIMEOUT_SECS: u64 = 5;

/// Grace period given to a container's process on stop.
const STOP_TIMEOUT_SECS: i64 = 10;

/// Connect to the local Docker daemon and verify it responds.
///
/// Tries bollard's platform default first (honouring `DOCKER_HOST`), then
/// falls back to the Docker Desktop and rootless socket locations on Unix.
pub async fn connect_docker() -> Result<Docker> {
    if let Ok(docker) = Docker::connect_with_local_defaults()
        && docker.ping().await.is_ok()
    {
        return Ok(docker);
    }

    #[cfg(unix)]
    for socket in candidate_sockets() {
        if !std::path::Path::new(&socket).exists() {
            continue;
        }
        let path = format!("unix://{socket}");
        if let Ok(docker) =
            Docker::connect_with_socket(&path, CONNECT_TIMEOUT_SECS, bollard::API_DEFAULT_VERSION)
            && docker.ping().await.is_ok()
        {
            tracing::debug!(socket = %socket, "Connected to Docker via fallback socket");
            return Ok(docker);
        }
    }

    Err(EngineError::Unreachable {
        reason: "no responsive Docker daemon found".to_string(),
    })
}

#[cfg(unix)]
fn candidate_sockets() -> Vec<String> {
    let mut sockets = vec!["/var/run/docker.sock".to_string()];
    if let Ok(home) = std::env::var("HOME") {
        sockets.push(format!("{home}/.docker/run/docker.sock"));
    }
    if let Ok(uid) = std::env::var("UID").or_else(|_| std::env::var("XDG_RUNTIME_DIR_UID")) {
        sockets.push(format!("/run/user/{uid}/docker.sock"));
    }
    sockets
}

/// The externally reachable host for published ports, derived from
/// `DOCKER_HOST` when it points at a TCP daemon, loopback otherwise.
fn published_port_host() -> String {
    if let Ok(host) = std::env::var("DOCKER_HOST")
        && let Some(rest) = host
            .strip_prefix("tcp://")
            .or_else(|| host.strip_prefix("http://"))
    {
        let authority = rest.split('/').next().unwrap_or(rest);
        if let Some(hostname) = authority.rsplit_once(':').map(|(h, _)| h) {
            return hostname.to_string();
        }
        return authority.to_string();
    }
    "127.0.0.1".to_string()
}

/// [`ContainerEngine`] backed by the local Docker daemon.
#[derive(Clone)]
pub struct DockerEngine {
    docker: Docker,
    host: String,
}

impl DockerEngine {
    /// Wrap an existing bollard client.
    pub fn new(docker: Docker) -> Self {
        Self {
            docker,
            host: published_port_host(),
        }
    }

    /// Connect to the local daemon and wrap it.
    pub async fn connect() -> Result<Self> {
        Ok(Self::new(connect_docker().await?))
    }

    /// Access the underlying bollard client.
    pub fn docker(&self) -> &Docker {
        &self.docker
    }
}

/// Map a bollard error onto the engine taxonomy.
///
/// Unclassified failures land in `Unreachable` rather than being mistaken
/// for per-resource conditions: callers treat them as infrastructure
/// problems with their own backoff policy.
fn classify(err: bollard::errors::Error, hint: &str) -> EngineError {
    match err {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        } => EngineError::NotFound {
            id: hint.to_string(),
        },
        bollard::errors::Error::DockerResponseServerError {
            status_code: 409, ..
        } => EngineError::Conflict {
            name: hint.to_string(),
        },
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message,
        } => EngineError::Api {
            reason: format!("status {status_code}: {message}"),
        },
        other => EngineError::Unreachable {
            reason: other.to_string(),
        },
    }
}

fn label_filters(labels: &[(String, String)]) -> HashMap<String, Vec<String>> {
    let mut filters = HashMap::new();
    filters.insert(
        "label".to_string(),
        labels.iter().map(|(k, v)| format!("{k}={v}")).collect(),
    );
    filters
}

fn port_key(port: u16) -> String {
    format!("{port}/tcp")
}

#[async_trait::async_trait]
impl ContainerEngine for DockerEngine {
    async fn ping(&self) -> Result<()> {
        self.docker
            .ping()
            .await
            .map_err(|e| classify(e, "ping"))
            .map(|_| ())
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        if self.docker.inspect_image(image).await.is_ok() {
            tracing::debug!(image = %image, "Image exists locally");
            return Ok(());
        }

        tracing::info!(image = %image, "Pulling image");

        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };

        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(result) = stream.next().await {
            let info = result.map_err(|e| EngineError::Api {
                reason: format!("pull of '{image}' failed: {e}"),
            })?;
            if let Some(status) = info.status {
                tracing::trace!(status = %status, "Pull progress");
            }
        }

        Ok(())
    }

    async fn create_container(&self, name: Option<&str>, spec: ContainerSpec) -> Result<String> {
        let mut port_bindings = HashMap::new();
        let mut exposed_ports = HashMap::new();
        for port in &spec.exposed_ports {
            // Empty host port requests a dynamically assigned one.
            port_bindings.insert(
                port_key(*port),
                Some(vec![PortBinding {
                    host_ip: None,
                    host_port: Some(String::new()),
                }]),
            );
            exposed_ports.insert(port_key(*port), HashMap::new());
        }

        let env: Vec<String> = spec.env.iter().map(|(k, v)| format!("{k}={v}")).collect();

        let host_config = HostConfig {
            port_bindings: if port_bindings.is_empty() {
                None
            } else {
                Some(port_bindings)
            },
            binds: if spec.binds.is_empty() {
                None
            } else {
                Some(spec.binds.clone())
            },
            network_mode: spec.network_mode.clone(),
            auto_remove: Some(false),
            ..Default::default()
        };

        let config = Config {
            image: Some(spec.image.clone()),
            cmd: spec.cmd.clone(),
            entrypoint: spec.entrypoint.clone(),
            env: if env.is_empty() { None } else { Some(env) },
            labels: Some(spec.labels.clone()),
            exposed_ports: if exposed_ports.is_empty() {
                None
            } else {
                Some(exposed_ports)
            },
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = name.map(|n| CreateContainerOptions {
            name: n.to_string(),
            ..Default::default()
        });

        let response = self
            .docker
            .create_container(options, config)
            .await
            .map_err(|e| classify(e, name.unwrap_or(&spec.image)))?;

        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| classify(e, id))
    }

    async fn stop_container(&self, id: &str) -> Result<()> {
        self.docker
            .stop_container(id, Some(StopContainerOptions {
                t: STOP_TIMEOUT_SECS,
            }))
            .await
            .map_err(|e| classify(e, id))
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<()> {
        self.docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force,
                    v: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| classify(e, id))
    }

    async fn container_status(&self, id: &str) -> Result<ContainerStatus> {
        let info = self
            .docker
            .inspect_container(id, None)
            .await
            .map_err(|e| classify(e, id))?;

        let state = info.state.unwrap_or_default();
        let running = state.running.unwrap_or(false);
        let exit_code = match state.status {
            Some(ContainerStateStatusEnum::EXITED) | Some(ContainerStateStatusEnum::DEAD) => {
                Some(state.exit_code.unwrap_or(0))
            }
            _ => None,
        };
        let health = match state.health.and_then(|h| h.status) {
            Some(HealthStatusEnum::HEALTHY) => HealthState::Healthy,
            Some(HealthStatusEnum::UNHEALTHY) => HealthState::Unhealthy,
            Some(HealthStatusEnum::STARTING) => HealthState::Starting,
            _ => HealthState::Unconfigured,
        };

        Ok(ContainerStatus {
            running,
            exit_code,
            health,
        })
    }

    async fn container_ports(&self, id: &str) -> Result<HashMap<u16, Option<(String, u16)>>> {
        let info = self
            .docker
            .inspect_container(id, None)
            .await
            .map_err(|e| classify(e, id))?;

        let mut ports: HashMap<u16, Option<(String, u16)>> = HashMap::new();

        // Declared set comes from the container config; bindings from the
        // network settings once the engine has assigned host ports.
        if let Some(declared) = info.config.and_then(|c| c.exposed_ports) {
            for key in declared.keys() {
                if let Some(port) = parse_port_key(key) {
                    ports.insert(port, None);
                }
            }
        }

        if let Some(bindings) = info.network_settings.and_then(|n| n.ports) {
            for (key, binding) in bindings {
                let Some(port) = parse_port_key(&key) else {
                    continue;
                };
                let resolved = binding.and_then(|b| b.into_iter().next()).and_then(|b| {
                    let host_port = b.host_port?.parse().ok()?;
                    let host = match b.host_ip.as_deref() {
                        None | Some("") | Some("0.0.0.0") | Some("::") => self.host.clone(),
                        Some(ip) => ip.to_string(),
                    };
                    Some((host, host_port))
                });
                ports.insert(port, resolved);
            }
        }

        Ok(ports)
    }

    async fn container_logs(&self, id: &str) -> Result<String> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: false,
            tail: "all".to_string(),
            ..Default::default()
        };

        let mut stream = self.docker.logs(id, Some(options));
        let mut collected = String::new();
        while let Some(chunk) = stream.next().await {
            let output = chunk.map_err(|e| classify(e, id))?;
            match output {
                LogOutput::StdOut { message }
                | LogOutput::StdErr { message }
                | LogOutput::Console { message } => {
                    collected.push_str(&String::from_utf8_lossy(&message));
                }
                LogOutput::StdIn { .. } => {}
            }
        }

        Ok(collected)
    }

    async fn exec(&self, id: &str, cmd: &[String]) -> Result<ExecOutput> {
        let exec = self
            .docker
            .create_exec(
                id,
                CreateExecOptions::<String> {
                    cmd: Some(cmd.to_vec()),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| classify(e, id))?;

        let mut stdout = String::new();
        let mut stderr = String::new();

        match self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| classify(e, id))?
        {
            StartExecResults::Attached { mut output, .. } => {
                while let Some(chunk) = output.next().await {
                    match chunk.map_err(|e| classify(e, id))? {
                        LogOutput::StdOut { message } | LogOutput::Console { message } => {
                            stdout.push_str(&String::from_utf8_lossy(&message));
                        }
                        LogOutput::StdErr { message } => {
                            stderr.push_str(&String::from_utf8_lossy(&message));
                        }
                        LogOutput::StdIn { .. } => {}
                    }
                }
            }
            StartExecResults::Detached => {}
        }

        let inspect = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| classify(e, id))?;

        Ok(ExecOutput {
            exit_code: inspect.exit_code,
            stdout,
            stderr,
        })
    }

    async fn create_network(&self, name: &str, labels: &HashMap<String, String>) -> Result<String> {
        self.docker
            .create_network(CreateNetworkOptions::<String> {
                name: name.to_string(),
                labels: labels.clone(),
                ..Default::default()
            })
            .await
            .map_err(|e| classify(e, name))?;

        // Networks are addressable by name for removal; avoids depending
        // on which identifier field the engine populates.
        Ok(name.to_string())
    }

    async fn remove_network(&self, id: &str) -> Result<()> {
        self.docker
            .remove_network(id)
            .await
            .map_err(|e| classify(e, id))
    }

    async fn remove_volume(&self, name: &str) -> Result<()> {
        self.docker
            .remove_volume(name, Some(RemoveVolumeOptions { force: true }))
            .await
            .map_err(|e| classify(e, name))
    }

    async fn list_containers(&self, labels: &[(String, String)]) -> Result<Vec<String>> {
        let summaries = self
            .docker
            .list_containers(Some(ListContainersOptions {
                all: true,
                filters: label_filters(labels),
                ..Default::default()
            }))
            .await
            .map_err(|e| classify(e, "list containers"))?;

        Ok(summaries.into_iter().filter_map(|c| c.id).collect())
    }

    async fn list_networks(&self, labels: &[(String, String)]) -> Result<Vec<String>> {
        let networks = self
            .docker
            .list_networks(Some(ListNetworksOptions {
                filters: label_filters(labels),
            }))
            .await
            .map_err(|e| classify(e, "list networks"))?;

        Ok(networks
            .into_iter()
            .filter_map(|n| n.id.or(n.name))
            .collect())
    }

    async fn list_volumes(&self, labels: &[(String, String)]) -> Result<Vec<String>> {
        let response = self
            .docker
            .list_volumes(Some(ListVolumesOptions {
                filters: label_filters(labels),
            }))
            .await
            .map_err(|e| classify(e, "list volumes"))?;

        Ok(response
            .volumes
            .unwrap_or_default()
            .into_iter()
            .map(|v| v.name)
            .collect())
    }

    fn host(&self) -> String {
        self.host.clone()
    }
}

fn parse_port_key(key: &str) -> Option<u16> {
    let (port, proto) = key.split_once('/')?;
    if proto != "tcp" {
        return None;
    }
    port.parse().ok()
}
