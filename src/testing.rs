//! Test harness: an in-memory [`ContainerEngine`].
//!
//! [`MockEngine`] models just enough engine behavior for the crate's own
//! tests: container/network/volume state with labels, settable health and
//! log output, scripted exec results, removal recording, and an
//! "unreachable" toggle for infrastructure-failure paths.
//!
//! Use this instead of ad-hoc stub implementations.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use crate::engine::{
    ContainerEngine, ContainerSpec, ContainerStatus, EngineError, ExecOutput, HealthState, Result,
};

/// First host port handed out by the mock binding allocator.
const BASE_HOST_PORT: u16 = 49000;

#[derive(Debug)]
struct MockContainer {
    name: Option<String>,
    spec: ContainerSpec,
    running: bool,
    exit_code: Option<i64>,
    health: HealthState,
    logs: String,
    bindings: HashMap<u16, Option<(String, u16)>>,
    exec_results: VecDeque<ExecOutput>,
    fail_next_removal: bool,
}

#[derive(Debug, Default)]
struct MockState {
    containers: HashMap<String, MockContainer>,
    networks: HashMap<String, HashMap<String, String>>,
    volumes: HashMap<String, HashMap<String, String>>,
    removed_containers: Vec<String>,
    removed_networks: Vec<String>,
    removed_volumes: Vec<String>,
    next_id: u64,
    next_host_port: u16,
}

/// Configurable in-memory container engine for tests.
#[derive(Debug, Default)]
pub struct MockEngine {
    state: Mutex<MockState>,
    unreachable: AtomicBool,
}

impl MockEngine {
    /// Empty engine with nothing provisioned.
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle simulated engine unreachability; while set, every call
    /// fails with [`EngineError::Unreachable`].
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Append text to a container's log output.
    pub fn push_log(&self, id: &str, text: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(container) = lookup_mut(&mut state, id) {
            container.logs.push_str(text);
        }
    }

    /// Set a container's engine-reported health.
    pub fn set_health(&self, id: &str, health: HealthState) {
        let mut state = self.state.lock().unwrap();
        if let Some(container) = lookup_mut(&mut state, id) {
            container.health = health;
        }
    }

    /// Mark a container as exited with the given code.
    pub fn set_exit(&self, id: &str, code: i64) {
        let mut state = self.state.lock().unwrap();
        if let Some(container) = lookup_mut(&mut state, id) {
            container.running = false;
            container.exit_code = Some(code);
        }
    }

    /// Queue a scripted exec result. The queue is consumed front-first;
    /// once drained, exec reports exit code 0 with empty output.
    pub fn push_exec_result(&self, id: &str, output: ExecOutput) {
        let mut state = self.state.lock().unwrap();
        if let Some(container) = lookup_mut(&mut state, id) {
            container.exec_results.push_back(output);
        }
    }

    /// Make the next removal of this container fail.
    pub fn fail_removal_once(&self, id: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(container) = lookup_mut(&mut state, id) {
            container.fail_next_removal = true;
        }
    }

    /// Override the host binding of a declared port, e.g. to point a wait
    /// probe at a real listener opened by the test.
    pub fn bind_port(&self, id: &str, internal: u16, host: &str, host_port: u16) {
        let mut state = self.state.lock().unwrap();
        if let Some(container) = lookup_mut(&mut state, id) {
            container
                .bindings
                .insert(internal, Some((host.to_string(), host_port)));
        }
    }

    /// Register a pre-existing labeled volume.
    pub fn add_volume(&self, name: &str, labels: HashMap<String, String>) {
        let mut state = self.state.lock().unwrap();
        state.volumes.insert(name.to_string(), labels);
    }

    /// Labels of a live container, for assertions.
    pub fn container_labels(&self, id: &str) -> Option<HashMap<String, String>> {
        let mut state = self.state.lock().unwrap();
        lookup_mut(&mut state, id).map(|c| c.spec.labels.clone())
    }

    /// Ids of containers removed so far, in removal order.
    pub fn removed_containers(&self) -> Vec<String> {
        self.state.lock().unwrap().removed_containers.clone()
    }

    /// Ids of networks removed so far.
    pub fn removed_networks(&self) -> Vec<String> {
        self.state.lock().unwrap().removed_networks.clone()
    }

    /// Names of volumes removed so far.
    pub fn removed_volumes(&self) -> Vec<String> {
        self.state.lock().unwrap().removed_volumes.clone()
    }

    /// Ids of containers still present.
    pub fn live_containers(&self) -> Vec<String> {
        self.state.lock().unwrap().containers.keys().cloned().collect()
    }

    fn check_reachable(&self) -> Result<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            Err(EngineError::Unreachable {
                reason: "mock engine set unreachable".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

/// Docker-style lookup: containers are addressable by id or name.
fn lookup_mut<'a>(state: &'a mut MockState, key: &str) -> Option<&'a mut MockContainer> {
    if state.containers.contains_key(key) {
        return state.containers.get_mut(key);
    }
    let id = state
        .containers
        .iter()
        .find(|(_, c)| c.name.as_deref() == Some(key))
        .map(|(id, _)| id.clone())?;
    state.containers.get_mut(&id)
}

fn resolve_key(state: &MockState, key: &str) -> Option<String> {
    if state.containers.contains_key(key) {
        return Some(key.to_string());
    }
    state
        .containers
        .iter()
        .find(|(_, c)| c.name.as_deref() == Some(key))
        .map(|(id, _)| id.clone())
}

fn labels_match(labels: &HashMap<String, String>, wanted: &[(String, String)]) -> bool {
    wanted
        .iter()
        .all(|(k, v)| labels.get(k).is_some_and(|actual| actual == v))
}

#[async_trait]
impl ContainerEngine for MockEngine {
    async fn ping(&self) -> Result<()> {
        self.check_reachable()
    }

    async fn pull_image(&self, _image: &str) -> Result<()> {
        self.check_reachable()
    }

    async fn create_container(&self, name: Option<&str>, spec: ContainerSpec) -> Result<String> {
        self.check_reachable()?;
        let mut state = self.state.lock().unwrap();

        if let Some(name) = name
            && state
                .containers
                .values()
                .any(|c| c.name.as_deref() == Some(name))
        {
            return Err(EngineError::Conflict {
                name: name.to_string(),
            });
        }

        state.next_id += 1;
        let id = format!("mock-{:04}", state.next_id);
        state.containers.insert(id.clone(), MockContainer {
            name: name.map(str::to_string),
            spec,
            running: false,
            exit_code: None,
            health: HealthState::Unconfigured,
            logs: String::new(),
            bindings: HashMap::new(),
            exec_results: VecDeque::new(),
            fail_next_removal: false,
        });

        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        self.check_reachable()?;
        let mut state = self.state.lock().unwrap();

        let mut next_port = if state.next_host_port == 0 {
            BASE_HOST_PORT
        } else {
            state.next_host_port
        };

        let Some(container) = lookup_mut(&mut state, id) else {
            return Err(EngineError::NotFound { id: id.to_string() });
        };

        container.running = true;
        container.exit_code = None;
        for port in container.spec.exposed_ports.clone() {
            container.bindings.entry(port).or_insert_with(|| {
                let assigned = ("127.0.0.1".to_string(), next_port);
                next_port += 1;
                Some(assigned)
            });
        }

        state.next_host_port = next_port;
        Ok(())
    }

    async fn stop_container(&self, id: &str) -> Result<()> {
        self.check_reachable()?;
        let mut state = self.state.lock().unwrap();
        let Some(container) = lookup_mut(&mut state, id) else {
            return Err(EngineError::NotFound { id: id.to_string() });
        };
        if container.running {
            container.running = false;
            container.exit_code = Some(0);
        }
        Ok(())
    }

    async fn remove_container(&self, id: &str, _force: bool) -> Result<()> {
        self.check_reachable()?;
        let mut state = self.state.lock().unwrap();

        let Some(key) = resolve_key(&state, id) else {
            return Err(EngineError::NotFound { id: id.to_string() });
        };

        let container = state.containers.get_mut(&key).unwrap();
        if container.fail_next_removal {
            container.fail_next_removal = false;
            return Err(EngineError::Api {
                reason: "simulated removal failure".to_string(),
            });
        }

        state.containers.remove(&key);
        state.removed_containers.push(key);
        Ok(())
    }

    async fn container_status(&self, id: &str) -> Result<ContainerStatus> {
        self.check_reachable()?;
        let mut state = self.state.lock().unwrap();
        let Some(container) = lookup_mut(&mut state, id) else {
            return Err(EngineError::NotFound { id: id.to_string() });
        };
        Ok(ContainerStatus {
            running: container.running,
            exit_code: container.exit_code,
            health: container.health,
        })
    }

    async fn container_ports(&self, id: &str) -> Result<HashMap<u16, Option<(String, u16)>>> {
        self.check_reachable()?;
        let mut state = self.state.lock().unwrap();
        let Some(container) = lookup_mut(&mut state, id) else {
            return Err(EngineError::NotFound { id: id.to_string() });
        };

        let mut ports: HashMap<u16, Option<(String, u16)>> = container
            .spec
            .exposed_ports
            .iter()
            .map(|p| (*p, None))
            .collect();
        for (port, binding) in &container.bindings {
            ports.insert(*port, binding.clone());
        }
        Ok(ports)
    }

    async fn container_logs(&self, id: &str) -> Result<String> {
        self.check_reachable()?;
        let mut state = self.state.lock().unwrap();
        let Some(container) = lookup_mut(&mut state, id) else {
            return Err(EngineError::NotFound { id: id.to_string() });
        };
        Ok(container.logs.clone())
    }

    async fn exec(&self, id: &str, _cmd: &[String]) -> Result<ExecOutput> {
        self.check_reachable()?;
        let mut state = self.state.lock().unwrap();
        let Some(container) = lookup_mut(&mut state, id) else {
            return Err(EngineError::NotFound { id: id.to_string() });
        };
        if !container.running {
            return Err(EngineError::Api {
                reason: format!("container {id} is not running"),
            });
        }
        Ok(container.exec_results.pop_front().unwrap_or(ExecOutput {
            exit_code: Some(0),
            stdout: String::new(),
            stderr: String::new(),
        }))
    }

    async fn create_network(&self, name: &str, labels: &HashMap<String, String>) -> Result<String> {
        self.check_reachable()?;
        let mut state = self.state.lock().unwrap();
        if state.networks.contains_key(name) {
            return Err(EngineError::Conflict {
                name: name.to_string(),
            });
        }
        state.networks.insert(name.to_string(), labels.clone());
        Ok(name.to_string())
    }

    async fn remove_network(&self, id: &str) -> Result<()> {
        self.check_reachable()?;
        let mut state = self.state.lock().unwrap();
        if state.networks.remove(id).is_none() {
            return Err(EngineError::NotFound { id: id.to_string() });
        }
        state.removed_networks.push(id.to_string());
        Ok(())
    }

    async fn remove_volume(&self, name: &str) -> Result<()> {
        self.check_reachable()?;
        let mut state = self.state.lock().unwrap();
        if state.volumes.remove(name).is_none() {
            return Err(EngineError::NotFound {
                id: name.to_string(),
            });
        }
        state.removed_volumes.push(name.to_string());
        Ok(())
    }

    async fn list_containers(&self, labels: &[(String, String)]) -> Result<Vec<String>> {
        self.check_reachable()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .containers
            .iter()
            .filter(|(_, c)| labels_match(&c.spec.labels, labels))
            .map(|(id, _)| id.clone())
            .collect())
    }

    async fn list_networks(&self, labels: &[(String, String)]) -> Result<Vec<String>> {
        self.check_reachable()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .networks
            .iter()
            .filter(|(_, l)| labels_match(l, labels))
            .map(|(id, _)| id.clone())
            .collect())
    }

    async fn list_volumes(&self, labels: &[(String, String)]) -> Result<Vec<String>> {
        self.check_reachable()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .volumes
            .iter()
            .filter(|(_, l)| labels_match(l, labels))
            .map(|(name, _)| name.clone())
            .collect())
    }
}
