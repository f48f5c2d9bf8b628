//! The session context object.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config::ReaperConfig;
use crate::engine::ContainerEngine;
use crate::ports::resolve_bindings;
use crate::reaper::ReaperRegistration;
use crate::session::container::{ContainerHandle, ContainerRequest};
use crate::session::error::Result;
use crate::session::labels::{SessionId, build_labels, session_filter};
use crate::wait::{WaitTarget, wait_until_ready};

/// One logical test run's set of provisioned resources.
///
/// Owns the session identifier and the single reaper connection; all
/// process-wide state lives here rather than in module-level singletons,
/// so a test of the library itself can run several independent sessions
/// in one process.
pub struct Session {
    id: SessionId,
    engine: Arc<dyn ContainerEngine>,
    reaper_config: ReaperConfig,
    /// Guards the one-time registration race: the first caller registers,
    /// everyone else observes the already-open connection.
    registration: Mutex<Option<ReaperRegistration>>,
}

impl Session {
    /// Create a session over `engine` with the given reaper settings.
    pub fn new(engine: Arc<dyn ContainerEngine>, reaper_config: ReaperConfig) -> Self {
        let id = SessionId::random();
        tracing::debug!(session_id = %id, cleanup = reaper_config.enabled, "Session created");
        Self {
            id,
            engine,
            reaper_config,
            registration: Mutex::new(None),
        }
    }

    /// Session identifier.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// The engine this session provisions against.
    pub fn engine(&self) -> &Arc<dyn ContainerEngine> {
        &self.engine
    }

    /// Labels stamped on resources created in this session.
    pub fn labels(&self, extra: &HashMap<String, String>) -> HashMap<String, String> {
        build_labels(self.id, self.reaper_config.enabled, extra)
    }

    /// Ensure the session's cleanup is guaranteed before any resource
    /// exists. Idempotent; a no-op when cleanup is disabled.
    ///
    /// Failure is a hard error: tests must not silently run without the
    /// cleanup guarantee unless the caller explicitly opted out.
    pub async fn register_cleanup(&self) -> Result<()> {
        if !self.reaper_config.enabled {
            tracing::warn!(
                session_id = %self.id,
                "Cleanup disabled; the caller owns resource teardown"
            );
            return Ok(());
        }

        let mut guard = self.registration.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        let filter = session_filter(self.id);
        let registration =
            ReaperRegistration::ensure(self.engine.as_ref(), &self.reaper_config, &filter).await?;
        *guard = Some(registration);
        Ok(())
    }

    /// Start a container and wait until it is ready.
    ///
    /// Cleanup is registered before creation, so even a crash between
    /// create and return leaves nothing behind.
    pub async fn start_container(&self, request: ContainerRequest) -> Result<ContainerHandle> {
        self.register_cleanup().await?;

        if request.auto_pull {
            self.engine.pull_image(&request.image).await?;
        }

        let labels = self.labels(&request.labels);
        let spec = request.to_spec(labels);

        let id = self
            .engine
            .create_container(request.name.as_deref(), spec)
            .await?;
        self.engine.start_container(&id).await?;

        tracing::info!(
            session_id = %self.id,
            container_id = %id,
            image = %request.image,
            "Container started"
        );

        let ports = resolve_bindings(self.engine.as_ref(), &id, &request.exposed_ports).await?;
        let host = self.engine.host();
        let target = WaitTarget::new(id.clone(), host.clone(), ports.clone());

        wait_until_ready(
            self.engine.as_ref(),
            &target,
            &request.wait,
            request.startup_timeout,
        )
        .await?;

        Ok(ContainerHandle::new(
            Arc::clone(&self.engine),
            id,
            host,
            ports,
        ))
    }

    /// Create a network labeled for this session; the reaper removes it
    /// with everything else.
    pub async fn create_network(&self, name: &str) -> Result<String> {
        self.register_cleanup().await?;

        let labels = self.labels(&HashMap::new());
        let id = self.engine.create_network(name, &labels).await?;

        tracing::info!(session_id = %self.id, network = %name, "Network created");
        Ok(id)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("cleanup_enabled", &self.reaper_config.enabled)
            .finish_non_exhaustive()
    }
}
