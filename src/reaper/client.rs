//! Client side of the cleanup guarantee.
//!
//! The first resource registration in a session ensures the reaper
//! companion container exists (create, or attach when another process won
//! the race), connects to its daemon, and registers the session filter.
//! The returned [`ReaperRegistration`] owns that connection for the rest
//! of the process lifetime: dropping it — including by process death — is
//! what triggers the sweep. There is deliberately no "delete now" call.

use std::collections::HashMap;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use crate::config::ReaperConfig;
use crate::engine::{ContainerEngine, ContainerSpec, EngineError};
use crate::reaper::error::{ReaperError, Result};
use crate::reaper::filter::{ACK, ReapFilter};
use crate::session::labels::LABEL_MARKER;

/// Well-known name of the reaper companion container. Processes racing to
/// start the reaper converge on this name: whoever loses the create race
/// attaches to the winner's instance.
pub const REAPER_CONTAINER_NAME: &str = "drydock-reaper";

/// Interval while waiting for the daemon's port binding to appear.
const BINDING_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Time allowed for a single TCP connection attempt.
const CONNECT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(2);

/// Creation-time description of the reaper container.
///
/// Carries the library marker but never a session label, so no session
/// filter can ever match the reaper itself.
pub(crate) fn reaper_spec(config: &ReaperConfig) -> ContainerSpec {
    let mut labels = HashMap::new();
    labels.insert(LABEL_MARKER.to_string(), "true".to_string());

    ContainerSpec {
        image: config.image.clone(),
        env: vec![("DRYDOCK_REAPER_PORT".to_string(), config.port.to_string())],
        exposed_ports: vec![config.port],
        labels,
        binds: vec!["/var/run/docker.sock:/var/run/docker.sock".to_string()],
        ..Default::default()
    }
}

/// An active cleanup registration: a held connection to the reaper daemon.
///
/// The daemon sweeps the registered filter when this connection closes for
/// any reason. Hold the registration for as long as the session's
/// resources should survive.
pub struct ReaperRegistration {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    container_id: String,
}

impl ReaperRegistration {
    /// Ensure the reaper container, connect, and register `filter`.
    ///
    /// Returns only after the daemon has acknowledged the filter, so by
    /// the time any resource is created its cleanup is already guaranteed.
    pub async fn ensure(
        engine: &dyn ContainerEngine,
        config: &ReaperConfig,
        filter: &ReapFilter,
    ) -> Result<Self> {
        let (host, port) = ensure_reaper_container(engine, config).await?;
        let stream = connect_with_backoff(config, &host, port).await?;

        let (read_half, write_half) = stream.into_split();
        let mut registration = Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            container_id: REAPER_CONTAINER_NAME.to_string(),
        };
        registration.register(filter).await?;

        tracing::info!(
            filter = %filter,
            reaper = REAPER_CONTAINER_NAME,
            "Cleanup registered with reaper"
        );

        Ok(registration)
    }

    /// Connect to an already-running daemon at `host:port` and register
    /// `filter`, without managing the reaper container.
    pub async fn connect(
        config: &ReaperConfig,
        host: &str,
        port: u16,
        filter: &ReapFilter,
    ) -> Result<Self> {
        let stream = connect_with_backoff(config, host, port).await?;
        let (read_half, write_half) = stream.into_split();
        let mut registration = Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            container_id: String::new(),
        };
        registration.register(filter).await?;
        Ok(registration)
    }

    async fn register(&mut self, filter: &ReapFilter) -> Result<()> {
        let line = format!("{}\n", filter.encode());
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;

        let mut reply = String::new();
        let read = self.reader.read_line(&mut reply).await?;
        if read == 0 {
            return Err(ReaperError::Rejected {
                reply: "connection closed before acknowledgement".to_string(),
            });
        }
        let reply = reply.trim();
        if reply != ACK {
            return Err(ReaperError::Rejected {
                reply: reply.to_string(),
            });
        }
        Ok(())
    }

    /// Identifier of the reaper container this registration talks to.
    pub fn container_id(&self) -> &str {
        &self.container_id
    }
}

impl std::fmt::Debug for ReaperRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReaperRegistration")
            .field("container_id", &self.container_id)
            .finish_non_exhaustive()
    }
}

/// Create or attach to the reaper container and return the daemon's
/// resolved host endpoint.
async fn ensure_reaper_container(
    engine: &dyn ContainerEngine,
    config: &ReaperConfig,
) -> Result<(String, u16)> {
    engine.pull_image(&config.image).await?;

    match engine
        .create_container(Some(REAPER_CONTAINER_NAME), reaper_spec(config))
        .await
    {
        Ok(id) => {
            tracing::debug!(container_id = %id, "Created reaper container");
        }
        // Another process (or a previous run) won the create race;
        // converge on the existing instance.
        Err(EngineError::Conflict { .. }) => {
            tracing::debug!("Reaper container already exists, attaching");
        }
        Err(e) => return Err(e.into()),
    }

    // Starting an already-running container is accepted as long as the
    // container ends up running.
    if let Err(start_err) = engine.start_container(REAPER_CONTAINER_NAME).await {
        let running = engine
            .container_status(REAPER_CONTAINER_NAME)
            .await
            .map(|s| s.running)
            .unwrap_or(false);
        if !running {
            return Err(start_err.into());
        }
    }

    // The host port is assigned dynamically; wait for the binding.
    let deadline = tokio::time::Instant::now() + config.startup_timeout;
    loop {
        let ports = engine.container_ports(REAPER_CONTAINER_NAME).await?;
        if let Some(Some((host, port))) = ports.get(&config.port) {
            return Ok((host.clone(), *port));
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(ReaperError::Unavailable {
                attempts: 0,
                reason: format!(
                    "reaper port {} not bound within {:?}",
                    config.port, config.startup_timeout
                ),
            });
        }
        tokio::time::sleep(BINDING_POLL_INTERVAL).await;
    }
}

/// Connect with bounded exponential backoff and jitter.
async fn connect_with_backoff(
    config: &ReaperConfig,
    host: &str,
    port: u16,
) -> Result<TcpStream> {
    let attempts = config.connect_attempts.max(1);
    let mut backoff = config.connect_backoff;
    let mut last_failure = String::new();

    for attempt in 1..=attempts {
        match tokio::time::timeout(CONNECT_ATTEMPT_TIMEOUT, TcpStream::connect((host, port))).await
        {
            Ok(Ok(stream)) => return Ok(stream),
            Ok(Err(e)) => last_failure = e.to_string(),
            Err(_) => last_failure = "connection attempt timed out".to_string(),
        }

        tracing::debug!(
            attempt,
            attempts,
            host,
            port,
            failure = %last_failure,
            "Reaper connection attempt failed"
        );

        if attempt < attempts {
            let jitter = {
                use rand::Rng;
                let cap = (backoff.as_millis() as u64 / 4).max(1);
                Duration::from_millis(rand::thread_rng().gen_range(0..cap))
            };
            tokio::time::sleep(backoff + jitter).await;
            backoff *= 2;
        }
    }

    Err(ReaperError::Unavailable {
        attempts,
        reason: last_failure,
    })
}
