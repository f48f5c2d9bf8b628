//! The shared readiness poll loop and per-strategy probes.

use std::time::Duration;

use futures::future::BoxFuture;
use tokio::net::TcpStream;

use crate::engine::{ContainerEngine, EngineError};
use crate::wait::error::{Result, WaitError};
use crate::wait::strategy::{ExitPolicy, Readiness, StatusPolicy, WaitStrategy, WaitTarget};

/// Interval between readiness probes.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Time allowed for a single TCP connection probe.
const TCP_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Time allowed for a single HTTP probe round trip.
const HTTP_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Poll `target` with `strategy` until ready, permanently failed, or the
/// startup timeout elapses.
///
/// Returns immediately (without sleeping) when the first probe reports
/// ready. A target whose container has exited can never become ready and
/// fails without waiting for the deadline. Engine unreachability is
/// surfaced as [`WaitError::Infrastructure`], never folded into a timeout.
pub async fn wait_until_ready(
    engine: &dyn ContainerEngine,
    target: &WaitTarget,
    strategy: &WaitStrategy,
    startup_timeout: Duration,
) -> Result<()> {
    wait_with_interval(engine, target, strategy, startup_timeout, DEFAULT_POLL_INTERVAL).await
}

/// [`wait_until_ready`] with an explicit poll interval.
pub async fn wait_with_interval(
    engine: &dyn ContainerEngine,
    target: &WaitTarget,
    strategy: &WaitStrategy,
    startup_timeout: Duration,
    poll_interval: Duration,
) -> Result<()> {
    let started = tokio::time::Instant::now();
    let deadline = started + startup_timeout;

    let http_client = reqwest::Client::builder()
        .timeout(HTTP_PROBE_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new());

    loop {
        let readiness = match probe(engine, target, strategy, &http_client).await {
            Ok(readiness) => readiness,
            Err(engine_err) => {
                // A probe error against a dead container is a verdict on
                // the container, not the infrastructure.
                if let Ok(status) = engine.container_status(&target.container_id).await
                    && status.exited()
                {
                    Readiness::Failed(exit_reason(status.exit_code))
                } else {
                    return Err(WaitError::Infrastructure {
                        container_id: target.container_id.clone(),
                        reason: engine_err.to_string(),
                    });
                }
            }
        };

        match readiness {
            Readiness::Ready => {
                tracing::debug!(
                    container_id = %target.container_id,
                    strategy = strategy.kind(),
                    elapsed = ?started.elapsed(),
                    "Target ready"
                );
                return Ok(());
            }
            Readiness::Failed(reason) => {
                return Err(WaitError::PermanentFailure {
                    strategy: strategy.kind(),
                    container_id: target.container_id.clone(),
                    reason,
                });
            }
            Readiness::Pending => {}
        }

        // Still pending: a target that has exited can never become ready.
        let status = engine
            .container_status(&target.container_id)
            .await
            .map_err(|e| WaitError::Infrastructure {
                container_id: target.container_id.clone(),
                reason: e.to_string(),
            })?;
        if status.exited() {
            return Err(WaitError::PermanentFailure {
                strategy: strategy.kind(),
                container_id: target.container_id.clone(),
                reason: exit_reason(status.exit_code),
            });
        }

        if tokio::time::Instant::now() >= deadline {
            return Err(WaitError::Timeout {
                strategy: strategy.kind(),
                container_id: target.container_id.clone(),
                elapsed: started.elapsed(),
            });
        }

        tokio::time::sleep(poll_interval).await;
    }
}

fn exit_reason(exit_code: Option<i64>) -> String {
    match exit_code {
        Some(code) => format!("container exited with code {code}"),
        None => "container exited".to_string(),
    }
}

/// Evaluate one probe of `strategy` against `target`.
///
/// Engine failures are returned raw so the poll loop can distinguish a
/// dead container from unreachable infrastructure.
fn probe<'a>(
    engine: &'a dyn ContainerEngine,
    target: &'a WaitTarget,
    strategy: &'a WaitStrategy,
    http_client: &'a reqwest::Client,
) -> BoxFuture<'a, std::result::Result<Readiness, EngineError>> {
    Box::pin(async move {
        match strategy {
            WaitStrategy::LogPattern(log) => {
                let output = engine.container_logs(&target.container_id).await?;
                let matches = log.pattern.find_iter(&output).count();
                if matches >= log.times {
                    Ok(Readiness::Ready)
                } else {
                    tracing::trace!(
                        container_id = %target.container_id,
                        matches,
                        required = log.times,
                        "Log pattern not yet satisfied"
                    );
                    Ok(Readiness::Pending)
                }
            }

            WaitStrategy::Ports(ports) => {
                let bindings: Vec<_> = if ports.ports.is_empty() {
                    target.ports.values().cloned().collect()
                } else {
                    let mut resolved = Vec::new();
                    for port in &ports.ports {
                        match target.ports.get(port) {
                            Some(binding) => resolved.push(binding.clone()),
                            None => {
                                return Ok(Readiness::Failed(format!(
                                    "port {port} has no resolved binding"
                                )));
                            }
                        }
                    }
                    resolved
                };

                for binding in bindings {
                    let connect =
                        TcpStream::connect((binding.host.as_str(), binding.port));
                    match tokio::time::timeout(TCP_PROBE_TIMEOUT, connect).await {
                        Ok(Ok(_)) => {}
                        // Refused or timed out: the listener may not be up yet.
                        Ok(Err(_)) | Err(_) => return Ok(Readiness::Pending),
                    }
                }
                Ok(Readiness::Ready)
            }

            WaitStrategy::Http(http) => {
                let Some(binding) = target.ports.get(&http.port) else {
                    return Ok(Readiness::Failed(format!(
                        "port {} has no resolved binding",
                        http.port
                    )));
                };
                let url = format!(
                    "http://{}:{}/{}",
                    binding.host,
                    binding.port,
                    http.path.trim_start_matches('/')
                );

                match http_client.get(&url).send().await {
                    Ok(response) => {
                        let status = response.status().as_u16();
                        if http.accept_status.contains(&status) {
                            Ok(Readiness::Ready)
                        } else {
                            match http.on_unexpected_status {
                                StatusPolicy::Retry => {
                                    tracing::trace!(url = %url, status, "Unexpected HTTP status, retrying");
                                    Ok(Readiness::Pending)
                                }
                                StatusPolicy::Fail => Ok(Readiness::Failed(format!(
                                    "unexpected HTTP status {status} from {url}"
                                ))),
                            }
                        }
                    }
                    Err(e) => {
                        // Connection errors are expected while the service
                        // is still starting.
                        tracing::trace!(url = %url, error = %e, "HTTP probe failed, retrying");
                        Ok(Readiness::Pending)
                    }
                }
            }

            WaitStrategy::Health => {
                let status = engine.container_status(&target.container_id).await?;
                match status.health {
                    crate::engine::HealthState::Healthy => Ok(Readiness::Ready),
                    crate::engine::HealthState::Unhealthy => {
                        Ok(Readiness::Failed("health check reported unhealthy".to_string()))
                    }
                    crate::engine::HealthState::Starting
                    | crate::engine::HealthState::Unconfigured => Ok(Readiness::Pending),
                }
            }

            WaitStrategy::Exec(exec) => {
                exec_probe(engine, target, &exec.cmd, exec.expected_exit, exec.on_mismatch).await
            }

            WaitStrategy::Shell(shell) => {
                let cmd = vec![
                    "/bin/sh".to_string(),
                    "-c".to_string(),
                    shell.command.clone(),
                ];
                exec_probe(engine, target, &cmd, shell.expected_exit, shell.on_mismatch).await
            }

            WaitStrategy::Composite(members) => {
                let mut all_ready = true;
                for member in members {
                    match probe(engine, target, member, http_client).await? {
                        Readiness::Ready => {}
                        Readiness::Pending => all_ready = false,
                        Readiness::Failed(reason) => return Ok(Readiness::Failed(reason)),
                    }
                }
                if all_ready {
                    Ok(Readiness::Ready)
                } else {
                    Ok(Readiness::Pending)
                }
            }
        }
    })
}

async fn exec_probe(
    engine: &dyn ContainerEngine,
    target: &WaitTarget,
    cmd: &[String],
    expected_exit: i64,
    on_mismatch: ExitPolicy,
) -> std::result::Result<Readiness, EngineError> {
    let output = engine.exec(&target.container_id, cmd).await?;
    match output.exit_code {
        // Exec process still running; check again next poll.
        None => Ok(Readiness::Pending),
        Some(code) if code == expected_exit => Ok(Readiness::Ready),
        Some(code) => match on_mismatch {
            ExitPolicy::Retry => {
                tracing::trace!(
                    container_id = %target.container_id,
                    code,
                    expected_exit,
                    "Exec probe exit mismatch, retrying"
                );
                Ok(Readiness::Pending)
            }
            ExitPolicy::Fail => Ok(Readiness::Failed(format!(
                "command exited with {code}, expected {expected_exit}"
            ))),
        },
    }
}
