//! Port/endpoint resolution.
//!
//! After a container is confirmed running, each container-internal port the
//! caller declared exposed has a dynamically assigned host-side binding.
//! [`resolve_bindings`] reads those back into an immutable [`PortMap`].
//! Asking for a port that was never declared is a programming error and
//! fails fast rather than silently returning an empty mapping.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::engine::{ContainerEngine, EngineError};

/// Result type for port resolution.
pub type Result<T> = std::result::Result<T, ResolveError>;

/// Errors raised while resolving host-side port bindings.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The container is not running, so bindings are not observable.
    #[error("container {id} is not running")]
    NotRunning {
        /// Container identifier.
        id: String,
    },

    /// The requested internal port was never declared exposed at creation
    /// time. This is a caller bug, never a runtime condition.
    #[error("port {port} was not declared exposed on container {id}")]
    UndeclaredPort {
        /// Container identifier.
        id: String,
        /// The undeclared internal port.
        port: u16,
    },

    /// The port is declared but the engine has not assigned a host port.
    #[error("port {port} on container {id} has no host binding")]
    Unbound {
        /// Container identifier.
        id: String,
        /// The unbound internal port.
        port: u16,
    },

    /// The engine call itself failed.
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// An externally reachable host/port pair for one container-internal port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPort {
    /// Host address the port is reachable on.
    pub host: String,
    /// Host-side port number.
    pub port: u16,
}

impl std::fmt::Display for ResolvedPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Immutable mapping from container-internal port to resolved binding.
pub type PortMap = BTreeMap<u16, ResolvedPort>;

/// Resolve host bindings for the given internal ports.
///
/// An empty `internal_ports` slice resolves every declared port. Fails if
/// the container is not running, if any requested port was never declared,
/// or if a declared port has no binding yet.
pub async fn resolve_bindings(
    engine: &dyn ContainerEngine,
    container_id: &str,
    internal_ports: &[u16],
) -> Result<PortMap> {
    let status = engine.container_status(container_id).await?;
    if !status.running {
        return Err(ResolveError::NotRunning {
            id: container_id.to_string(),
        });
    }

    let declared = engine.container_ports(container_id).await?;

    let requested: Vec<u16> = if internal_ports.is_empty() {
        let mut all: Vec<u16> = declared.keys().copied().collect();
        all.sort_unstable();
        all
    } else {
        internal_ports.to_vec()
    };

    let mut resolved = PortMap::new();
    for port in requested {
        match declared.get(&port) {
            None => {
                return Err(ResolveError::UndeclaredPort {
                    id: container_id.to_string(),
                    port,
                });
            }
            Some(None) => {
                return Err(ResolveError::Unbound {
                    id: container_id.to_string(),
                    port,
                });
            }
            Some(Some((host, host_port))) => {
                resolved.insert(port, ResolvedPort {
                    host: host.clone(),
                    port: *host_port,
                });
            }
        }
    }

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ContainerSpec;
    use crate::testing::MockEngine;

    fn spec_with_ports(ports: &[u16]) -> ContainerSpec {
        ContainerSpec {
            image: "test:latest".to_string(),
            exposed_ports: ports.to_vec(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_resolves_declared_ports() {
        let engine = MockEngine::new();
        let id = engine
            .create_container(None, spec_with_ports(&[5432]))
            .await
            .unwrap();
        engine.start_container(&id).await.unwrap();

        let map = resolve_bindings(&engine, &id, &[5432]).await.unwrap();
        let binding = map.get(&5432).unwrap();
        assert_eq!(binding.host, "127.0.0.1");
        assert!(binding.port >= 49000);
    }

    #[tokio::test]
    async fn test_undeclared_port_fails_fast() {
        let engine = MockEngine::new();
        let id = engine
            .create_container(None, spec_with_ports(&[5432]))
            .await
            .unwrap();
        engine.start_container(&id).await.unwrap();

        let err = resolve_bindings(&engine, &id, &[9999]).await.unwrap_err();
        match err {
            ResolveError::UndeclaredPort { port, .. } => assert_eq!(port, 9999),
            other => panic!("expected UndeclaredPort, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_not_running_is_an_error() {
        let engine = MockEngine::new();
        let id = engine
            .create_container(None, spec_with_ports(&[80]))
            .await
            .unwrap();

        let err = resolve_bindings(&engine, &id, &[80]).await.unwrap_err();
        assert!(matches!(err, ResolveError::NotRunning { .. }));
    }

    #[tokio::test]
    async fn test_empty_request_resolves_all_declared() {
        let engine = MockEngine::new();
        let id = engine
            .create_container(None, spec_with_ports(&[80, 443]))
            .await
            .unwrap();
        engine.start_container(&id).await.unwrap();

        let map = resolve_bindings(&engine, &id, &[]).await.unwrap();
        assert_eq!(map.len(), 2);
        assert!(map.contains_key(&80));
        assert!(map.contains_key(&443));
    }
}
