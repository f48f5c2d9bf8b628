//! The cleanup daemon.
//!
//! Holds one connection per client process, acknowledges each registered
//! filter, and treats connection closure — graceful or abrupt — as the
//! order to destroy everything the filters match. Removal is best-effort
//! but attempted for every match; per-resource failures never abort the
//! sweep. After a sweep the filters for that connection are discarded.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use crate::engine::ContainerEngine;
use crate::reaper::filter::ReapFilter;

/// The cleanup daemon run inside the reaper companion container.
pub struct ReaperDaemon {
    engine: Arc<dyn ContainerEngine>,
    reconnection_timeout: Duration,
}

impl ReaperDaemon {
    /// Build a daemon over the given engine.
    pub fn new(engine: Arc<dyn ContainerEngine>, reconnection_timeout: Duration) -> Self {
        Self {
            engine,
            reconnection_timeout,
        }
    }

    /// Serve connections on `listener` until idle.
    ///
    /// The daemon exits once no client has been connected for
    /// `reconnection_timeout` — including at startup, so an orphaned
    /// reaper container whose test process never connects shuts itself
    /// down.
    pub async fn run(self, listener: TcpListener) -> std::io::Result<()> {
        let active = Arc::new(AtomicUsize::new(0));

        loop {
            match tokio::time::timeout(self.reconnection_timeout, listener.accept()).await {
                Err(_) => {
                    if active.load(Ordering::SeqCst) == 0 {
                        tracing::info!(
                            idle = ?self.reconnection_timeout,
                            "No connections, shutting down"
                        );
                        return Ok(());
                    }
                }
                Ok(Err(e)) => return Err(e),
                Ok(Ok((stream, peer))) => {
                    tracing::info!(peer = %peer, "Client connected");
                    active.fetch_add(1, Ordering::SeqCst);

                    let engine = Arc::clone(&self.engine);
                    let active = Arc::clone(&active);
                    tokio::spawn(async move {
                        let filters = collect_filters(stream).await;
                        tracing::info!(
                            peer = %peer,
                            filters = filters.len(),
                            "Client disconnected, sweeping"
                        );
                        for filter in &filters {
                            sweep(engine.as_ref(), filter).await;
                        }
                        active.fetch_sub(1, Ordering::SeqCst);
                    });
                }
            }
        }
    }
}

/// Read filter lines until the client goes away, acknowledging each one.
///
/// The client contract is a single filter line, but the read loop stays
/// open for the connection lifetime regardless: the disconnect is the
/// signal, not the message count.
async fn collect_filters(stream: TcpStream) -> Vec<ReapFilter> {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();
    let mut filters: Vec<ReapFilter> = Vec::new();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match ReapFilter::parse(&line) {
                Ok(filter) => {
                    if write_half.write_all(b"ACK\n").await.is_err() {
                        break;
                    }
                    if !filters.contains(&filter) {
                        filters.push(filter);
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Rejecting malformed filter line");
                    if write_half.write_all(b"ERR\n").await.is_err() {
                        break;
                    }
                }
            },
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(error = %e, "Connection read failed");
                break;
            }
        }
    }

    filters
}

/// Destroy every resource matching `filter`: containers first (stopped
/// and force-removed), then networks, then volumes.
pub(crate) async fn sweep(engine: &dyn ContainerEngine, filter: &ReapFilter) {
    let labels = filter.labels();
    let mut containers = 0usize;
    let mut networks = 0usize;
    let mut volumes = 0usize;

    match engine.list_containers(labels).await {
        Ok(ids) => {
            for id in ids {
                if let Err(e) = engine.stop_container(&id).await {
                    tracing::debug!(container_id = %id, error = %e, "Stop failed before removal");
                }
                match engine.remove_container(&id, true).await {
                    Ok(()) => containers += 1,
                    Err(e) => {
                        tracing::warn!(container_id = %id, error = %e, "Failed to remove container");
                    }
                }
            }
        }
        Err(e) => tracing::warn!(error = %e, "Container query failed during sweep"),
    }

    match engine.list_networks(labels).await {
        Ok(ids) => {
            for id in ids {
                match engine.remove_network(&id).await {
                    Ok(()) => networks += 1,
                    Err(e) => tracing::warn!(network = %id, error = %e, "Failed to remove network"),
                }
            }
        }
        Err(e) => tracing::warn!(error = %e, "Network query failed during sweep"),
    }

    match engine.list_volumes(labels).await {
        Ok(names) => {
            for name in names {
                match engine.remove_volume(&name).await {
                    Ok(()) => volumes += 1,
                    Err(e) => tracing::warn!(volume = %name, error = %e, "Failed to remove volume"),
                }
            }
        }
        Err(e) => tracing::warn!(error = %e, "Volume query failed during sweep"),
    }

    tracing::info!(filter = %filter, containers, networks, volumes, "Sweep complete");
}
