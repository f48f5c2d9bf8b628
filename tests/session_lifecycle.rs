//! Session start-flow tests: label stamping, port resolution, cleanup
//! registration ordering, and the explicit opt-out mode.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio::net::TcpListener;

use drydock::config::ReaperConfig;
use drydock::engine::ContainerEngine;
use drydock::reaper::ReaperDaemon;
use drydock::session::{
    ContainerRequest, LABEL_MARKER, LABEL_REAP, LABEL_SESSION, Session, SessionError,
};
use drydock::testing::MockEngine;
use drydock::wait::WaitStrategy;

fn unmanaged_config() -> ReaperConfig {
    ReaperConfig {
        enabled: false,
        ..Default::default()
    }
}

/// Session wired to a live daemon over the mock engine.
async fn managed_session(
    engine: Arc<MockEngine>,
) -> (Session, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let daemon_port = listener.local_addr().unwrap().port();
    let daemon = ReaperDaemon::new(
        Arc::clone(&engine) as Arc<dyn ContainerEngine>,
        Duration::from_secs(30),
    );
    let daemon_task = tokio::spawn(async move {
        let _ = daemon.run(listener).await;
    });

    // Pre-provision the reaper container so ensure() attaches to the
    // daemon the test actually controls.
    let config = ReaperConfig {
        connect_attempts: 2,
        connect_backoff: Duration::from_millis(10),
        ..Default::default()
    };
    let spec = drydock::engine::ContainerSpec {
        image: config.image.clone(),
        exposed_ports: vec![config.port],
        ..Default::default()
    };
    engine
        .create_container(Some(drydock::reaper::REAPER_CONTAINER_NAME), spec)
        .await
        .unwrap();
    engine
        .start_container(drydock::reaper::REAPER_CONTAINER_NAME)
        .await
        .unwrap();
    engine.bind_port(
        drydock::reaper::REAPER_CONTAINER_NAME,
        config.port,
        "127.0.0.1",
        daemon_port,
    );

    let session = Session::new(Arc::clone(&engine) as Arc<dyn ContainerEngine>, config);
    (session, daemon_task)
}

// ── Label stamping ─────────────────────────────────────────────────────────

#[tokio::test]
async fn started_containers_carry_session_labels() {
    let engine = Arc::new(MockEngine::new());
    let session = Session::new(
        Arc::clone(&engine) as Arc<dyn ContainerEngine>,
        unmanaged_config(),
    );

    let handle = session
        .start_container(
            ContainerRequest::new("redis:7-alpine")
                .label("suite", "cache")
                .wait(WaitStrategy::exec(["redis-cli", "ping"])),
        )
        .await
        .unwrap();

    let labels = engine.container_labels(handle.id()).unwrap();
    assert_eq!(labels.get(LABEL_MARKER).map(String::as_str), Some("true"));
    assert_eq!(labels.get(LABEL_SESSION), Some(&session.id().to_string()));
    assert_eq!(labels.get("suite").map(String::as_str), Some("cache"));
    // Cleanup disabled: resources are not flagged for reaping.
    assert!(!labels.contains_key(LABEL_REAP));
}

#[tokio::test]
async fn caller_labels_cannot_override_reserved_keys() {
    let engine = Arc::new(MockEngine::new());
    let session = Session::new(
        Arc::clone(&engine) as Arc<dyn ContainerEngine>,
        unmanaged_config(),
    );

    let handle = session
        .start_container(
            ContainerRequest::new("redis:7-alpine")
                .label(LABEL_SESSION, "spoofed")
                .wait(WaitStrategy::exec(["true"])),
        )
        .await
        .unwrap();

    let labels = engine.container_labels(handle.id()).unwrap();
    assert_eq!(labels.get(LABEL_SESSION), Some(&session.id().to_string()));
}

// ── Start flow ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn start_resolves_declared_ports_into_handle() {
    let engine = Arc::new(MockEngine::new());
    let session = Session::new(
        Arc::clone(&engine) as Arc<dyn ContainerEngine>,
        unmanaged_config(),
    );

    let handle = session
        .start_container(
            ContainerRequest::new("postgres:16-alpine")
                .expose(5432)
                .wait(WaitStrategy::exec(["pg_isready"])),
        )
        .await
        .unwrap();

    let binding = handle.port(5432).expect("declared port must resolve");
    assert_eq!(binding.host, "127.0.0.1");
    assert!(binding.port >= 49000);

    // Undeclared ports are absent, not silently mapped.
    assert!(handle.port(9999).is_none());
}

#[tokio::test]
async fn start_fails_when_wait_cannot_succeed() {
    let engine = Arc::new(MockEngine::new());
    let session = Session::new(
        Arc::clone(&engine) as Arc<dyn ContainerEngine>,
        unmanaged_config(),
    );

    let err = session
        .start_container(
            ContainerRequest::new("broken:latest")
                .wait(WaitStrategy::health())
                .startup_timeout(Duration::from_millis(100)),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, SessionError::Wait(_)));
}

#[tokio::test]
async fn handle_exec_and_logs_reach_the_container() {
    let engine = Arc::new(MockEngine::new());
    let session = Session::new(
        Arc::clone(&engine) as Arc<dyn ContainerEngine>,
        unmanaged_config(),
    );

    let handle = session
        .start_container(
            ContainerRequest::new("app:latest").wait(WaitStrategy::exec(["true"])),
        )
        .await
        .unwrap();

    engine.push_log(handle.id(), "started up\n");
    assert_eq!(handle.logs().await.unwrap(), "started up\n");

    let output = handle.exec(&["echo".to_string()]).await.unwrap();
    assert_eq!(output.exit_code, Some(0));
}

// ── Cleanup registration ───────────────────────────────────────────────────

#[tokio::test]
async fn cleanup_is_registered_before_first_resource_exists() {
    let engine = Arc::new(MockEngine::new());
    let (session, daemon_task) = managed_session(Arc::clone(&engine)).await;

    let handle = session
        .start_container(
            ContainerRequest::new("app:latest").wait(WaitStrategy::exec(["true"])),
        )
        .await
        .unwrap();

    let labels = engine.container_labels(handle.id()).unwrap();
    assert_eq!(labels.get(LABEL_REAP).map(String::as_str), Some("true"));

    // Dropping the session drops the held registration; the daemon
    // sweeps this session's container.
    let container_id = handle.id().to_string();
    drop(handle);
    drop(session);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !engine.removed_containers().contains(&container_id) {
        if tokio::time::Instant::now() >= deadline {
            panic!("container was never swept after session drop");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    daemon_task.abort();
}

#[tokio::test]
async fn registration_is_established_once_per_session() {
    let engine = Arc::new(MockEngine::new());
    let (session, daemon_task) = managed_session(Arc::clone(&engine)).await;

    // Parallel first-time registrations must converge on one connection.
    let session = Arc::new(session);
    let mut tasks = Vec::new();
    for _ in 0..4 {
        let session = Arc::clone(&session);
        tasks.push(tokio::spawn(async move { session.register_cleanup().await }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    daemon_task.abort();
}

#[tokio::test]
async fn unreachable_reaper_is_fatal_unless_disabled() {
    let engine = Arc::new(MockEngine::new());
    // Enabled, but no daemon anywhere near the mock-assigned port.
    let config = ReaperConfig {
        connect_attempts: 1,
        connect_backoff: Duration::from_millis(1),
        startup_timeout: Duration::from_millis(200),
        ..Default::default()
    };
    let session = Session::new(Arc::clone(&engine) as Arc<dyn ContainerEngine>, config);

    let err = session
        .start_container(
            ContainerRequest::new("app:latest").wait(WaitStrategy::exec(["true"])),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Reaper(_)));

    // Nothing was created: cleanup is guaranteed before resources exist.
    let workloads: Vec<String> = engine
        .live_containers()
        .into_iter()
        .filter(|id| {
            engine
                .container_labels(id)
                .is_some_and(|l| l.contains_key(LABEL_SESSION))
        })
        .collect();
    assert!(workloads.is_empty());
}

// ── Networks ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn created_networks_are_labeled_for_the_session() {
    let engine = Arc::new(MockEngine::new());
    let session = Session::new(
        Arc::clone(&engine) as Arc<dyn ContainerEngine>,
        unmanaged_config(),
    );

    session.create_network("drydock-it-net").await.unwrap();

    let pairs = drydock::session::session_label_pairs(session.id());
    let found = engine.list_networks(&pairs).await.unwrap();
    assert_eq!(found, vec!["drydock-it-net".to_string()]);
}

// ── Independent sessions in one process ────────────────────────────────────

#[tokio::test]
async fn two_sessions_in_one_process_are_independent() {
    let engine = Arc::new(MockEngine::new());
    let session_a = Session::new(
        Arc::clone(&engine) as Arc<dyn ContainerEngine>,
        unmanaged_config(),
    );
    let session_b = Session::new(
        Arc::clone(&engine) as Arc<dyn ContainerEngine>,
        unmanaged_config(),
    );

    assert_ne!(session_a.id(), session_b.id());

    let handle_a = session_a
        .start_container(
            ContainerRequest::new("a:latest").wait(WaitStrategy::exec(["true"])),
        )
        .await
        .unwrap();
    let handle_b = session_b
        .start_container(
            ContainerRequest::new("b:latest").wait(WaitStrategy::exec(["true"])),
        )
        .await
        .unwrap();

    let labels_a = engine.container_labels(handle_a.id()).unwrap();
    let labels_b = engine.container_labels(handle_b.id()).unwrap();
    assert_ne!(labels_a.get(LABEL_SESSION), labels_b.get(LABEL_SESSION));
}
