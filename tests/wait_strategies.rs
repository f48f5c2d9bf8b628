//! Wait-strategy behavior tests.
//!
//! Deadline-timing properties run on tokio's paused clock so the poll
//! loop's sleeps auto-advance; TCP and HTTP probes run against real
//! loopback listeners with short real deadlines.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use drydock::engine::{ContainerEngine, ContainerSpec, HealthState};
use drydock::ports::{PortMap, ResolvedPort};
use drydock::testing::MockEngine;
use drydock::wait::{
    HttpWait, WaitError, WaitStrategy, WaitTarget, wait_until_ready, wait_with_interval,
};

async fn running_target(engine: &MockEngine) -> WaitTarget {
    let id = engine
        .create_container(None, ContainerSpec {
            image: "service:latest".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    engine.start_container(&id).await.unwrap();
    WaitTarget::new(id, "127.0.0.1", PortMap::new())
}

fn target_with_port(id: &str, internal: u16, host_port: u16) -> WaitTarget {
    let mut ports = PortMap::new();
    ports.insert(internal, ResolvedPort {
        host: "127.0.0.1".to_string(),
        port: host_port,
    });
    WaitTarget::new(id, "127.0.0.1", ports)
}

/// Serve a fixed HTTP response on an ephemeral loopback port.
async fn serve_http(status_line: &'static str) -> (u16, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf).await;
            let response =
                format!("{status_line}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
            let _ = stream.write_all(response.as_bytes()).await;
        }
    });

    (port, handle)
}

// ── Deadline properties ────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn ready_on_first_poll_returns_without_sleeping() {
    let engine = MockEngine::new();
    let target = running_target(&engine).await;
    engine.push_log(&target.container_id, "listening on 0.0.0.0\n");

    let before = tokio::time::Instant::now();
    wait_until_ready(
        &engine,
        &target,
        &WaitStrategy::log_pattern("listening").unwrap(),
        Duration::from_secs(60),
    )
    .await
    .unwrap();

    // On the paused clock, any sleep would have advanced time.
    assert_eq!(before.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn timeout_fires_within_one_poll_interval_of_deadline() {
    let engine = MockEngine::new();
    let target = running_target(&engine).await;

    let err = wait_with_interval(
        &engine,
        &target,
        &WaitStrategy::log_pattern("never appears").unwrap(),
        Duration::from_millis(2000),
        Duration::from_millis(250),
    )
    .await
    .unwrap_err();

    match err {
        WaitError::Timeout {
            strategy, elapsed, ..
        } => {
            assert_eq!(strategy, "log-pattern");
            assert!(
                elapsed >= Duration::from_millis(2000)
                    && elapsed <= Duration::from_millis(2250),
                "elapsed was {elapsed:?}"
            );
        }
        other => panic!("expected Timeout, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn log_pattern_occurrence_count_gates_readiness() {
    let engine = MockEngine::new();
    let target = running_target(&engine).await;
    engine.push_log(&target.container_id, "ready\nsomething else\nready\n");

    let strategy = match WaitStrategy::log_pattern("ready").unwrap() {
        WaitStrategy::LogPattern(log) => WaitStrategy::LogPattern(log.times(3)),
        _ => unreachable!(),
    };

    // Two occurrences: must not succeed.
    let err = wait_until_ready(&engine, &target, &strategy, Duration::from_secs(1))
        .await
        .unwrap_err();
    assert!(matches!(err, WaitError::Timeout { .. }));

    // Third occurrence: succeeds on the poll where it becomes visible.
    engine.push_log(&target.container_id, "ready\n");
    wait_until_ready(&engine, &target, &strategy, Duration::from_secs(1))
        .await
        .unwrap();
}

// ── Permanent failure vs timeout ───────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn exited_container_fails_without_waiting_for_deadline() {
    let engine = MockEngine::new();
    let target = running_target(&engine).await;
    engine.set_exit(&target.container_id, 137);

    let before = tokio::time::Instant::now();
    let err = wait_until_ready(
        &engine,
        &target,
        &WaitStrategy::log_pattern("never").unwrap(),
        Duration::from_secs(600),
    )
    .await
    .unwrap_err();

    match err {
        WaitError::PermanentFailure { reason, .. } => assert!(reason.contains("137")),
        other => panic!("expected PermanentFailure, got {other:?}"),
    }
    assert!(before.elapsed() < Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn unhealthy_container_is_a_permanent_failure() {
    let engine = MockEngine::new();
    let target = running_target(&engine).await;
    engine.set_health(&target.container_id, HealthState::Unhealthy);

    let err = wait_until_ready(
        &engine,
        &target,
        &WaitStrategy::health(),
        Duration::from_secs(60),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, WaitError::PermanentFailure { strategy: "health", .. }));
}

#[tokio::test(start_paused = true)]
async fn health_starting_keeps_polling_until_healthy() {
    let engine = MockEngine::new();
    let target = running_target(&engine).await;
    engine.set_health(&target.container_id, HealthState::Starting);

    let engine = std::sync::Arc::new(engine);
    let flipper = {
        let engine = std::sync::Arc::clone(&engine);
        let id = target.container_id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(600)).await;
            engine.set_health(&id, HealthState::Healthy);
        })
    };

    wait_until_ready(
        engine.as_ref(),
        &target,
        &WaitStrategy::health(),
        Duration::from_secs(5),
    )
    .await
    .unwrap();
    flipper.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn engine_unreachable_mid_poll_is_infrastructure() {
    let engine = MockEngine::new();
    let target = running_target(&engine).await;
    engine.set_unreachable(true);

    let err = wait_until_ready(
        &engine,
        &target,
        &WaitStrategy::log_pattern("x").unwrap(),
        Duration::from_secs(5),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, WaitError::Infrastructure { .. }));
}

// ── TCP port probes ────────────────────────────────────────────────────────

#[tokio::test]
async fn ports_strategy_ready_when_listener_accepts() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let engine = MockEngine::new();
    let mock_target = running_target(&engine).await;
    let target = target_with_port(&mock_target.container_id, 5432, port);

    wait_with_interval(
        &engine,
        &target,
        &WaitStrategy::ports(),
        Duration::from_secs(2),
        Duration::from_millis(20),
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn ports_strategy_times_out_when_nothing_listens() {
    // Bind then drop to get a port that is almost certainly closed.
    let closed_port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };

    let engine = MockEngine::new();
    let mock_target = running_target(&engine).await;
    let target = target_with_port(&mock_target.container_id, 5432, closed_port);

    let err = wait_with_interval(
        &engine,
        &target,
        &WaitStrategy::ports(),
        Duration::from_millis(300),
        Duration::from_millis(20),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, WaitError::Timeout { strategy: "ports", .. }));
}

// ── HTTP probes ────────────────────────────────────────────────────────────

#[tokio::test]
async fn http_200_is_ready_immediately() {
    let (port, server) = serve_http("HTTP/1.1 200 OK").await;

    let engine = MockEngine::new();
    let mock_target = running_target(&engine).await;
    let target = target_with_port(&mock_target.container_id, 8080, port);

    wait_with_interval(
        &engine,
        &target,
        &WaitStrategy::http("/health", 8080),
        Duration::from_secs(2),
        Duration::from_millis(20),
    )
    .await
    .unwrap();

    server.abort();
}

#[tokio::test]
async fn http_500_keeps_polling_until_timeout_by_default() {
    let (port, server) = serve_http("HTTP/1.1 500 Internal Server Error").await;

    let engine = MockEngine::new();
    let mock_target = running_target(&engine).await;
    let target = target_with_port(&mock_target.container_id, 8080, port);

    let err = wait_with_interval(
        &engine,
        &target,
        &WaitStrategy::http("/health", 8080),
        Duration::from_millis(400),
        Duration::from_millis(50),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, WaitError::Timeout { strategy: "http", .. }));

    server.abort();
}

#[tokio::test]
async fn http_unexpected_status_fails_fast_when_configured() {
    let (port, server) = serve_http("HTTP/1.1 500 Internal Server Error").await;

    let engine = MockEngine::new();
    let mock_target = running_target(&engine).await;
    let target = target_with_port(&mock_target.container_id, 8080, port);

    let strategy =
        WaitStrategy::Http(HttpWait::new("/health", 8080).fail_on_unexpected_status());
    let err = wait_with_interval(
        &engine,
        &target,
        &strategy,
        Duration::from_secs(5),
        Duration::from_millis(50),
    )
    .await
    .unwrap_err();

    match err {
        WaitError::PermanentFailure { reason, .. } => assert!(reason.contains("500")),
        other => panic!("expected PermanentFailure, got {other:?}"),
    }

    server.abort();
}

#[tokio::test]
async fn composite_of_port_and_http_requires_both() {
    let (http_port, server) = serve_http("HTTP/1.1 204 No Content").await;
    let tcp_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let tcp_port = tcp_listener.local_addr().unwrap().port();

    let engine = MockEngine::new();
    let mock_target = running_target(&engine).await;

    let mut ports = PortMap::new();
    ports.insert(8080, ResolvedPort {
        host: "127.0.0.1".to_string(),
        port: http_port,
    });
    ports.insert(9000, ResolvedPort {
        host: "127.0.0.1".to_string(),
        port: tcp_port,
    });
    let target = WaitTarget::new(mock_target.container_id.clone(), "127.0.0.1", ports);

    let strategy = WaitStrategy::all_of([
        WaitStrategy::http("/", 8080),
        WaitStrategy::ports(),
    ]);
    wait_with_interval(
        &engine,
        &target,
        &strategy,
        Duration::from_secs(2),
        Duration::from_millis(20),
    )
    .await
    .unwrap();

    server.abort();
}
