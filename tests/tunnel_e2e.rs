//! End-to-end tunnel scenarios
//!
//! Spins a real bridge server, a real TCP echo destination, and real client
//! pumps over loopback, then pushes bytes through the whole chain:
//!
//! ```text
//! test socket → client uplink → HTTP PUT → bridge → echo destination
//! echo destination → bridge → HTTP GET → client downlink → test socket
//! ```
//!
//! Idle and close paths use shortened poll windows via the config structs so
//! nothing here waits a real 57-second window.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use httpbridge_client::{ClientConfig, ClientError, LocalMode, Tunnel, TunnelHandle};
use httpbridge_core::TargetAddr;
use httpbridge_server::{router, BridgeState, ServerConfig};

// =========================================================================
// Harness
// =========================================================================

fn fast_server_config() -> ServerConfig {
    ServerConfig {
        poll_window: Duration::from_millis(300),
        dial_timeout: Duration::from_secs(2),
        sweep_interval: Duration::from_secs(60),
        max_idle: Duration::from_secs(60),
    }
}

fn fast_client_config() -> ClientConfig {
    ClientConfig {
        poll_read_timeout: Duration::from_millis(900),
        control_read_timeout: Duration::from_secs(5),
        connect_timeout: Duration::from_secs(2),
        open_retries: 2,
        retry_backoff: Duration::from_millis(50),
    }
}

/// Start a bridge on an ephemeral port, mounted at `/br`.
///
/// Returns the mount URL, the state (for table assertions), and the
/// shutdown trigger.
async fn start_bridge(config: ServerConfig) -> (String, BridgeState, oneshot::Sender<()>) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .try_init();

    let state = BridgeState::new(config);
    let app = router(state.clone(), "/br");
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
            .unwrap();
    });

    (format!("http://{addr}/br"), state, shutdown_tx)
}

/// TCP echo destination. With `close_after_first` it answers one burst and
/// hangs up, for close-propagation scenarios.
async fn start_echo(close_after_first: bool) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let mut buf = vec![0u8; 64 * 1024];
                loop {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => {
                            if stream.write_all(&buf[..n]).await.is_err() {
                                return;
                            }
                            if close_after_first {
                                return;
                            }
                        }
                    }
                }
            });
        }
    });

    addr
}

/// Launch a client tunnel toward `destination` with a pre-bound local
/// listener, so the test knows the local port before anything accepts.
async fn start_client(
    bridge_url: &str,
    destination: SocketAddr,
) -> (
    SocketAddr,
    Arc<TunnelHandle>,
    JoinHandle<httpbridge_client::Result<()>>,
) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let local_addr = listener.local_addr().unwrap();

    let tunnel = Tunnel::new(
        bridge_url,
        TargetAddr::new("127.0.0.1", destination.port()),
        fast_client_config(),
    );
    let handle = tunnel.handle();
    let task = tokio::spawn(tunnel.run(LocalMode::Listener(listener)));

    (local_addr, handle, task)
}

async fn join_tunnel(task: JoinHandle<httpbridge_client::Result<()>>) {
    tokio::time::timeout(Duration::from_secs(10), task)
        .await
        .expect("tunnel did not wind down")
        .expect("tunnel task panicked")
        .expect("tunnel ended with an error");
}

// =========================================================================
// Scenarios
// =========================================================================

#[tokio::test(flavor = "multi_thread")]
async fn echo_round_trip() {
    let (bridge_url, state, _shutdown) = start_bridge(fast_server_config()).await;
    let echo = start_echo(false).await;
    let (local, _handle, task) = start_client(&bridge_url, echo).await;

    let mut stream = TcpStream::connect(local).await.unwrap();
    stream.write_all(b"hello\n").await.unwrap();

    let mut buf = [0u8; 6];
    tokio::time::timeout(Duration::from_secs(5), stream.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf, b"hello\n");

    // Closing the local side winds the whole tunnel down and clears the
    // bridge's table.
    drop(stream);
    join_tunnel(task).await;
    assert!(state.table.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn large_payload_fidelity() {
    let payload = {
        let mut p = vec![0u8; 10 * 1024 * 1024];
        rand::thread_rng().fill(&mut p[..]);
        p
    };

    let (bridge_url, state, _shutdown) = start_bridge(fast_server_config()).await;
    let echo = start_echo(false).await;
    let (local, _handle, task) = start_client(&bridge_url, echo).await;

    let stream = TcpStream::connect(local).await.unwrap();
    let (mut read_half, mut write_half) = stream.into_split();

    let to_send = payload.clone();
    let writer = tokio::spawn(async move {
        write_half.write_all(&to_send).await.unwrap();
        // Keep the write half open until everything has echoed back; a
        // half-close would close the destination mid-echo.
        write_half
    });

    let mut received = Vec::with_capacity(payload.len());
    let mut buf = vec![0u8; 64 * 1024];
    while received.len() < payload.len() {
        let n = tokio::time::timeout(Duration::from_secs(30), read_half.read(&mut buf))
            .await
            .expect("echo stalled")
            .unwrap();
        assert!(n > 0, "local endpoint hit EOF at {} bytes", received.len());
        received.extend_from_slice(&buf[..n]);
    }
    assert_eq!(received.len(), payload.len());
    assert!(received == payload, "echoed payload differs from original");

    let write_half = writer.await.unwrap();
    drop(write_half);
    drop(read_half);
    join_tunnel(task).await;
    assert!(state.table.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn open_failure_is_visible() {
    let (bridge_url, state, _shutdown) = start_bridge(fast_server_config()).await;

    // Bind-then-drop: a destination with nothing listening.
    let dead = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_port = dead.local_addr().unwrap().port();
    drop(dead);

    let tunnel = Tunnel::new(
        &bridge_url,
        TargetAddr::new("127.0.0.1", dead_port),
        fast_client_config(),
    );
    let err = tunnel
        .run(LocalMode::Listen(0))
        .await
        .expect_err("open should fail");

    match err {
        ClientError::OpenRejected { status, body } => {
            assert!(status.starts_with("406"), "status was {status}");
            assert!(!body.trim().is_empty(), "dial diagnostic must be non-empty");
        }
        other => panic!("expected OpenRejected, got {other}"),
    }
    assert!(state.table.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn remote_close_propagates() {
    let (bridge_url, state, _shutdown) = start_bridge(fast_server_config()).await;
    let echo = start_echo(true).await;
    let (local, _handle, task) = start_client(&bridge_url, echo).await;

    let mut stream = TcpStream::connect(local).await.unwrap();
    stream.write_all(b"hello").await.unwrap();

    let mut buf = [0u8; 5];
    tokio::time::timeout(Duration::from_secs(5), stream.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf, b"hello");

    // The destination hangs up after the first reply; the local endpoint
    // must observe EOF without any action on our part.
    let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf))
        .await
        .expect("close did not propagate")
        .unwrap();
    assert_eq!(n, 0);

    join_tunnel(task).await;
    assert!(state.table.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn cancellation_drives_single_close_path() {
    let (bridge_url, state, _shutdown) = start_bridge(fast_server_config()).await;
    let echo = start_echo(false).await;
    let (local, handle, task) = start_client(&bridge_url, echo).await;

    let mut stream = TcpStream::connect(local).await.unwrap();
    stream.write_all(b"ping").await.unwrap();
    let mut buf = [0u8; 4];
    tokio::time::timeout(Duration::from_secs(5), stream.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();

    // What the signal watcher does on SIGINT/SIGHUP/SIGTERM.
    handle.cancel();

    join_tunnel(task).await;
    assert!(state.table.is_empty());

    // The local endpoint was closed under us.
    let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf))
        .await
        .expect("local endpoint still open")
        .unwrap();
    assert_eq!(n, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn tunnels_are_isolated() {
    let (bridge_url, state, _shutdown) = start_bridge(fast_server_config()).await;
    let echo = start_echo(false).await;

    let (local_a, _ha, task_a) = start_client(&bridge_url, echo).await;
    let (local_b, _hb, task_b) = start_client(&bridge_url, echo).await;

    let mut a = TcpStream::connect(local_a).await.unwrap();
    let mut b = TcpStream::connect(local_b).await.unwrap();

    a.write_all(b"alpha-stream").await.unwrap();
    b.write_all(b"bravo-stream").await.unwrap();

    let mut buf_a = [0u8; 12];
    let mut buf_b = [0u8; 12];
    tokio::time::timeout(Duration::from_secs(5), a.read_exact(&mut buf_a))
        .await
        .unwrap()
        .unwrap();
    tokio::time::timeout(Duration::from_secs(5), b.read_exact(&mut buf_b))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(&buf_a, b"alpha-stream");
    assert_eq!(&buf_b, b"bravo-stream");
    assert_eq!(state.table.len(), 2);

    drop(a);
    drop(b);
    join_tunnel(task_a).await;
    join_tunnel(task_b).await;
    assert!(state.table.is_empty());
}

// =========================================================================
// Bridge-fault scenarios
// =========================================================================

/// Bridge stand-in that accepts opens but fails one data verb with 500,
/// for exercising the fatal-status convergence path.
async fn start_faulty_bridge(fail_poll: bool, fail_send: bool) -> String {
    use axum::http::StatusCode;
    use axum::routing::post;

    let app = axum::Router::new().route(
        "/br/{id}",
        post(|| async { StatusCode::CREATED })
            .get(move || async move {
                if fail_poll {
                    StatusCode::INTERNAL_SERVER_ERROR
                } else {
                    StatusCode::NO_CONTENT
                }
            })
            .put(move || async move {
                if fail_send {
                    StatusCode::INTERNAL_SERVER_ERROR
                } else {
                    StatusCode::OK
                }
            })
            .delete(|| async { StatusCode::OK }),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{addr}/br")
}

async fn start_client_against(
    bridge_url: &str,
) -> (SocketAddr, JoinHandle<httpbridge_client::Result<()>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let local_addr = listener.local_addr().unwrap();
    let tunnel = Tunnel::new(
        bridge_url,
        TargetAddr::new("127.0.0.1", 9),
        fast_client_config(),
    );
    let task = tokio::spawn(tunnel.run(LocalMode::Listener(listener)));
    (local_addr, task)
}

#[tokio::test(flavor = "multi_thread")]
async fn bridge_fault_on_poll_surfaces_and_drains() {
    let bridge_url = start_faulty_bridge(true, false).await;
    let (local, task) = start_client_against(&bridge_url).await;

    // Local peer connects and then sends nothing: the uplink has no EOF of
    // its own to observe, so only the downlink's fault can end the tunnel.
    let _stream = TcpStream::connect(local).await.unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("tunnel hung on a failing poll")
        .unwrap();
    match result.expect_err("bridge fault must be surfaced") {
        ClientError::Bridge(line) => assert!(line.starts_with("500"), "status line: {line}"),
        other => panic!("expected Bridge error, got {other}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn bridge_fault_on_send_surfaces_and_drains() {
    let bridge_url = start_faulty_bridge(false, true).await;
    let (local, task) = start_client_against(&bridge_url).await;

    let mut stream = TcpStream::connect(local).await.unwrap();
    stream.write_all(b"doomed bytes").await.unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("tunnel hung on a failing send")
        .unwrap();
    match result.expect_err("bridge fault must be surfaced") {
        ClientError::Bridge(line) => assert!(line.starts_with("500"), "status line: {line}"),
        other => panic!("expected Bridge error, got {other}"),
    }
}

// =========================================================================
// Protocol-level checks against the raw endpoint
// =========================================================================

#[tokio::test]
async fn duplicate_open_is_conflict() {
    let (bridge_url, state, _shutdown) = start_bridge(fast_server_config()).await;
    let echo = start_echo(false).await;

    let http = reqwest::Client::new();
    let url = format!("{bridge_url}/cafe0001");
    let body = format!("127.0.0.1:{}", echo.port());

    let first = http.post(&url).body(body.clone()).send().await.unwrap();
    assert_eq!(first.status(), reqwest::StatusCode::CREATED);

    let second = http.post(&url).body(body).send().await.unwrap();
    assert_eq!(second.status(), reqwest::StatusCode::CONFLICT);

    // The original tunnel was not hijacked.
    assert_eq!(state.table.len(), 1);
}

#[tokio::test]
async fn idle_poll_answers_no_content() {
    let (bridge_url, _state, _shutdown) = start_bridge(fast_server_config()).await;
    let echo = start_echo(false).await;

    let http = reqwest::Client::new();
    let url = format!("{bridge_url}/cafe0002");
    let open = http
        .post(&url)
        .body(format!("127.0.0.1:{}", echo.port()))
        .send()
        .await
        .unwrap();
    assert_eq!(open.status(), reqwest::StatusCode::CREATED);

    // No data at the destination: the poll parks for the window, then 204.
    let started = Instant::now();
    let poll = http.get(&url).send().await.unwrap();
    assert_eq!(poll.status(), reqwest::StatusCode::NO_CONTENT);
    assert!(started.elapsed() >= Duration::from_millis(300));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn delete_is_effective_and_idempotent() {
    let (bridge_url, state, _shutdown) = start_bridge(fast_server_config()).await;
    let echo = start_echo(false).await;

    let http = reqwest::Client::new();
    let url = format!("{bridge_url}/cafe0003");
    http.post(&url)
        .body(format!("127.0.0.1:{}", echo.port()))
        .send()
        .await
        .unwrap();
    assert_eq!(state.table.len(), 1);

    let close = http.delete(&url).send().await.unwrap();
    assert_eq!(close.status(), reqwest::StatusCode::OK);
    assert!(state.table.is_empty());

    // A second close reports the entry gone; callers treat that as done.
    let again = http.delete(&url).send().await.unwrap();
    assert_eq!(again.status(), reqwest::StatusCode::NOT_FOUND);
}
