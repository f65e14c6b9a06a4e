//! HTTP endpoint
//!
//! Presents the tunnel protocol as four HTTP verbs at the mount path, keyed
//! by the connection id in the final path segment. Proxy-friendliness is the
//! reason for verbs over streaming: every request/response pair is an
//! ordinary bounded HTTP exchange.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use httpbridge_core::{ConnId, TargetAddr, MAX_CHUNK};

use crate::dialer::dial;
use crate::table::{ConnectionTable, TunnelConn};
use crate::{Result, ServerConfig};

/// Shared handler state.
#[derive(Clone)]
pub struct BridgeState {
    pub table: Arc<ConnectionTable>,
    pub config: Arc<ServerConfig>,
}

impl BridgeState {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            table: Arc::new(ConnectionTable::new()),
            config: Arc::new(config),
        }
    }
}

/// Build the bridge router with all four verbs mounted at `mount`.
pub fn router(state: BridgeState, mount: &str) -> Router {
    let path = format!("{}/{{id}}", normalize_mount(mount));
    Router::new()
        .route(
            &path,
            post(open).put(put_chunk).get(get_chunk).delete(close),
        )
        .layer(DefaultBodyLimit::max(MAX_CHUNK))
        .with_state(state)
}

/// Run the bridge server on `port` until interrupted, then release every
/// tunnel still in the table.
pub async fn serve(port: u16, mount: &str, config: ServerConfig) -> Result<()> {
    let state = BridgeState::new(config);
    let table = state.table.clone();

    let sweep_interval = state.config.sweep_interval;
    let max_idle = state.config.max_idle;
    let sweeper_table = table.clone();
    let sweeper = tokio::spawn(async move {
        let mut tick = tokio::time::interval(sweep_interval);
        loop {
            tick.tick().await;
            let swept = sweeper_table.sweep_stale(max_idle);
            if swept > 0 {
                warn!("swept {} stale tunnel(s)", swept);
            }
        }
    });

    let app = router(state, mount);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!(
        "bridge listening on {} at {}",
        listener.local_addr()?,
        normalize_mount(mount)
    );

    // Closing the table at signal time wakes every parked long-poll, so
    // draining in-flight requests does not wait out a poll window.
    let shutdown_table = table.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
            shutdown_table.close_all();
        })
        .await?;

    sweeper.abort();
    table.close_all();
    info!("bridge stopped");
    Ok(())
}

/// Mount paths arrive from the command line in whatever shape the operator
/// typed; normalize to `/segment` form (empty = serve at the root).
fn normalize_mount(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

/// POST: dial the destination in the body and register the id.
async fn open(
    State(state): State<BridgeState>,
    Path(id): Path<String>,
    body: String,
) -> Response {
    let id = match id.parse::<ConnId>() {
        Ok(id) => id,
        Err(e) => return text_response(StatusCode::BAD_REQUEST, e),
    };
    let target = match body.parse::<TargetAddr>() {
        Ok(target) => target,
        Err(e) => return text_response(StatusCode::BAD_REQUEST, e),
    };

    // Refusing to replace a live entry keeps one client from hijacking
    // another's tunnel by guessing its id.
    if state.table.get(&id).is_some() {
        warn!("open {}: id already in use", id.short());
        return text_response(StatusCode::CONFLICT, "connection id already in use");
    }

    match dial(&target, state.config.dial_timeout).await {
        Ok(stream) => {
            let conn = Arc::new(TunnelConn::new(id.clone(), target.clone(), stream));
            if !state.table.insert(conn) {
                // Lost a race with a concurrent open for the same id.
                return text_response(StatusCode::CONFLICT, "connection id already in use");
            }
            info!("tunnel {} open to {}", id.short(), target);
            StatusCode::CREATED.into_response()
        }
        Err(e) => {
            warn!("open {} to {} refused: {}", id.short(), target, e);
            text_response(StatusCode::NOT_ACCEPTABLE, e)
        }
    }
}

/// PUT: write the body to the destination socket.
async fn put_chunk(
    State(state): State<BridgeState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Response {
    let id = match id.parse::<ConnId>() {
        Ok(id) => id,
        Err(e) => return text_response(StatusCode::BAD_REQUEST, e),
    };
    let Some(conn) = state.table.get(&id) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    conn.touch();

    let mut writer = conn.writer().lock().await;
    match writer.write_all(&body).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => {
            drop(writer);
            debug!("tunnel {}: destination write failed: {}", id.short(), e);
            state.table.remove(&id);
            StatusCode::GONE.into_response()
        }
    }
}

/// GET: long-poll the destination for data.
///
/// The reader half's mutex serializes concurrent polls for one id. The poll
/// parks until data arrives, the window expires (204), or the entry is
/// removed underneath us (404: the tunnel is now absent).
async fn get_chunk(State(state): State<BridgeState>, Path(id): Path<String>) -> Response {
    let id = match id.parse::<ConnId>() {
        Ok(id) => id,
        Err(e) => return text_response(StatusCode::BAD_REQUEST, e),
    };
    let Some(conn) = state.table.get(&id) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    conn.touch();

    let mut reader = conn.reader().lock().await;
    let mut buf = vec![0u8; MAX_CHUNK];
    tokio::select! {
        _ = conn.closed().cancelled() => StatusCode::NOT_FOUND.into_response(),
        polled = tokio::time::timeout(state.config.poll_window, reader.read(&mut buf)) => {
            match polled {
                Err(_) => StatusCode::NO_CONTENT.into_response(),
                Ok(Ok(0)) => {
                    info!("tunnel {}: destination closed", id.short());
                    state.table.remove(&id);
                    StatusCode::GONE.into_response()
                }
                Ok(Ok(n)) => {
                    buf.truncate(n);
                    conn.touch();
                    chunk_response(buf)
                }
                Ok(Err(e)) => {
                    warn!("tunnel {}: destination read failed: {}", id.short(), e);
                    state.table.remove(&id);
                    StatusCode::GONE.into_response()
                }
            }
        }
    }
}

/// DELETE: close the destination socket and drop the entry.
async fn close(State(state): State<BridgeState>, Path(id): Path<String>) -> Response {
    let id = match id.parse::<ConnId>() {
        Ok(id) => id,
        Err(e) => return text_response(StatusCode::BAD_REQUEST, e),
    };
    if state.table.remove(&id) {
        info!("tunnel {} closed by client", id.short());
        StatusCode::OK.into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}

fn text_response(status: StatusCode, msg: impl ToString) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "text/plain")],
        msg.to_string(),
    )
        .into_response()
}

fn chunk_response(data: Vec<u8>) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/octet-stream")],
        data,
    )
        .into_response()
}
