//! Uplink pump (local → remote)
//!
//! Reads the local endpoint one chunk at a time and PUTs each chunk to the
//! bridge. A chunk is only released once the bridge has acknowledged it:
//! bytes the local side already handed over must never be dropped.

use std::time::Duration;

use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

use httpbridge_core::MAX_CHUNK;

use crate::local::LocalReader;
use crate::tunnel::TunnelHandle;
use crate::{ClientError, Result};

/// Verdict on one delivery attempt, decided from the response status alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PutStep {
    /// 200: the bridge wrote the chunk to the destination
    Delivered,
    /// 410: the destination closed under us
    RemoteClosed,
    /// 404: the bridge no longer knows this id
    NotRegistered,
    /// Anything else is a bridge fault
    Fatal,
}

fn classify(status: StatusCode) -> PutStep {
    match status {
        StatusCode::OK => PutStep::Delivered,
        StatusCode::GONE => PutStep::RemoteClosed,
        StatusCode::NOT_FOUND => PutStep::NotRegistered,
        _ => PutStep::Fatal,
    }
}

enum ChunkOutcome {
    Delivered,
    TunnelDown,
}

/// Pump until local EOF, shutdown, or the tunnel goes away.
///
/// On local EOF (or the shutdown token firing, which reads the same) one
/// explicit DELETE tells the bridge to release the destination socket; the
/// bridge then answers the downlink's parked poll, and the whole tunnel
/// winds down along that single path.
pub async fn run(
    http: &reqwest::Client,
    url: &str,
    mut input: LocalReader,
    handle: &TunnelHandle,
    backoff: Duration,
) -> Result<()> {
    let mut buf = vec![0u8; MAX_CHUNK];
    loop {
        let n = tokio::select! {
            _ = handle.cancelled() => 0,
            read = input.read(&mut buf) => match read {
                Ok(n) => n,
                Err(e) => {
                    // A broken local read ends the tunnel the same way EOF
                    // does, except the failure is surfaced to the caller.
                    if handle.is_connected() {
                        let _ = http.delete(url).send().await;
                    }
                    handle.cancel();
                    return Err(e.into());
                }
            },
        };

        if n == 0 {
            if handle.is_connected() {
                match http.delete(url).send().await {
                    // 404 here just means the bridge beat us to the close.
                    Ok(_) => debug!("uplink: close sent"),
                    Err(e) => warn!("uplink: close request failed: {}", e),
                }
            }
            handle.cancel();
            info!("uplink: local endpoint done");
            return Ok(());
        }

        let chunk = Bytes::copy_from_slice(&buf[..n]);
        match send_chunk(http, url, chunk, handle, backoff).await? {
            ChunkOutcome::Delivered => {}
            ChunkOutcome::TunnelDown => return Ok(()),
        }
    }
}

/// PUT one chunk, holding onto it across retryable transport failures.
async fn send_chunk(
    http: &reqwest::Client,
    url: &str,
    chunk: Bytes,
    handle: &TunnelHandle,
    backoff: Duration,
) -> Result<ChunkOutcome> {
    loop {
        let sent = http
            .put(url)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(chunk.clone())
            .send()
            .await;

        match sent {
            Ok(resp) => match classify(resp.status()) {
                PutStep::Delivered => return Ok(ChunkOutcome::Delivered),
                PutStep::RemoteClosed => {
                    info!("uplink: remote closed");
                    handle.mark_disconnected();
                    handle.cancel();
                    return Ok(ChunkOutcome::TunnelDown);
                }
                PutStep::NotRegistered => {
                    warn!("uplink: bridge lost the tunnel");
                    handle.mark_disconnected();
                    handle.cancel();
                    return Ok(ChunkOutcome::TunnelDown);
                }
                PutStep::Fatal => {
                    // Wake the downlink so it stops polling; without this
                    // the poll loop would idle out its whole grace window.
                    handle.cancel();
                    return Err(ClientError::Bridge(resp.status().to_string()));
                }
            },
            Err(e) if e.is_connect() => {
                warn!("uplink: bridge unreachable: {}", e);
                handle.cancel();
                return Ok(ChunkOutcome::TunnelDown);
            }
            Err(_) if handle.is_cancelled() => return Ok(ChunkOutcome::TunnelDown),
            Err(e) => {
                warn!(
                    "uplink: send failed: {} ({} bytes held for retry)",
                    e,
                    chunk.len()
                );
                tokio::time::sleep(backoff).await;
            }
        }
    }
}
