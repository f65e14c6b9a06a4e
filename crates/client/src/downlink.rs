//! Downlink pump (remote → local)
//!
//! Long-polls the bridge with GET and writes whatever comes back to the
//! local endpoint. An idle tunnel costs one quiet request per poll window;
//! data is delivered the moment the bridge reads it from the destination.

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::local::LocalWriter;
use crate::tunnel::TunnelHandle;
use crate::{ClientError, Result};

/// Next action after one poll, decided from the response status alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PollStep {
    /// 200: deliver the body locally, poll again
    Deliver,
    /// 204: idle window expired on the bridge, poll again
    Again,
    /// 410: the destination closed
    RemoteClosed,
    /// 404: the bridge no longer knows this id
    NotRegistered,
    /// Anything else is a bridge fault
    Fatal,
}

fn classify(status: StatusCode) -> PollStep {
    match status {
        StatusCode::OK => PollStep::Deliver,
        StatusCode::NO_CONTENT => PollStep::Again,
        StatusCode::GONE => PollStep::RemoteClosed,
        StatusCode::NOT_FOUND => PollStep::NotRegistered,
        _ => PollStep::Fatal,
    }
}

/// Poll until the tunnel closes from either end.
pub async fn run(
    http: reqwest::Client,
    url: String,
    mut out: LocalWriter,
    handle: Arc<TunnelHandle>,
    backoff: Duration,
) -> Result<()> {
    loop {
        if handle.is_cancelled() {
            debug!("downlink: local side closed, stopping");
            return Ok(());
        }

        let resp = match http.get(&url).send().await {
            Ok(resp) => resp,
            Err(e) if e.is_timeout() => {
                // The bridge should have answered 204 before our timeout;
                // losing that race occasionally is survivable.
                debug!("downlink: poll timed out, re-polling");
                continue;
            }
            Err(e) if e.is_connect() => {
                warn!("downlink: bridge unreachable: {}", e);
                handle.cancel();
                return Ok(());
            }
            Err(e) => {
                if handle.is_cancelled() {
                    return Ok(());
                }
                debug!("downlink: transport error: {} (retrying)", e);
                tokio::time::sleep(backoff).await;
                continue;
            }
        };

        match classify(resp.status()) {
            PollStep::Deliver => {
                let chunk = match resp.bytes().await {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        warn!("downlink: poll body aborted: {}", e);
                        continue;
                    }
                };
                if let Err(e) = deliver(&mut out, &chunk).await {
                    // Bytes in hand with nowhere local to put them.
                    warn!("downlink: local write failed: {}", e);
                    handle.cancel();
                    return Err(ClientError::Local(e));
                }
            }
            PollStep::Again => {}
            PollStep::RemoteClosed => {
                info!("downlink: remote closed");
                handle.mark_disconnected();
                handle.cancel();
                return Ok(());
            }
            PollStep::NotRegistered => {
                warn!("downlink: bridge lost the tunnel");
                handle.mark_disconnected();
                handle.cancel();
                return Ok(());
            }
            PollStep::Fatal => {
                // Wake the uplink so it sends the close and exits; the
                // tunnel must converge even when the error is ours to
                // report.
                handle.cancel();
                return Err(ClientError::Bridge(resp.status().to_string()));
            }
        }
    }
}

async fn deliver(out: &mut LocalWriter, chunk: &[u8]) -> std::io::Result<()> {
    out.write_all(chunk).await?;
    // Stdio in particular must not sit on partial chunks.
    out.flush().await
}
