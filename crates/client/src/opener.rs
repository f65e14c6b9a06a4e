//! Tunnel opener
//!
//! Issues the open request for a new tunnel and interprets the verdict.
//! Anything but 201 is final; transport-level failures are retried a few
//! times because the bridge may be briefly unreachable or an HTTP
//! keep-alive connection may have gone stale under us.

use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use tracing::{debug, error, warn};

use httpbridge_core::TargetAddr;

use crate::{ClientConfig, ClientError, Result};

/// POST the destination to the bridge. Returns once the bridge has dialed
/// the destination and registered the connection id.
pub async fn open_tunnel(
    http: &reqwest::Client,
    url: &str,
    target: &TargetAddr,
    config: &ClientConfig,
) -> Result<()> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match http
            .post(url)
            .header(CONTENT_TYPE, "text/plain")
            .body(target.to_string())
            .send()
            .await
        {
            Ok(resp) if resp.status() == StatusCode::CREATED => {
                debug!("bridge accepted open for {}", target);
                return Ok(());
            }
            Ok(resp) => {
                let status = resp.status().to_string();
                let body = resp.text().await.unwrap_or_default();
                error!("bridge rejected open: {} {}", status, body.trim());
                return Err(ClientError::OpenRejected { status, body });
            }
            Err(e) if attempt < config.open_retries => {
                warn!("open attempt {} failed: {} (retrying)", attempt, e);
                tokio::time::sleep(config.retry_backoff).await;
            }
            Err(e) => return Err(ClientError::BridgeUnreachable(e)),
        }
    }
}
