//! Outbound dialer
//!
//! Opens the destination socket on behalf of an open request.

use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tokio::net::TcpStream;
use tracing::debug;

use httpbridge_core::TargetAddr;

use crate::{Result, ServerError};

/// Dial the destination of a new tunnel.
///
/// Keepalive is enabled so a half-open destination path surfaces as an I/O
/// error on a later read or write instead of hanging until the tunnel is
/// swept. The error text of a failed dial travels back to the client
/// verbatim in the open response.
pub async fn dial(target: &TargetAddr, timeout: Duration) -> Result<TcpStream> {
    let addr = target.to_string();
    let stream = tokio::time::timeout(timeout, TcpStream::connect(&addr))
        .await
        .map_err(|_| ServerError::DialTimeout(addr.clone()))?
        .map_err(|source| ServerError::DialFailed {
            target: addr.clone(),
            source,
        })?;
    set_keepalive(&stream);
    debug!("dialed {}", addr);
    Ok(stream)
}

fn set_keepalive(stream: &TcpStream) {
    let keepalive = TcpKeepalive::new()
        .with_time(Duration::from_secs(30))
        .with_interval(Duration::from_secs(10));
    let _ = SockRef::from(stream).set_tcp_keepalive(&keepalive);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dial_success() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let target = TargetAddr::new("127.0.0.1", addr.port());
        let stream = dial(&target, Duration::from_secs(5)).await.unwrap();
        assert!(stream.peer_addr().is_ok());
    }

    #[tokio::test]
    async fn test_dial_refused_reports_target() {
        // Bind-then-drop to find a port with nothing listening.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let target = TargetAddr::new("127.0.0.1", port);
        let err = dial(&target, Duration::from_secs(5)).await.unwrap_err();
        let text = err.to_string();
        assert!(text.contains(&port.to_string()), "diagnostic: {text}");
    }
}
