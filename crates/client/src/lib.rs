//! httpbridge Bridge Client
//!
//! The local side of the tunnel: relays one local TCP connection (or the
//! process's stdin/stdout) through a bridge server, using plain HTTP
//! requests for both byte directions.
//!
//! ## Pumps
//!
//! Two loops run concurrently over one connection id:
//!
//! 1. uplink: read the local endpoint, PUT chunks to the bridge
//! 2. downlink: long-poll the bridge with GET, write chunks locally
//!
//! Closing the local input is the single shutdown trigger; everything else
//! (DELETE to the bridge, the remote close, the peer pump's exit) follows
//! from it.

mod downlink;
mod local;
mod opener;
mod tunnel;
mod uplink;

pub use local::{LocalEndpoint, LocalMode, LocalReader, LocalWriter};
pub use opener::open_tunnel;
pub use tunnel::{shutdown_signal, Tunnel, TunnelHandle};

use std::time::Duration;

use thiserror::Error;

use httpbridge_core::CLIENT_READ_TIMEOUT;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("local endpoint error: {0}")]
    Local(#[from] std::io::Error),

    #[error("bridge rejected open ({status}): {body}")]
    OpenRejected { status: String, body: String },

    #[error("bridge unreachable: {0}")]
    BridgeUnreachable(#[source] reqwest::Error),

    #[error("bridge error: {0}")]
    Bridge(String),

    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// Bridge client tuning knobs
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Read timeout on the long-poll client; must outwait the server's
    /// idle answer
    pub poll_read_timeout: Duration,
    /// Read timeout on the control client (open, put, close)
    pub control_read_timeout: Duration,
    /// TCP connect bound toward the bridge
    pub connect_timeout: Duration,
    /// Attempts for the initial open request
    pub open_retries: u32,
    /// Pause between transport-level retries
    pub retry_backoff: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            poll_read_timeout: CLIENT_READ_TIMEOUT,
            control_read_timeout: CLIENT_READ_TIMEOUT,
            connect_timeout: Duration::from_secs(10),
            open_retries: 3,
            retry_backoff: Duration::from_millis(500),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.poll_read_timeout, Duration::from_secs(63));
        assert_eq!(config.open_retries, 3);
    }
}
