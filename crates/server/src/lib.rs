//! httpbridge Bridge Server
//!
//! The bridge side of the tunnel: terminates the client's HTTP requests and
//! opens outbound TCP connections on its behalf.
//!
//! ## Protocol
//!
//! All endpoints live at `<mount>/<id>` where `<id>` is the connection id:
//!
//! 1. `POST` with body `host:port` dials the destination and registers the id
//! 2. `PUT` writes the raw request body to the destination socket
//! 3. `GET` long-polls the destination for up to one chunk of data
//! 4. `DELETE` closes the destination socket and drops the entry

mod dialer;
mod endpoint;
mod table;

pub use dialer::dial;
pub use endpoint::{router, serve, BridgeState};
pub use table::{ConnectionTable, TunnelConn};

use std::time::Duration;

use thiserror::Error;

use httpbridge_core::SERVER_POLL_WINDOW;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("dial to {target} failed: {source}")]
    DialFailed {
        target: String,
        source: std::io::Error,
    },

    #[error("dial to {0} timed out")]
    DialTimeout(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ServerError>;

/// Bridge server tuning knobs
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// How long an idle GET parks before answering 204
    pub poll_window: Duration,
    /// Outbound TCP connect bound
    pub dial_timeout: Duration,
    /// How often the stale sweeper runs
    pub sweep_interval: Duration,
    /// Entries with no handler activity for this long are swept
    pub max_idle: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            poll_window: SERVER_POLL_WINDOW,
            dial_timeout: Duration::from_secs(10),
            sweep_interval: Duration::from_secs(60),
            max_idle: Duration::from_secs(15 * 60),
        }
    }
}
