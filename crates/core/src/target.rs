//! Destination addresses
//!
//! The body of an open request is the destination in `host:port` form.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TargetError {
    #[error("destination missing ':port' suffix: {0:?}")]
    MissingPort(String),

    #[error("destination has empty host: {0:?}")]
    EmptyHost(String),

    #[error("invalid destination port {0:?}")]
    BadPort(String),
}

/// Destination of a tunnel: the host and port the bridge dials on open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetAddr {
    pub host: String,
    pub port: u16,
}

impl TargetAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl FromStr for TargetAddr {
    type Err = TargetError;

    /// Parse `host:port`. The split is on the last colon, so bare IPv6
    /// addresses (`::1:9000`) still resolve to a usable host part.
    fn from_str(s: &str) -> Result<Self, TargetError> {
        let s = s.trim();
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| TargetError::MissingPort(s.to_string()))?;
        if host.is_empty() {
            return Err(TargetError::EmptyHost(s.to_string()));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| TargetError::BadPort(port.to_string()))?;
        Ok(TargetAddr::new(host, port))
    }
}

impl fmt::Display for TargetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
