//! Connection identifiers
//!
//! A connection id names one end-to-end tunnel within a bridge's lifetime.
//! It is chosen by the client and carried as the final path segment of every
//! bridge request, so it must stay printable and URL-safe.

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use thiserror::Error;

/// Longest id accepted from the wire. Our own ids are 32 hex characters;
/// the slack tolerates foreign clients with longer naming schemes.
const MAX_ID_LEN: usize = 64;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum IdError {
    #[error("empty connection id")]
    Empty,

    #[error("connection id longer than {MAX_ID_LEN} characters")]
    TooLong,

    #[error("connection id contains non URL-safe character {0:?}")]
    BadChar(char),
}

/// Identifier of one tunneled TCP connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnId(String);

impl ConnId {
    /// Generate a fresh 128-bit random id, hex-encoded.
    ///
    /// Every client invocation gets its own id, so concurrent clients
    /// against one bridge cannot collide.
    pub fn generate() -> Self {
        let mut raw = [0u8; 16];
        rand::thread_rng().fill(&mut raw[..]);
        ConnId(hex::encode(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Shortened prefix for logs.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(8)]
    }
}

impl FromStr for ConnId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, IdError> {
        if s.is_empty() {
            return Err(IdError::Empty);
        }
        if s.len() > MAX_ID_LEN {
            return Err(IdError::TooLong);
        }
        if let Some(bad) = s
            .chars()
            .find(|c| !c.is_ascii_alphanumeric() && !matches!(c, '.' | '_' | '-'))
        {
            return Err(IdError::BadChar(bad));
        }
        Ok(ConnId(s.to_string()))
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
