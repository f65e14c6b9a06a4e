//! Wire-protocol constants
//!
//! The long-poll timing triad is deliberately asymmetric: the server answers
//! an idle poll 3 seconds before the nominal idle timeout, and the client
//! waits 3 seconds past it, so the server's response is always written well
//! before the client gives up on the request.

use std::time::Duration;

/// Maximum payload per PUT request or GET response (640 KiB)
pub const MAX_CHUNK: usize = 640 * 1024;

/// Nominal upper bound on an idle poll (60 s)
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// How long the server parks an idle GET before answering 204
pub const SERVER_POLL_WINDOW: Duration = Duration::from_secs(IDLE_TIMEOUT.as_secs() - 3);

/// Client-side read timeout on long-poll requests
pub const CLIENT_READ_TIMEOUT: Duration = Duration::from_secs(IDLE_TIMEOUT.as_secs() + 3);
