//! httpbridge Core Types
//!
//! Shared between the bridge server and client: connection identifiers,
//! destination addresses, and the wire-protocol constants both sides must
//! agree on.

mod id;
mod limits;
mod target;

pub use id::*;
pub use limits::*;
pub use target::*;
