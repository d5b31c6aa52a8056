//! Icecast/Shoutcast source client.
//!
//! This crate relays an open-ended sequence of already-encoded media
//! buffers to a streaming server over one persistent connection. The wire
//! protocol itself is provided by a protocol library behind the
//! [`ProtocolLibrary`] trait.

mod connection;
mod error;
mod library;
mod session;
pub mod simulated;
mod transmit;

pub use error::{ShoutError, TransportError};
pub use library::{Library, ProtocolConnection, ProtocolLibrary};
pub use session::{StreamWriter, StreamingSession};
pub use transmit::TransmitStatistics;

pub use caster_types::{
    ErrorCode, Format, Protocol, SessionDescriptor, SessionEvent, SessionState, BUFFER_SIZE,
};

use std::time::Duration;

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// How often a blocked writer re-checks whether the session is still open.
pub const WRITER_POLL_INTERVAL: Duration = Duration::from_millis(50);
