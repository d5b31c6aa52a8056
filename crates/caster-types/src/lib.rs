//! Shared types for the stream transmitter.
//!
//! This crate defines the session descriptor a caller fills in before
//! connecting, the fixed error code set of the streaming protocol library,
//! and the state and event types a streaming session reports.

mod error_code;
mod events;
mod state;
mod types;

pub use error_code::ErrorCode;
pub use events::SessionEvent;
pub use state::SessionState;
pub use types::{Format, Protocol, SessionDescriptor};

use crossbeam_channel::{Receiver, Sender};

/// Recommended size of a single media buffer, in bytes.
pub const BUFFER_SIZE: usize = 4096;

/// Default server port.
pub const DEFAULT_PORT: u16 = 8000;

/// Default source user name.
pub const DEFAULT_USER: &str = "source";

/// Channel capacity for session events (session → caller).
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Creates a bounded session event channel.
pub fn event_channel() -> (Sender<SessionEvent>, Receiver<SessionEvent>) {
    crossbeam_channel::bounded(EVENT_CHANNEL_CAPACITY)
}
