//! Events a streaming session publishes to its caller.

use serde::{Deserialize, Serialize};

use crate::error_code::ErrorCode;
use crate::state::SessionState;

/// Notifications from a streaming session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionEvent {
    /// Session state has changed.
    StateChanged {
        /// Previous state.
        previous: SessionState,

        /// Current state.
        current: SessionState,
    },

    /// A buffer could not be sent. The transmission loop keeps running.
    SendFailed {
        /// Position of the buffer in the stream, starting at 1.
        sequence: u64,

        /// Library error code.
        code: ErrorCode,

        /// Library error message.
        message: String,

        /// Size of the failed buffer.
        bytes: usize,
    },

    /// The transmission loop has exited.
    TransmissionStopped {
        /// Buffers handed to the library during this loop.
        buffers_sent: u64,

        /// Bytes handed to the library during this loop.
        bytes_sent: u64,
    },
}
