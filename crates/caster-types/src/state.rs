//! Streaming session state machine types.

use serde::{Deserialize, Serialize};

/// The lifecycle state of a streaming session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Never opened.
    #[default]
    Idle,

    /// Handshake done, transmission loop running.
    Open,

    /// Close requested; the transmission loop is draining.
    Closing,

    /// Connection closed. The session may be opened again.
    Closed,

    /// Handshake or close failed.
    Failed {
        /// Error message.
        reason: String,
    },
}

impl SessionState {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Returns true while buffers are accepted.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    pub fn is_closing(&self) -> bool {
        matches!(self, Self::Closing)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// Returns a simple string representation of the state.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Open => "Open",
            Self::Closing => "Closing",
            Self::Closed => "Closed",
            Self::Failed { .. } => "Failed",
        }
    }

    /// Get status message for display.
    pub fn message(&self) -> String {
        match self {
            Self::Failed { reason } => format!("Failed: {}", reason),
            other => other.name().to_string(),
        }
    }
}
