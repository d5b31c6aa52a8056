//! Error types for the transport module.

use caster_types::ErrorCode;
use thiserror::Error;

/// A failure reported by the protocol library: its message and code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} ({})", .code.code())]
pub struct ShoutError {
    /// Human-readable message fetched from the library.
    pub message: String,

    /// Library status code.
    pub code: ErrorCode,
}

impl ShoutError {
    pub fn new(message: impl Into<String>, code: ErrorCode) -> Self {
        Self {
            message: message.into(),
            code,
        }
    }

    /// Build an error carrying the library's default message for `code`.
    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code.description(), code)
    }
}

/// Errors that can occur during transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The protocol library returned a non-success code.
    #[error(transparent)]
    Protocol(#[from] ShoutError),

    /// The session is not accepting buffers.
    #[error("Not connected")]
    NotConnected,

    /// The session owning the channel is gone.
    #[error("Channel disconnected")]
    ChannelDisconnected,

    /// The descriptor can no longer change.
    #[error("Session descriptor is frozen once the connection handle exists")]
    DescriptorFrozen,

    /// The protocol library has not been initialized.
    #[error("Protocol library is not initialized")]
    LibraryNotInitialized,

    /// Library shutdown requested while connection handles are alive.
    #[error("Protocol library still has {0} live connection handle(s)")]
    SessionsActive(usize),

    /// The transmission thread could not be started.
    #[error("Failed to spawn transmission thread: {0}")]
    Thread(#[source] std::io::Error),
}

impl TransportError {
    /// The library error code, when the error came from the library.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Protocol(e) => Some(e.code),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shout_error_display() {
        let error = ShoutError::new("Login failed", ErrorCode::NoLogin);
        assert_eq!(error.to_string(), "Login failed (-3)");
    }

    #[test]
    fn test_protocol_error_is_transparent() {
        let error = TransportError::from(ShoutError::from_code(ErrorCode::Connected));
        assert_eq!(
            error.to_string(),
            "Cannot set parameter while connected (-7)"
        );
        assert_eq!(error.code(), Some(ErrorCode::Connected));
        assert_eq!(TransportError::NotConnected.code(), None);
    }
}
