//! Error codes reported by the streaming protocol library.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The fixed set of status codes the protocol library returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum ErrorCode {
    #[default]
    Success = 0,

    /// Nonsensical arguments or an inconsistent handle.
    Insane = -1,

    /// Could not reach the server.
    NoConnect = -2,

    /// The server rejected the credentials.
    NoLogin = -3,

    /// Socket error while talking to the server.
    Socket = -4,

    /// Allocation failure.
    Malloc = -5,

    /// Metadata update failed.
    Metadata = -6,

    /// Operation needs a disconnected handle.
    Connected = -7,

    /// Operation needs a connected handle.
    Unconnected = -8,

    /// Requested option is not supported.
    Unsupported = -9,

    /// Socket is busy.
    Busy = -10,
}

impl ErrorCode {
    /// Numeric value as returned by the library.
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Look up a code by its numeric value.
    pub fn from_code(code: i32) -> Option<Self> {
        let code = match code {
            0 => Self::Success,
            -1 => Self::Insane,
            -2 => Self::NoConnect,
            -3 => Self::NoLogin,
            -4 => Self::Socket,
            -5 => Self::Malloc,
            -6 => Self::Metadata,
            -7 => Self::Connected,
            -8 => Self::Unconnected,
            -9 => Self::Unsupported,
            -10 => Self::Busy,
            _ => return None,
        };
        Some(code)
    }

    /// The library's default message for this code.
    pub fn description(self) -> &'static str {
        match self {
            Self::Success => "No error",
            Self::Insane => "Nonsensical arguments",
            Self::NoConnect => "Couldn't connect",
            Self::NoLogin => "Login failed",
            Self::Socket => "Socket error",
            Self::Malloc => "Out of memory",
            Self::Metadata => "Metadata error",
            Self::Connected => "Cannot set parameter while connected",
            Self::Unconnected => "Not connected",
            Self::Unsupported => "This libshout doesn't support the requested option",
            Self::Busy => "Socket is busy",
        }
    }

    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }

    /// Allocation failures leave the process in an unknown state.
    pub fn is_fatal(self) -> bool {
        matches!(self, Self::Malloc)
    }

    /// Codes that indicate the caller used the session out of order.
    pub fn is_misuse(self) -> bool {
        matches!(self, Self::Connected | Self::Unconnected)
    }

    /// Codes after which retrying the handshake may succeed.
    pub fn is_recoverable(self) -> bool {
        matches!(
            self,
            Self::NoConnect | Self::NoLogin | Self::Socket | Self::Busy
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.description(), self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [ErrorCode; 11] = [
        ErrorCode::Success,
        ErrorCode::Insane,
        ErrorCode::NoConnect,
        ErrorCode::NoLogin,
        ErrorCode::Socket,
        ErrorCode::Malloc,
        ErrorCode::Metadata,
        ErrorCode::Connected,
        ErrorCode::Unconnected,
        ErrorCode::Unsupported,
        ErrorCode::Busy,
    ];

    #[test]
    fn test_codes_match_library_values() {
        for (index, code) in ALL.iter().enumerate() {
            assert_eq!(code.code(), -(index as i32));
            assert_eq!(ErrorCode::from_code(code.code()), Some(*code));
        }
        assert_eq!(ErrorCode::from_code(1), None);
        assert_eq!(ErrorCode::from_code(-11), None);
    }

    #[test]
    fn test_classification() {
        assert!(ErrorCode::Success.is_success());
        assert!(ErrorCode::Malloc.is_fatal());
        assert!(ErrorCode::Connected.is_misuse());
        assert!(ErrorCode::Unconnected.is_misuse());
        assert!(ErrorCode::Socket.is_recoverable());
        assert!(ErrorCode::NoLogin.is_recoverable());
        assert!(!ErrorCode::Malloc.is_recoverable());
        assert!(!ErrorCode::Unsupported.is_recoverable());
    }

    #[test]
    fn test_display() {
        assert_eq!(ErrorCode::NoLogin.to_string(), "Login failed (-3)");
        assert_eq!(ErrorCode::Success.to_string(), "No error (0)");
    }
}
