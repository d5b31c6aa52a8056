//! Session descriptor and the enumerations it carries.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{DEFAULT_PORT, DEFAULT_USER};

/// Payload format of the stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// Ogg container (Vorbis, Opus, Theora).
    #[default]
    Ogg,

    /// MPEG-1 Layer III.
    Mp3,

    /// WebM container.
    Webm,
}

impl Format {
    /// Numeric code understood by the protocol library.
    pub fn code(self) -> u32 {
        match self {
            Self::Ogg => 0,
            Self::Mp3 => 1,
            Self::Webm => 2,
        }
    }

    /// Look up a format by its library code.
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(Self::Ogg),
            1 => Some(Self::Mp3),
            2 => Some(Self::Webm),
            _ => None,
        }
    }

    /// Returns the display name for this format.
    pub fn name(self) -> &'static str {
        match self {
            Self::Ogg => "Ogg",
            Self::Mp3 => "MP3",
            Self::Webm => "WebM",
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Wire protocol variant spoken to the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Icecast 2 HTTP source protocol.
    #[default]
    Http,

    /// Legacy Icecast 1 protocol.
    XAudioCast,

    /// Shoutcast ICY protocol.
    Icy,
}

impl Protocol {
    /// Numeric code understood by the protocol library.
    pub fn code(self) -> u32 {
        match self {
            Self::Http => 0,
            Self::XAudioCast => 1,
            Self::Icy => 2,
        }
    }

    /// Look up a protocol by its library code.
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(Self::Http),
            1 => Some(Self::XAudioCast),
            2 => Some(Self::Icy),
            _ => None,
        }
    }

    /// Returns the display name for this protocol.
    pub fn name(self) -> &'static str {
        match self {
            Self::Http => "HTTP",
            Self::XAudioCast => "XAudioCast",
            Self::Icy => "ICY",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Connection parameters for one streaming destination.
///
/// Nothing is validated here. Malformed values surface when the session
/// performs its handshake.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionDescriptor {
    /// Server address (host name, IPv4 or bracketed IPv6).
    ///
    /// Stored as given. The protocol library parses it during the
    /// handshake and reports a malformed address as `NoConnect`.
    pub host: String,

    /// Server port.
    pub port: u16,

    /// Source user name.
    pub user: String,

    /// Source password.
    pub password: String,

    /// Mount path the stream is published under (e.g. "/live").
    pub mount: String,

    /// Payload format.
    pub format: Format,

    /// Wire protocol variant.
    pub protocol: Protocol,

    /// Capacity of the hand-off channel. Zero means every write waits for
    /// the transmission loop to take the buffer.
    pub channel_capacity: usize,
}

impl Default for SessionDescriptor {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_PORT,
            user: DEFAULT_USER.to_string(),
            password: String::new(),
            mount: String::new(),
            format: Format::default(),
            protocol: Protocol::default(),
            channel_capacity: 0,
        }
    }
}

impl SessionDescriptor {
    /// Create a descriptor with the library defaults.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn set_host(&mut self, host: impl Into<String>) {
        self.host = host.into();
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn set_port(&mut self, port: u16) {
        self.port = port;
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn set_user(&mut self, user: impl Into<String>) {
        self.user = user.into();
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn set_password(&mut self, password: impl Into<String>) {
        self.password = password.into();
    }

    pub fn mount(&self) -> &str {
        &self.mount
    }

    pub fn set_mount(&mut self, mount: impl Into<String>) {
        self.mount = mount.into();
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn set_format(&mut self, format: Format) {
        self.format = format;
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn set_protocol(&mut self, protocol: Protocol) {
        self.protocol = protocol;
    }

    pub fn channel_capacity(&self) -> usize {
        self.channel_capacity
    }

    pub fn set_channel_capacity(&mut self, capacity: usize) {
        self.channel_capacity = capacity;
    }
}

// Keeps the password out of logs.
impl fmt::Debug for SessionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionDescriptor")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("mount", &self.mount)
            .field("format", &self.format)
            .field("protocol", &self.protocol)
            .field("channel_capacity", &self.channel_capacity)
            .finish()
    }
}
