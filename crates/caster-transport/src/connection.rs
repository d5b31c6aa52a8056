//! The exclusively owned protocol connection handle.

use std::sync::Arc;

use caster_types::{ErrorCode, SessionDescriptor};
use tracing::debug;

use crate::error::ShoutError;
use crate::library::{Library, ProtocolConnection};

/// A connection object allocated through a [`Library`].
///
/// Owned by exactly one streaming session. Dropping it frees the underlying
/// object and releases its slot in the library's live-handle count.
pub(crate) struct ConnectionHandle {
    raw: Box<dyn ProtocolConnection>,
    // Fields drop in declaration order: the object is freed before its
    // slot is released, so a shutdown never overtakes the free.
    slot: LiveSlot,
}

/// One unit of a library's live-handle count, released on drop.
struct LiveSlot {
    library: Arc<Library>,
}

impl Drop for LiveSlot {
    fn drop(&mut self) {
        self.library.release();
    }
}

impl ConnectionHandle {
    pub(crate) fn new(raw: Box<dyn ProtocolConnection>, library: Arc<Library>) -> Self {
        Self {
            raw,
            slot: LiveSlot { library },
        }
    }

    /// Copy every descriptor field into the connection object.
    pub(crate) fn apply_descriptor(
        &mut self,
        descriptor: &SessionDescriptor,
    ) -> Result<(), ShoutError> {
        debug!(
            host = %descriptor.host,
            port = descriptor.port,
            mount = %descriptor.mount,
            format = %descriptor.format,
            protocol = %descriptor.protocol,
            "Syncing connection parameters"
        );

        self.apply("host", |c| c.set_host(&descriptor.host))?;
        self.apply("port", |c| c.set_port(descriptor.port))?;
        self.apply("user", |c| c.set_user(&descriptor.user))?;
        self.apply("password", |c| c.set_password(&descriptor.password))?;
        self.apply("mount", |c| c.set_mount(&descriptor.mount))?;
        self.apply("format", |c| c.set_format(descriptor.format.code()))?;
        self.apply("protocol", |c| c.set_protocol(descriptor.protocol.code()))?;
        Ok(())
    }

    fn apply(
        &mut self,
        field: &'static str,
        set: impl FnOnce(&mut dyn ProtocolConnection) -> ErrorCode,
    ) -> Result<(), ShoutError> {
        let code = set(self.raw.as_mut());
        if code.is_success() {
            return Ok(());
        }

        debug!(field, code = code.code(), "Parameter rejected by library");
        Err(ShoutError::new(self.raw.error_message(), code))
    }

    pub(crate) fn open(&mut self) -> ErrorCode {
        self.raw.open()
    }

    pub(crate) fn close(&mut self) -> ErrorCode {
        self.raw.close()
    }

    /// Send a buffer. Empty buffers never reach the library.
    pub(crate) fn send(&mut self, data: &[u8]) -> ErrorCode {
        if data.is_empty() {
            return ErrorCode::Success;
        }
        self.raw.send(data)
    }

    pub(crate) fn sync(&mut self) {
        self.raw.sync();
    }

    pub(crate) fn errno(&self) -> ErrorCode {
        self.raw.errno()
    }

    pub(crate) fn error_message(&self) -> String {
        self.raw.error_message()
    }

    /// Wrap the current library status as an error.
    pub(crate) fn last_error(&self, code: ErrorCode) -> ShoutError {
        ShoutError::new(self.error_message(), code)
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("errno", &self.raw.errno())
            .field("library", &self.slot.library.backend.name())
            .finish()
    }
}
