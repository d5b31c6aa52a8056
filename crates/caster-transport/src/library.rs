//! Protocol library contract and its process-wide lifecycle.
//!
//! The wire protocol (handshake bytes, framing, metadata encoding) lives in
//! an external streaming-protocol library. [`ProtocolLibrary`] and
//! [`ProtocolConnection`] describe what the transport needs from it;
//! [`Library`] guards its global init/shutdown and counts the connection
//! handles allocated through it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use caster_types::ErrorCode;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::connection::ConnectionHandle;
use crate::error::{ShoutError, TransportError};
use crate::TransportResult;

/// Global entry points of a streaming protocol library.
pub trait ProtocolLibrary: Send + Sync {
    /// Process-wide initialization.
    fn init(&self);

    /// Process-wide teardown. Called at most once per `init`.
    fn shutdown(&self);

    /// Allocate a fresh, disconnected connection object.
    fn new_connection(&self) -> Result<Box<dyn ProtocolConnection>, ErrorCode>;

    /// Library name for diagnostics.
    fn name(&self) -> &'static str;
}

/// One connection object of the protocol library.
///
/// Setters borrow their arguments; implementations copy what they keep.
/// Dropping the object frees it.
pub trait ProtocolConnection: Send {
    fn set_host(&mut self, host: &str) -> ErrorCode;
    fn set_port(&mut self, port: u16) -> ErrorCode;
    fn set_user(&mut self, user: &str) -> ErrorCode;
    fn set_password(&mut self, password: &str) -> ErrorCode;
    fn set_mount(&mut self, mount: &str) -> ErrorCode;
    fn set_format(&mut self, format: u32) -> ErrorCode;
    fn set_protocol(&mut self, protocol: u32) -> ErrorCode;

    /// Connect and authenticate.
    fn open(&mut self) -> ErrorCode;

    /// Disconnect from the server.
    fn close(&mut self) -> ErrorCode;

    /// Send one media buffer. Never called with an empty slice.
    fn send(&mut self, data: &[u8]) -> ErrorCode;

    /// Block until it is time to send the next buffer, pacing the stream
    /// to its real-time bitrate.
    fn sync(&mut self);

    /// Status of the last operation.
    fn errno(&self) -> ErrorCode;

    /// Human-readable message for the last operation's status.
    fn error_message(&self) -> String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Uninitialized,
    Initialized,
    ShutDown,
}

/// Process-wide handle on a protocol library.
///
/// `initialize` and `shutdown` each reach the backend once per lifecycle.
/// After a shutdown the library can be initialized again.
pub struct Library {
    pub(crate) backend: Arc<dyn ProtocolLibrary>,
    lifecycle: Mutex<Lifecycle>,
    live_handles: AtomicUsize,
}

impl Library {
    /// Wrap a backend. Nothing is initialized yet.
    pub fn new(backend: Arc<dyn ProtocolLibrary>) -> Arc<Self> {
        Arc::new(Self {
            backend,
            lifecycle: Mutex::new(Lifecycle::Uninitialized),
            live_handles: AtomicUsize::new(0),
        })
    }

    /// Wrap a backend and initialize it.
    pub fn initialized(backend: Arc<dyn ProtocolLibrary>) -> Arc<Self> {
        let library = Self::new(backend);
        library.initialize();
        library
    }

    /// Initialize the backend. Repeated calls are no-ops.
    pub fn initialize(&self) {
        let mut lifecycle = self.lifecycle.lock();
        if *lifecycle == Lifecycle::Initialized {
            debug!(library = self.backend.name(), "Library already initialized");
            return;
        }

        self.backend.init();
        *lifecycle = Lifecycle::Initialized;
        info!(library = self.backend.name(), "Protocol library initialized");
    }

    /// Shut the backend down.
    ///
    /// Fails while connection handles are still allocated. Calling it on a
    /// library that is not initialized does nothing.
    pub fn shutdown(&self) -> TransportResult<()> {
        let mut lifecycle = self.lifecycle.lock();
        if *lifecycle != Lifecycle::Initialized {
            debug!(library = self.backend.name(), "Library not initialized, nothing to shut down");
            return Ok(());
        }

        let live = self.live_handles.load(Ordering::SeqCst);
        if live > 0 {
            warn!(live, "Refusing to shut down protocol library with live handles");
            return Err(TransportError::SessionsActive(live));
        }

        self.backend.shutdown();
        *lifecycle = Lifecycle::ShutDown;
        info!(library = self.backend.name(), "Protocol library shut down");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        *self.lifecycle.lock() == Lifecycle::Initialized
    }

    /// Number of connection handles currently allocated.
    pub fn live_handles(&self) -> usize {
        self.live_handles.load(Ordering::SeqCst)
    }

    /// Allocate a connection handle owned by the caller.
    pub(crate) fn allocate(self: &Arc<Self>) -> TransportResult<ConnectionHandle> {
        // Held across allocation so a concurrent shutdown sees the new handle.
        let lifecycle = self.lifecycle.lock();
        if *lifecycle != Lifecycle::Initialized {
            return Err(TransportError::LibraryNotInitialized);
        }

        let raw = self
            .backend
            .new_connection()
            .map_err(ShoutError::from_code)?;
        self.live_handles.fetch_add(1, Ordering::SeqCst);

        Ok(ConnectionHandle::new(raw, Arc::clone(self)))
    }

    /// Called when a handle is freed.
    pub(crate) fn release(&self) {
        self.live_handles.fetch_sub(1, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for Library {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Library")
            .field("backend", &self.backend.name())
            .field("lifecycle", &*self.lifecycle.lock())
            .field("live_handles", &self.live_handles())
            .finish()
    }
}
