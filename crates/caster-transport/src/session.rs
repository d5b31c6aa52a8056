//! Streaming session: connection lifecycle and producer hand-off.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use bytes::Bytes;
use caster_types::{event_channel, ErrorCode, SessionDescriptor, SessionEvent, SessionState};
use crossbeam_channel::{Receiver, SendTimeoutError, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, instrument, warn};

use crate::connection::ConnectionHandle;
use crate::error::{ShoutError, TransportError};
use crate::library::Library;
use crate::transmit::{
    run_transmission_loop, EventPublisher, TransmitContext, TransmitCounters, TransmitStatistics,
};
use crate::{TransportResult, WRITER_POLL_INTERVAL};

/// Write-only end of a session's hand-off channel.
///
/// Buffers are transmitted in the order they are written. A writer belongs
/// to one `open`: once the session closes it keeps returning
/// `NotConnected`, even if the session is opened again.
#[derive(Debug, Clone)]
pub struct StreamWriter {
    sender: Sender<Bytes>,
    state: Arc<RwLock<SessionState>>,
    current_open: Arc<AtomicU64>,
    open_generation: u64,
}

impl StreamWriter {
    /// Hand a buffer to the transmission loop, waiting until it is taken.
    ///
    /// Returns `NotConnected` as soon as the session stops accepting
    /// buffers, so a producer never waits on a closed session.
    pub fn send(&self, buffer: impl Into<Bytes>) -> TransportResult<()> {
        let mut buffer = buffer.into();

        loop {
            // Held across the attempt: close() cannot start draining while a
            // buffer is on its way into the channel.
            let state = self.state.read();
            if !self.accepts(&state) {
                return Err(TransportError::NotConnected);
            }

            match self.sender.send_timeout(buffer, WRITER_POLL_INTERVAL) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Timeout(returned)) => buffer = returned,
                Err(SendTimeoutError::Disconnected(_)) => {
                    return Err(TransportError::ChannelDisconnected)
                }
            }
        }
    }

    /// Hand a buffer over without waiting. Returns `Ok(false)` if the
    /// transmission loop is busy.
    pub fn try_send(&self, buffer: impl Into<Bytes>) -> TransportResult<bool> {
        let state = self.state.read();
        if !self.accepts(&state) {
            return Err(TransportError::NotConnected);
        }

        match self.sender.try_send(buffer.into()) {
            Ok(()) => Ok(true),
            Err(TrySendError::Full(_)) => Ok(false),
            Err(TrySendError::Disconnected(_)) => Err(TransportError::ChannelDisconnected),
        }
    }

    /// Check if the session still accepts buffers.
    pub fn is_open(&self) -> bool {
        self.accepts(&self.state.read())
    }

    fn accepts(&self, state: &SessionState) -> bool {
        state.is_open() && self.current_open.load(Ordering::SeqCst) == self.open_generation
    }
}

/// One live connection to a streaming server and its transmission loop.
///
/// The connection handle and the hand-off channel are created lazily, on
/// the first call that needs them, and live as long as the session.
pub struct StreamingSession {
    descriptor: SessionDescriptor,
    library: Arc<Library>,
    handle: Option<Arc<Mutex<ConnectionHandle>>>,
    hand_off: Option<(Sender<Bytes>, Receiver<Bytes>)>,
    state: Arc<RwLock<SessionState>>,
    // Bumped by every successful open.
    open_generation: Arc<AtomicU64>,
    shutdown_tx: Option<Sender<()>>,
    transmit_thread: Option<JoinHandle<()>>,
    counters: Arc<TransmitCounters>,
    last_error: Arc<Mutex<Option<ShoutError>>>,
    events: EventPublisher,
}

impl StreamingSession {
    /// Create a session. No resources are allocated until first use.
    pub fn new(library: Arc<Library>, descriptor: SessionDescriptor) -> Self {
        Self {
            descriptor,
            library,
            handle: None,
            hand_off: None,
            state: Arc::new(RwLock::new(SessionState::Idle)),
            open_generation: Arc::new(AtomicU64::new(0)),
            shutdown_tx: None,
            transmit_thread: None,
            counters: Arc::new(TransmitCounters::default()),
            last_error: Arc::new(Mutex::new(None)),
            events: EventPublisher::new(event_channel()),
        }
    }

    /// Allocate the connection handle, copy the descriptor into it and
    /// create the hand-off channel. Does nothing if already done.
    pub fn lazy_init(&mut self) -> TransportResult<()> {
        if self.handle.is_some() {
            return Ok(());
        }

        let mut handle = self.library.allocate()?;
        // On failure the handle is dropped here, which frees it.
        handle.apply_descriptor(&self.descriptor)?;

        self.hand_off = Some(crossbeam_channel::bounded(
            self.descriptor.channel_capacity,
        ));
        self.handle = Some(Arc::new(Mutex::new(handle)));

        debug!(
            capacity = self.descriptor.channel_capacity,
            "Connection handle allocated"
        );
        Ok(())
    }

    /// Check whether the connection handle exists.
    pub fn is_initialized(&self) -> bool {
        self.handle.is_some()
    }

    /// Connect to the server and start transmitting.
    ///
    /// Opening an open session fails with the library's `Connected` code
    /// and leaves the running transmission loop alone.
    #[instrument(
        name = "session_open",
        skip(self),
        fields(host = %self.descriptor.host, port = self.descriptor.port, mount = %self.descriptor.mount)
    )]
    pub fn open(&mut self) -> TransportResult<StreamWriter> {
        self.lazy_init()?;
        let handle = self.connection()?;

        info!("Connecting to streaming server");
        let failure = {
            let mut conn = handle.lock();
            let code = conn.open();
            (!code.is_success()).then(|| conn.last_error(code))
        };

        if let Some(error) = failure {
            warn!(code = error.code.code(), "Handshake failed: {}", error);
            if error.code != ErrorCode::Connected {
                self.transition_to(SessionState::Failed {
                    reason: error.to_string(),
                });
            }
            return Err(error.into());
        }

        self.open_generation.fetch_add(1, Ordering::SeqCst);
        self.transition_to(SessionState::Open);

        if self.transmit_thread.is_none() {
            if let Err(e) = self.spawn_transmission_loop(handle) {
                error!("Failed to start transmission loop: {}", e);
                let _ = self.connection()?.lock().close();
                self.transition_to(SessionState::Failed {
                    reason: e.to_string(),
                });
                return Err(e);
            }
        }

        info!("Connected, transmission started");
        self.writer()
    }

    /// Stop accepting buffers, let the transmission loop drain and exit,
    /// then close the connection.
    #[instrument(name = "session_close", skip(self))]
    pub fn close(&mut self) -> TransportResult<()> {
        self.lazy_init()?;

        let was_open = self.state.read().is_open();
        if was_open {
            self.transition_to(SessionState::Closing);
        }
        self.stop_transmission_loop();

        let handle = self.connection()?;
        let failure = {
            let mut conn = handle.lock();
            let code = conn.close();
            (!code.is_success()).then(|| conn.last_error(code))
        };

        if let Some(error) = failure {
            warn!(code = error.code.code(), "Close failed: {}", error);
            if was_open {
                self.transition_to(SessionState::Failed {
                    reason: error.to_string(),
                });
            }
            return Err(error.into());
        }

        self.transition_to(SessionState::Closed);
        info!("Disconnected from streaming server");
        Ok(())
    }

    /// The library's current error message. Safe to call before `open`.
    pub fn get_error(&mut self) -> String {
        if let Err(e) = self.lazy_init() {
            return e.to_string();
        }

        match self.handle {
            Some(ref handle) => handle.lock().error_message(),
            None => ErrorCode::Success.description().to_string(),
        }
    }

    /// Release the session and its connection handle.
    ///
    /// An open session is closed first. A session that never allocated a
    /// handle has nothing to free.
    pub fn free(self) {
        drop(self);
    }

    /// A new write handle, while the session is open.
    pub fn writer(&self) -> TransportResult<StreamWriter> {
        if !self.state.read().is_open() {
            return Err(TransportError::NotConnected);
        }

        let (sender, _) = self
            .hand_off
            .as_ref()
            .ok_or(TransportError::NotConnected)?;

        Ok(StreamWriter {
            sender: sender.clone(),
            state: Arc::clone(&self.state),
            current_open: Arc::clone(&self.open_generation),
            open_generation: self.open_generation.load(Ordering::SeqCst),
        })
    }

    /// Get the current session state.
    pub fn state(&self) -> SessionState {
        self.state.read().clone()
    }

    /// Check if open.
    pub fn is_open(&self) -> bool {
        self.state.read().is_open()
    }

    /// The most recent per-buffer send failure.
    pub fn last_send_error(&self) -> Option<ShoutError> {
        self.last_error.lock().clone()
    }

    /// Take the most recent send failure, clearing it.
    pub fn take_last_send_error(&self) -> Option<ShoutError> {
        self.last_error.lock().take()
    }

    /// Get transmission statistics.
    pub fn statistics(&self) -> TransmitStatistics {
        self.counters.snapshot()
    }

    /// Receiver for state changes and send failures. Holds the most recent
    /// events; older ones are discarded when nobody drains it.
    pub fn events(&self) -> Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn descriptor(&self) -> &SessionDescriptor {
        &self.descriptor
    }

    /// Mutable access to the descriptor, until the connection handle exists.
    pub fn descriptor_mut(&mut self) -> TransportResult<&mut SessionDescriptor> {
        if self.handle.is_some() {
            return Err(TransportError::DescriptorFrozen);
        }
        Ok(&mut self.descriptor)
    }

    fn connection(&self) -> TransportResult<Arc<Mutex<ConnectionHandle>>> {
        self.handle.clone().ok_or(TransportError::NotConnected)
    }

    fn spawn_transmission_loop(
        &mut self,
        handle: Arc<Mutex<ConnectionHandle>>,
    ) -> TransportResult<()> {
        let (_, buffers) = self
            .hand_off
            .as_ref()
            .ok_or(TransportError::NotConnected)?;
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(0);

        let ctx = TransmitContext {
            handle,
            buffers: buffers.clone(),
            shutdown: shutdown_rx,
            counters: Arc::clone(&self.counters),
            last_error: Arc::clone(&self.last_error),
            events: self.events.clone(),
        };

        let thread = thread::Builder::new()
            .name("caster-transmit".to_string())
            .spawn(move || run_transmission_loop(ctx))
            .map_err(TransportError::Thread)?;

        self.counters.record_loop_started();
        self.shutdown_tx = Some(shutdown_tx);
        self.transmit_thread = Some(thread);
        Ok(())
    }

    fn stop_transmission_loop(&mut self) {
        // Dropping the sender is the shutdown signal.
        self.shutdown_tx = None;

        if let Some(thread) = self.transmit_thread.take() {
            if thread.join().is_err() {
                error!("Transmission thread panicked");
            }
        }
    }

    fn transition_to(&self, new_state: SessionState) {
        let previous = {
            let mut state = self.state.write();
            std::mem::replace(&mut *state, new_state.clone())
        };

        debug!(
            previous = %previous.name(),
            current = %new_state.name(),
            "State transition"
        );

        self.events.publish(SessionEvent::StateChanged {
            previous,
            current: new_state,
        });
    }
}

impl Drop for StreamingSession {
    fn drop(&mut self) {
        let open = self.state.read().is_open();
        if open {
            if let Err(e) = self.close() {
                warn!("Close on drop failed: {}", e);
            }
        }
        self.stop_transmission_loop();
    }
}

impl std::fmt::Debug for StreamingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingSession")
            .field("descriptor", &self.descriptor)
            .field("state", &*self.state.read())
            .field("initialized", &self.handle.is_some())
            .field("transmitting", &self.transmit_thread.is_some())
            .finish()
    }
}
