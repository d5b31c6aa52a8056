//! Background transmission loop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use caster_types::SessionEvent;
use crossbeam_channel::{select, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::connection::ConnectionHandle;
use crate::error::ShoutError;

/// Transmission statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransmitStatistics {
    /// Buffers the library accepted.
    pub buffers_sent: u64,

    /// Bytes the library accepted.
    pub bytes_sent: u64,

    /// Buffers the library rejected.
    pub send_failures: u64,

    /// Zero-length buffers skipped.
    pub empty_buffers: u64,

    /// Transmission loops started over the session's lifetime.
    pub loops_started: u64,
}

/// Counters shared between a session and its transmission loop.
#[derive(Debug, Default)]
pub(crate) struct TransmitCounters {
    buffers_sent: AtomicU64,
    bytes_sent: AtomicU64,
    send_failures: AtomicU64,
    empty_buffers: AtomicU64,
    loops_started: AtomicU64,
    sequence: AtomicU64,
}

impl TransmitCounters {
    pub(crate) fn record_loop_started(&self) {
        self.loops_started.fetch_add(1, Ordering::Relaxed);
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn snapshot(&self) -> TransmitStatistics {
        TransmitStatistics {
            buffers_sent: self.buffers_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            empty_buffers: self.empty_buffers.load(Ordering::Relaxed),
            loops_started: self.loops_started.load(Ordering::Relaxed),
        }
    }
}

/// Everything the loop thread owns or shares with its session.
pub(crate) struct TransmitContext {
    pub(crate) handle: Arc<Mutex<ConnectionHandle>>,
    pub(crate) buffers: Receiver<Bytes>,
    pub(crate) shutdown: Receiver<()>,
    pub(crate) counters: Arc<TransmitCounters>,
    pub(crate) last_error: Arc<Mutex<Option<ShoutError>>>,
    pub(crate) events: EventPublisher,
}

/// Per-loop totals, reported when the loop exits.
#[derive(Default)]
struct LoopTotals {
    buffers_sent: u64,
    bytes_sent: u64,
}

/// Drain the hand-off channel until the shutdown signal fires or every
/// sender is gone.
///
/// The shutdown signal is a channel that never carries a message; the
/// session drops its sender to fire it. Buffers already in the hand-off
/// channel at that point are still transmitted.
pub(crate) fn run_transmission_loop(ctx: TransmitContext) {
    debug!("Transmission loop starting");
    let mut totals = LoopTotals::default();

    loop {
        select! {
            recv(ctx.buffers) -> msg => match msg {
                Ok(buffer) => transmit(&ctx, &mut totals, buffer),
                Err(_) => {
                    debug!("Hand-off channel disconnected");
                    break;
                }
            },
            recv(ctx.shutdown) -> _ => {
                let mut drained = 0usize;
                while let Ok(buffer) = ctx.buffers.try_recv() {
                    transmit(&ctx, &mut totals, buffer);
                    drained += 1;
                }
                debug!(drained, "Shutdown signalled, hand-off channel drained");
                break;
            }
        }
    }

    info!(
        buffers_sent = totals.buffers_sent,
        bytes_sent = totals.bytes_sent,
        "Transmission loop stopped"
    );
    ctx.events.publish(SessionEvent::TransmissionStopped {
        buffers_sent: totals.buffers_sent,
        bytes_sent: totals.bytes_sent,
    });
}

fn transmit(ctx: &TransmitContext, totals: &mut LoopTotals, buffer: Bytes) {
    let sequence = ctx.counters.next_sequence();

    if buffer.is_empty() {
        trace!(sequence, "Skipping empty buffer");
        ctx.counters.empty_buffers.fetch_add(1, Ordering::Relaxed);
        return;
    }

    let failure = {
        let mut handle = ctx.handle.lock();
        handle.send(&buffer);
        let code = handle.errno();
        (!code.is_success()).then(|| handle.last_error(code))
    };

    match failure {
        None => {
            trace!(sequence, bytes = buffer.len(), "Buffer sent");
            ctx.counters.buffers_sent.fetch_add(1, Ordering::Relaxed);
            ctx.counters
                .bytes_sent
                .fetch_add(buffer.len() as u64, Ordering::Relaxed);
            totals.buffers_sent += 1;
            totals.bytes_sent += buffer.len() as u64;
        }
        Some(error) => {
            warn!(
                sequence,
                bytes = buffer.len(),
                code = error.code.code(),
                "Send failed: {}",
                error
            );
            ctx.counters.send_failures.fetch_add(1, Ordering::Relaxed);
            ctx.events.publish(SessionEvent::SendFailed {
                sequence,
                code: error.code,
                message: error.message.clone(),
                bytes: buffer.len(),
            });
            *ctx.last_error.lock() = Some(error);
        }
    }

    // Blocks for the pacing delay.
    ctx.handle.lock().sync();
}

/// Bounded session event queue that keeps the most recent events.
///
/// When the queue is full the oldest event is discarded to make room, so a
/// subscriber that drains late still sees how the session ended.
#[derive(Debug, Clone)]
pub(crate) struct EventPublisher {
    tx: Sender<SessionEvent>,
    rx: Receiver<SessionEvent>,
}

impl EventPublisher {
    pub(crate) fn new((tx, rx): (Sender<SessionEvent>, Receiver<SessionEvent>)) -> Self {
        Self { tx, rx }
    }

    pub(crate) fn subscribe(&self) -> Receiver<SessionEvent> {
        self.rx.clone()
    }

    pub(crate) fn publish(&self, event: SessionEvent) {
        let mut event = event;
        loop {
            match self.tx.try_send(event) {
                Ok(()) => return,
                Err(TrySendError::Full(returned)) => {
                    if let Ok(dropped) = self.rx.try_recv() {
                        trace!(?dropped, "Event queue full, dropped oldest event");
                    }
                    event = returned;
                }
                Err(TrySendError::Disconnected(_)) => {
                    warn!("Failed to publish session event: channel disconnected");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use caster_types::{ErrorCode, SessionState};

    fn send_failed(sequence: u64) -> SessionEvent {
        SessionEvent::SendFailed {
            sequence,
            code: ErrorCode::Socket,
            message: ErrorCode::Socket.description().to_string(),
            bytes: 4,
        }
    }

    #[test]
    fn test_full_queue_drops_oldest_event() {
        let events = EventPublisher::new(crossbeam_channel::bounded(2));
        events.publish(send_failed(1));
        events.publish(send_failed(2));
        events.publish(SessionEvent::StateChanged {
            previous: SessionState::Closing,
            current: SessionState::Closed,
        });

        let received: Vec<_> = events.subscribe().try_iter().collect();
        assert_eq!(
            received,
            vec![
                send_failed(2),
                SessionEvent::StateChanged {
                    previous: SessionState::Closing,
                    current: SessionState::Closed,
                },
            ]
        );
    }
}
