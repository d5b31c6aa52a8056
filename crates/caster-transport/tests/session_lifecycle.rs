//! Integration tests: streaming session lifecycle against the simulated
//! protocol library.
//!
//! Run with `RUST_LOG=caster_transport=trace` and `--nocapture` to see the
//! transmission loop's per-buffer trace output.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use caster_transport::simulated::{SimulatedLibrary, SimulatedServer};
use caster_transport::{
    ErrorCode, Format, Library, Protocol, SessionDescriptor, SessionEvent, SessionState,
    StreamingSession, TransportError, BUFFER_SIZE,
};

/// Init tracing subscriber (idempotent across tests via try_init).
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// The descriptor from the reference scenario.
fn descriptor() -> SessionDescriptor {
    let mut descriptor = SessionDescriptor::new();
    descriptor.set_host("stream.example.com");
    descriptor.set_port(8000);
    descriptor.set_user("source");
    descriptor.set_password("hackme");
    descriptor.set_mount("/live");
    descriptor.set_format(Format::Mp3);
    descriptor.set_protocol(Protocol::Http);
    descriptor
}

fn library_for(server: &SimulatedServer) -> Arc<Library> {
    init_tracing();
    Library::initialized(Arc::new(SimulatedLibrary::new(server.clone())))
}

fn numbered_buffer(n: u32) -> Bytes {
    Bytes::from(format!("buffer-{n:04}").into_bytes())
}

#[test]
fn test_round_trip_scenario() {
    let server = SimulatedServer::new().with_credentials("source", "hackme");
    let library = library_for(&server);
    let mut session = StreamingSession::new(Arc::clone(&library), descriptor());

    let writer = session.open().expect("open should succeed");
    assert!(writer.is_open());
    assert_eq!(session.state(), SessionState::Open);

    writer.send(vec![0xABu8; BUFFER_SIZE]).unwrap();
    writer.send(Bytes::new()).unwrap();

    session.close().expect("close should succeed");
    assert_eq!(session.state(), SessionState::Closed);

    let received = server.received();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].len(), BUFFER_SIZE);

    let stats = session.statistics();
    assert_eq!(stats.buffers_sent, 1);
    assert_eq!(stats.bytes_sent, BUFFER_SIZE as u64);
    assert_eq!(stats.empty_buffers, 1);
    assert_eq!(stats.send_failures, 0);
    assert!(session.last_send_error().is_none());
}

#[test]
fn test_double_open_reports_already_connected() {
    let server = SimulatedServer::new();
    let library = library_for(&server);
    let mut session = StreamingSession::new(library, descriptor());

    let writer = session.open().unwrap();

    for _ in 0..2 {
        let error = session.open().unwrap_err();
        assert_eq!(error.code(), Some(ErrorCode::Connected));
    }

    assert_eq!(session.state(), SessionState::Open);
    assert_eq!(session.statistics().loops_started, 1);
    assert_eq!(server.handshakes().len(), 1);

    writer.send(numbered_buffer(1)).unwrap();
    session.close().unwrap();
    assert_eq!(server.received(), vec![numbered_buffer(1)]);
}

#[test]
fn test_buffers_arrive_in_order() {
    let server = SimulatedServer::new();
    let library = library_for(&server);
    let mut session = StreamingSession::new(library, descriptor());
    let writer = session.open().unwrap();

    let expected: Vec<Bytes> = (0..200).map(numbered_buffer).collect();
    for buffer in &expected {
        writer.send(buffer.clone()).unwrap();
    }
    session.close().unwrap();

    assert_eq!(server.received(), expected);
    assert_eq!(session.statistics().buffers_sent, 200);
}

#[test]
fn test_lazy_init_is_idempotent() {
    let server = SimulatedServer::new();
    let library = library_for(&server);
    let mut session = StreamingSession::new(Arc::clone(&library), descriptor());
    assert!(!session.is_initialized());

    for _ in 0..5 {
        session.lazy_init().unwrap();
    }

    assert!(session.is_initialized());
    assert_eq!(server.allocations(), 1);
    assert_eq!(library.live_handles(), 1);
}

#[test]
fn test_get_error_before_open() {
    let server = SimulatedServer::new();
    let library = library_for(&server);
    let mut session = StreamingSession::new(library, descriptor());

    assert_eq!(session.get_error(), "No error");
    assert!(session.is_initialized());
    assert_eq!(session.state(), SessionState::Idle);
}

#[test]
fn test_close_never_opened_session() {
    let server = SimulatedServer::new();
    let library = library_for(&server);
    let mut session = StreamingSession::new(library, descriptor());

    let error = session.close().unwrap_err();
    assert_eq!(error.code(), Some(ErrorCode::Unconnected));
    assert_eq!(error.to_string(), "Not connected (-8)");
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(server.closes(), 0);
}

#[test]
fn test_shutdown_after_sessions_freed() {
    let server = SimulatedServer::new();
    let library = library_for(&server);

    let mut session = StreamingSession::new(Arc::clone(&library), descriptor());
    session.open().unwrap();
    session.close().unwrap();
    session.free();

    assert_eq!(server.frees(), 1);
    library.shutdown().unwrap();
    library.shutdown().unwrap();
    assert_eq!(server.shutdown_calls(), 1);
}

#[test]
fn test_free_without_allocation() {
    let server = SimulatedServer::new();
    let library = library_for(&server);

    let session = StreamingSession::new(Arc::clone(&library), descriptor());
    session.free();

    assert_eq!(server.allocations(), 0);
    assert_eq!(server.frees(), 0);
    assert_eq!(library.live_handles(), 0);
}

#[test]
fn test_send_failure_is_observable() {
    let server = SimulatedServer::new();
    server.fail_send(2);
    let library = library_for(&server);
    let mut session = StreamingSession::new(library, descriptor());
    let events = session.events();
    let writer = session.open().unwrap();

    for n in 1..=3 {
        writer.send(numbered_buffer(n)).unwrap();
    }
    session.close().unwrap();

    // The loop kept going after the failure.
    assert_eq!(server.received(), vec![numbered_buffer(1), numbered_buffer(3)]);

    let stats = session.statistics();
    assert_eq!(stats.buffers_sent, 2);
    assert_eq!(stats.send_failures, 1);

    let error = session.last_send_error().expect("failure should be recorded");
    assert_eq!(error.code, ErrorCode::Socket);
    assert_eq!(error.to_string(), "Socket error (-4)");

    let failure = events
        .try_iter()
        .find(|e| matches!(e, SessionEvent::SendFailed { .. }))
        .expect("failure event should be published");
    assert_eq!(
        failure,
        SessionEvent::SendFailed {
            sequence: 2,
            code: ErrorCode::Socket,
            message: "Socket error".to_string(),
            bytes: numbered_buffer(2).len(),
        }
    );

    assert!(session.take_last_send_error().is_some());
    assert!(session.last_send_error().is_none());
}

#[test]
fn test_writer_rejected_after_close() {
    let server = SimulatedServer::new();
    let library = library_for(&server);
    let mut session = StreamingSession::new(library, descriptor());
    let events = session.events();
    let writer = session.open().unwrap();

    session.close().unwrap();

    assert!(!writer.is_open());
    assert!(matches!(
        writer.send(numbered_buffer(1)),
        Err(TransportError::NotConnected)
    ));
    assert!(matches!(
        writer.try_send(numbered_buffer(1)),
        Err(TransportError::NotConnected)
    ));
    assert!(matches!(session.writer(), Err(TransportError::NotConnected)));
    assert!(events
        .try_iter()
        .any(|e| matches!(e, SessionEvent::TransmissionStopped { .. })));
}

#[test]
fn test_concurrent_producer_loses_nothing_on_close() {
    let server = SimulatedServer::new();
    let library = library_for(&server);
    let mut session = StreamingSession::new(library, descriptor());
    let writer = session.open().unwrap();

    let producer = thread::spawn(move || {
        let mut accepted = Vec::new();
        for n in 0.. {
            let buffer = numbered_buffer(n);
            match writer.send(buffer.clone()) {
                Ok(()) => accepted.push(buffer),
                Err(TransportError::NotConnected) => break,
                Err(e) => panic!("unexpected writer error: {e}"),
            }
        }
        accepted
    });

    thread::sleep(Duration::from_millis(50));
    session.close().unwrap();

    let accepted = producer.join().unwrap();
    assert!(!accepted.is_empty());
    assert_eq!(server.received(), accepted);
}

#[test]
fn test_buffered_channel_drains_on_close() {
    // 64 kbps: each 80-byte buffer takes 10 ms to pace out.
    let server = SimulatedServer::new().with_bitrate(64);
    let library = library_for(&server);
    let mut descriptor = descriptor();
    descriptor.set_channel_capacity(16);
    let mut session = StreamingSession::new(library, descriptor);
    let writer = session.open().unwrap();

    let expected: Vec<Bytes> = (0..10).map(|n| Bytes::from(vec![n as u8; 80])).collect();
    for buffer in &expected {
        writer.send(buffer.clone()).unwrap();
    }
    session.close().unwrap();

    assert_eq!(server.received(), expected);
    assert_eq!(server.sync_calls(), 10);
}

#[test]
fn test_shutdown_refused_while_session_alive() {
    let server = SimulatedServer::new();
    let library = library_for(&server);
    let mut session = StreamingSession::new(Arc::clone(&library), descriptor());
    session.open().unwrap();

    assert!(matches!(
        library.shutdown(),
        Err(TransportError::SessionsActive(1))
    ));

    // Closing keeps the handle; only freeing releases it.
    session.close().unwrap();
    assert_eq!(library.live_handles(), 1);

    session.free();
    library.shutdown().unwrap();
    assert_eq!(server.shutdown_calls(), 1);
}

#[test]
fn test_failed_handshake_can_be_retried() {
    let server = SimulatedServer::new();
    server.set_busy(true);
    let library = library_for(&server);
    let mut session = StreamingSession::new(library, descriptor());

    let error = session.open().unwrap_err();
    assert_eq!(error.code(), Some(ErrorCode::Busy));
    assert!(ErrorCode::Busy.is_recoverable());
    assert_eq!(
        session.state(),
        SessionState::Failed {
            reason: "Socket is busy (-10)".to_string()
        }
    );
    assert_eq!(session.get_error(), "Socket is busy");

    server.set_busy(false);
    session.open().unwrap();
    assert!(session.is_open());
    assert_eq!(server.allocations(), 1);
}

#[test]
fn test_wrong_credentials() {
    let server = SimulatedServer::new().with_credentials("source", "letmein");
    let library = library_for(&server);
    let mut session = StreamingSession::new(library, descriptor());

    let error = session.open().unwrap_err();
    assert_eq!(error.code(), Some(ErrorCode::NoLogin));
    assert_eq!(error.to_string(), "Login failed (-3)");
    assert_eq!(session.statistics().loops_started, 0);
}

#[test]
fn test_malformed_host_surfaces_on_open() {
    let server = SimulatedServer::new();
    let library = library_for(&server);
    let mut descriptor = descriptor();
    descriptor.set_host("exa mple.com");
    let mut session = StreamingSession::new(library, descriptor);

    // Accepted until the handshake parses it.
    session.lazy_init().unwrap();
    let error = session.open().unwrap_err();
    assert_eq!(error.code(), Some(ErrorCode::NoConnect));
    assert_eq!(error.to_string(), "Couldn't connect (-2)");
}

#[test]
fn test_descriptor_frozen_after_init() {
    let server = SimulatedServer::new();
    let library = library_for(&server);
    let mut session = StreamingSession::new(library, SessionDescriptor::new());

    {
        let descriptor = session.descriptor_mut().unwrap();
        descriptor.set_host("radio.local");
        descriptor.set_password("hackme");
        descriptor.set_mount("/jazz");
    }
    session.lazy_init().unwrap();

    assert!(matches!(
        session.descriptor_mut(),
        Err(TransportError::DescriptorFrozen)
    ));

    session.open().unwrap();
    let params = server.handshakes().pop().unwrap();
    assert_eq!(params.host, "radio.local");
    assert_eq!(params.mount, "/jazz");
}

#[test]
fn test_reopen_after_close() {
    let server = SimulatedServer::new();
    let library = library_for(&server);
    let mut session = StreamingSession::new(library, descriptor());

    let writer = session.open().unwrap();
    writer.send(numbered_buffer(1)).unwrap();
    session.close().unwrap();

    let writer = session.open().unwrap();
    writer.send(numbered_buffer(2)).unwrap();
    session.close().unwrap();

    assert_eq!(server.received(), vec![numbered_buffer(1), numbered_buffer(2)]);
    assert_eq!(server.handshakes().len(), 2);
    assert_eq!(server.allocations(), 1);
    assert_eq!(session.statistics().loops_started, 2);
}

#[test]
fn test_writer_from_earlier_open_stays_closed() {
    let server = SimulatedServer::new();
    let library = library_for(&server);
    let mut session = StreamingSession::new(library, descriptor());

    let first = session.open().unwrap();
    first.send(numbered_buffer(1)).unwrap();
    session.close().unwrap();

    let second = session.open().unwrap();
    assert!(!first.is_open());
    assert!(matches!(
        first.send(numbered_buffer(99)),
        Err(TransportError::NotConnected)
    ));
    assert!(matches!(
        first.try_send(numbered_buffer(99)),
        Err(TransportError::NotConnected)
    ));

    assert!(second.is_open());
    second.send(numbered_buffer(2)).unwrap();
    session.close().unwrap();

    assert_eq!(server.received(), vec![numbered_buffer(1), numbered_buffer(2)]);
}

#[test]
fn test_state_change_events() {
    let server = SimulatedServer::new();
    let library = library_for(&server);
    let mut session = StreamingSession::new(library, descriptor());
    let events = session.events();

    session.open().unwrap();
    session.close().unwrap();

    let transitions: Vec<(SessionState, SessionState)> = events
        .try_iter()
        .filter_map(|e| match e {
            SessionEvent::StateChanged { previous, current } => Some((previous, current)),
            _ => None,
        })
        .collect();

    assert_eq!(
        transitions,
        vec![
            (SessionState::Idle, SessionState::Open),
            (SessionState::Open, SessionState::Closing),
            (SessionState::Closing, SessionState::Closed),
        ]
    );
}

#[test]
fn test_library_not_initialized() {
    init_tracing();
    let server = SimulatedServer::new();
    let library = Library::new(Arc::new(SimulatedLibrary::new(server.clone())));
    let mut session = StreamingSession::new(library, descriptor());

    assert!(matches!(
        session.open(),
        Err(TransportError::LibraryNotInitialized)
    ));
    assert_eq!(session.get_error(), "Protocol library is not initialized");
    assert!(!session.is_initialized());
    assert_eq!(server.allocations(), 0);
}

#[test]
fn test_drop_closes_open_session() {
    let server = SimulatedServer::new();
    let library = library_for(&server);
    let mut session = StreamingSession::new(Arc::clone(&library), descriptor());
    let writer = session.open().unwrap();
    writer.send(numbered_buffer(7)).unwrap();

    drop(session);

    assert_eq!(server.closes(), 1);
    assert_eq!(server.frees(), 1);
    assert_eq!(library.live_handles(), 0);
    assert!(!writer.is_open());
    assert_eq!(server.received(), vec![numbered_buffer(7)]);
}

#[test]
fn test_drop_frees_handle_when_close_fails() {
    let server = SimulatedServer::new();
    server.fail_close(true);
    let library = library_for(&server);
    let mut session = StreamingSession::new(Arc::clone(&library), descriptor());
    let writer = session.open().unwrap();
    writer.send(numbered_buffer(1)).unwrap();

    drop(session);

    assert_eq!(server.closes(), 1);
    assert_eq!(server.frees(), 1);
    assert_eq!(library.live_handles(), 0);
    assert!(!writer.is_open());
    library.shutdown().unwrap();
}

#[test]
fn test_late_subscriber_sees_how_session_ended() {
    const FAILING_SENDS: u32 = 400;

    let server = SimulatedServer::new();
    for nth in 1..=u64::from(FAILING_SENDS) {
        server.fail_send(nth);
    }
    let library = library_for(&server);
    let mut session = StreamingSession::new(library, descriptor());
    let writer = session.open().unwrap();

    for n in 1..=FAILING_SENDS {
        writer.send(numbered_buffer(n)).unwrap();
    }
    session.close().unwrap();
    assert_eq!(session.statistics().send_failures, u64::from(FAILING_SENDS));

    // Nobody drained the events while streaming.
    let events: Vec<SessionEvent> = session.events().try_iter().collect();
    assert_eq!(events.len(), caster_types::EVENT_CHANNEL_CAPACITY);

    let last_failed = events.iter().rev().find_map(|e| match e {
        SessionEvent::SendFailed { sequence, .. } => Some(*sequence),
        _ => None,
    });
    assert_eq!(last_failed, Some(u64::from(FAILING_SENDS)));

    assert!(events.contains(&SessionEvent::TransmissionStopped {
        buffers_sent: 0,
        bytes_sent: 0,
    }));
    assert_eq!(
        events.last(),
        Some(&SessionEvent::StateChanged {
            previous: SessionState::Closing,
            current: SessionState::Closed,
        })
    );
}
