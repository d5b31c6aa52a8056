//! In-process stand-in for the streaming protocol library.
//!
//! [`SimulatedLibrary`] follows the status-code rules of the real library
//! without touching the network. Every connection it hands out reports to a
//! shared [`SimulatedServer`], which records what a real server would have
//! seen and lets tests inject failures.

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use caster_types::{ErrorCode, Format, Protocol, DEFAULT_PORT, DEFAULT_USER};
use parking_lot::Mutex;
use tracing::trace;

use crate::library::{ProtocolConnection, ProtocolLibrary};

/// Parameters a connection presented during its handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeParams {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub mount: String,
    pub format: u32,
    pub protocol: u32,
}

impl Default for HandshakeParams {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_PORT,
            user: DEFAULT_USER.to_string(),
            password: String::new(),
            mount: String::new(),
            format: Format::default().code(),
            protocol: Protocol::default().code(),
        }
    }
}

#[derive(Debug, Default)]
struct ServerLog {
    init_calls: usize,
    shutdown_calls: usize,
    allocations: usize,
    frees: usize,
    handshakes: Vec<HandshakeParams>,
    received: Vec<Bytes>,
    send_calls: u64,
    sync_calls: usize,
    closes: usize,

    reachable_hosts: Option<HashSet<String>>,
    credentials: Option<(String, String)>,
    bitrate_kbps: Option<u32>,
    busy: bool,
    fail_allocations: bool,
    failing_sends: HashSet<u64>,
    fail_close: bool,
}

/// Shared record of everything the simulated library was asked to do.
#[derive(Debug, Clone, Default)]
pub struct SimulatedServer {
    log: Arc<Mutex<ServerLog>>,
}

impl SimulatedServer {
    /// A server that accepts any host and any credentials.
    pub fn new() -> Self {
        Self::default()
    }

    /// Only accept this user/password pair.
    pub fn with_credentials(self, user: &str, password: &str) -> Self {
        self.log.lock().credentials = Some((user.to_string(), password.to_string()));
        self
    }

    /// Only these hosts are reachable.
    pub fn with_reachable_hosts<I, S>(self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.log.lock().reachable_hosts = Some(hosts.into_iter().map(Into::into).collect());
        self
    }

    /// Pace `sync` calls to this bitrate.
    pub fn with_bitrate(self, kbps: u32) -> Self {
        self.log.lock().bitrate_kbps = Some(kbps);
        self
    }

    /// Reject handshakes with `Busy`.
    pub fn set_busy(&self, busy: bool) {
        self.log.lock().busy = busy;
    }

    /// Fail connection allocation with `Malloc`.
    pub fn fail_allocations(&self, fail: bool) {
        self.log.lock().fail_allocations = fail;
    }

    /// Make the `nth` send call (counting from 1 across all connections)
    /// fail with `Socket`.
    pub fn fail_send(&self, nth: u64) {
        self.log.lock().failing_sends.insert(nth);
    }

    /// Tear connections down with `Socket` instead of a clean close.
    pub fn fail_close(&self, fail: bool) {
        self.log.lock().fail_close = fail;
    }

    pub fn init_calls(&self) -> usize {
        self.log.lock().init_calls
    }

    pub fn shutdown_calls(&self) -> usize {
        self.log.lock().shutdown_calls
    }

    pub fn allocations(&self) -> usize {
        self.log.lock().allocations
    }

    pub fn frees(&self) -> usize {
        self.log.lock().frees
    }

    /// Successful handshakes, oldest first.
    pub fn handshakes(&self) -> Vec<HandshakeParams> {
        self.log.lock().handshakes.clone()
    }

    /// Buffers accepted by `send`, in arrival order.
    pub fn received(&self) -> Vec<Bytes> {
        self.log.lock().received.clone()
    }

    pub fn send_calls(&self) -> u64 {
        self.log.lock().send_calls
    }

    pub fn sync_calls(&self) -> usize {
        self.log.lock().sync_calls
    }

    pub fn closes(&self) -> usize {
        self.log.lock().closes
    }
}

/// Protocol library backed by a [`SimulatedServer`].
#[derive(Debug, Clone)]
pub struct SimulatedLibrary {
    server: SimulatedServer,
}

impl SimulatedLibrary {
    pub fn new(server: SimulatedServer) -> Self {
        Self { server }
    }

    pub fn server(&self) -> &SimulatedServer {
        &self.server
    }
}

impl ProtocolLibrary for SimulatedLibrary {
    fn init(&self) {
        self.server.log.lock().init_calls += 1;
    }

    fn shutdown(&self) {
        self.server.log.lock().shutdown_calls += 1;
    }

    fn new_connection(&self) -> Result<Box<dyn ProtocolConnection>, ErrorCode> {
        let mut log = self.server.log.lock();
        if log.fail_allocations {
            return Err(ErrorCode::Malloc);
        }
        log.allocations += 1;
        drop(log);

        Ok(Box::new(SimulatedConnection::new(self.server.clone())))
    }

    fn name(&self) -> &'static str {
        "simulated"
    }
}

/// One simulated connection object.
#[derive(Debug)]
pub struct SimulatedConnection {
    server: SimulatedServer,
    params: HandshakeParams,
    error: ErrorCode,
    connected_at: Option<Instant>,
    bytes_sent: u64,
}

impl SimulatedConnection {
    fn new(server: SimulatedServer) -> Self {
        Self {
            server,
            params: HandshakeParams::default(),
            error: ErrorCode::Success,
            connected_at: None,
            bytes_sent: 0,
        }
    }

    fn status(&mut self, code: ErrorCode) -> ErrorCode {
        self.error = code;
        code
    }

    fn set_param(&mut self, apply: impl FnOnce(&mut HandshakeParams)) -> ErrorCode {
        if self.connected_at.is_some() {
            return self.status(ErrorCode::Connected);
        }
        apply(&mut self.params);
        self.status(ErrorCode::Success)
    }

    fn handshake(&self) -> ErrorCode {
        let params = &self.params;
        let protocol = Protocol::from_code(params.protocol).unwrap_or_default();

        if params.host.is_empty() || params.password.is_empty() || params.port == 0 {
            return ErrorCode::Insane;
        }
        if protocol != Protocol::Icy && params.mount.is_empty() {
            return ErrorCode::Insane;
        }
        if protocol == Protocol::Icy && params.format != Format::Mp3.code() {
            return ErrorCode::Unsupported;
        }
        if url::Host::parse(&params.host).is_err() {
            return ErrorCode::NoConnect;
        }

        let log = self.server.log.lock();
        if let Some(ref hosts) = log.reachable_hosts {
            if !hosts.contains(&params.host) {
                return ErrorCode::NoConnect;
            }
        }
        if log.busy {
            return ErrorCode::Busy;
        }
        if let Some((ref user, ref password)) = log.credentials {
            if *user != params.user || *password != params.password {
                return ErrorCode::NoLogin;
            }
        }
        ErrorCode::Success
    }
}

impl ProtocolConnection for SimulatedConnection {
    fn set_host(&mut self, host: &str) -> ErrorCode {
        self.set_param(|p| p.host = host.to_string())
    }

    fn set_port(&mut self, port: u16) -> ErrorCode {
        self.set_param(|p| p.port = port)
    }

    fn set_user(&mut self, user: &str) -> ErrorCode {
        self.set_param(|p| p.user = user.to_string())
    }

    fn set_password(&mut self, password: &str) -> ErrorCode {
        self.set_param(|p| p.password = password.to_string())
    }

    fn set_mount(&mut self, mount: &str) -> ErrorCode {
        let mount = if mount.is_empty() || mount.starts_with('/') {
            mount.to_string()
        } else {
            format!("/{}", mount)
        };
        self.set_param(|p| p.mount = mount)
    }

    fn set_format(&mut self, format: u32) -> ErrorCode {
        if Format::from_code(format).is_none() {
            return self.status(ErrorCode::Unsupported);
        }
        self.set_param(|p| p.format = format)
    }

    fn set_protocol(&mut self, protocol: u32) -> ErrorCode {
        if Protocol::from_code(protocol).is_none() {
            return self.status(ErrorCode::Unsupported);
        }
        self.set_param(|p| p.protocol = protocol)
    }

    fn open(&mut self) -> ErrorCode {
        if self.connected_at.is_some() {
            return self.status(ErrorCode::Connected);
        }

        let code = self.handshake();
        if code.is_success() {
            self.connected_at = Some(Instant::now());
            self.bytes_sent = 0;
            self.server.log.lock().handshakes.push(self.params.clone());
        }
        self.status(code)
    }

    fn close(&mut self) -> ErrorCode {
        if self.connected_at.take().is_none() {
            return self.status(ErrorCode::Unconnected);
        }
        let mut log = self.server.log.lock();
        log.closes += 1;
        let code = if log.fail_close {
            ErrorCode::Socket
        } else {
            ErrorCode::Success
        };
        drop(log);
        self.status(code)
    }

    fn send(&mut self, data: &[u8]) -> ErrorCode {
        if self.connected_at.is_none() {
            return self.status(ErrorCode::Unconnected);
        }

        let mut log = self.server.log.lock();
        log.send_calls += 1;
        let call = log.send_calls;
        if log.failing_sends.contains(&call) {
            drop(log);
            return self.status(ErrorCode::Socket);
        }
        log.received.push(Bytes::copy_from_slice(data));
        drop(log);

        trace!(call, bytes = data.len(), "Simulated send");
        self.bytes_sent += data.len() as u64;
        self.status(ErrorCode::Success)
    }

    fn sync(&mut self) {
        let bitrate = {
            let mut log = self.server.log.lock();
            log.sync_calls += 1;
            log.bitrate_kbps
        };

        let (Some(kbps), Some(connected_at)) = (bitrate, self.connected_at) else {
            return;
        };
        if kbps == 0 {
            return;
        }

        let due = Duration::from_secs_f64((self.bytes_sent * 8) as f64 / (kbps as f64 * 1000.0));
        let elapsed = connected_at.elapsed();
        if due > elapsed {
            thread::sleep(due - elapsed);
        }
    }

    fn errno(&self) -> ErrorCode {
        self.error
    }

    fn error_message(&self) -> String {
        self.error.description().to_string()
    }
}

impl Drop for SimulatedConnection {
    fn drop(&mut self) {
        self.server.log.lock().frees += 1;
    }
}
