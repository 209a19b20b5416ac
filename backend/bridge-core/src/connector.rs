//! Client-side connector: owns the outbound connection lifecycle.
//!
//! States run `Disconnected -> Connecting -> Connected`, back to
//! `Disconnected` on any I/O error, then `Connecting` again under
//! exponential backoff. A freshly established socket is not `Connected`
//! until a health probe (a `ping` control request) round-trips - a host
//! that accepts TCP but never ticks its dispatcher stays unhealthy.
//!
//! Many callers may have calls outstanding at once; each gets its own
//! correlation id and its own wait. The write half sits behind a single
//! send lock so partial frames never interleave. Host-side execution is
//! one-at-a-time regardless, so client concurrency produces queueing,
//! not parallelism.

use crate::error::connector::ConnectorError;
use crate::frame::{DEFAULT_MAX_FRAME_BYTES, FrameDecoder, encode_frame};
use crate::wire::{
    ControlCommand, Request, RequestPayload, Response, ResponseStatus, WireMessage, unix_millis,
};
use crate::{BRIDGE_HOSTNAME, DEFAULT_BRIDGE_PORT};

use common::ErrorLocation;

use std::collections::{HashMap, VecDeque};
use std::panic::Location;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use backoff::{ExponentialBackoff, backoff::Backoff};
use log::{debug, info, trace, warn};
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::spawn as TokioSpawn;
use tokio::sync::Mutex as TokioMutex;
use tokio::sync::{oneshot, watch};
use tokio::time::sleep as TokioSleep;
use tokio::time::timeout as TokioTimeout;

const READ_CHUNK_BYTES: usize = 4096;
const RESPONSE_TIME_HISTORY: usize = 50;

/// Connection lifecycle state, published through a watch channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

/// Connector knobs. Defaults match the bridge's documented port; backoff
/// starts at 1s and caps at 30s, with jitter from the backoff crate's
/// randomization.
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    pub host: String,
    pub port: u16,
    pub max_frame_bytes: usize,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    /// Deadline for the health probe after a socket connects.
    pub probe_timeout: Duration,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            host: BRIDGE_HOSTNAME.to_string(),
            port: DEFAULT_BRIDGE_PORT,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            backoff_initial: Duration::from_secs(1),
            backoff_max: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(2),
        }
    }
}

impl ConnectorConfig {
    fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Rolling connection statistics.
#[derive(Debug, Default)]
struct ConnectionMonitor {
    attempts: u64,
    successes: u64,
    failures: u64,
    response_times: VecDeque<Duration>,
    last_success_at: Option<u64>,
}

impl ConnectionMonitor {
    fn record_attempt(&mut self) {
        self.attempts += 1;
    }

    fn record_success(&mut self, elapsed: Duration) {
        self.successes += 1;
        self.last_success_at = Some(unix_millis());
        self.response_times.push_back(elapsed);
        while self.response_times.len() > RESPONSE_TIME_HISTORY {
            self.response_times.pop_front();
        }
    }

    fn record_failure(&mut self) {
        self.failures += 1;
    }
}

/// Point-in-time view of the connection monitor.
#[derive(Debug, Clone)]
pub struct MonitorSnapshot {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    /// Fraction of attempts that succeeded; zero when nothing was attempted.
    pub success_rate: f64,
    pub average_response_time: Option<Duration>,
    /// Unix milliseconds of the last successful call.
    pub last_success_at: Option<u64>,
}

struct ConnectorInner {
    config: ConnectorConfig,
    state_tx: watch::Sender<LinkState>,
    /// Correlation id -> the single-assignment slot its caller awaits.
    pending: StdMutex<HashMap<u64, oneshot::Sender<Response>>>,
    /// The send lock: exactly one frame in flight on the write half.
    writer: TokioMutex<Option<OwnedWriteHalf>>,
    next_id: AtomicU64,
    running: AtomicBool,
    supervisor_started: AtomicBool,
    monitor: StdMutex<ConnectionMonitor>,
}

impl ConnectorInner {
    fn set_state(&self, state: LinkState) {
        self.state_tx.send_replace(state);
    }

    fn state(&self) -> LinkState {
        *self.state_tx.borrow()
    }

    fn record_failure(&self) {
        self.monitor
            .lock()
            .expect("monitor lock poisoned")
            .record_failure();
    }

    /// Resolve every pending call with a synthetic disconnected response.
    fn fail_all_pending(&self) {
        let drained: Vec<(u64, oneshot::Sender<Response>)> = self
            .pending
            .lock()
            .expect("pending lock poisoned")
            .drain()
            .collect();
        if !drained.is_empty() {
            warn!("failing {} pending calls: connection lost", drained.len());
        }
        for (id, sender) in drained {
            let _ = sender.send(Response::disconnected(id));
        }
    }
}

/// The client side of the bridge. Cheap to clone; all clones share one
/// connection and one pending table.
#[derive(Clone)]
pub struct Connector {
    inner: Arc<ConnectorInner>,
}

impl Connector {
    pub fn new(config: ConnectorConfig) -> Self {
        let (state_tx, _state_rx) = watch::channel(LinkState::Disconnected);
        Self {
            inner: Arc::new(ConnectorInner {
                config,
                state_tx,
                pending: StdMutex::new(HashMap::new()),
                writer: TokioMutex::new(None),
                next_id: AtomicU64::new(0),
                running: AtomicBool::new(false),
                supervisor_started: AtomicBool::new(false),
                monitor: StdMutex::new(ConnectionMonitor::default()),
            }),
        }
    }

    /// Start the reconnection supervisor. Idempotent; must be called from
    /// within a tokio runtime.
    pub fn start(&self) {
        if self.inner.supervisor_started.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.running.store(true, Ordering::SeqCst);
        TokioSpawn(supervise(Arc::clone(&self.inner)));
    }

    /// Stop the supervisor and drop the live connection.
    pub async fn close(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        if let Some(mut writer) = self.inner.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        self.inner.fail_all_pending();
        self.inner.set_state(LinkState::Disconnected);
    }

    pub fn state(&self) -> LinkState {
        self.inner.state()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state() == LinkState::Connected
    }

    /// Issue one request and wait up to `timeout` for its response.
    ///
    /// # Errors
    ///
    /// - [`ConnectorError::Disconnected`] - no healthy connection, or the
    ///   connection dropped while the call was in flight.
    /// - [`ConnectorError::Timeout`] - no response within `timeout`; the
    ///   pending entry is removed, and the host's late response (if any) is
    ///   discarded by id as orphaned.
    /// - [`ConnectorError::Protocol`] - the request could not be framed.
    pub async fn call(
        &self,
        payload: RequestPayload,
        timeout: Duration,
    ) -> Result<Response, ConnectorError> {
        if !self.is_connected() {
            self.inner.record_failure();
            return Err(ConnectorError::Disconnected {
                message: "not connected to host".to_string(),
                location: ErrorLocation::from(Location::caller()),
            });
        }
        call_on_wire(&self.inner, payload, timeout).await
    }

    /// Wait until the connector is `Connected` (which implies a successful
    /// health probe), or until `timeout` passes.
    pub async fn wait_until_healthy(&self, timeout: Duration) -> bool {
        let mut state_rx = self.inner.state_tx.subscribe();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if *state_rx.borrow_and_update() == LinkState::Connected {
                return true;
            }
            match tokio::time::timeout_at(deadline, state_rx.changed()).await {
                Ok(Ok(())) => continue,
                Ok(Err(_)) | Err(_) => return false,
            }
        }
    }

    pub fn statistics(&self) -> MonitorSnapshot {
        let monitor = self.inner.monitor.lock().expect("monitor lock poisoned");
        let success_rate = if monitor.attempts == 0 {
            0.0
        } else {
            monitor.successes as f64 / monitor.attempts as f64
        };
        let average_response_time = if monitor.response_times.is_empty() {
            None
        } else {
            let total: Duration = monitor.response_times.iter().sum();
            Some(total / monitor.response_times.len() as u32)
        };
        MonitorSnapshot {
            attempts: monitor.attempts,
            successes: monitor.successes,
            failures: monitor.failures,
            success_rate,
            average_response_time,
            last_success_at: monitor.last_success_at,
        }
    }
}

/// Reconnection supervisor: connect with backoff, probe, serve, repeat.
async fn supervise(inner: Arc<ConnectorInner>) {
    while inner.running.load(Ordering::SeqCst) {
        inner.set_state(LinkState::Connecting);

        let Some(stream) = connect_with_backoff(&inner).await else {
            break;
        };

        let (read_half, write_half) = stream.into_split();
        *inner.writer.lock().await = Some(write_half);

        let read_task = TokioSpawn(read_loop(Arc::clone(&inner), read_half));

        // Probe before admitting callers: a socket that accepts but whose
        // dispatcher never ticks is not a healthy host.
        let probe = RequestPayload::Control(ControlCommand::Ping);
        match call_on_wire(&inner, probe, inner.config.probe_timeout).await {
            Ok(response) if response.status == ResponseStatus::Ok => {
                info!("bridge connection healthy at {}", inner.config.address());
                inner.set_state(LinkState::Connected);
            }
            Ok(response) => {
                warn!("health probe answered with {:?}; retrying", response.status);
                read_task.abort();
                teardown(&inner).await;
                continue;
            }
            Err(e) => {
                warn!("health probe failed: {e}; retrying");
                read_task.abort();
                teardown(&inner).await;
                continue;
            }
        }

        let _ = read_task.await;
        warn!("connection to {} lost", inner.config.address());
        teardown(&inner).await;
    }

    inner.set_state(LinkState::Disconnected);
    debug!("connector supervisor exited");
}

/// Dial until the socket connects or the connector is closed.
async fn connect_with_backoff(inner: &Arc<ConnectorInner>) -> Option<TcpStream> {
    let mut backoff = ExponentialBackoff {
        initial_interval: inner.config.backoff_initial,
        max_interval: inner.config.backoff_max,
        max_elapsed_time: None,
        ..Default::default()
    };

    loop {
        if !inner.running.load(Ordering::SeqCst) {
            return None;
        }

        match TcpStream::connect((inner.config.host.as_str(), inner.config.port)).await {
            Ok(stream) => return Some(stream),
            Err(e) => {
                let delay = backoff
                    .next_backoff()
                    .unwrap_or(inner.config.backoff_max);
                trace!(
                    "connect to {} failed ({e}), retrying in {delay:?}",
                    inner.config.address()
                );
                TokioSleep(delay).await;
            }
        }
    }
}

/// Decode responses off the wire and hand each to its waiting caller.
async fn read_loop(inner: Arc<ConnectorInner>, mut read_half: OwnedReadHalf) {
    let mut decoder = FrameDecoder::new(inner.config.max_frame_bytes);
    let mut chunk = [0u8; READ_CHUNK_BYTES];

    loop {
        let n = match read_half.read(&mut chunk).await {
            Ok(0) => {
                debug!("host closed the connection");
                return;
            }
            Ok(n) => n,
            Err(e) => {
                debug!("read error: {e}");
                return;
            }
        };

        decoder.extend(&chunk[..n]);

        loop {
            match decoder.next_frame() {
                Ok(Some(WireMessage::Response(response))) => resolve_local(&inner, response),
                Ok(Some(WireMessage::Request(_))) => {
                    warn!("host sent a request frame; closing connection");
                    return;
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("protocol error from host: {e}; closing connection");
                    return;
                }
            }
        }
    }
}

/// Route a response to its pending caller, or discard it as orphaned.
fn resolve_local(inner: &Arc<ConnectorInner>, response: Response) {
    let sender = inner
        .pending
        .lock()
        .expect("pending lock poisoned")
        .remove(&response.id);
    match sender {
        Some(sender) => {
            let _ = sender.send(response);
        }
        // The caller already timed out; a late answer is not an error.
        None => debug!("discarding orphaned response id={}", response.id),
    }
}

async fn teardown(inner: &Arc<ConnectorInner>) {
    *inner.writer.lock().await = None;
    inner.set_state(LinkState::Disconnected);
    inner.fail_all_pending();
}

/// Register a pending entry, put the frame on the wire, await the response.
async fn call_on_wire(
    inner: &Arc<ConnectorInner>,
    payload: RequestPayload,
    timeout: Duration,
) -> Result<Response, ConnectorError> {
    let id = inner.next_id.fetch_add(1, Ordering::SeqCst) + 1;
    inner
        .monitor
        .lock()
        .expect("monitor lock poisoned")
        .record_attempt();

    let (response_tx, response_rx) = oneshot::channel();
    inner
        .pending
        .lock()
        .expect("pending lock poisoned")
        .insert(id, response_tx);

    let remove_pending = |inner: &Arc<ConnectorInner>| {
        inner
            .pending
            .lock()
            .expect("pending lock poisoned")
            .remove(&id);
    };

    let request = Request::new(id, payload);
    let frame = match encode_frame(&WireMessage::Request(request), inner.config.max_frame_bytes)
    {
        Ok(frame) => frame,
        Err(e) => {
            remove_pending(inner);
            inner.record_failure();
            return Err(e.into());
        }
    };

    {
        let mut writer = inner.writer.lock().await;
        let Some(writer) = writer.as_mut() else {
            remove_pending(inner);
            inner.record_failure();
            return Err(ConnectorError::Disconnected {
                message: "no live connection".to_string(),
                location: ErrorLocation::from(Location::caller()),
            });
        };
        if let Err(e) = writer.write_all(&frame).await {
            remove_pending(inner);
            inner.record_failure();
            return Err(ConnectorError::Disconnected {
                message: format!("send failed: {e}"),
                location: ErrorLocation::from(Location::caller()),
            });
        }
    }

    let started = Instant::now();
    match TokioTimeout(timeout, response_rx).await {
        Ok(Ok(response)) => {
            if response.status == ResponseStatus::Disconnected {
                inner.record_failure();
                Err(ConnectorError::Disconnected {
                    message: "connection lost mid-flight".to_string(),
                    location: ErrorLocation::from(Location::caller()),
                })
            } else {
                inner
                    .monitor
                    .lock()
                    .expect("monitor lock poisoned")
                    .record_success(started.elapsed());
                Ok(response)
            }
        }
        Ok(Err(_)) => {
            inner.record_failure();
            Err(ConnectorError::Disconnected {
                message: "pending entry dropped during teardown".to_string(),
                location: ErrorLocation::from(Location::caller()),
            })
        }
        Err(_elapsed) => {
            remove_pending(inner);
            inner.record_failure();
            Err(ConnectorError::Timeout {
                waited: timeout,
                location: ErrorLocation::from(Location::caller()),
            })
        }
    }
}
