//! Host-side socket listener: accepts one client, moves bytes and queue
//! entries, and nothing else.
//!
//! The accept loop runs on a dedicated thread; each accepted connection gets
//! a reader thread (frames in, requests enqueued with flow control) and a
//! writer thread (resolved responses framed and sent). Command payloads are
//! never executed here - the [`CommandQueue`] is the sole hand-off to the
//! host's thread.
//!
//! # Connection policy
//!
//! Exactly one client is serviced at a time. A newly accepted connection
//! supersedes and shuts down the prior one; non-loopback peers are rejected
//! outright. On any read error, decode error, or peer close the connection
//! is torn down and the listener returns to accepting.

use crate::config::ListenerConfig;
use crate::error::listener::ListenerError;
use crate::frame::{FrameDecoder, encode_frame};
use crate::queue::CommandQueue;
use crate::wire::{ErrorDescriptor, Response, WireMessage};

use common::ErrorLocation;

use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::panic::Location;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};
use std::thread::{Builder as ThreadBuilder, JoinHandle};

use log::{debug, error, info, warn};

const READ_CHUNK_BYTES: usize = 4096;

/// Point-in-time listener statistics.
#[derive(Debug, Clone)]
pub struct ListenerStats {
    pub total_connections: u64,
    pub client_attached: bool,
    pub last_error: Option<String>,
}

struct ListenerShared {
    queue: Arc<CommandQueue>,
    running: AtomicBool,
    max_frame_bytes: usize,
    local_addr: SocketAddr,
    /// The live connection, keyed by generation so teardown from a stale
    /// reader cannot clobber a superseding connection.
    active: Mutex<Option<(u64, TcpStream)>>,
    total_connections: AtomicU64,
    last_error: Mutex<Option<String>>,
}

/// The host-side listener. Owns the accept thread; closing it (or dropping
/// it) also closes the command queue it feeds.
pub struct BridgeListener {
    shared: Arc<ListenerShared>,
    accept_handle: Option<JoinHandle<()>>,
}

impl BridgeListener {
    /// Bind the bridge socket and start accepting on a background thread.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError::Bind`] if the address is unavailable (port
    /// in use, insufficient permissions).
    pub fn bind(
        config: &ListenerConfig,
        queue: Arc<CommandQueue>,
    ) -> Result<Self, ListenerError> {
        let address = format!("{}:{}", config.host, config.port);
        let socket = TcpListener::bind(&address).map_err(|e| ListenerError::Bind {
            message: format!("failed to bind {address}: {e}"),
            location: ErrorLocation::from(Location::caller()),
        })?;
        let local_addr = socket.local_addr()?;

        info!("bridge listening on {}", local_addr);

        let shared = Arc::new(ListenerShared {
            queue,
            running: AtomicBool::new(true),
            max_frame_bytes: config.max_frame_bytes,
            local_addr,
            active: Mutex::new(None),
            total_connections: AtomicU64::new(0),
            last_error: Mutex::new(None),
        });

        let accept_shared = Arc::clone(&shared);
        let accept_handle = ThreadBuilder::new()
            .name("bridge-accept".to_string())
            .spawn(move || accept_loop(socket, accept_shared))?;

        Ok(Self {
            shared,
            accept_handle: Some(accept_handle),
        })
    }

    /// The bound address (useful when the configured port was 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.shared.local_addr
    }

    pub fn stats(&self) -> ListenerStats {
        ListenerStats {
            total_connections: self.shared.total_connections.load(Ordering::SeqCst),
            client_attached: self
                .shared
                .active
                .lock()
                .expect("listener lock poisoned")
                .is_some(),
            last_error: self
                .shared
                .last_error
                .lock()
                .expect("listener lock poisoned")
                .clone(),
        }
    }

    /// Stop accepting, tear down the live connection, close the queue.
    pub fn close(&mut self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }

        if let Some((generation, stream)) = self
            .shared
            .active
            .lock()
            .expect("listener lock poisoned")
            .take()
        {
            let _ = stream.shutdown(Shutdown::Both);
            self.shared.queue.detach_connection(generation);
        }

        // The accept thread is parked in accept(); a throwaway local
        // connection unblocks it so it can observe the running flag.
        let _ = TcpStream::connect(self.shared.local_addr);

        if let Some(handle) = self.accept_handle.take() {
            let _ = handle.join();
        }

        self.shared.queue.close();
        info!("bridge listener closed");
    }
}

impl Drop for BridgeListener {
    fn drop(&mut self) {
        self.close();
    }
}

fn accept_loop(socket: TcpListener, shared: Arc<ListenerShared>) {
    while shared.running.load(Ordering::SeqCst) {
        let (stream, peer) = match socket.accept() {
            Ok(accepted) => accepted,
            Err(e) => {
                if !shared.running.load(Ordering::SeqCst) {
                    break;
                }
                warn!("accept failed: {}", e);
                record_error(&shared, format!("accept failed: {e}"));
                continue;
            }
        };

        if !shared.running.load(Ordering::SeqCst) {
            break;
        }

        if !peer.ip().is_loopback() {
            warn!("rejected non-loopback connection from {}", peer);
            let _ = stream.shutdown(Shutdown::Both);
            continue;
        }

        shared.total_connections.fetch_add(1, Ordering::SeqCst);
        info!("client connected from {}", peer);

        if let Err(e) = start_connection(stream, &shared) {
            warn!("failed to start connection threads: {}", e);
            record_error(&shared, format!("connection setup failed: {e}"));
        }
    }

    debug!("accept loop exited");
}

/// Wire up reader/writer threads for a freshly accepted connection,
/// superseding whatever connection was live before it.
fn start_connection(stream: TcpStream, shared: &Arc<ListenerShared>) -> std::io::Result<()> {
    let writer_stream = stream.try_clone()?;
    let active_stream = stream.try_clone()?;

    let (generation, outbound_rx) = shared.queue.attach_connection();

    let superseded = shared
        .active
        .lock()
        .expect("listener lock poisoned")
        .replace((generation, active_stream));
    if let Some((old_generation, old_stream)) = superseded {
        info!(
            "new connection supersedes generation {}; closing it",
            old_generation
        );
        let _ = old_stream.shutdown(Shutdown::Both);
    }

    let reader_shared = Arc::clone(shared);
    ThreadBuilder::new()
        .name(format!("bridge-read-{generation}"))
        .spawn(move || read_loop(stream, generation, reader_shared))?;

    let writer_shared = Arc::clone(shared);
    ThreadBuilder::new()
        .name(format!("bridge-write-{generation}"))
        .spawn(move || write_loop(writer_stream, outbound_rx, generation, writer_shared))?;

    Ok(())
}

/// Decode frames into queue entries until the connection dies.
fn read_loop(mut stream: TcpStream, generation: u64, shared: Arc<ListenerShared>) {
    let mut decoder = FrameDecoder::new(shared.max_frame_bytes);
    let mut chunk = [0u8; READ_CHUNK_BYTES];

    let reason: String = 'connection: loop {
        let n = match stream.read(&mut chunk) {
            Ok(0) => break 'connection "peer closed".to_string(),
            Ok(n) => n,
            Err(e) => break 'connection format!("read error: {e}"),
        };

        decoder.extend(&chunk[..n]);

        loop {
            match decoder.next_frame() {
                Ok(Some(WireMessage::Request(request))) => {
                    // Blocking here is the flow control: the socket is not
                    // read again until the queue has space. Submitting under
                    // this connection's generation means a request decoded
                    // just before a supersede cannot land on the new client.
                    if let Err(e) = shared.queue.enqueue_blocking(request, generation) {
                        break 'connection format!("enqueue rejected: {e}");
                    }
                }
                Ok(Some(WireMessage::Response(_))) => {
                    break 'connection "client sent a response frame".to_string();
                }
                Ok(None) => break,
                Err(e) => {
                    error!("protocol error on generation {}: {}", generation, e);
                    record_error(&shared, e.to_string());
                    break 'connection format!("protocol error: {e}");
                }
            }
        }
    };

    info!("connection generation {} closed: {}", generation, reason);
    teardown_connection(&stream, generation, &shared);
}

/// Transmit resolved responses until the channel or socket closes.
fn write_loop(
    mut stream: TcpStream,
    outbound_rx: Receiver<Response>,
    generation: u64,
    shared: Arc<ListenerShared>,
) {
    for response in outbound_rx.iter() {
        let id = response.id;
        let frame = match encode_frame(&WireMessage::Response(response), shared.max_frame_bytes)
        {
            Ok(frame) => frame,
            Err(e) => {
                // An oversized or unserializable result must not kill the
                // connection; the client still gets its one response.
                warn!("response id={} could not be framed: {}", id, e);
                let fallback = Response::error(
                    id,
                    ErrorDescriptor::message(format!("response could not be framed: {e}")),
                );
                match encode_frame(&WireMessage::Response(fallback), shared.max_frame_bytes) {
                    Ok(frame) => frame,
                    Err(e) => {
                        error!("fallback response id={} could not be framed: {}", id, e);
                        continue;
                    }
                }
            }
        };

        if let Err(e) = stream.write_all(&frame) {
            debug!("write failed on generation {}: {}", generation, e);
            break;
        }
    }

    teardown_connection(&stream, generation, &shared);
}

/// Idempotent per-generation teardown: detach the queue, shut the socket,
/// clear the active slot. Safe to call from both loops.
fn teardown_connection(stream: &TcpStream, generation: u64, shared: &Arc<ListenerShared>) {
    shared.queue.detach_connection(generation);
    let _ = stream.shutdown(Shutdown::Both);

    let mut active = shared.active.lock().expect("listener lock poisoned");
    if matches!(*active, Some((current, _)) if current == generation) {
        *active = None;
    }
}

fn record_error(shared: &Arc<ListenerShared>, message: String) {
    *shared
        .last_error
        .lock()
        .expect("listener lock poisoned") = Some(message);
}
