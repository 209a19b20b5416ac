//! Test helpers for bridge integration tests.
//!
//! `spawn_host` stands up the full host side in-process: a listener bound to
//! an ephemeral loopback port feeding a command queue, and a thread that
//! ticks a dispatcher against a scripted executor the way an embedding
//! application would from its own scheduler.

use bridge_core::codec::{EncodeOptions, HostValue};
use bridge_core::config::ListenerConfig;
use bridge_core::connector::{Connector, ConnectorConfig};
use bridge_core::dispatcher::{Dispatcher, ExecutionFailure, HostExecutor};
use bridge_core::listener::BridgeListener;
use bridge_core::queue::CommandQueue;

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use serde_json::{Map as JsonMap, Value};

/// How often the test host's loop ticks when idle.
const TICK_INTERVAL: Duration = Duration::from_millis(2);

/// Scripted executor standing in for a real host application.
///
/// Commands are dispatched on the code string itself:
/// - `"1+1"` returns `Int(2)`
/// - `"fail"` returns an execution failure with a trace
/// - `"panic"` panics inside the command body
/// - `"sleep:<ms>"` blocks the dispatch thread for that long, then returns
///   the slept duration
pub struct ScriptedExecutor;

impl HostExecutor for ScriptedExecutor {
    fn execute(
        &mut self,
        code: &str,
        bindings: &JsonMap<String, Value>,
    ) -> Result<HostValue, ExecutionFailure> {
        if let Some(ms) = code.strip_prefix("sleep:") {
            let ms: u64 = ms.parse().expect("bad sleep duration in test code");
            std::thread::sleep(Duration::from_millis(ms));
            return Ok(HostValue::Int(ms as i64));
        }
        match code {
            "1+1" => Ok(HostValue::Int(2)),
            "fail" => Err(ExecutionFailure {
                message: "name 'fail' is not defined".to_string(),
                trace: Some("line 1, in <module>".to_string()),
            }),
            "panic" => panic!("scripted panic"),
            _ => Ok(HostValue::Text(format!(
                "ran {} with {} bindings",
                code,
                bindings.len()
            ))),
        }
    }

    fn query(&mut self, name: &str, _params: &Value) -> Result<HostValue, ExecutionFailure> {
        match name {
            "object_count" => Ok(HostValue::Int(3)),
            _ => Err(ExecutionFailure::message(format!("unknown query '{name}'"))),
        }
    }
}

/// A running host side. Dropping it stops the tick loop and closes the
/// listener.
pub struct HostHandle {
    listener: BridgeListener,
    addr: SocketAddr,
    running: Arc<AtomicBool>,
    shutdown_observed: Arc<AtomicBool>,
    tick_thread: Option<JoinHandle<()>>,
}

impl HostHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// True once the tick loop has seen a shutdown control command.
    pub fn shutdown_observed(&self) -> bool {
        self.shutdown_observed.load(Ordering::SeqCst)
    }
}

impl Drop for HostHandle {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.tick_thread.take() {
            let _ = handle.join();
        }
        self.listener.close();
    }
}

/// Start a listener on an ephemeral port plus a dispatch loop driving
/// [`ScriptedExecutor`].
pub fn spawn_host() -> HostHandle {
    let config = ListenerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        ..ListenerConfig::default()
    };
    let queue = Arc::new(CommandQueue::new(config.queue_capacity));
    let listener =
        BridgeListener::bind(&config, Arc::clone(&queue)).expect("failed to bind test listener");
    let addr = listener.local_addr();

    let running = Arc::new(AtomicBool::new(true));
    let shutdown_observed = Arc::new(AtomicBool::new(false));

    let loop_running = Arc::clone(&running);
    let loop_shutdown = Arc::clone(&shutdown_observed);
    let tick_thread = std::thread::Builder::new()
        .name("test-host-tick".to_string())
        .spawn(move || {
            let mut dispatcher = Dispatcher::new(queue, EncodeOptions::default());
            let mut executor = ScriptedExecutor;
            while loop_running.load(Ordering::SeqCst) {
                dispatcher.tick(&mut executor);
                if dispatcher.shutdown_requested() {
                    loop_shutdown.store(true, Ordering::SeqCst);
                }
                std::thread::sleep(TICK_INTERVAL);
            }
        })
        .expect("failed to spawn test host thread");

    HostHandle {
        listener,
        addr,
        running,
        shutdown_observed,
        tick_thread: Some(tick_thread),
    }
}

/// A connector aimed at the test host, with backoff tightened so reconnect
/// tests finish in milliseconds instead of the production envelope.
pub fn connector_for(addr: SocketAddr) -> Connector {
    Connector::new(ConnectorConfig {
        host: "127.0.0.1".to_string(),
        port: addr.port(),
        backoff_initial: Duration::from_millis(25),
        backoff_max: Duration::from_millis(200),
        probe_timeout: Duration::from_secs(2),
        ..ConnectorConfig::default()
    })
}

/// Start a connector and wait for it to report healthy.
pub async fn healthy_connector(addr: SocketAddr) -> Connector {
    let connector = connector_for(addr);
    connector.start();
    assert!(
        connector.wait_until_healthy(Duration::from_secs(5)).await,
        "connector never became healthy"
    );
    connector
}
