//! The main-thread drain: the only place host-owned state is touched.
//!
//! The embedding application calls [`Dispatcher::tick`] from its own
//! periodic scheduler - that explicit contract replaces any hidden timer,
//! and tests simply call `tick()` synchronously. Each tick drains at most
//! one command so a burst of requests can never starve the host's own
//! responsiveness, and the previous command's outcome is always captured
//! before the next one starts.
//!
//! Execution failures - returned errors, panics, even encoding failures on
//! the result - become ERROR responses. Nothing raised inside a command
//! body ever propagates into the host's event loop.

use crate::codec::{EncodeOptions, HostValue, encode};
use crate::queue::CommandQueue;
use crate::wire::{
    ControlCommand, ErrorDescriptor, Request, RequestPayload, Response, unix_millis,
};

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use log::{debug, error, info, warn};
use serde_json::{Map as JsonMap, Value, json};

/// A failure raised by host-side command execution.
#[derive(Debug, Clone)]
pub struct ExecutionFailure {
    pub message: String,
    /// Structured trace, when the host can produce one.
    pub trace: Option<String>,
}

impl ExecutionFailure {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            trace: None,
        }
    }
}

impl From<ExecutionFailure> for ErrorDescriptor {
    fn from(failure: ExecutionFailure) -> Self {
        ErrorDescriptor {
            message: failure.message,
            trace: failure.trace,
        }
    }
}

/// The seam between the bridge and the host's execution context.
///
/// Implementations run on the host's single thread, inside `tick()`. They
/// may freely touch host-owned state; they must not block on another
/// command's completion (no nested calls).
pub trait HostExecutor {
    /// Run a code string with the given bindings in the host's context.
    fn execute(
        &mut self,
        code: &str,
        bindings: &JsonMap<String, Value>,
    ) -> Result<HostValue, ExecutionFailure>;

    /// Run a named structured query against host state.
    fn query(&mut self, name: &str, params: &Value) -> Result<HostValue, ExecutionFailure>;
}

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Queue was empty; nothing ran.
    Idle,
    /// One command ran and its response was resolved.
    Completed,
}

/// Drains the command queue one request per tick.
pub struct Dispatcher {
    queue: Arc<CommandQueue>,
    encode_options: EncodeOptions,
    started_at: Instant,
    commands_processed: u64,
    last_error: Option<String>,
    shutdown: AtomicBool,
}

impl Dispatcher {
    pub fn new(queue: Arc<CommandQueue>, encode_options: EncodeOptions) -> Self {
        Self {
            queue,
            encode_options,
            started_at: Instant::now(),
            commands_processed: 0,
            last_error: None,
            shutdown: AtomicBool::new(false),
        }
    }

    /// Drain at most one command from the queue and resolve its response.
    ///
    /// Must be called from the host's own thread; this is the only sanctioned
    /// point where command bodies touch host-owned state. Returns
    /// [`TickOutcome::Idle`] when there was nothing to do.
    pub fn tick(&mut self, host: &mut dyn HostExecutor) -> TickOutcome {
        let Some(ticket) = self.queue.dequeue_for_execution() else {
            return TickOutcome::Idle;
        };

        let id = ticket.request.id;
        debug!("executing request id={}", id);

        let response = self.run_command(host, &ticket.request);

        self.commands_processed += 1;
        if let Some(descriptor) = &response.error {
            self.last_error = Some(descriptor.message.clone());
        }

        self.queue.resolve(response, ticket.generation);
        TickOutcome::Completed
    }

    /// True once a client has issued a `shutdown` control command. The
    /// embedding application polls this; only it may tear down its own loop.
    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    pub fn commands_processed(&self) -> u64 {
        self.commands_processed
    }

    fn run_command(&self, host: &mut dyn HostExecutor, request: &Request) -> Response {
        match &request.payload {
            RequestPayload::Execute { code, bindings } => {
                self.capture(request.id, || host.execute(code, bindings))
            }
            RequestPayload::Query { name, params } => {
                self.capture(request.id, || host.query(name, params))
            }
            RequestPayload::Control(command) => self.run_control(request.id, *command),
        }
    }

    /// Run one command body, converting every failure mode - returned error,
    /// panic, or result-encoding failure - into an ERROR response.
    fn capture(
        &self,
        id: u64,
        body: impl FnOnce() -> Result<HostValue, ExecutionFailure>,
    ) -> Response {
        match catch_unwind(AssertUnwindSafe(body)) {
            Ok(Ok(value)) => match encode(&value, &self.encode_options) {
                Ok(encoded) => Response::ok(id, encoded),
                Err(e) => {
                    warn!("result encoding failed for request id={}: {}", id, e);
                    Response::error(
                        id,
                        ErrorDescriptor::message(format!("result encoding failed: {e}")),
                    )
                }
            },
            Ok(Err(failure)) => {
                debug!("request id={} failed: {}", id, failure.message);
                Response::error(id, failure.into())
            }
            Err(panic) => {
                let message = panic_message(panic);
                error!("command body panicked for request id={}: {}", id, message);
                Response::error(
                    id,
                    ErrorDescriptor::message(format!("command panicked: {message}")),
                )
            }
        }
    }

    fn run_control(&self, id: u64, command: ControlCommand) -> Response {
        match command {
            ControlCommand::Ping => Response::ok(id, json!({ "pong": true })),
            ControlCommand::Status => Response::ok(id, self.status()),
            ControlCommand::Shutdown => {
                info!("shutdown requested via control command");
                self.shutdown.store(true, Ordering::SeqCst);
                Response::ok(id, json!({ "shutting_down": true }))
            }
        }
    }

    fn status(&self) -> Value {
        json!({
            "uptime_secs": self.started_at.elapsed().as_secs(),
            "queued": self.queue.queued_len(),
            "inflight": self.queue.inflight_len(),
            "queue_capacity": self.queue.capacity(),
            "commands_processed": self.commands_processed,
            "last_error": self.last_error,
            "reported_at": unix_millis(),
        })
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
