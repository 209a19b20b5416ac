//! Wire data model: the messages that cross the socket.
//!
//! Everything on the wire is one of two shapes, discriminated by a `type`
//! tag: a [`Request`] (client to host) or a [`Response`] (host to client).
//! Request payloads are a closed tagged union over `kind` - each kind has a
//! fixed schema rather than an open-ended dictionary, so a malformed command
//! fails at decode time instead of deep inside the host.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value};

/// One frame's payload: either direction of the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireMessage {
    Request(Request),
    Response(Response),
}

/// A command issued by the client. Immutable once sent.
///
/// `id` is the correlation token: unique while the request is pending on a
/// connection, assigned monotonically by the connector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    #[serde(flatten)]
    pub payload: RequestPayload,
    /// Unix milliseconds at submission time.
    pub submitted_at: u64,
}

/// The command body, tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum RequestPayload {
    /// Run a code string in the host's execution context.
    Execute {
        code: String,
        #[serde(default)]
        bindings: JsonMap<String, Value>,
    },
    /// Run a named structured query against host state.
    Query {
        name: String,
        #[serde(default)]
        params: Value,
    },
    /// Bridge-level control command, answered by the dispatcher itself.
    Control(ControlCommand),
}

/// Control commands the dispatcher handles without touching host tooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlCommand {
    /// Lightweight no-op used as the client's health probe.
    Ping,
    /// Bridge statistics: uptime, queue depths, commands processed.
    Status,
    /// Ask the embedding host to shut the bridge down.
    Shutdown,
}

/// Terminal state of a request.
///
/// `Timeout` and `Disconnected` are only ever synthesized locally by the
/// client connector; the host never puts them on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Ok,
    Error,
    Timeout,
    Disconnected,
}

/// Structured failure description carried by an error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDescriptor {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
}

/// The single answer produced for a [`Request`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDescriptor>,
    /// Unix milliseconds at completion time.
    pub completed_at: u64,
}

impl Request {
    pub fn new(id: u64, payload: RequestPayload) -> Self {
        Self {
            id,
            payload,
            submitted_at: unix_millis(),
        }
    }
}

impl Response {
    pub fn ok(id: u64, result: Value) -> Self {
        Self {
            id,
            status: ResponseStatus::Ok,
            result: Some(result),
            error: None,
            completed_at: unix_millis(),
        }
    }

    pub fn error(id: u64, error: ErrorDescriptor) -> Self {
        Self {
            id,
            status: ResponseStatus::Error,
            result: None,
            error: Some(error),
            completed_at: unix_millis(),
        }
    }

    /// Synthetic response for a call whose connection dropped mid-flight.
    pub fn disconnected(id: u64) -> Self {
        Self {
            id,
            status: ResponseStatus::Disconnected,
            result: None,
            error: Some(ErrorDescriptor {
                message: "connection to host lost before a response arrived".to_string(),
                trace: None,
            }),
            completed_at: unix_millis(),
        }
    }
}

impl ErrorDescriptor {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            trace: None,
        }
    }
}

/// Milliseconds since the Unix epoch; clock-skew before 1970 collapses to 0.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
