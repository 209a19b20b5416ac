//! Host-native values made safely transmissible.
//!
//! The host hands back arbitrary object graphs: scalars, ordered lists,
//! key-value maps, shared references (possibly cyclic), and live resources
//! with no portable representation. The encoder flattens all of that into
//! the restricted wire model (`serde_json::Value`: null, bool, number,
//! string, list, string-keyed map) without ever recursing forever or raising
//! past the boundary.
//!
//! Decode is not mirrored here: the client only consumes the portable wire
//! shapes, which `serde_json` already inverts.

use crate::error::codec::CodecError;

use common::ErrorLocation;

use std::cell::RefCell;
use std::collections::HashSet;
use std::panic::Location;
use std::rc::Rc;

use serde_json::{Map as JsonMap, Number, Value};

/// Marker substituted when a shared node is revisited during one encode pass.
pub const CYCLE_MARKER: &str = "<cycle>";

/// Marker substituted for everything below the configured depth bound.
pub const DEPTH_MARKER: &str = "<truncated: max depth>";

/// Key tagging an opaque value's map form, so clients can tell a best-effort
/// description apart from real data.
pub const OPAQUE_TAG: &str = "__opaque__";

/// A value as the host's execution context sees it.
///
/// `Shared` is the only constructor through which a cycle can exist; plain
/// `List`/`Map` ownership is acyclic by construction.
#[derive(Debug, Clone)]
pub enum HostValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<HostValue>),
    /// Ordered key-value pairs. Non-text keys are stringified on encode.
    Map(Vec<(HostKey, HostValue)>),
    /// A reference-counted node that may be aliased or self-referential.
    Shared(Rc<RefCell<HostValue>>),
    /// A live resource with no safe representation; carried as a textual
    /// description and tagged as such on the wire.
    Opaque {
        type_name: String,
        description: String,
    },
}

/// Map keys the host can produce.
#[derive(Debug, Clone, PartialEq)]
pub enum HostKey {
    Text(String),
    Int(i64),
    Bool(bool),
}

impl HostValue {
    /// Wrap a value in a shared node so it can be aliased (or made cyclic).
    pub fn shared(value: HostValue) -> HostValue {
        HostValue::Shared(Rc::new(RefCell::new(value)))
    }
}

/// Encoder knobs.
#[derive(Debug, Clone, Copy)]
pub struct EncodeOptions {
    /// Nesting bound; anything deeper becomes [`DEPTH_MARKER`] rather than
    /// failing the whole response.
    pub max_depth: usize,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self { max_depth: 64 }
    }
}

/// Encode a host value into the wire model.
///
/// Scalars map directly; non-finite floats have no JSON form and are
/// stringified. Shared nodes are identity-tracked for the duration of the
/// pass - a revisit yields [`CYCLE_MARKER`] instead of recursing.
///
/// # Errors
///
/// Returns [`CodecError`] on internal failures, e.g. a shared node still
/// mutably borrowed by host code. The boundary contract is that the
/// dispatcher catches it and reports an ERROR response - a bad value can
/// spoil its own response but never corrupt a frame.
pub fn encode(value: &HostValue, options: &EncodeOptions) -> Result<Value, CodecError> {
    let mut visited: HashSet<*const RefCell<HostValue>> = HashSet::new();
    encode_inner(value, 0, &mut visited, options)
}

fn encode_inner(
    value: &HostValue,
    depth: usize,
    visited: &mut HashSet<*const RefCell<HostValue>>,
    options: &EncodeOptions,
) -> Result<Value, CodecError> {
    if depth > options.max_depth {
        return Ok(Value::String(DEPTH_MARKER.to_string()));
    }

    let encoded = match value {
        HostValue::Null => Value::Null,
        HostValue::Bool(b) => Value::Bool(*b),
        HostValue::Int(i) => Value::Number(Number::from(*i)),
        HostValue::Float(f) => match Number::from_f64(*f) {
            Some(n) => Value::Number(n),
            // NaN and the infinities have no JSON representation.
            None => Value::String(f.to_string()),
        },
        HostValue::Text(s) => Value::String(s.clone()),
        HostValue::List(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(encode_inner(item, depth + 1, visited, options)?);
            }
            Value::Array(out)
        }
        HostValue::Map(entries) => {
            let mut out = JsonMap::with_capacity(entries.len());
            for (key, entry) in entries {
                out.insert(
                    stringify_key(key),
                    encode_inner(entry, depth + 1, visited, options)?,
                );
            }
            Value::Object(out)
        }
        HostValue::Shared(node) => {
            let identity = Rc::as_ptr(node);
            if !visited.insert(identity) {
                return Ok(Value::String(CYCLE_MARKER.to_string()));
            }
            let inner = node.try_borrow().map_err(|_| CodecError::Encode {
                message: "shared value is mutably borrowed during encode".to_string(),
                location: ErrorLocation::from(Location::caller()),
            })?;
            encode_inner(&inner, depth + 1, visited, options)?
        }
        HostValue::Opaque {
            type_name,
            description,
        } => {
            let mut out = JsonMap::with_capacity(2);
            out.insert(OPAQUE_TAG.to_string(), Value::String(type_name.clone()));
            out.insert("repr".to_string(), Value::String(description.clone()));
            Value::Object(out)
        }
    };

    Ok(encoded)
}

fn stringify_key(key: &HostKey) -> String {
    match key {
        HostKey::Text(s) => s.clone(),
        HostKey::Int(i) => i.to_string(),
        HostKey::Bool(b) => b.to_string(),
    }
}
