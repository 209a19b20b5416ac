// Unit tests for the wire model's JSON shapes. These pin the on-the-wire
// contract: tag names, payload nesting, and which fields may be absent.

use crate::wire::{
    ControlCommand, ErrorDescriptor, Request, RequestPayload, Response, ResponseStatus,
    WireMessage,
};

use serde_json::{Map as JsonMap, json};

/// **VALUE**: Pins the execute request's JSON shape: `type`/`kind` tags,
/// nested `payload`, flattened request fields.
///
/// **WHY THIS MATTERS**: The other side of this socket is not this crate.
/// A renamed tag compiles fine and breaks every existing client.
///
/// **BUG THIS CATCHES**: A serde attribute change silently altering the
/// wire contract.
#[test]
fn given_execute_request_when_serialized_then_expected_shape() {
    let mut bindings = JsonMap::new();
    bindings.insert("radius".to_string(), json!(2.5));
    let request = Request {
        id: 42,
        payload: RequestPayload::Execute {
            code: "make_sphere(radius)".to_string(),
            bindings,
        },
        submitted_at: 1_700_000_000_000,
    };

    let encoded = serde_json::to_value(WireMessage::Request(request)).expect("serialize failed");
    assert_eq!(
        encoded,
        json!({
            "type": "request",
            "id": 42,
            "kind": "execute",
            "payload": {
                "code": "make_sphere(radius)",
                "bindings": { "radius": 2.5 },
            },
            "submitted_at": 1_700_000_000_000u64,
        })
    );
}

/// **VALUE**: Verifies a request without bindings still decodes (the field
/// defaults to empty).
///
/// **WHY THIS MATTERS**: Hand-written clients omit optional fields; the
/// host must accept the minimal form.
#[test]
fn given_execute_without_bindings_when_deserialized_then_empty_default() {
    let raw = json!({
        "type": "request",
        "id": 1,
        "kind": "execute",
        "payload": { "code": "noop()" },
        "submitted_at": 0,
    });

    let message: WireMessage = serde_json::from_value(raw).expect("deserialize failed");
    let WireMessage::Request(request) = message else {
        panic!("expected a request");
    };
    let RequestPayload::Execute { code, bindings } = request.payload else {
        panic!("expected an execute payload");
    };
    assert_eq!(code, "noop()");
    assert!(bindings.is_empty());
}

/// **VALUE**: Pins the control command encoding as lowercase payload
/// strings.
#[test]
fn given_control_request_when_serialized_then_snake_case_payload() {
    let request = Request {
        id: 7,
        payload: RequestPayload::Control(ControlCommand::Ping),
        submitted_at: 5,
    };

    let encoded = serde_json::to_value(WireMessage::Request(request)).expect("serialize failed");
    assert_eq!(encoded["kind"], json!("control"));
    assert_eq!(encoded["payload"], json!("ping"));
}

/// **VALUE**: Verifies absent optional response fields are omitted, not
/// null.
///
/// **WHY THIS MATTERS**: Clients in other languages distinguish a missing
/// key from an explicit null; the contract says missing.
///
/// **BUG THIS CATCHES**: `skip_serializing_if` being dropped, bloating
/// every response with `"error": null`.
#[test]
fn given_ok_response_when_serialized_then_error_field_absent() {
    let response = Response {
        id: 3,
        status: ResponseStatus::Ok,
        result: Some(json!([1, 2, 3])),
        error: None,
        completed_at: 99,
    };

    let encoded =
        serde_json::to_value(WireMessage::Response(response)).expect("serialize failed");
    assert_eq!(
        encoded,
        json!({
            "type": "response",
            "id": 3,
            "status": "ok",
            "result": [1, 2, 3],
            "completed_at": 99,
        })
    );
}

/// **VALUE**: Verifies an error response round-trips with message and
/// trace intact.
#[test]
fn given_error_response_when_round_tripped_then_descriptor_intact() {
    let original = WireMessage::Response(Response::error(
        8,
        ErrorDescriptor {
            message: "division by zero".to_string(),
            trace: Some("line 3".to_string()),
        },
    ));

    let bytes = serde_json::to_vec(&original).expect("serialize failed");
    let decoded: WireMessage = serde_json::from_slice(&bytes).expect("deserialize failed");
    assert_eq!(decoded, original);
}

/// **VALUE**: Verifies an unknown `kind` fails to decode instead of
/// producing some default command.
///
/// **WHY THIS MATTERS**: The payload union is closed on purpose; a typo'd
/// command must die at the frame boundary, not deep inside the host.
#[test]
fn given_unknown_kind_when_deserialized_then_error() {
    let raw = json!({
        "type": "request",
        "id": 1,
        "kind": "teleport",
        "payload": {},
        "submitted_at": 0,
    });

    let result: Result<WireMessage, _> = serde_json::from_value(raw);
    assert!(result.is_err(), "unknown kind decoded: {result:?}");
}
