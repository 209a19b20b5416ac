// Unit tests for the host-value codec.
// Covers scalar mapping, key stringification, cycle/depth markers, and the
// opaque-value tagging the client relies on.

use crate::codec::{
    CYCLE_MARKER, DEPTH_MARKER, EncodeOptions, HostKey, HostValue, OPAQUE_TAG, encode,
};

use serde_json::{Value, json};

fn encode_default(value: &HostValue) -> Value {
    encode(value, &EncodeOptions::default()).expect("encoding failed")
}

/// **VALUE**: Verifies that every scalar maps directly onto the wire model.
///
/// **WHY THIS MATTERS**: Scalars are the bulk of real results. If the direct
/// mapping is wrong, every command's output is wrong.
///
/// **BUG THIS CATCHES**: Type confusion between ints and floats, booleans
/// encoded as numbers, or null turning into a string.
#[test]
fn given_scalars_when_encoded_then_map_directly() {
    assert_eq!(encode_default(&HostValue::Null), json!(null));
    assert_eq!(encode_default(&HostValue::Bool(true)), json!(true));
    assert_eq!(encode_default(&HostValue::Int(-7)), json!(-7));
    assert_eq!(encode_default(&HostValue::Float(2.5)), json!(2.5));
    assert_eq!(
        encode_default(&HostValue::Text("mesh".to_string())),
        json!("mesh")
    );
}

/// **VALUE**: Verifies non-finite floats encode as strings instead of
/// failing the whole response.
///
/// **WHY THIS MATTERS**: Host math produces NaN and infinities routinely
/// (degenerate geometry, division by zero in user code). JSON has no
/// representation for them, and the encoder must never raise past the
/// boundary.
///
/// **BUG THIS CATCHES**: An encode error (or a silently dropped field) when
/// a result contains NaN.
#[test]
fn given_non_finite_floats_when_encoded_then_stringified() {
    assert_eq!(encode_default(&HostValue::Float(f64::NAN)), json!("NaN"));
    assert_eq!(encode_default(&HostValue::Float(f64::INFINITY)), json!("inf"));
    assert_eq!(
        encode_default(&HostValue::Float(f64::NEG_INFINITY)),
        json!("-inf")
    );
}

/// **VALUE**: Verifies ordered composites become lists and maps, with
/// non-string keys stringified.
///
/// **WHY THIS MATTERS**: The wire model only has string-keyed maps; hosts
/// key collections by integers and booleans all the time.
///
/// **BUG THIS CATCHES**: Dropped entries, reordered lists, or non-string
/// keys causing an encode failure.
#[test]
fn given_composites_when_encoded_then_lists_and_string_keyed_maps() {
    let value = HostValue::Map(vec![
        (
            HostKey::Text("objects".to_string()),
            HostValue::List(vec![HostValue::Int(1), HostValue::Int(2)]),
        ),
        (HostKey::Int(42), HostValue::Text("by-number".to_string())),
        (HostKey::Bool(false), HostValue::Null),
    ]);

    assert_eq!(
        encode_default(&value),
        json!({
            "objects": [1, 2],
            "42": "by-number",
            "false": null,
        })
    );
}

/// **VALUE**: Verifies a self-referential structure terminates and yields a
/// bounded result containing the cycle marker.
///
/// **WHY THIS MATTERS**: Scene graphs are full of parent/child back-links.
/// Without identity tracking the encoder recurses forever and takes the
/// host's only thread down with it.
///
/// **BUG THIS CATCHES**: Infinite recursion or a stack overflow on cyclic
/// input; a cycle encoded as an error instead of a marker.
#[test]
fn given_cyclic_structure_when_encoded_then_terminates_with_marker() {
    let node = HostValue::shared(HostValue::Null);
    if let HostValue::Shared(cell) = &node {
        *cell.borrow_mut() = HostValue::List(vec![
            HostValue::Text("self".to_string()),
            node.clone(),
        ]);
    }

    let encoded = encode_default(&node);
    assert_eq!(encoded, json!(["self", CYCLE_MARKER]));
}

/// **VALUE**: Verifies nesting beyond the depth bound truncates with a
/// marker instead of failing.
///
/// **WHY THIS MATTERS**: Depth is the memory bound for a single response; a
/// deep-but-legal value must still produce a usable answer.
///
/// **BUG THIS CATCHES**: The bound failing the whole encode, or not being
/// applied at all.
#[test]
fn given_nesting_past_depth_bound_when_encoded_then_truncates() {
    let mut value = HostValue::Int(0);
    for _ in 0..10 {
        value = HostValue::List(vec![value]);
    }

    let options = EncodeOptions { max_depth: 3 };
    let encoded = encode(&value, &options).expect("encoding failed");

    // Levels 0..=3 encode as lists; the level past the bound is the marker.
    assert_eq!(encoded, json!([[[[DEPTH_MARKER]]]]));
}

/// **VALUE**: Verifies opaque handles are tagged so the client can tell a
/// best-effort description from real data.
///
/// **WHY THIS MATTERS**: Live resources (images, GPU buffers) have no wire
/// form. An untagged description string would be indistinguishable from an
/// actual string result.
///
/// **BUG THIS CATCHES**: Opaque values serialized as bare strings, or the
/// tag key changing silently.
#[test]
fn given_opaque_value_when_encoded_then_tagged_map() {
    let value = HostValue::Opaque {
        type_name: "Image".to_string(),
        description: "<Image 'render.png' 1920x1080>".to_string(),
    };

    assert_eq!(
        encode_default(&value),
        json!({
            OPAQUE_TAG: "Image",
            "repr": "<Image 'render.png' 1920x1080>",
        })
    );
}

/// **VALUE**: Verifies aliasing without a cycle still encodes (shared nodes
/// are only markers on a true revisit within one pass).
///
/// **BUG THIS CATCHES**: The identity set treating any shared node as a
/// cycle even on first visit.
#[test]
fn given_shared_acyclic_node_when_encoded_then_plain_value() {
    let shared = HostValue::shared(HostValue::Int(3));
    let value = HostValue::List(vec![shared, HostValue::Int(4)]);
    assert_eq!(encode_default(&value), json!([3, 4]));
}

/// **VALUE**: Verifies a mutably borrowed shared node surfaces as a
/// CodecError rather than a panic.
///
/// **WHY THIS MATTERS**: The dispatcher's contract is catch-and-report; the
/// codec must hand it an error value, not unwind.
#[test]
fn given_borrowed_shared_node_when_encoded_then_codec_error() {
    let node = HostValue::shared(HostValue::Int(1));
    let HostValue::Shared(cell) = &node else {
        unreachable!();
    };
    let _hold = cell.borrow_mut();

    let result = encode(&node, &EncodeOptions::default());
    assert!(result.is_err(), "expected CodecError, got {result:?}");
}
