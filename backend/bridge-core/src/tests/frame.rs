// Unit tests for length-prefixed framing: partial reads, back-to-back
// frames, and the two untrustworthy-prefix cases.

use crate::error::frame::FrameError;
use crate::frame::{DEFAULT_MAX_FRAME_BYTES, FrameDecoder, LENGTH_PREFIX_BYTES, encode_frame};
use crate::wire::{ControlCommand, Request, RequestPayload, WireMessage};

fn ping_message(id: u64) -> WireMessage {
    WireMessage::Request(Request::new(id, RequestPayload::Control(ControlCommand::Ping)))
}

/// **VALUE**: Verifies a frame split across arbitrary read boundaries still
/// decodes once all bytes arrive.
///
/// **WHY THIS MATTERS**: TCP delivers a stream, not messages. The decoder
/// sees whatever the kernel hands the reader, including one byte at a time.
///
/// **BUG THIS CATCHES**: Treating a short read as an error, or losing
/// buffered bytes between `extend` calls.
#[test]
fn given_frame_split_byte_by_byte_when_fed_then_decodes_once_complete() {
    let message = ping_message(7);
    let frame = encode_frame(&message, DEFAULT_MAX_FRAME_BYTES).expect("encoding failed");

    let mut decoder = FrameDecoder::new(DEFAULT_MAX_FRAME_BYTES);
    for (i, byte) in frame.iter().enumerate() {
        let is_last = i == frame.len() - 1;
        decoder.extend(std::slice::from_ref(byte));
        let decoded = decoder.next_frame().expect("decode failed");
        if is_last {
            assert_eq!(decoded, Some(message.clone()));
        } else {
            assert_eq!(decoded, None, "decoded early at byte {i}");
        }
    }
    assert_eq!(decoder.buffered_len(), 0);
}

/// **VALUE**: Verifies two frames arriving in one read both come out, in
/// order.
///
/// **WHY THIS MATTERS**: A fast client pipelines requests; coalesced frames
/// in a single TCP segment are the common case, not the exception.
///
/// **BUG THIS CATCHES**: The decoder consuming only the first frame and
/// discarding the rest of the buffer.
#[test]
fn given_two_frames_in_one_read_when_decoded_then_both_in_order() {
    let first = ping_message(1);
    let second = ping_message(2);

    let mut bytes = encode_frame(&first, DEFAULT_MAX_FRAME_BYTES).expect("encoding failed");
    bytes.extend(encode_frame(&second, DEFAULT_MAX_FRAME_BYTES).expect("encoding failed"));

    let mut decoder = FrameDecoder::new(DEFAULT_MAX_FRAME_BYTES);
    decoder.extend(&bytes);

    assert_eq!(decoder.next_frame().expect("decode failed"), Some(first));
    assert_eq!(decoder.next_frame().expect("decode failed"), Some(second));
    assert_eq!(decoder.next_frame().expect("decode failed"), None);
}

/// **VALUE**: Verifies a zero-length prefix is rejected as a protocol error.
///
/// **WHY THIS MATTERS**: A zero prefix can only come from a broken or
/// malicious peer; accepting it would spin the decoder on an empty payload
/// forever.
///
/// **BUG THIS CATCHES**: The zero case slipping through as `Ok(None)` and
/// wedging the connection.
#[test]
fn given_zero_length_prefix_when_decoded_then_empty_error() {
    let mut decoder = FrameDecoder::new(DEFAULT_MAX_FRAME_BYTES);
    decoder.extend(&[0, 0, 0, 0]);

    let result = decoder.next_frame();
    assert!(
        matches!(result, Err(FrameError::Empty { .. })),
        "expected Empty, got {result:?}"
    );
}

/// **VALUE**: Verifies a declared length past the configured bound fails
/// before any payload is buffered.
///
/// **WHY THIS MATTERS**: The prefix is attacker-controlled input. The bound
/// must be enforced on the declaration, not after allocating for it.
///
/// **BUG THIS CATCHES**: A multi-gigabyte declared length causing the
/// receive buffer to grow without limit.
#[test]
fn given_oversized_declared_length_when_decoded_then_oversized_error() {
    let mut decoder = FrameDecoder::new(1024);
    let declared: u32 = 2048;
    decoder.extend(&declared.to_be_bytes());

    let result = decoder.next_frame();
    match result {
        Err(FrameError::Oversized { declared, max, .. }) => {
            assert_eq!(declared, 2048);
            assert_eq!(max, 1024);
        }
        other => panic!("expected Oversized, got {other:?}"),
    }
}

/// **VALUE**: Verifies the encoder refuses to produce a frame the receiver
/// would reject.
///
/// **BUG THIS CATCHES**: Sending an oversized frame that the peer then
/// treats as a fatal protocol error, killing the connection for no reason.
#[test]
fn given_payload_past_bound_when_encoded_then_oversized_error() {
    let message = WireMessage::Request(Request::new(
        1,
        RequestPayload::Execute {
            code: "x".repeat(512),
            bindings: serde_json::Map::new(),
        },
    ));

    let result = encode_frame(&message, 64);
    assert!(
        matches!(result, Err(FrameError::Oversized { .. })),
        "expected Oversized, got {result:?}"
    );
}

/// **VALUE**: Verifies an undecodable payload is a fatal decode error and
/// the bytes are consumed.
///
/// **BUG THIS CATCHES**: Garbage bytes left in the buffer after a decode
/// failure, corrupting every subsequent frame.
#[test]
fn given_non_json_payload_when_decoded_then_decode_error() {
    let payload = b"not json at all";
    let mut bytes = Vec::with_capacity(LENGTH_PREFIX_BYTES + payload.len());
    bytes.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    bytes.extend_from_slice(payload);

    let mut decoder = FrameDecoder::new(DEFAULT_MAX_FRAME_BYTES);
    decoder.extend(&bytes);

    let result = decoder.next_frame();
    assert!(
        matches!(result, Err(FrameError::Decode { .. })),
        "expected Decode, got {result:?}"
    );
    assert_eq!(decoder.buffered_len(), 0);
}
