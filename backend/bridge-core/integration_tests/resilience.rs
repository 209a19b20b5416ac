//! Failure-path tests: disconnects, supersession, protocol violations, and
//! recovery through the reconnection supervisor.

use crate::helpers::{connector_for, healthy_connector, spawn_host};

use bridge_core::error::connector::ConnectorError;
use bridge_core::frame::{DEFAULT_MAX_FRAME_BYTES, encode_frame};
use bridge_core::wire::{Response, WireMessage};

use std::net::SocketAddr;
use std::time::Duration;

use serde_json::{Map as JsonMap, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

fn execute(code: &str) -> bridge_core::wire::RequestPayload {
    bridge_core::wire::RequestPayload::Execute {
        code: code.to_string(),
        bindings: JsonMap::new(),
    }
}

/// An address nothing is listening on: bind an ephemeral port, then free it.
fn dead_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind failed");
    listener.local_addr().expect("no local addr")
}

/// Wait for the peer to close the stream; panics if it stays open.
async fn expect_peer_close(stream: &mut TcpStream) {
    let mut sink = [0u8; 256];
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        match tokio::time::timeout_at(deadline, stream.read(&mut sink)).await {
            Ok(Ok(0)) | Ok(Err(_)) => return,
            Ok(Ok(_)) => continue,
            Err(_) => panic!("host never closed the connection"),
        }
    }
}

/// **VALUE**: Verifies calls made with no healthy connection fail
/// immediately with a disconnected error.
///
/// **WHY THIS MATTERS**: Callers need fail-fast when the host is down, not
/// a full timeout wait for a request that was never sent.
#[tokio::test]
async fn given_no_host_when_called_then_disconnected_error() {
    let connector = connector_for(dead_addr());
    connector.start();

    let result = connector.call(execute("1+1"), Duration::from_secs(1)).await;
    assert!(
        matches!(result, Err(ConnectorError::Disconnected { .. })),
        "expected Disconnected, got {result:?}"
    );

    let stats = connector.statistics();
    assert_eq!(stats.successes, 0);
    assert!(stats.failures >= 1);
    connector.close().await;
}

/// **VALUE**: Verifies the health wait gives up on time when no host ever
/// appears.
#[tokio::test]
async fn given_no_host_when_waiting_for_health_then_times_out() {
    let connector = connector_for(dead_addr());
    connector.start();

    let healthy = connector
        .wait_until_healthy(Duration::from_millis(300))
        .await;
    assert!(!healthy);
    connector.close().await;
}

/// **VALUE**: Verifies a superseding connection kicks the previous client,
/// and that the kicked connector recovers by reconnecting on its own.
///
/// **WHY THIS MATTERS**: Single-client is the policy; the recovery loop is
/// what makes a client restart (or a stolen slot) survivable without
/// operator action.
///
/// **BUG THIS CATCHES**: The supervisor not noticing the dropped socket,
/// or the reconnect never passing the health probe.
#[tokio::test]
async fn given_superseding_connection_then_kicked_connector_reconnects() {
    let host = spawn_host();
    let connector = healthy_connector(host.addr()).await;

    // A second connection takes the slot; the host shuts the first one.
    let _intruder = TcpStream::connect(host.addr())
        .await
        .expect("raw connect failed");
    tokio::time::sleep(Duration::from_millis(100)).await;

    // The supervisor reconnects (superseding the intruder in turn) and the
    // bridge is usable again.
    assert!(
        connector.wait_until_healthy(Duration::from_secs(5)).await,
        "connector never recovered"
    );
    let response = connector
        .call(execute("1+1"), Duration::from_secs(5))
        .await
        .expect("call after reconnect failed");
    assert_eq!(response.result, Some(json!(2)));
}

/// **VALUE**: Verifies a call that is in flight when the connection dies
/// resolves with a disconnected error, not a silent hang or a timeout.
///
/// **WHY THIS MATTERS**: Disconnected and timeout are deliberately
/// distinct signals: "host is gone" should reach the caller the moment the
/// connection drops, while the host may still be executing the command
/// with nowhere to send the result.
///
/// **BUG THIS CATCHES**: Pending entries surviving teardown and leaving
/// their callers to wait out the full deadline, or the synthetic
/// disconnected response being surfaced as a normal result.
#[tokio::test]
async fn given_call_in_flight_when_connection_dies_then_disconnected_error() {
    let host = spawn_host();
    let connector = healthy_connector(host.addr()).await;

    let slow_caller = connector.clone();
    let slow = tokio::spawn(async move {
        slow_caller
            .call(execute("sleep:400"), Duration::from_secs(5))
            .await
    });
    // Let the request reach the host and start executing.
    tokio::time::sleep(Duration::from_millis(50)).await;

    // A superseding connection kills the one carrying the pending call.
    let _intruder = TcpStream::connect(host.addr())
        .await
        .expect("raw connect failed");

    let result = slow.await.expect("call task panicked");
    assert!(
        matches!(result, Err(ConnectorError::Disconnected { .. })),
        "expected Disconnected, got {result:?}"
    );

    // The drop costs the pending call, not the session: the supervisor
    // reconnects and later calls succeed.
    assert!(
        connector.wait_until_healthy(Duration::from_secs(5)).await,
        "connector never recovered"
    );
    let next = connector
        .call(execute("1+1"), Duration::from_secs(5))
        .await
        .expect("call after reconnect failed");
    assert_eq!(next.result, Some(json!(2)));
}

/// **VALUE**: Verifies an oversized declared frame length terminates the
/// connection with nothing executed.
///
/// **WHY THIS MATTERS**: The length prefix is untrusted input on a socket
/// any local process can reach; the bound must hold at the protocol edge.
///
/// **BUG THIS CATCHES**: The host buffering toward a multi-gigabyte
/// declared length, or limping along after a protocol violation.
#[tokio::test]
async fn given_oversized_frame_declaration_then_host_closes_connection() {
    let host = spawn_host();
    let mut stream = TcpStream::connect(host.addr())
        .await
        .expect("raw connect failed");

    let declared = (DEFAULT_MAX_FRAME_BYTES as u32) + 1;
    stream
        .write_all(&declared.to_be_bytes())
        .await
        .expect("write failed");

    expect_peer_close(&mut stream).await;
}

/// **VALUE**: Verifies a client sending a response frame (a direction
/// violation) gets disconnected.
///
/// **BUG THIS CATCHES**: The host treating a frame it should never receive
/// as anything other than fatal.
#[tokio::test]
async fn given_response_frame_from_client_then_host_closes_connection() {
    let host = spawn_host();
    let mut stream = TcpStream::connect(host.addr())
        .await
        .expect("raw connect failed");

    let frame = encode_frame(
        &WireMessage::Response(Response::ok(1, json!(null))),
        DEFAULT_MAX_FRAME_BYTES,
    )
    .expect("encoding failed");
    stream.write_all(&frame).await.expect("write failed");

    expect_peer_close(&mut stream).await;
}

/// **VALUE**: Verifies closing the connector fails fast afterward and the
/// supervisor does not resurrect the connection.
#[tokio::test]
async fn given_closed_connector_then_calls_fail_fast() {
    let host = spawn_host();
    let connector = healthy_connector(host.addr()).await;

    connector.close().await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(!connector.is_connected());
    let result = connector.call(execute("1+1"), Duration::from_secs(1)).await;
    assert!(
        matches!(result, Err(ConnectorError::Disconnected { .. })),
        "expected Disconnected, got {result:?}"
    );
}
