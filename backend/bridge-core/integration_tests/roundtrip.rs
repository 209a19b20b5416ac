//! Full-stack request/response tests: connector to listener to dispatcher
//! and back.

use crate::helpers::{healthy_connector, spawn_host};

use bridge_core::error::connector::ConnectorError;
use bridge_core::wire::{ControlCommand, RequestPayload, ResponseStatus};

use std::time::Duration;

use serde_json::{Map as JsonMap, json};

const CALL_TIMEOUT: Duration = Duration::from_secs(5);

fn execute(code: &str) -> RequestPayload {
    RequestPayload::Execute {
        code: code.to_string(),
        bindings: JsonMap::new(),
    }
}

/// **VALUE**: Verifies the whole path works: frame out, queue, tick,
/// frame back, pending resolution.
///
/// **WHY THIS MATTERS**: This is the product. Every layer can pass its
/// unit tests and the seams between them can still be wrong.
///
/// **BUG THIS CATCHES**: Any disagreement between the connector's and the
/// listener's view of the wire format, or responses never leaving the
/// queue.
#[tokio::test]
async fn given_running_host_when_execute_called_then_ok_result() {
    let host = spawn_host();
    let connector = healthy_connector(host.addr()).await;

    let response = connector
        .call(execute("1+1"), CALL_TIMEOUT)
        .await
        .expect("call failed");

    assert_eq!(response.status, ResponseStatus::Ok);
    assert_eq!(response.result, Some(json!(2)));

    let stats = connector.statistics();
    assert!(stats.successes >= 1, "success not recorded: {stats:?}");
    assert!(stats.last_success_at.is_some());
}

/// **VALUE**: Verifies a host-side failure arrives as an ERROR response
/// with its trace, not as a dead connection.
#[tokio::test]
async fn given_failing_code_when_executed_then_error_response_with_trace() {
    let host = spawn_host();
    let connector = healthy_connector(host.addr()).await;

    let response = connector
        .call(execute("fail"), CALL_TIMEOUT)
        .await
        .expect("call failed");

    assert_eq!(response.status, ResponseStatus::Error);
    let descriptor = response.error.expect("missing error descriptor");
    assert!(descriptor.message.contains("fail"));
    assert!(descriptor.trace.is_some());
}

/// **VALUE**: Verifies a panicking command neither kills the host loop nor
/// the connection; the next command still runs.
///
/// **WHY THIS MATTERS**: One bad command must cost exactly one ERROR
/// response, never the session.
///
/// **BUG THIS CATCHES**: The panic unwinding through the tick loop, taking
/// the dispatch thread (and with it every later command) down.
#[tokio::test]
async fn given_panicking_command_when_executed_then_host_survives() {
    let host = spawn_host();
    let connector = healthy_connector(host.addr()).await;

    let response = connector
        .call(execute("panic"), CALL_TIMEOUT)
        .await
        .expect("call failed");
    assert_eq!(response.status, ResponseStatus::Error);

    let next = connector
        .call(execute("1+1"), CALL_TIMEOUT)
        .await
        .expect("call after panic failed");
    assert_eq!(next.result, Some(json!(2)));
}

/// **VALUE**: Verifies structured queries route end to end.
#[tokio::test]
async fn given_query_when_called_then_host_answers() {
    let host = spawn_host();
    let connector = healthy_connector(host.addr()).await;

    let response = connector
        .call(
            RequestPayload::Query {
                name: "object_count".to_string(),
                params: json!({}),
            },
            CALL_TIMEOUT,
        )
        .await
        .expect("call failed");

    assert_eq!(response.status, ResponseStatus::Ok);
    assert_eq!(response.result, Some(json!(3)));
}

/// **VALUE**: Verifies sequential calls each get their own correct answer.
///
/// **BUG THIS CATCHES**: Correlation-id mixups delivering one call's
/// result to another caller.
#[tokio::test]
async fn given_sequential_calls_when_executed_then_each_answered_correctly() {
    let host = spawn_host();
    let connector = healthy_connector(host.addr()).await;

    for _ in 0..3 {
        let ok = connector
            .call(execute("1+1"), CALL_TIMEOUT)
            .await
            .expect("call failed");
        assert_eq!(ok.result, Some(json!(2)));

        let err = connector
            .call(execute("fail"), CALL_TIMEOUT)
            .await
            .expect("call failed");
        assert_eq!(err.status, ResponseStatus::Error);
    }
}

/// **VALUE**: Verifies the status control command reports live bridge
/// counters through the full stack.
#[tokio::test]
async fn given_status_control_when_called_then_counters_reported() {
    let host = spawn_host();
    let connector = healthy_connector(host.addr()).await;

    let response = connector
        .call(
            RequestPayload::Control(ControlCommand::Status),
            CALL_TIMEOUT,
        )
        .await
        .expect("call failed");

    let result = response.result.expect("missing status body");
    assert!(result["uptime_secs"].is_u64());
    assert!(result["queue_capacity"].as_u64().unwrap() >= 1);
    // The health probe's ping ran before this command.
    assert!(result["commands_processed"].as_u64().unwrap() >= 1);
}

/// **VALUE**: Verifies shutdown is acknowledged to the client and surfaces
/// as a flag the host loop polls, without the bridge tearing anything down
/// itself.
#[tokio::test]
async fn given_shutdown_control_when_called_then_host_loop_observes_flag() {
    let host = spawn_host();
    let connector = healthy_connector(host.addr()).await;

    let response = connector
        .call(
            RequestPayload::Control(ControlCommand::Shutdown),
            CALL_TIMEOUT,
        )
        .await
        .expect("call failed");
    assert_eq!(response.result, Some(json!({ "shutting_down": true })));

    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while !host.shutdown_observed() {
        assert!(
            std::time::Instant::now() < deadline,
            "host loop never observed the shutdown flag"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// **VALUE**: Verifies a per-call timeout fires while the command still
/// runs, and the late response is discarded without poisoning later calls.
///
/// **WHY THIS MATTERS**: The host executes commands it cannot cancel; the
/// deadline lives entirely client-side and the connection must stay usable
/// after one fires.
///
/// **BUG THIS CATCHES**: The orphaned late response being delivered to the
/// wrong caller, or wedging the pending table.
#[tokio::test]
async fn given_slow_command_when_timeout_fires_then_later_calls_unaffected() {
    let host = spawn_host();
    let connector = healthy_connector(host.addr()).await;

    let result = connector
        .call(execute("sleep:400"), Duration::from_millis(50))
        .await;
    assert!(
        matches!(result, Err(ConnectorError::Timeout { .. })),
        "expected Timeout, got {result:?}"
    );

    // The sleeping command still occupies the dispatch thread; the next
    // call queues behind it and completes once it finishes.
    let next = connector
        .call(execute("1+1"), CALL_TIMEOUT)
        .await
        .expect("call after timeout failed");
    assert_eq!(next.result, Some(json!(2)));
}
