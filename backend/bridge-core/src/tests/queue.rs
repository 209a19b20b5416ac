// Unit tests for the command queue: ordering, backpressure, and the
// connection-generation rules that keep requests and responses from
// crossing connections.

use crate::error::queue::QueueError;
use crate::queue::CommandQueue;
use crate::wire::{ControlCommand, Request, RequestPayload, Response};

use serde_json::json;

fn request(id: u64) -> Request {
    Request::new(id, RequestPayload::Control(ControlCommand::Ping))
}

/// **VALUE**: Verifies requests come out in arrival order.
///
/// **WHY THIS MATTERS**: Clients rely on commands from one connection
/// running in submission order; a scene setup script is order-sensitive.
///
/// **BUG THIS CATCHES**: LIFO or otherwise reordered dispatch.
#[test]
fn given_several_requests_when_dequeued_then_fifo_order() {
    let queue = CommandQueue::new(8);
    let (generation, _rx) = queue.attach_connection();

    for id in 1..=3 {
        queue.enqueue(request(id), generation).expect("enqueue failed");
    }

    for expected in 1..=3 {
        let ticket = queue.dequeue_for_execution().expect("queue empty");
        assert_eq!(ticket.request.id, expected);
    }
    assert!(queue.dequeue_for_execution().is_none());
}

/// **VALUE**: Verifies the bound is enforced and reported as `Full`.
///
/// **WHY THIS MATTERS**: The bound is the host's memory protection against
/// a runaway client; `Full` is the signal the producer uses to stop.
///
/// **BUG THIS CATCHES**: The queue growing past its capacity, or `Full`
/// being reported as some other error.
#[test]
fn given_full_queue_when_enqueued_then_full_error() {
    let queue = CommandQueue::new(2);
    let (generation, _rx) = queue.attach_connection();

    queue.enqueue(request(1), generation).expect("enqueue failed");
    queue.enqueue(request(2), generation).expect("enqueue failed");

    let result = queue.enqueue(request(3), generation);
    match result {
        Err(QueueError::Full { capacity, .. }) => assert_eq!(capacity, 2),
        other => panic!("expected Full, got {other:?}"),
    }
    assert_eq!(queue.queued_len(), 2);
}

/// **VALUE**: Verifies a resolved response reaches the attached
/// connection's receiver.
///
/// **WHY THIS MATTERS**: This is the whole return path; if routing breaks,
/// every command completes on the host and the client never hears about it.
///
/// **BUG THIS CATCHES**: Responses resolved but never handed to the writer,
/// or the in-flight registry not being cleared on resolve.
#[test]
fn given_inflight_request_when_resolved_then_routed_to_receiver() {
    let queue = CommandQueue::new(8);
    let (generation, rx) = queue.attach_connection();

    queue.enqueue(request(5), generation).expect("enqueue failed");
    let ticket = queue.dequeue_for_execution().expect("queue empty");
    assert_eq!(queue.inflight_len(), 1);

    queue.resolve(Response::ok(5, json!(2)), ticket.generation);
    assert_eq!(queue.inflight_len(), 0);
    assert_eq!(ticket.generation, generation);

    let response = rx.try_recv().expect("no response routed");
    assert_eq!(response.id, 5);
}

/// **VALUE**: Verifies a response for a superseded generation is dropped
/// instead of being delivered to the new connection.
///
/// **WHY THIS MATTERS**: A command can outlive its connection. Its late
/// result must never be mistaken for an answer to the new client's
/// requests.
///
/// **BUG THIS CATCHES**: Cross-connection response delivery after a
/// reconnect.
#[test]
fn given_superseded_generation_when_resolved_then_response_dropped() {
    let queue = CommandQueue::new(8);
    let (old_generation, _old_rx) = queue.attach_connection();

    queue.enqueue(request(9), old_generation).expect("enqueue failed");
    let ticket = queue.dequeue_for_execution().expect("queue empty");
    assert_eq!(ticket.generation, old_generation);

    // Client reconnects while the command is still running.
    let (_new_generation, new_rx) = queue.attach_connection();

    queue.resolve(Response::ok(9, json!(null)), ticket.generation);
    assert!(new_rx.try_recv().is_err(), "orphaned response was delivered");
}

/// **VALUE**: Verifies a submission under a superseded generation is
/// rejected outright, so a slow reader cannot smuggle a dead connection's
/// request onto the new one.
///
/// **WHY THIS MATTERS**: The reader thread decodes a frame, then enqueues;
/// a supersede can land between those two steps. Tagging the stale request
/// with the new generation would execute it on the host and deliver its
/// result to the new client - with colliding correlation ids, to the wrong
/// caller.
///
/// **BUG THIS CATCHES**: Enqueue stamping requests with the queue's
/// current generation instead of the submitter's.
#[test]
fn given_superseded_generation_when_enqueued_then_rejected() {
    let queue = CommandQueue::new(8);
    let (old_generation, _old_rx) = queue.attach_connection();
    let (_new_generation, new_rx) = queue.attach_connection();

    let result = queue.enqueue(request(1), old_generation);
    match result {
        Err(QueueError::Superseded { generation, .. }) => {
            assert_eq!(generation, old_generation);
        }
        other => panic!("expected Superseded, got {other:?}"),
    }
    let blocking = queue.enqueue_blocking(request(1), old_generation);
    assert!(
        matches!(blocking, Err(QueueError::Superseded { .. })),
        "expected Superseded, got {blocking:?}"
    );

    // Nothing reaches the host, so nothing can reach the new client.
    assert_eq!(queue.queued_len(), 0);
    assert!(queue.dequeue_for_execution().is_none());
    assert!(new_rx.try_recv().is_err());
}

/// **VALUE**: Verifies detaching the current connection purges its
/// undispatched requests.
///
/// **WHY THIS MATTERS**: Running stale commands after the submitter is gone
/// wastes the host's only thread and mutates state nobody asked for
/// anymore.
///
/// **BUG THIS CATCHES**: Queued requests from a dead connection executing
/// after the disconnect.
#[test]
fn given_detached_connection_then_queued_requests_purged() {
    let queue = CommandQueue::new(8);
    let (generation, _rx) = queue.attach_connection();

    queue.enqueue(request(1), generation).expect("enqueue failed");
    queue.enqueue(request(2), generation).expect("enqueue failed");

    queue.detach_connection(generation);
    assert_eq!(queue.queued_len(), 0);
    assert!(queue.dequeue_for_execution().is_none());
}

/// **VALUE**: Verifies a stale detach cannot tear down a superseding
/// connection.
///
/// **BUG THIS CATCHES**: The old connection's teardown racing the new
/// connection's attach and purging the new client's queue.
#[test]
fn given_stale_generation_when_detached_then_current_connection_untouched() {
    let queue = CommandQueue::new(8);
    let (old_generation, _old_rx) = queue.attach_connection();
    let (new_generation, _new_rx) = queue.attach_connection();

    queue.enqueue(request(4), new_generation).expect("enqueue failed");
    queue.detach_connection(old_generation);

    assert_eq!(queue.queued_len(), 1, "stale detach purged the live queue");
}

/// **VALUE**: Verifies a closed queue rejects producers with `Closed`.
///
/// **BUG THIS CATCHES**: Enqueues after listener shutdown silently
/// succeeding into a queue nothing will ever drain.
#[test]
fn given_closed_queue_when_enqueued_then_closed_error() {
    let queue = CommandQueue::new(8);
    let (generation, _rx) = queue.attach_connection();
    queue.close();

    let result = queue.enqueue(request(1), generation);
    assert!(
        matches!(result, Err(QueueError::Closed { .. })),
        "expected Closed, got {result:?}"
    );
    let blocking = queue.enqueue_blocking(request(2), generation);
    assert!(
        matches!(blocking, Err(QueueError::Closed { .. })),
        "expected Closed, got {blocking:?}"
    );
}
