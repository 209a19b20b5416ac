//! The thread-safe hand-off between the listener's I/O threads and the
//! host's single dispatch thread.
//!
//! A [`CommandQueue`] is an owned instance whose lifecycle is tied to the
//! listener that feeds it - there is no process-wide singleton. It holds a
//! bounded FIFO of undispatched requests plus the in-flight registry, and
//! routes completed responses back to the writer of whichever connection
//! submitted them.
//!
//! # Connection generations
//!
//! Exactly one client connection is serviced at a time; each accepted
//! connection bumps a generation counter. Producers submit under the
//! generation their connection was attached with; a submission whose
//! generation has been superseded is rejected, and
//! [`CommandQueue::resolve`] drops responses whose generation is no longer
//! current - a late result for a dead connection is orphaned, not an error.
//!
//! # Locking
//!
//! The mutex guards only queue bookkeeping. It is never held while command
//! code runs, so a slow command cannot starve `enqueue` or `resolve`.

use crate::error::queue::QueueError;
use crate::wire::{Request, Response};

use common::ErrorLocation;

use std::collections::{HashMap, VecDeque};
use std::panic::Location;
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Condvar, Mutex};

use log::{debug, trace};

/// A request plus the connection generation it arrived on.
#[derive(Debug)]
pub struct QueuedRequest {
    pub request: Request,
    pub generation: u64,
}

#[derive(Debug, Default)]
struct QueueState {
    fifo: VecDeque<QueuedRequest>,
    /// Request id -> generation, for requests handed to the dispatcher but
    /// not yet resolved.
    inflight: HashMap<u64, u64>,
    generation: u64,
    outbound: Option<Sender<Response>>,
    closed: bool,
}

/// Bounded FIFO of pending commands plus the in-flight registry.
pub struct CommandQueue {
    capacity: usize,
    state: Mutex<QueueState>,
    space_freed: Condvar,
}

impl CommandQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(QueueState::default()),
            space_freed: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a request submitted on the given connection generation.
    ///
    /// The generation is the submitter's, not the queue's: a reader thread
    /// that was superseded between decoding a frame and landing it here must
    /// not have its request tagged onto the new connection.
    ///
    /// # Errors
    ///
    /// [`QueueError::Full`] when the bound is exceeded (backpressure - the
    /// caller must stop producing until space frees),
    /// [`QueueError::Superseded`] when `generation` is no longer current,
    /// [`QueueError::Closed`] after [`CommandQueue::close`].
    pub fn enqueue(&self, request: Request, generation: u64) -> Result<(), QueueError> {
        let mut state = self.state.lock().expect("queue lock poisoned");
        if state.closed {
            return Err(QueueError::Closed {
                location: ErrorLocation::from(Location::caller()),
            });
        }
        if generation != state.generation {
            return Err(QueueError::Superseded {
                generation,
                location: ErrorLocation::from(Location::caller()),
            });
        }
        if state.fifo.len() >= self.capacity {
            return Err(QueueError::Full {
                capacity: self.capacity,
                location: ErrorLocation::from(Location::caller()),
            });
        }
        trace!("enqueue request id={} generation={}", request.id, generation);
        state.fifo.push_back(QueuedRequest {
            request,
            generation,
        });
        Ok(())
    }

    /// Append a request, waiting for space when the queue is full.
    ///
    /// This is the listener's flow control: while it blocks here, no further
    /// frames are read from the socket, so backpressure reaches the client
    /// via TCP instead of unbounded buffering. Never called from the
    /// dispatch thread. The same generation check as [`CommandQueue::enqueue`]
    /// applies, including after a wait.
    pub fn enqueue_blocking(&self, request: Request, generation: u64) -> Result<(), QueueError> {
        let mut state = self.state.lock().expect("queue lock poisoned");
        loop {
            if state.closed {
                return Err(QueueError::Closed {
                    location: ErrorLocation::from(Location::caller()),
                });
            }
            if generation != state.generation {
                return Err(QueueError::Superseded {
                    generation,
                    location: ErrorLocation::from(Location::caller()),
                });
            }
            if state.fifo.len() < self.capacity {
                trace!(
                    "enqueue request id={} generation={}",
                    request.id, generation
                );
                state.fifo.push_back(QueuedRequest {
                    request,
                    generation,
                });
                return Ok(());
            }
            state = self
                .space_freed
                .wait(state)
                .expect("queue lock poisoned");
        }
    }

    /// Pop the oldest request and record it in-flight.
    ///
    /// Called only by the dispatcher, from the host's thread. Returns `None`
    /// when no work is pending - it never blocks, so an idle tick costs a
    /// lock acquisition and nothing more.
    pub fn dequeue_for_execution(&self) -> Option<QueuedRequest> {
        let mut state = self.state.lock().expect("queue lock poisoned");
        let ticket = state.fifo.pop_front()?;
        state.inflight.insert(ticket.request.id, ticket.generation);
        self.space_freed.notify_all();
        Some(ticket)
    }

    /// Store a completed response and wake the writer waiting to transmit it.
    ///
    /// A response whose generation is no longer current (its connection died
    /// or was superseded while the command ran) is dropped as orphaned.
    pub fn resolve(&self, response: Response, generation: u64) {
        let mut state = self.state.lock().expect("queue lock poisoned");
        state.inflight.remove(&response.id);

        if generation != state.generation {
            debug!(
                "dropping orphaned response id={} (generation {} superseded by {})",
                response.id, generation, state.generation
            );
            return;
        }

        match &state.outbound {
            Some(sender) => {
                // The writer thread owns the receiver; a send failure means
                // it already exited and teardown is in progress.
                if sender.send(response).is_err() {
                    debug!("response writer gone; dropping response");
                }
            }
            None => debug!(
                "dropping response id={}: no connection attached",
                response.id
            ),
        }
    }

    /// Install a new connection as the current generation.
    ///
    /// Returns the generation token and the receiver the connection's writer
    /// thread drains. State tied to the previous generation is purged.
    pub fn attach_connection(&self) -> (u64, Receiver<Response>) {
        let mut state = self.state.lock().expect("queue lock poisoned");
        state.generation += 1;
        let generation = state.generation;
        state.fifo.retain(|ticket| ticket.generation == generation);
        state.inflight.clear();
        let (tx, rx) = channel();
        state.outbound = Some(tx);
        self.space_freed.notify_all();
        debug!("connection generation {} attached", generation);
        (generation, rx)
    }

    /// Tear down the given connection generation, if it is still current.
    ///
    /// Undispatched requests from the dead connection are purged - their
    /// only observer synthesizes disconnected responses client-side, so
    /// nothing is silently dropped at the level that matters.
    pub fn detach_connection(&self, generation: u64) {
        let mut state = self.state.lock().expect("queue lock poisoned");
        if state.generation != generation {
            return;
        }
        let purged = state
            .fifo
            .iter()
            .filter(|t| t.generation == generation)
            .count();
        state.fifo.retain(|t| t.generation != generation);
        state.inflight.clear();
        state.outbound = None;
        self.space_freed.notify_all();
        debug!(
            "connection generation {} detached ({} queued commands purged)",
            generation, purged
        );
    }

    /// Close the queue for good; producers waiting on space are woken.
    pub fn close(&self) {
        let mut state = self.state.lock().expect("queue lock poisoned");
        state.closed = true;
        state.outbound = None;
        self.space_freed.notify_all();
    }

    /// Undispatched commands currently queued.
    pub fn queued_len(&self) -> usize {
        self.state.lock().expect("queue lock poisoned").fifo.len()
    }

    /// Commands handed to the dispatcher but not yet resolved.
    pub fn inflight_len(&self) -> usize {
        self.state
            .lock()
            .expect("queue lock poisoned")
            .inflight
            .len()
    }
}
