//! # Events specification
//!
//! The session reports what it is doing through an in-process event
//! stream: log lines, rating changes, protocol chatter. The stream is
//! bounded; when the application does not drain it, the oldest events
//! are dropped rather than blocking the engine.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crate::rating::Rating;

const EVENT_QUEUE_CAP: usize = 1_000;

/// A single engine event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// An informational string the library-user may write to the log.
    Info(String),

    /// A warning string the library-user should write to the log.
    Warning(String),

    /// An error. As most things are asynchronous, things may go wrong
    /// at any time; this should be reported in a non-disturbing way.
    Error(String),

    /// The rating of a peer identity may have changed.
    RatingChanged { address: String, rating: Rating },

    /// A Distribution.Ping was answered with a matching Pong.
    EchoPongReceived { address: String },

    /// An own key was reset; partners are being notified.
    OwnKeyReset { revoked: String, replacement: String },
}

/// A bounded FIFO shared between the engine and one consumer.
///
/// Also used (with a different payload type) as the sync event queue,
/// which needs the timed blocking pop.
#[derive(Debug)]
pub(crate) struct Queue<T> {
    inner: Mutex<VecDeque<T>>,
    cond: Condvar,
}

impl<T> Queue<T> {
    pub fn new() -> Self {
        Queue {
            inner: Mutex::new(VecDeque::new()),
            cond: Condvar::new(),
        }
    }

    /// Appends an event; drops the oldest one beyond the cap.
    pub fn push(&self, item: T) {
        let mut q = self.inner.lock().unwrap();
        if q.len() >= EVENT_QUEUE_CAP {
            q.pop_front();
        }
        q.push_back(item);
        self.cond.notify_one();
    }

    pub fn try_pop(&self) -> Option<T> {
        self.inner.lock().unwrap().pop_front()
    }

    /// Blocking pop with a timeout; `None` on expiry.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let mut q = self.inner.lock().unwrap();
        loop {
            if let Some(item) = q.pop_front() {
                return Some(item);
            }
            let (guard, res) = self.cond.wait_timeout(q, timeout).unwrap();
            q = guard;
            if res.timed_out() {
                return q.pop_front();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }
}

/// The session's event stream.
#[derive(Debug)]
pub struct Events {
    queue: Queue<Event>,
}

impl Events {
    pub fn new() -> Self {
        Events {
            queue: Queue::new(),
        }
    }

    pub fn emit(&self, event: Event) {
        self.queue.push(event);
    }

    /// Next queued event, if any.
    pub fn poll(&self) -> Option<Event> {
        self.queue.try_pop()
    }

    /// Blocks up to `timeout` for the next event.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Event> {
        self.queue.pop_timeout(timeout)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
