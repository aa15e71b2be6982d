//! Host plumbing for the KeySync state machines: the sync event
//! queue, callback registration and the handshake signal set.
//!
//! The state machine transition tables themselves live outside the
//! engine; decryption feeds their inbound events through the queue and
//! their outbound messages leave via `messageToSend`.

use std::sync::Mutex;
use std::time::Duration;

use num_derive::{FromPrimitive, ToPrimitive};

use crate::context::{NotifyHandshakeCallback, Session};
use crate::error::{Result, Status};
use crate::events::Queue;
use crate::identity::own_identities_retrieve;

/// Signals passed to the application's `notifyHandshake` callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(i32)]
pub enum SyncNotify {
    Undefined = 0,
    InitAddOurDevice = 1,
    InitAddOtherDevice = 2,
    InitFormGroup = 3,
    TimedOut = 5,
    AcceptedDeviceAdded = 6,
    AcceptedGroupCreated = 7,
    AcceptedDeviceAccepted = 8,
    /// The rating of outgoing messages to the partner may have
    /// improved.
    OutgoingRatingChange = 64,
    /// A key for an own identity arrived in an incoming message.
    KeyReceived = 66,
    PassphraseRequired = 128,
}

/// An event on the sync queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// An inbound protocol frame captured during decryption.
    Message { payload: Vec<u8> },
    /// Synthetic event returned when retrieval hits its threshold.
    Timeout,
    /// Queue terminator.
    Shutdown,
}

#[derive(Debug)]
pub(crate) struct SyncState {
    queue: Queue<SyncEvent>,
    running: Mutex<bool>,
}

impl SyncState {
    pub fn new() -> Self {
        SyncState {
            queue: Queue::new(),
            running: Mutex::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        *self.running.lock().unwrap()
    }
}

/// Registers the application's sync callbacks. There must already be
/// at least one own identity.
pub fn register_sync_callbacks(
    session: &Session,
    notify_handshake: NotifyHandshakeCallback,
) -> Result<()> {
    if own_identities_retrieve(session)?.is_empty() {
        return Err(Status::SyncCannotStart);
    }
    session.callbacks.lock().unwrap().notify_handshake = Some(notify_handshake);
    *session.sync.running.lock().unwrap() = true;
    Ok(())
}

/// Drops the sync callbacks and terminates the queue.
pub fn unregister_sync_callbacks(session: &Session) {
    session.callbacks.lock().unwrap().notify_handshake = None;
    *session.sync.running.lock().unwrap() = false;
    session.sync.queue.push(SyncEvent::Shutdown);
}

/// Non-blocking enqueue of an inbound sync event.
pub fn inject_sync_event(session: &Session, event: SyncEvent) {
    session.sync.queue.push(event);
}

/// Blocking retrieval of the next sync event. On expiry of
/// `threshold_s` a synthetic [`SyncEvent::Timeout`] is returned
/// without failing.
pub fn retrieve_next_sync_event(session: &Session, threshold_s: u64) -> SyncEvent {
    session
        .sync
        .queue
        .pop_timeout(Duration::from_secs(threshold_s))
        .unwrap_or(SyncEvent::Timeout)
}
