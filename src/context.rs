//! Session module.
//!
//! A [`Session`] owns the store connection, the injected capability
//! backends and the application callbacks. All engine operations are
//! methods of, or free functions over, a session. Sessions are
//! single-threaded: one session per thread of control, sharing a
//! database file between sessions is serialized by SQLite itself.

use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::crypto::CryptoBackend;
use crate::error::{Result, Status};
use crate::events::{Event, Events};
use crate::identity::Identity;
use crate::message::Message;
use crate::mime::MimeCodec;
use crate::sql::Sql;
use crate::sync::{SyncNotify, SyncState};
use crate::wire::WireCodec;

/// Called to hand a finished outgoing message to the application's
/// transport. Called with `None` to ask the application to configure a
/// passphrase and come back.
pub type MessageToSendCallback = Box<dyn FnMut(Option<Message>) -> Result<()> + Send>;

/// Called to signal the application about handshake-relevant state:
/// rating changes, required passphrases, received keys.
pub type NotifyHandshakeCallback =
    Box<dyn FnMut(Identity, Option<Identity>, SyncNotify) -> Result<()> + Send>;

#[derive(Default)]
pub(crate) struct Callbacks {
    pub message_to_send: Option<MessageToSendCallback>,
    pub notify_handshake: Option<NotifyHandshakeCallback>,
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("message_to_send", &self.message_to_send.is_some())
            .field("notify_handshake", &self.notify_handshake.is_some())
            .finish()
    }
}

#[derive(Clone, Debug)]
pub struct Session {
    pub(crate) inner: Arc<InnerSession>,
}

impl Deref for Session {
    type Target = InnerSession;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

#[derive(Debug)]
pub struct InnerSession {
    /// Database file path.
    pub(crate) dbfile: PathBuf,
    pub(crate) sql: Sql,
    pub(crate) crypto: Box<dyn CryptoBackend>,
    pub(crate) mime: Box<dyn MimeCodec>,
    pub(crate) wire: Box<dyn WireCodec>,
    pub(crate) events: Events,
    pub(crate) callbacks: Mutex<Callbacks>,
    pub(crate) sync: SyncState,
    /// One-slot current passphrase; rotated by the pipeline when
    /// retrying and restored afterwards.
    pub(crate) curr_passphrase: Mutex<Option<String>>,
    /// Single-slot undo cache for the most recent `key_mistrusted`.
    pub(crate) mistrust_undo: Mutex<Option<Identity>>,
}

impl Session {
    /// Creates a new session over `dbfile` with the given capability
    /// backends. The store is opened (and migrated) immediately.
    pub fn new(
        dbfile: impl AsRef<Path>,
        crypto: Box<dyn CryptoBackend>,
        mime: Box<dyn MimeCodec>,
        wire: Box<dyn WireCodec>,
    ) -> Result<Session> {
        let inner = InnerSession {
            dbfile: dbfile.as_ref().to_path_buf(),
            sql: Sql::new(),
            crypto,
            mime,
            wire,
            events: Events::new(),
            callbacks: Mutex::new(Callbacks::default()),
            sync: SyncState::new(),
            curr_passphrase: Mutex::new(None),
            mistrust_undo: Mutex::new(None),
        };
        let session = Session {
            inner: Arc::new(inner),
        };
        session.sql.open(&session, &session.dbfile)?;
        Ok(session)
    }

    /// Returns database file path.
    pub fn get_dbfile(&self) -> &Path {
        self.dbfile.as_path()
    }

    /// Emits a single event.
    pub fn emit_event(&self, event: Event) {
        self.events.emit(event);
    }

    /// Next queued event, if any.
    pub fn poll_event(&self) -> Option<Event> {
        self.events.poll()
    }

    /// Registers the application's transport callback.
    pub fn register_send_callback(&self, cb: MessageToSendCallback) {
        self.callbacks.lock().unwrap().message_to_send = Some(cb);
    }

    /// Sets the session passphrase used to unlock own secret keys.
    /// `None` clears the slot.
    pub fn config_passphrase(&self, passphrase: Option<String>) {
        *self.curr_passphrase.lock().unwrap() = passphrase;
    }

    pub(crate) fn passphrase(&self) -> Option<String> {
        self.curr_passphrase.lock().unwrap().clone()
    }

    /// Hands an outgoing message to the application.
    ///
    /// Ownership transfers on success. The callback is taken out of
    /// the session for the duration of the call so that it may re-enter
    /// the engine.
    pub(crate) fn message_to_send(&self, msg: Option<Message>) -> Result<()> {
        let cb = self.callbacks.lock().unwrap().message_to_send.take();
        let mut cb = cb.ok_or(Status::SyncNoMessageSendCallback)?;
        let res = cb(msg);
        self.callbacks.lock().unwrap().message_to_send.get_or_insert(cb);
        res
    }

    /// Signals the handshake callback. Fails with
    /// [`Status::SyncNoNotifyCallback`] when none is registered.
    pub(crate) fn notify_handshake(
        &self,
        me: Identity,
        partner: Option<Identity>,
        signal: SyncNotify,
    ) -> Result<()> {
        let cb = self.callbacks.lock().unwrap().notify_handshake.take();
        let mut cb = cb.ok_or(Status::SyncNoNotifyCallback)?;
        let res = cb(me, partner, signal);
        self.callbacks.lock().unwrap().notify_handshake.get_or_insert(cb);
        res
    }

    pub(crate) fn has_notify_callback(&self) -> bool {
        self.callbacks.lock().unwrap().notify_handshake.is_some()
    }
}
