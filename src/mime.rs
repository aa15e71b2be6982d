//! The RFC 5322/2045 codec capability.

use std::fmt;

use crate::error::Result;
use crate::message::Message;

/// Encodes and decodes between [`Message`] records and RFC 5322 wire
/// bytes. Injected at session construction; the engine itself never
/// touches MIME syntax.
pub trait MimeCodec: Send + Sync + fmt::Debug {
    /// Renders the message. With `omit_fields` the transport-level
    /// fields (from, recipients, ...) are left out, as used for inner
    /// messages whose envelope carries them already.
    fn encode(&self, msg: &Message, omit_fields: bool) -> Result<Vec<u8>>;

    /// Parses wire bytes. The flag reports whether the toplevel
    /// structure carries an embedded `message/rfc822` part, which is
    /// how wrapped envelopes are recognised cheaply.
    fn decode(&self, bytes: &[u8]) -> Result<(Message, bool)>;
}
