//! The in-memory message record that travels through the pipeline.

use num_derive::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};

use crate::identity::Identity;
use crate::tools::{addr_domain, time, to_base36};

/// Direction of a message relative to the local side.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageDirection {
    #[default]
    Incoming,
    Outgoing,
}

/// The encryption format of a message on the wire.
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    FromPrimitive,
    ToPrimitive,
    Serialize,
    Deserialize,
)]
#[repr(i32)]
pub enum EncFormat {
    #[default]
    None = 0,
    /// Inline PGP: the body itself is the armored ciphertext.
    Inline = 1,
    /// RFC 3156 two-part structure.
    PgpMime = 3,
    /// Peer-protocol format; currently rendered as PGP/MIME.
    Pep = 4,
    /// PGP/MIME as mangled by Outlook: the marker part comes second.
    PgpMimeOutlook1 = 5,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentDisposition {
    #[default]
    Attachment,
    Inline,
    Other,
}

/// A binary attachment with its MIME metadata.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub data: Vec<u8>,
    pub mime_type: String,
    pub filename: Option<String>,
    pub disposition: ContentDisposition,
}

impl Attachment {
    pub fn new(data: Vec<u8>, mime_type: &str, filename: Option<&str>) -> Self {
        Attachment {
            data,
            mime_type: mime_type.to_string(),
            filename: filename.map(|f| f.to_string()),
            disposition: ContentDisposition::Attachment,
        }
    }
}

/// An RFC 5322 message, decoded. Empty strings mean "absent".
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub dir: MessageDirection,
    /// Message id, without angle brackets.
    pub id: String,
    /// Subject.
    pub shortmsg: String,
    /// Plain-text body.
    pub longmsg: String,
    /// HTML body.
    pub longmsg_formatted: String,
    pub attachments: Vec<Attachment>,
    /// Sent timestamp, epoch seconds; 0 when unset.
    pub sent: i64,
    /// Received timestamp, epoch seconds; 0 when unset.
    pub recv: i64,
    pub from: Identity,
    pub to: Vec<Identity>,
    pub cc: Vec<Identity>,
    pub bcc: Vec<Identity>,
    pub reply_to: Vec<Identity>,
    /// The own identity the message was received through.
    pub recv_by: Option<Identity>,
    pub in_reply_to: Vec<String>,
    pub references: Vec<String>,
    /// Free-form headers as ordered key/value pairs.
    pub opt_fields: Vec<(String, String)>,
    pub enc_format: EncFormat,
    /// Fingerprint of the key this message was signed with, where
    /// known.
    pub sender_fpr: String,
}

impl Message {
    pub fn new(dir: MessageDirection) -> Self {
        Message {
            dir,
            ..Default::default()
        }
    }

    /// First value of the opt-field `key`, if present.
    pub fn opt_field(&self, key: &str) -> Option<&str> {
        self.opt_fields
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Appends an opt-field, keeping existing ones.
    pub fn add_opt_field(&mut self, key: &str, value: &str) {
        self.opt_fields.push((key.to_string(), value.to_string()));
    }

    /// Sets an opt-field, replacing an existing one of the same name.
    pub fn replace_opt_field(&mut self, key: &str, value: &str) {
        match self
            .opt_fields
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
        {
            Some((_, v)) => *v = value.to_string(),
            None => self.add_opt_field(key, value),
        }
    }

    pub fn remove_opt_field(&mut self, key: &str) {
        self.opt_fields.retain(|(k, _)| !k.eq_ignore_ascii_case(key));
    }

    /// All recipient identities in to/cc/bcc order.
    pub fn recipients(&self) -> impl Iterator<Item = &Identity> {
        self.to.iter().chain(self.cc.iter()).chain(self.bcc.iter())
    }

    /// Ensures the message carries an id, generating one from the
    /// sender domain if necessary.
    pub(crate) fn ensure_id(&mut self) {
        if self.id.is_empty() {
            self.id = generate_message_id(&self.from.address);
        }
    }
}

/// Generates a fresh message id of the shape
/// `pEp.<base36 epoch>.<base36 random>.<uuidv4>@<sender domain>`.
pub(crate) fn generate_message_id(from_address: &str) -> String {
    use rand::Rng as _;

    let rand_part: u64 = rand::thread_rng().gen();
    format!(
        "pEp.{}.{}.{}@{}",
        to_base36(time() as u64),
        to_base36(rand_part),
        uuid::Uuid::new_v4(),
        addr_domain(from_address)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opt_field_roundtrip() {
        let mut msg = Message::new(MessageDirection::Outgoing);
        assert_eq!(msg.opt_field("X-pEp-Version"), None);
        msg.add_opt_field("X-pEp-Version", "2.0");
        msg.replace_opt_field("X-pEp-Version", "2.1");
        assert_eq!(msg.opt_field("X-pEp-Version"), Some("2.1"));
        assert_eq!(msg.opt_fields.len(), 1);
        msg.remove_opt_field("x-pep-version");
        assert_eq!(msg.opt_field("X-pEp-Version"), None);
    }

    #[test]
    fn test_opt_field_order_preserved() {
        let mut msg = Message::new(MessageDirection::Outgoing);
        msg.add_opt_field("A", "1");
        msg.add_opt_field("B", "2");
        msg.add_opt_field("C", "3");
        let keys: Vec<&str> = msg.opt_fields.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, ["A", "B", "C"]);
    }

    #[test]
    fn test_generate_message_id_shape() {
        let id = generate_message_id("alice@example.org");
        assert!(id.starts_with("pEp."));
        assert!(id.ends_with("@example.org"));
        assert!(id.split('.').count() >= 4);
        // Uniqueness over a handful of draws.
        let other = generate_message_id("alice@example.org");
        assert_ne!(id, other);
    }

    #[test]
    fn test_ensure_id_keeps_existing() {
        let mut msg = Message::new(MessageDirection::Outgoing);
        msg.id = "fixed@example.org".to_string();
        msg.ensure_id();
        assert_eq!(msg.id, "fixed@example.org");

        let mut msg = Message::new(MessageDirection::Outgoing);
        msg.from.address = "alice@example.org".to_string();
        msg.ensure_id();
        assert!(msg.id.ends_with("@example.org"));
    }
}
