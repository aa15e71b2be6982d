//! Outgoing end-to-end encryption pipeline.

use crate::config::Config;
use crate::constants::{
    CommType, KEY_GRACE_PERIOD, PEP_PROTOCOL_VERSION_MAJOR, PEP_PROTOCOL_VERSION_MINOR,
    PEP_SUBJECT, PEP_VERSION,
};
use crate::context::Session;
use crate::error::{Result, Status};
use crate::headerdef::HeaderDef;
use crate::identity::{
    is_pep_user, own_identities_retrieve, record_social_graph_edge, Identity,
};
use crate::keymanagement::{myself, update_identity};
use crate::message::{Attachment, EncFormat, Message, MessageDirection};
use crate::rating::{rating_from_comm_type, Rating};
use crate::sync::SyncNotify;
use crate::tools::{addr_cmp, normalize_fingerprint};
use crate::wrapping::{wrap_message_as_attachment, WrapType};

/// Flags steering a single [`encrypt_message`] call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EncryptFlags(pub u32);

impl EncryptFlags {
    pub const FORCE_UNSIGNED: u32 = 0x2;
    pub const FORCE_NO_ATTACHED_KEY: u32 = 0x4;
    pub const FORCE_VERSION_1: u32 = 0x10;
    pub const KEY_RESET_ONLY: u32 = 0x20;

    pub fn has(self, bits: u32) -> bool {
        self.0 & bits != 0
    }
}

/// Encrypts an outgoing message for its recipients.
///
/// Returns the wire form together with [`Status::Ok`], or the original
/// message (stamped, with the own key attached where policy says so)
/// together with [`Status::Unencrypted`] when no encrypted channel
/// exists to every recipient.
pub fn encrypt_message(
    session: &Session,
    src: &Message,
    extra_keys: &[String],
    enc_format: EncFormat,
    flags: EncryptFlags,
) -> Result<(Message, Status)> {
    if src.dir == MessageDirection::Incoming || src.enc_format != EncFormat::None {
        return Err(Status::IllegalValue);
    }
    if src.recipients().next().is_none() {
        return Err(Status::IllegalValue);
    }
    // Bcc can only be encrypted to when it is the sole recipient;
    // mixing it with To/Cc would leak the hidden recipients' keys.
    if !src.bcc.is_empty() && (src.bcc.len() > 1 || !src.to.is_empty() || !src.cc.is_empty()) {
        return Err(Status::IllegalValue);
    }

    let mut from = src.from.clone();
    if from.address.is_empty() {
        return Err(Status::IllegalValue);
    }
    if from.user_id.is_empty() {
        from.user_id = crate::identity::get_default_own_user_id(session)?;
    }
    myself(session, &mut from)?;
    let sender_fpr = from.fpr.clone();

    let mut keys: Vec<String> = vec![sender_fpr.clone()];
    keys.extend(extra_keys.iter().map(|k| normalize_fingerprint(k)));

    let own_addresses: Vec<String> = own_identities_retrieve(session)?
        .into_iter()
        .map(|ident| ident.address)
        .collect();

    let mut max_comm_type = CommType::Pep;
    let mut max_major = PEP_PROTOCOL_VERSION_MAJOR;
    let mut max_minor = PEP_PROTOCOL_VERSION_MINOR;
    let mut dest_keys_found = true;
    let mut has_pep_user = false;

    for recipient in src.recipients() {
        if recipient.address.is_empty() {
            return Err(Status::IllegalValue);
        }
        let mut completed = Identity::new(&recipient.address, &recipient.user_id);
        completed.username = recipient.username.clone();
        let is_own_addr = own_addresses
            .iter()
            .any(|own| addr_cmp(own, &recipient.address));
        if is_own_addr {
            if completed.user_id.is_empty() {
                completed.user_id = from.user_id.clone();
            }
            myself(session, &mut completed)?;
        } else {
            completed.user_id = recipient.user_id.clone();
            update_identity(session, &mut completed)?;
            record_social_graph_edge(session, &from.user_id, &from.address, &completed.user_id)?;
        }

        max_comm_type = max_comm_type.combine_worst(completed.comm_type);
        if completed.major_ver < max_major
            || (completed.major_ver == max_major && completed.minor_ver < max_minor)
        {
            max_major = completed.major_ver;
            max_minor = completed.minor_ver;
        }
        has_pep_user = has_pep_user || is_pep_user(session, &completed.user_id)?;

        if completed.has_key() {
            keys.push(completed.fpr.clone());
        } else {
            dest_keys_found = false;
        }
    }

    let rating = rating_from_comm_type(max_comm_type);
    if !dest_keys_found || rating < Rating::Reliable || enc_format == EncFormat::None {
        let mut unencrypted = src.clone();
        unencrypted.ensure_id();
        let passive = session.get_config_bool(Config::PassiveMode)?;
        if !flags.has(EncryptFlags::FORCE_NO_ATTACHED_KEY) && (has_pep_user || !passive) {
            attach_own_key(session, &from, &mut unencrypted)?;
        }
        unencrypted.replace_opt_field(HeaderDef::PepVersion.get_headername(), PEP_VERSION);
        return Ok((unencrypted, Status::Unencrypted));
    }

    let wrapped = enc_format != EncFormat::Inline
        && !flags.has(EncryptFlags::FORCE_VERSION_1)
        && max_comm_type.confirmed() == CommType::Pep;

    let mut dst;
    if wrapped {
        let wrap_type = if flags.has(EncryptFlags::KEY_RESET_ONLY) {
            WrapType::KeyReset
        } else {
            WrapType::Inner
        };
        let mut inner = src.clone();
        inner.ensure_id();
        inner.sender_fpr = sender_fpr.clone();
        if !flags.has(EncryptFlags::FORCE_NO_ATTACHED_KEY) {
            attach_own_key(session, &from, &mut inner)?;
        }
        let envelope =
            wrap_message_as_attachment(session, inner, wrap_type, false, max_major, max_minor)?;
        dst = encrypt_pgp_mime(session, &from, &envelope, &keys, flags)?;
        dst.id = envelope.id.clone();
    } else if enc_format == EncFormat::Inline {
        dst = encrypt_pgp_inline(session, &from, src, &keys, flags)?;
        if !flags.has(EncryptFlags::FORCE_NO_ATTACHED_KEY) {
            attach_own_key(session, &from, &mut dst)?;
        }
        dst.id = src.id.clone();
        dst.ensure_id();
    } else {
        let mut plain = src.clone();
        plain.ensure_id();
        if !session.get_config_bool(Config::UnencryptedSubject)? && !plain.shortmsg.is_empty() {
            hide_subject(&mut plain);
        }
        plain.replace_opt_field(HeaderDef::PepVersion.get_headername(), PEP_VERSION);
        if !flags.has(EncryptFlags::FORCE_NO_ATTACHED_KEY) {
            attach_own_key(session, &from, &mut plain)?;
        }
        let id = plain.id.clone();
        dst = encrypt_pgp_mime(session, &from, &plain, &keys, flags)?;
        dst.id = id;
    }

    dst.replace_opt_field(HeaderDef::PepVersion.get_headername(), PEP_VERSION);
    Ok((dst, Status::Ok))
}

/// Moves the subject into the body and replaces it with the marker.
fn hide_subject(msg: &mut Message) {
    msg.longmsg = format!("Subject: {}\n\n{}", msg.shortmsg, msg.longmsg);
    msg.shortmsg = PEP_SUBJECT.to_string();
}

/// Renders `payload` as the standard two-part PGP/MIME structure
/// around its encrypted MIME text.
fn encrypt_pgp_mime(
    session: &Session,
    from: &Identity,
    payload: &Message,
    keys: &[String],
    flags: EncryptFlags,
) -> Result<Message> {
    let mime_text = session.mime.encode(payload, false)?;
    let mime_text = String::from_utf8_lossy(&mime_text).into_owned();
    let ctext = encrypt_with_retry(session, from, keys, &mime_text, flags)?;

    let mut dst = crate::wrapping::extract_minimal_envelope(payload, MessageDirection::Outgoing);
    dst.shortmsg = payload.shortmsg.clone();
    dst.enc_format = EncFormat::PgpMime;
    dst.attachments = vec![
        Attachment::new(b"Version: 1\n".to_vec(), "application/pgp-encrypted", None),
        Attachment::new(ctext.into_bytes(), "application/octet-stream", Some("msg.asc")),
    ];
    Ok(dst)
}

/// Inline PGP: encrypts the body in place; attachments travel
/// unencrypted.
fn encrypt_pgp_inline(
    session: &Session,
    from: &Identity,
    src: &Message,
    keys: &[String],
    flags: EncryptFlags,
) -> Result<Message> {
    let ctext = encrypt_with_retry(session, from, keys, &src.longmsg, flags)?;
    let mut dst = src.clone();
    dst.longmsg = ctext;
    dst.longmsg_formatted.clear();
    dst.enc_format = EncFormat::Inline;
    dst.replace_opt_field(HeaderDef::PepVersion.get_headername(), PEP_VERSION);
    Ok(dst)
}

/// One encryption attempt plus the passphrase dance: on a passphrase
/// failure the application is asked once (via `messageToSend(None)`)
/// and the operation retried; after that the handshake callback is
/// signalled and the failure surfaces.
fn encrypt_with_retry(
    session: &Session,
    from: &Identity,
    keys: &[String],
    text: &str,
    flags: EncryptFlags,
) -> Result<String> {
    let attempt = |session: &Session| -> Result<String> {
        if flags.has(EncryptFlags::FORCE_UNSIGNED) {
            session.crypto.encrypt_only(keys, text)
        } else {
            let passphrase = session.passphrase();
            session
                .crypto
                .encrypt_and_sign(keys, text, passphrase.as_deref())
        }
    };
    match attempt(session) {
        Err(Status::PassphraseRequired) | Err(Status::WrongPassphrase) => {
            if session.message_to_send(None).is_ok() {
                match attempt(session) {
                    Err(Status::PassphraseRequired) | Err(Status::WrongPassphrase) => {}
                    other => return other,
                }
            }
            let _ = session.notify_handshake(from.clone(), None, SyncNotify::PassphraseRequired);
            Err(Status::PassphraseRequired)
        }
        other => other,
    }
}

/// Attaches the sender's public key, and alongside it any own key
/// revoked within the grace period that the current key replaced.
pub(crate) fn attach_own_key(
    session: &Session,
    from: &Identity,
    msg: &mut Message,
) -> Result<()> {
    if from.fpr.is_empty() {
        return Ok(());
    }
    let armored = session.crypto.export_key(&from.fpr, false)?;
    msg.attachments.push(Attachment::new(
        armored.into_bytes(),
        "application/pgp-keys",
        Some("pEpkey.asc"),
    ));
    for revoked in
        crate::keyreset::recently_revoked_replaced_by(session, &from.fpr, KEY_GRACE_PERIOD)?
    {
        if let Ok(armored) = session.crypto.export_key(&revoked, false) {
            msg.attachments.push(Attachment::new(
                armored.into_bytes(),
                "application/pgp-keys",
                Some("pEpkey_revoked.asc"),
            ));
        }
    }
    Ok(())
}
