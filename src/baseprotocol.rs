//! Carrier for the inner protocols: Sync and Distribution payloads
//! travel as attachments on ordinary, synthesized mail.

use crate::context::Session;
use crate::error::{Result, Status};
use crate::headerdef::HeaderDef;
use crate::identity::Identity;
use crate::message::{Attachment, Message, MessageDirection};
use crate::sync::SyncNotify;

/// Message id threaded into synthesized protocol messages so clients
/// can tuck them away.
const AUTO_CONSUME_MID: &str = "pEp-auto-consume@pEp.foundation";

const MANAGEMENT_SUBJECT: &str = "p\u{2261}p key management message - please ignore";
const MANAGEMENT_TEXT: &str = "\
This message is part of p\u{2261}p's concept to manage keys.\n\n\
You can safely ignore it. It will be deleted automatically.\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseProtocolType {
    Sign,
    Sync,
    Distribution,
}

impl BaseProtocolType {
    pub fn mime_type(self) -> &'static str {
        match self {
            BaseProtocolType::Sign => "application/pEp.sign",
            BaseProtocolType::Sync => "application/pEp.sync",
            BaseProtocolType::Distribution => "application/pEp.distribution",
        }
    }

    fn filename(self) -> &'static str {
        match self {
            BaseProtocolType::Sign => "electronic_signature.asc",
            BaseProtocolType::Sync => "sync.pEp",
            BaseProtocolType::Distribution => "distribution.pEp",
        }
    }
}

/// Attaches a protocol payload to `msg`, with a detached signature
/// when a signing fingerprint is given.
pub(crate) fn base_decorate_message(
    session: &Session,
    msg: &mut Message,
    typ: BaseProtocolType,
    payload: Vec<u8>,
    fpr: Option<&str>,
) -> Result<()> {
    if payload.is_empty() || typ == BaseProtocolType::Sign {
        return Err(Status::IllegalValue);
    }
    if let Some(fpr) = fpr.filter(|f| !f.is_empty()) {
        let passphrase = session.passphrase();
        let sign = session
            .crypto
            .sign_only(fpr, &payload, passphrase.as_deref())?;
        msg.attachments.push(Attachment::new(
            payload,
            typ.mime_type(),
            Some(typ.filename()),
        ));
        msg.attachments.push(Attachment::new(
            sign.into_bytes(),
            BaseProtocolType::Sign.mime_type(),
            Some(BaseProtocolType::Sign.filename()),
        ));
    } else {
        msg.attachments.push(Attachment::new(
            payload,
            typ.mime_type(),
            Some(typ.filename()),
        ));
    }
    Ok(())
}

/// A fresh protocol message from `me` to `partner` carrying the
/// payload, marked auto-consume.
pub(crate) fn base_prepare_message(
    session: &Session,
    me: &Identity,
    partner: &Identity,
    typ: BaseProtocolType,
    payload: Vec<u8>,
    fpr: Option<&str>,
) -> Result<Message> {
    let mut msg = Message::new(MessageDirection::Outgoing);
    msg.add_opt_field(HeaderDef::AutoConsume.get_headername(), "yes");
    msg.in_reply_to.push(AUTO_CONSUME_MID.to_string());
    msg.from = me.clone();
    msg.to = vec![partner.clone()];
    msg.shortmsg = MANAGEMENT_SUBJECT.to_string();
    msg.longmsg = MANAGEMENT_TEXT.to_string();
    base_decorate_message(session, &mut msg, typ, payload, fpr)?;
    Ok(msg)
}

/// Like [`base_prepare_message`], retrying once over the passphrase
/// dance when signing needs one.
pub(crate) fn try_base_prepare_message(
    session: &Session,
    me: &Identity,
    partner: &Identity,
    typ: BaseProtocolType,
    payload: Vec<u8>,
    fpr: Option<&str>,
) -> Result<Message> {
    match base_prepare_message(session, me, partner, typ, payload.clone(), fpr) {
        Err(Status::PassphraseRequired) | Err(Status::WrongPassphrase) => {
            // Ask the application for a passphrase, then retry once.
            match session.message_to_send(None) {
                Ok(()) => {}
                Err(_) => {
                    let _ = session.notify_handshake(
                        me.clone(),
                        None,
                        SyncNotify::PassphraseRequired,
                    );
                    return Err(Status::PassphraseRequired);
                }
            }
            match base_prepare_message(session, me, partner, typ, payload, fpr) {
                Err(Status::PassphraseRequired) | Err(Status::WrongPassphrase) => {
                    let _ = session.notify_handshake(
                        me.clone(),
                        None,
                        SyncNotify::PassphraseRequired,
                    );
                    Err(Status::PassphraseRequired)
                }
                other => other,
            }
        }
        other => other,
    }
}

/// Pulls a protocol payload back out of a message: at most one payload
/// part and one signature part are tolerated. With a signature
/// present, the payload is only returned when the signature verifies;
/// the verified signer fingerprint comes along.
pub(crate) fn base_extract_message(
    session: &Session,
    msg: &Message,
    typ: BaseProtocolType,
) -> Result<Option<(Vec<u8>, Option<String>)>> {
    let mut payload: Option<&[u8]> = None;
    let mut sign: Option<&[u8]> = None;
    for attachment in &msg.attachments {
        if attachment.mime_type.eq_ignore_ascii_case(typ.mime_type()) {
            if payload.is_some() {
                return Err(Status::DecryptWrongFormat);
            }
            payload = Some(&attachment.data);
        } else if attachment
            .mime_type
            .eq_ignore_ascii_case(BaseProtocolType::Sign.mime_type())
        {
            if sign.is_some() {
                return Err(Status::DecryptWrongFormat);
            }
            sign = Some(&attachment.data);
        }
    }

    let Some(payload) = payload else {
        return Ok(None);
    };

    let mut signer = None;
    if let Some(sign) = sign {
        let sig = String::from_utf8_lossy(sign);
        match session.crypto.verify_text(payload, &sig) {
            Ok(keylist) if !keylist.is_empty() => signer = Some(keylist[0].clone()),
            // Invalid or mismatching signature: ignore the payload.
            _ => return Ok(None),
        }
    }
    Ok(Some((payload.to_vec(), signer)))
}
