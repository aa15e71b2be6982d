//! Message wrapping: embedding an inner message inside an outer
//! carrier for subject hiding and protocol signaling.
//!
//! Three styles exist on the wire. Unwrapped messages are encrypted
//! as-is. The legacy inner/outer style (protocol ≤ 2.0) marks both
//! bodies with a `pEp-Wrapped-Message-Info:` sentinel line. The
//! attachment-wrap style (≥ 2.1) uses the
//! `X-pEp-Wrapped-Message-Info` opt-field instead and gives the outer
//! body a human-readable fallback. All three are recognised on
//! decryption.

use crate::constants::{PEP_SUBJECT, PEP_VERSION};
use crate::context::Session;
use crate::error::Result;
use crate::headerdef::HeaderDef;
use crate::message::{Attachment, Message, MessageDirection};

/// Sentinel line prefix of the legacy wrap style.
const WRAP_INFO_PREFIX: &str = "pEp-Wrapped-Message-Info: ";

/// Fallback body of ≥ 2.1 outer messages for clients that do not
/// raise message attachments.
const OUTER_FALLBACK_TEXT: &str = "\
This message was encrypted with p\u{2261}p (https://pep.software). If you are seeing this message,\n\
your client does not support raising message attachments. Please click on the message attachment to\n\
to view it, or better yet, consider using p\u{2261}p!\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrapType {
    Unwrapped,
    Inner,
    KeyReset,
    Transport,
}

impl WrapType {
    pub(crate) fn info_str(self) -> &'static str {
        match self {
            WrapType::Unwrapped => "",
            WrapType::Inner => "INNER",
            WrapType::KeyReset => "KEY_RESET",
            WrapType::Transport => "TRANSPORT",
        }
    }
}

/// Prefixes a body with the legacy wrap sentinel.
pub(crate) fn encapsulate_wrap_info(info: &str, longmsg: &str) -> String {
    format!("{WRAP_INFO_PREFIX}{info}\n\n{longmsg}")
}

/// Splits a body into its wrap sentinel and the remaining text, if the
/// sentinel is present.
pub(crate) fn parse_wrap_info(longmsg: &str) -> Option<(String, String)> {
    let rest = longmsg.strip_prefix(WRAP_INFO_PREFIX)?;
    let (info, body) = rest.split_once('\n')?;
    let body = body.strip_prefix('\n').unwrap_or(body);
    Some((info.trim().to_string(), body.to_string()))
}

/// The wrap info a decoded message declares, from the ≥ 2.1 opt-field
/// or from the legacy sentinel line.
pub(crate) fn wrap_info_of(msg: &Message) -> Option<String> {
    if let Some(info) = msg.opt_field(HeaderDef::WrappedMessageInfo.get_headername()) {
        return Some(info.to_string());
    }
    parse_wrap_info(&msg.longmsg).map(|(info, _)| info)
}

/// A synthetic outer message carrying from and recipients of the
/// source verbatim, and nothing else.
pub(crate) fn extract_minimal_envelope(src: &Message, dir: MessageDirection) -> Message {
    let mut envelope = Message::new(dir);
    envelope.from = src.from.clone();
    envelope.to = src.to.clone();
    envelope.cc = src.cc.clone();
    envelope.bcc = src.bcc.clone();
    envelope.reply_to = src.reply_to.clone();
    envelope.recv_by = src.recv_by.clone();
    envelope.sent = src.sent;
    envelope.in_reply_to = src.in_reply_to.clone();
    envelope.references = src.references.clone();
    envelope
}

/// Builds the outer envelope around `attachment`, which becomes a
/// single MIME-encoded `message/rfc822` blob.
pub(crate) fn wrap_message_as_attachment(
    session: &Session,
    mut attachment: Message,
    wrap_type: WrapType,
    keep_orig_subject: bool,
    max_major: u32,
    max_minor: u32,
) -> Result<Message> {
    attachment.replace_opt_field(HeaderDef::PepVersion.get_headername(), PEP_VERSION);

    let mut envelope = extract_minimal_envelope(&attachment, MessageDirection::Outgoing);
    envelope.ensure_id();

    let legacy = max_major < 2 || (max_major == 2 && max_minor == 0);
    if legacy {
        attachment.longmsg = encapsulate_wrap_info(wrap_type.info_str(), &attachment.longmsg);
        envelope.longmsg = encapsulate_wrap_info("OUTER", &envelope.longmsg);
    } else {
        envelope.longmsg = OUTER_FALLBACK_TEXT.to_string();
    }
    // The ≥ 2.1 marker is always present so newer peers need not scan
    // the body.
    attachment.add_opt_field(
        HeaderDef::WrappedMessageInfo.get_headername(),
        wrap_type.info_str(),
    );

    if attachment.id.is_empty() {
        attachment.id = envelope.id.clone();
    }

    attachment.add_opt_field(
        HeaderDef::SenderFpr.get_headername(),
        &attachment.sender_fpr.clone(),
    );

    let bytes = session.mime.encode(&attachment, false)?;
    envelope.attachments = vec![Attachment::new(bytes, "message/rfc822", None)];
    envelope.shortmsg = if keep_orig_subject {
        attachment.shortmsg.clone()
    } else {
        PEP_SUBJECT.to_string()
    };
    Ok(envelope)
}
