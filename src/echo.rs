//! The Echo challenge/response protocol: Distribution.Ping messages
//! probe key availability for addresses we hold no key for; a Pong
//! echoing the stored challenge tells us the partner's rating may have
//! improved.
//!
//! The protocol is best-effort throughout; failures are logged and
//! swallowed.

use rand::RngCore as _;

use crate::baseprotocol::{base_prepare_message, BaseProtocolType};
use crate::config::Config;
use crate::context::Session;
use crate::e2ee::{encrypt_message, EncryptFlags};
use crate::error::{Result, Status};
use crate::identity::{get_identity, is_pep_user, Identity};
use crate::keymanagement::update_identity;
use crate::message::{EncFormat, Message, MessageDirection};
use crate::sync::SyncNotify;
use crate::wire::{Distribution, Echo, CHALLENGE_SIZE};

/// Returns the identity's stored challenge, generating and persisting
/// a fresh one when the row has none. Calling this twice without
/// intervening writes returns identical bytes.
pub(crate) fn challenge_for_identity(
    session: &Session,
    identity: &Identity,
) -> Result<[u8; CHALLENGE_SIZE]> {
    // The identity may not be in the store yet, or only under a
    // synthesized user id; resolve the actual row first.
    let user_id = match get_identity(session, &identity.address, &identity.user_id)? {
        Some(stored) => stored.user_id,
        None => {
            let mut completed = Identity::new(&identity.address, &identity.user_id);
            completed.username = identity.username.clone();
            update_identity(session, &mut completed)?;
            completed.user_id
        }
    };

    let stored: Option<Vec<u8>> = session.sql.query_get_value(
        "SELECT echo_challenge FROM identity
          WHERE address=?1 COLLATE NOCASE AND user_id=?2;",
        [&identity.address, &user_id],
    )?;
    if let Some(stored) = stored {
        if stored.len() == CHALLENGE_SIZE {
            let mut challenge = [0u8; CHALLENGE_SIZE];
            challenge.copy_from_slice(&stored);
            return Ok(challenge);
        }
    }

    let mut challenge = [0u8; CHALLENGE_SIZE];
    rand::thread_rng().fill_bytes(&mut challenge);
    // UUID-shaped: version 4, RFC variant.
    challenge[6] = (challenge[6] & 0x0f) | 0x40;
    challenge[8] = (challenge[8] & 0x3f) | 0x80;

    let updated = session.sql.execute(
        "UPDATE identity SET echo_challenge=?1
          WHERE address=?2 COLLATE NOCASE AND user_id=?3;",
        rusqlite::params![challenge.as_slice(), identity.address, user_id],
    )?;
    if updated == 0 {
        return Err(Status::UnknownDbError);
    }
    Ok(challenge)
}

/// Builds and sends a Ping or Pong via the ordinary encryption
/// pipeline. An unencrypted result is still sent: it carries the
/// sender's public key, which is the whole point of a Ping.
fn send_ping_or_pong(
    session: &Session,
    from: &Identity,
    to: &Identity,
    challenge: [u8; CHALLENGE_SIZE],
    ping: bool,
) -> Result<()> {
    if !session.get_config_bool(Config::EnableEchoProtocol)? {
        return Ok(());
    }
    let frame = Distribution::Echo(if ping {
        Echo::Ping { challenge }
    } else {
        Echo::Pong { challenge }
    });
    let payload = session.wire.encode_distribution(&frame)?;
    let msg = base_prepare_message(
        session,
        from,
        to,
        BaseProtocolType::Distribution,
        payload,
        None,
    )?;
    let (out, _status) = encrypt_message(
        session,
        &msg,
        &[],
        EncFormat::Pep,
        EncryptFlags::default(),
    )?;
    session.message_to_send(Some(out))
}

/// Sends a Ping carrying the identity's stored challenge.
pub fn send_ping(session: &Session, from: &Identity, to: &Identity) -> Result<()> {
    let challenge = challenge_for_identity(session, to)?;
    send_ping_or_pong(session, from, to, challenge, true)
}

/// Replies to an incoming Ping: from and to are swapped, the
/// challenge is echoed verbatim.
pub(crate) fn send_pong(
    session: &Session,
    ping_message: &Message,
    frame: &Echo,
) -> Result<()> {
    if ping_message.dir != MessageDirection::Incoming {
        return Err(Status::IllegalValue);
    }
    let Some(recv_by) = &ping_message.recv_by else {
        return Err(Status::IllegalValue);
    };
    if !recv_by.me {
        return Err(Status::IllegalValue);
    }
    let Echo::Ping { challenge } = frame else {
        return Err(Status::IllegalValue);
    };
    send_ping_or_pong(session, recv_by, &ping_message.from, *challenge, false)
}

/// Handles an incoming Pong: the response must equal the stored
/// challenge bytes, then the application is told the partner's rating
/// may have changed.
pub(crate) fn handle_pong(
    session: &Session,
    own_identity: &Identity,
    partner: &Identity,
    frame: &Echo,
) -> Result<()> {
    let Echo::Pong { challenge } = frame else {
        return Err(Status::IllegalValue);
    };
    let expected = challenge_for_identity(session, partner)?;
    if *challenge != expected {
        return Err(Status::DistributionIllegalMessage);
    }
    session.emit_event(crate::events::Event::EchoPongReceived {
        address: partner.address.clone(),
    });
    session.notify_handshake(
        own_identity.clone(),
        Some(partner.clone()),
        SyncNotify::OutgoingRatingChange,
    )
}

/// True when we hold at least one key for the identity; own identities
/// always count as known. Errors count as known, which avoids a Ping.
fn identity_known(session: &Session, identity: &Identity) -> bool {
    if identity.me {
        return true;
    }
    match get_identity(session, &identity.address, &identity.user_id) {
        Ok(Some(stored)) => {
            if stored.me || stored.has_key() {
                return true;
            }
            let has_trust = session
                .sql
                .exists(
                    "SELECT 1 FROM trust WHERE user_id=? AND length(pgp_keypair_fpr)>0;",
                    [&stored.user_id],
                )
                .unwrap_or(true);
            if has_trust {
                return true;
            }
            !session
                .crypto
                .find_keys(&identity.address)
                .map(|keys| keys.is_empty())
                .unwrap_or(true)
        }
        Ok(None) => !session
            .crypto
            .find_keys(&identity.address)
            .map(|keys| keys.is_empty())
            .unwrap_or(true),
        Err(_) => true,
    }
}

/// Pings the identity when we have no key for it; failures are
/// swallowed. With `only_if_pep` set, identities not known to run the
/// peer protocol are skipped.
fn send_ping_if_unknown(
    session: &Session,
    from_identity: &Identity,
    to_identity: &Identity,
    only_if_pep: bool,
) {
    if !from_identity.me {
        warning!(
            session,
            "Not sending a Ping from the non-own identity {}.",
            from_identity.address
        );
        return;
    }
    if to_identity.address.is_empty() || identity_known(session, to_identity) {
        return;
    }
    if only_if_pep {
        let known_pep = get_identity(session, &to_identity.address, &to_identity.user_id)
            .ok()
            .flatten()
            .map(|stored| is_pep_user(session, &stored.user_id).unwrap_or(false))
            .unwrap_or(false);
        if !known_pep {
            return;
        }
    }
    if let Err(status) = send_ping(session, from_identity, to_identity) {
        info!(
            session,
            "Ping to {} failed: {}.", to_identity.address, status
        );
    }
}

fn send_ping_to_unknowns_in(
    session: &Session,
    from_identity: &Identity,
    to_identities: &[Identity],
    only_if_pep: bool,
) {
    for to_identity in to_identities {
        send_ping_if_unknown(session, from_identity, to_identity, only_if_pep);
    }
}

fn send_ping_to_unknowns_in_incoming_message(
    session: &Session,
    msg: &Message,
    only_if_pep: bool,
) -> Result<()> {
    if msg.dir != MessageDirection::Incoming {
        return Err(Status::IllegalValue);
    }
    // Bcc identities are never pinged; the field should be empty on
    // incoming mail anyway, and pinging them would leak privacy.
    let Some(ping_from) = &msg.recv_by else {
        return Err(Status::IllegalValue);
    };
    send_ping_if_unknown(session, ping_from, &msg.from, only_if_pep);
    send_ping_to_unknowns_in(session, ping_from, &msg.to, only_if_pep);
    send_ping_to_unknowns_in(session, ping_from, &msg.cc, only_if_pep);
    send_ping_to_unknowns_in(session, ping_from, &msg.reply_to, only_if_pep);
    Ok(())
}

/// Incoming-message trigger: Ping every address in from/to/cc/reply-to
/// we hold no key for, from the receiving own identity.
pub fn send_ping_to_all_unknowns_in_incoming_message(
    session: &Session,
    msg: &Message,
) -> Result<()> {
    send_ping_to_unknowns_in_incoming_message(session, msg, false)
}

/// Restricted incoming-message trigger: only addresses known to run
/// the peer protocol.
pub fn send_ping_to_unknown_pep_identities_in_incoming_message(
    session: &Session,
    msg: &Message,
) -> Result<()> {
    send_ping_to_unknowns_in_incoming_message(session, msg, true)
}

/// Outgoing-message trigger: Ping unknown peer-protocol addresses in
/// to/cc/reply-to, from the message's own from identity. Best-effort.
pub fn send_ping_to_unknown_pep_identities_in_outgoing_message(
    session: &Session,
    msg: &Message,
) {
    if msg.dir != MessageDirection::Outgoing || msg.from.address.is_empty() {
        return;
    }
    let mut from = msg.from.clone();
    if !from.me {
        if let Ok(Some(stored)) = get_identity(session, &from.address, &from.user_id) {
            from = stored;
        }
    }
    send_ping_to_unknowns_in(session, &from, &msg.to, true);
    send_ping_to_unknowns_in(session, &from, &msg.cc, true);
    send_ping_to_unknowns_in(session, &from, &msg.reply_to, true);
}
