//! Key reset: revoking an own key and walking previously-contacted
//! peers over to the replacement.

use crate::baseprotocol::{try_base_prepare_message, BaseProtocolType};
use crate::constants::CommType;
use crate::context::Session;
use crate::e2ee::{encrypt_message, EncryptFlags};
use crate::error::{Result, Status};
use crate::events::Event;
use crate::identity::{
    get_identity, remove_fpr_as_default, set_identity, set_user_default_key,
    social_graph_contacts, update_trust_for_fpr, Identity,
};
use crate::keymanagement::myself;
use crate::message::EncFormat;
use crate::tools::time;
use crate::wire::{Distribution, ManagedGroup};

// Revocation records: append-only chain of replaced fingerprints.

pub(crate) fn set_revoked(
    session: &Session,
    revoked_fpr: &str,
    replacement_fpr: &str,
    revocation_date: i64,
) -> Result<()> {
    session.sql.execute(
        "INSERT OR IGNORE INTO revoked_keys (revoked_fpr, replacement_fpr, revocation_date)
         VALUES (?1, ?2, ?3);",
        rusqlite::params![revoked_fpr, replacement_fpr, revocation_date],
    )?;
    Ok(())
}

/// The replacement and revocation epoch recorded for a revoked
/// fingerprint.
pub fn get_revoked(session: &Session, fpr: &str) -> Result<Option<(String, i64)>> {
    let row = session.sql.query_row(
        "SELECT replacement_fpr, revocation_date FROM revoked_keys WHERE revoked_fpr=?;",
        [fpr],
        |row| Ok((row.get(0)?, row.get(1)?)),
    );
    match row {
        Ok(row) => Ok(Some(row)),
        Err(Status::RecordNotFound) => Ok(None),
        Err(err) => Err(err),
    }
}

/// Fingerprints revoked within `grace` seconds whose replacement is
/// `replacement_fpr`.
pub(crate) fn recently_revoked_replaced_by(
    session: &Session,
    replacement_fpr: &str,
    grace: i64,
) -> Result<Vec<String>> {
    session.sql.query_map_vec(
        "SELECT revoked_fpr FROM revoked_keys
          WHERE replacement_fpr=?1 AND revocation_date>=?2 ORDER BY revoked_fpr;",
        rusqlite::params![replacement_fpr, time() - grace],
        |row| row.get(0),
    )
}

// Revocation notifications: who has been told already.

pub(crate) fn has_notified_of_revocation(
    session: &Session,
    revoked_fpr: &str,
    own_address: &str,
    contact_user_id: &str,
) -> Result<bool> {
    session.sql.exists(
        "SELECT 1 FROM revocation_contact_list
          WHERE fpr=?1 AND own_address=?2 AND contact_id=?3;",
        [revoked_fpr, own_address, contact_user_id],
    )
}

pub(crate) fn set_notified_of_revocation(
    session: &Session,
    revoked_fpr: &str,
    own_address: &str,
    contact_user_id: &str,
) -> Result<()> {
    session.sql.execute(
        "INSERT OR IGNORE INTO revocation_contact_list (fpr, own_address, contact_id, timestamp)
         VALUES (?1, ?2, ?3, ?4);",
        rusqlite::params![revoked_fpr, own_address, contact_user_id, time()],
    )?;
    Ok(())
}

/// Revokes the identity's current default key, elects or generates a
/// replacement, records the revocation and notifies every contact in
/// the social graph. Notification failures are non-fatal; a missed
/// peer is retried on the next contact.
pub fn key_reset(session: &Session, ident: &mut Identity) -> Result<()> {
    if ident.address.is_empty() || ident.user_id.is_empty() {
        return Err(Status::IllegalValue);
    }
    myself(session, ident)?;
    let old_fpr = ident.fpr.clone();
    if old_fpr.is_empty() {
        return Err(Status::KeyNotFound);
    }

    let passphrase = session.passphrase();
    session
        .crypto
        .revoke_key(&old_fpr, Some("key reset"), passphrase.as_deref())?;

    // Re-running myself sees the revoked default, records the
    // revocation and binds a fresh key.
    ident.fpr.clear();
    myself(session, ident)?;
    if get_revoked(session, &old_fpr)?.is_none() {
        set_revoked(session, &old_fpr, &ident.fpr, time())?;
    }

    session.emit_event(Event::OwnKeyReset {
        revoked: old_fpr.clone(),
        replacement: ident.fpr.clone(),
    });

    let replacement_fpr = ident.fpr.clone();
    for contact_user_id in social_graph_contacts(session, &ident.user_id, &ident.address)? {
        if has_notified_of_revocation(session, &old_fpr, &ident.address, &contact_user_id)? {
            continue;
        }
        let addresses: Vec<String> = session.sql.query_map_vec(
            "SELECT address FROM identity WHERE user_id=? ORDER BY timestamp DESC;",
            [&contact_user_id],
            |row| row.get(0),
        )?;
        let Some(contact_address) = addresses.first() else {
            continue;
        };
        let contact = Identity::new(contact_address, &contact_user_id);
        match send_reset_notification(session, ident, &contact, &old_fpr, &replacement_fpr) {
            Ok(()) => {
                set_notified_of_revocation(session, &old_fpr, &ident.address, &contact_user_id)?;
            }
            Err(status) => {
                warning!(
                    session,
                    "Key reset notification to {} failed: {}.", contact.address, status
                );
            }
        }
    }
    Ok(())
}

/// One KEY_RESET-wrapped protocol message announcing (revoked,
/// replacement) to a single contact. The Distribution payload is
/// signed with the revoked key, which the peer still trusts at this
/// moment; the pipeline signs the whole message with the replacement.
fn send_reset_notification(
    session: &Session,
    own: &Identity,
    contact: &Identity,
    revoked_fpr: &str,
    replacement_fpr: &str,
) -> Result<()> {
    let frame = Distribution::ManagedGroup(ManagedGroup::KeyReset {
        revoked_fpr: revoked_fpr.to_string(),
        replacement_fpr: replacement_fpr.to_string(),
    });
    let payload = session.wire.encode_distribution(&frame)?;
    let msg = try_base_prepare_message(
        session,
        own,
        contact,
        BaseProtocolType::Distribution,
        payload,
        Some(revoked_fpr),
    )?;
    let (out, _status) = encrypt_message(
        session,
        &msg,
        &[],
        EncFormat::Pep,
        EncryptFlags(EncryptFlags::KEY_RESET_ONLY),
    )?;
    session.message_to_send(Some(out))
}

/// Receiver side: a peer announced that their key `revoked_fpr` was
/// replaced. Only honoured when the announcement is authentic, i.e.
/// carried a valid signature of the revoked key itself.
pub(crate) fn receive_key_reset(
    session: &Session,
    sender: &Identity,
    frame: &ManagedGroup,
    verified_fprs: &[String],
) -> Result<()> {
    let ManagedGroup::KeyReset {
        revoked_fpr,
        replacement_fpr,
    } = frame;
    if revoked_fpr.is_empty() || replacement_fpr.is_empty() {
        return Err(Status::DistributionIllegalMessage);
    }
    if !verified_fprs.iter().any(|fpr| fpr == revoked_fpr) {
        return Err(Status::DistributionIllegalMessage);
    }

    let Some(stored) = get_identity(session, &sender.address, &sender.user_id)? else {
        return Err(Status::CannotFindIdentity);
    };
    if stored.me {
        // Nobody gets to reset our keys over mail.
        return Err(Status::DistributionIllegalMessage);
    }

    update_trust_for_fpr(session, revoked_fpr, CommType::KeyRevoked)?;
    remove_fpr_as_default(session, revoked_fpr)?;

    let mut updated = stored;
    updated.fpr = replacement_fpr.clone();
    updated.comm_type = session
        .crypto
        .get_key_rating(replacement_fpr)
        .unwrap_or(CommType::KeyNotFound);
    if crate::identity::is_pep_user(session, &updated.user_id)? {
        updated.comm_type = updated.comm_type.promoted_for_pep_user();
    }
    set_identity(session, &updated)?;
    set_user_default_key(session, &updated.user_id, replacement_fpr)?;
    info!(
        session,
        "Replaced revoked key {} of {} with {}.", revoked_fpr, updated.address, replacement_fpr
    );
    Ok(())
}

/// Receiver-of-stale-mail side: an incoming message was encrypted to
/// an own key that is locally revoked; tell the sender about the
/// replacement so their next mail uses it.
pub(crate) fn notify_sender_of_revocation(
    session: &Session,
    own: &Identity,
    sender: &Identity,
    revoked_fpr: &str,
) -> Result<()> {
    let Some((replacement_fpr, _)) = get_revoked(session, revoked_fpr)? else {
        return Ok(());
    };
    if sender.user_id.is_empty()
        || has_notified_of_revocation(session, revoked_fpr, &own.address, &sender.user_id)?
    {
        return Ok(());
    }
    send_reset_notification(session, own, sender, revoked_fpr, &replacement_fpr)?;
    set_notified_of_revocation(session, revoked_fpr, &own.address, &sender.user_id)
}
