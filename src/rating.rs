//! The rating engine: maps comm-types and keylists to the
//! user-visible privacy rating of a message or identity.

use num_derive::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};

use crate::constants::CommType;
use crate::context::Session;
use crate::error::{Result, Status};
use crate::identity::{best_trust_for_fpr, Identity};
use crate::message::Message;

/// User-visible coarsening of the comm-type lattice.
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    FromPrimitive,
    ToPrimitive,
    Serialize,
    Deserialize,
)]
#[repr(i32)]
pub enum Rating {
    UnderAttack = -3,
    Broken = -2,
    Mistrust = -1,
    #[default]
    Undefined = 0,
    CannotDecrypt = 1,
    HaveNoKey = 2,
    Unencrypted = 3,
    Unreliable = 5,
    Reliable = 6,
    Trusted = 7,
    TrustedAndAnonymized = 8,
    FullyAnonymous = 9,
}

impl Rating {
    /// The wire spelling used in the `X-EncStatus` opt-field.
    pub fn as_str(self) -> &'static str {
        match self {
            Rating::UnderAttack => "under_attack",
            Rating::Broken => "b0rken",
            Rating::Mistrust => "mistrust",
            Rating::Undefined => "undefined",
            Rating::CannotDecrypt => "cannot_decrypt",
            Rating::HaveNoKey => "have_no_key",
            Rating::Unencrypted => "unencrypted",
            Rating::Unreliable => "unreliable",
            Rating::Reliable => "reliable",
            Rating::Trusted => "trusted",
            Rating::TrustedAndAnonymized => "trusted_and_anonymized",
            Rating::FullyAnonymous => "fully_anonymous",
        }
    }
}

impl std::fmt::Display for Rating {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps a comm-type to a rating; first match wins.
pub fn rating_from_comm_type(ct: CommType) -> Rating {
    match ct {
        CommType::Unknown => Rating::Undefined,
        CommType::KeyNotFound => Rating::HaveNoKey,
        CommType::Compromised => Rating::UnderAttack,
        CommType::Mistrusted => Rating::Mistrust,
        CommType::NoEncryption | CommType::NoEncryptedChannel | CommType::MyKeyNotIncluded => {
            Rating::Unencrypted
        }
        ct if ct >= CommType::ConfirmedEncAnon => Rating::TrustedAndAnonymized,
        ct if ct >= CommType::StrongEncryption => Rating::Trusted,
        ct if ct >= CommType::StrongButUnconfirmed && !ct.is_confirmed() => Rating::Reliable,
        _ => Rating::Unreliable,
    }
}

/// Rating derived from a decryption status alone, for messages where
/// no keylist applies.
pub fn decrypt_rating(status: Status) -> Rating {
    match status {
        Status::Unencrypted | Status::Verified => Rating::Unencrypted,
        Status::Decrypted => Rating::Unreliable,
        Status::DecryptedAndVerified => Rating::Reliable,
        Status::DecryptNoKey => Rating::HaveNoKey,
        Status::DecryptWrongFormat => Rating::CannotDecrypt,
        _ => Rating::CannotDecrypt,
    }
}

/// Individual rating of a single key, from the stored trust records
/// when any exist, from the backend's intrinsic rating otherwise.
fn key_rating(session: &Session, fpr: &str) -> Rating {
    let ct = match best_trust_for_fpr(session, fpr) {
        Ok(Some(ct)) => ct,
        _ => session
            .crypto
            .get_key_rating(fpr)
            .unwrap_or(CommType::Unknown),
    };
    rating_from_comm_type(ct)
}

/// Whole-message rating over the effective keylist.
///
/// The first keylist entry is the signer; the remainder are the
/// encryption recipients. Entries equal to the sender fingerprint are
/// skipped; a recipient rated mistrust or below collapses the whole
/// rating to that floor, otherwise the pointwise minimum wins.
pub fn keylist_rating(
    session: &Session,
    keylist: &[String],
    sender_fpr: &str,
    base: Rating,
) -> Rating {
    let mut rating = base;
    for fpr in keylist.iter().skip(1) {
        if fpr.is_empty() || (!sender_fpr.is_empty() && fpr == sender_fpr) {
            continue;
        }
        let individual = key_rating(session, fpr);
        if individual <= Rating::Mistrust {
            return individual;
        }
        rating = std::cmp::min(rating, individual);
    }
    rating
}

/// Rating of a (user, key) trust pair.
pub fn get_key_rating_for_user(session: &Session, user_id: &str, fpr: &str) -> Result<Rating> {
    let stored: Option<i32> = session.sql.query_get_value(
        "SELECT comm_type FROM trust WHERE user_id=? AND pgp_keypair_fpr=?;",
        [user_id, fpr],
    )?;
    let ct = match stored {
        Some(value) => crate::constants::CommType::from_value(value),
        None => session.crypto.get_key_rating(fpr)?,
    };
    Ok(rating_from_comm_type(ct))
}

/// Rating of a single identity.
pub fn identity_rating(session: &Session, ident: &Identity) -> Result<Rating> {
    if ident.me {
        return Ok(rating_from_comm_type(CommType::Pep));
    }
    let mut completed = Identity::new(&ident.address, &ident.user_id);
    completed.username = ident.username.clone();
    crate::keymanagement::update_identity(session, &mut completed)?;
    Ok(rating_from_comm_type(completed.comm_type))
}

/// Rating an outgoing message would get, over its current recipients.
///
/// Also the outgoing Echo trigger: unknown peer-protocol recipients
/// are pinged, best-effort.
pub fn outgoing_message_rating(session: &Session, msg: &Message) -> Result<Rating> {
    if msg.dir != crate::message::MessageDirection::Outgoing {
        return Err(Status::IllegalValue);
    }
    let mut max_comm_type = CommType::Pep;
    let mut found_any = false;
    for recipient in msg.recipients() {
        if recipient.address.is_empty() {
            continue;
        }
        found_any = true;
        let mut completed = Identity::new(&recipient.address, &recipient.user_id);
        completed.username = recipient.username.clone();
        if crate::keymanagement::update_identity(session, &mut completed).is_ok() {
            let ct = if completed.me {
                CommType::Pep
            } else {
                completed.comm_type
            };
            max_comm_type = max_comm_type.combine_worst(ct);
        } else {
            max_comm_type = max_comm_type.combine_worst(CommType::KeyNotFound);
        }
    }
    crate::echo::send_ping_to_unknown_pep_identities_in_outgoing_message(session, msg);
    if !found_any {
        return Ok(Rating::Undefined);
    }
    Ok(rating_from_comm_type(max_comm_type))
}
