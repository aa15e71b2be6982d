//! Key management: completing identities from the store, electing and
//! validating keys, and the explicit trust operations.

use crate::constants::{CommType, KEY_EXPIRE_DELTA, KEY_GRACE_PERIOD};
use crate::context::Session;
use crate::error::{Result, Status};
use crate::identity::{
    self, get_default_own_user_id, get_identities_by_address, get_identity,
    get_user_default_key, is_pep_user, remove_fpr_as_default, replace_userid, set_as_pep_user,
    set_identity, set_trust, set_user_default_key, update_trust_for_fpr, Identity,
};
use crate::keyreset::set_revoked;
use crate::tools::{normalize_fingerprint, time};

/// Completes a peer identity as known by the store.
///
/// The caller supplies whatever it knows (address, maybe a user id,
/// maybe a display name); the store contributes the rest, an elected
/// default key and its comm-type. The completed row is written back so
/// subsequent reads are stable.
pub fn update_identity(session: &Session, ident: &mut Identity) -> Result<()> {
    if ident.address.is_empty() {
        return Err(Status::IllegalValue);
    }
    let own_user_id = get_default_own_user_id(session)?;
    if ident.me || ident.user_id == own_user_id {
        // Own identities go through `myself`.
        return Err(Status::IllegalValue);
    }

    if !ident.user_id.is_empty() {
        if let Some(stored) = get_identity(session, &ident.address, &ident.user_id)? {
            if stored.me {
                ident.user_id = stored.user_id.clone();
                return myself(session, ident);
            }
            return prepare_updated_identity(session, ident, stored);
        }
        // A row might exist under a synthesized user id from earlier
        // trust-on-first-use contact; reconcile it now.
        let tofu_id = ident.tofu_user_id();
        if let Some(tofu) = get_identity(session, &ident.address, &tofu_id)? {
            let name_matches = tofu.username.is_empty()
                || tofu.username == tofu.address
                || ident.username.is_empty()
                || tofu.username == ident.username;
            if name_matches {
                replace_userid(session, &tofu_id, &ident.user_id)?;
                if let Some(stored) = get_identity(session, &ident.address, &ident.user_id)? {
                    return prepare_updated_identity(session, ident, stored);
                }
            }
        }
        return insert_fresh_identity(session, ident);
    }

    // No user id given: search by address.
    let rows = get_identities_by_address(session, &ident.address)?;
    let chosen = rows
        .iter()
        .find(|row| row.user_id == own_user_id)
        .or_else(|| {
            rows.iter().find(|row| {
                !row.is_tofu_user_id()
                    && !ident.username.is_empty()
                    && row.username == ident.username
            })
        })
        .or_else(|| rows.first())
        .cloned();
    match chosen {
        Some(stored) if stored.me => {
            // The address turned out to be our own; complete it as
            // such instead of treating it like a peer.
            ident.user_id = stored.user_id.clone();
            myself(session, ident)
        }
        Some(stored) => {
            ident.user_id = stored.user_id.clone();
            prepare_updated_identity(session, ident, stored)
        }
        None => {
            ident.user_id = ident.tofu_user_id();
            insert_fresh_identity(session, ident)
        }
    }
}

/// Merges a stored row into the caller-supplied identity, elects the
/// best available key and writes the result back.
fn prepare_updated_identity(
    session: &Session,
    ident: &mut Identity,
    stored: Identity,
) -> Result<()> {
    let caller_name = ident.username.clone();
    let keep_caller_name = !caller_name.is_empty() && caller_name != ident.address;

    ident.user_id = stored.user_id.clone();
    ident.fpr = stored.fpr.clone();
    ident.comm_type = stored.comm_type;
    ident.flags = stored.flags;
    ident.major_ver = stored.major_ver;
    ident.minor_ver = stored.minor_ver;
    ident.me = false;
    if !keep_caller_name {
        ident.username = stored.username.clone();
    }
    if ident.lang.is_empty() {
        ident.lang = stored.lang.clone();
    }

    get_valid_pubkey(session, ident, true)?;
    set_identity(session, ident)?;
    Ok(())
}

fn insert_fresh_identity(session: &Session, ident: &mut Identity) -> Result<()> {
    ident.me = false;
    ident.fpr.clear();
    ident.comm_type = CommType::Unknown;
    get_valid_pubkey(session, ident, true)?;
    set_identity(session, ident)?;
    Ok(())
}

/// Elects the best public key for the identity's address from the
/// backend keystore. Ties in intrinsic rating are broken by the most
/// recent key creation time.
pub(crate) fn elect_pubkey(
    session: &Session,
    ident: &mut Identity,
    check_blacklist: bool,
) -> Result<()> {
    ident.comm_type = CommType::Unknown;
    let keylist = session.crypto.find_keys(&ident.address)?;
    if keylist.is_empty() {
        ident.comm_type = CommType::KeyNotFound;
        ident.fpr.clear();
        return Ok(());
    }
    let mut best_fpr = String::new();
    let mut best_created = i64::MIN;
    for fpr in &keylist {
        let ct = session.crypto.get_key_rating(fpr)?;
        if ct == CommType::Compromised || ct == CommType::Unknown {
            continue;
        }
        let created = session.crypto.key_created(fpr).unwrap_or(0);
        let better = ct > ident.comm_type
            || (ct == ident.comm_type && !best_fpr.is_empty() && created > best_created);
        if ident.comm_type == CommType::Unknown || better {
            if is_mistrusted_key(session, fpr)? {
                continue;
            }
            if check_blacklist && crate::blacklist::blacklist_is_listed(session, fpr)? {
                continue;
            }
            ident.comm_type = ct;
            best_fpr = fpr.clone();
            best_created = created;
        }
    }
    if best_fpr.is_empty() {
        ident.comm_type = CommType::KeyNotFound;
    }
    ident.fpr = best_fpr;
    Ok(())
}

/// Validates `ident.fpr` for use with this identity, mutating the
/// comm-type and clearing unusable defaults.
pub(crate) fn validate_fpr(
    session: &Session,
    ident: &mut Identity,
    check_blacklist: bool,
) -> Result<()> {
    if ident.fpr.is_empty() {
        return Err(Status::IllegalValue);
    }
    let fpr = ident.fpr.clone();

    if ident.me && !session.crypto.contains_priv_key(&fpr)? {
        return Err(Status::KeyUnsuitable);
    }

    identity::get_trust(session, ident)?;
    let mut ct = ident.comm_type;
    if ct == CommType::Unknown {
        ct = session.crypto.get_key_rating(&fpr)?;
        ident.comm_type = ct;
    }
    if is_pep_user(session, &ident.user_id)? {
        ct = ct.promoted_for_pep_user();
        ident.comm_type = ct;
    }

    let revoked = session.crypto.key_revoked(&fpr)?;
    let mut expired = false;
    let mut blacklisted = false;
    if !revoked {
        // Own keys are checked against a grace window so they get
        // renewed before actually running out.
        let exp_time = if ident.me {
            time() + KEY_GRACE_PERIOD
        } else {
            time()
        };
        expired = session.crypto.key_expired(&fpr, exp_time)?;
        if check_blacklist && !ident.me && ct.is_open_pgp() {
            blacklisted = crate::blacklist::blacklist_is_listed(session, &fpr)?;
        }
    }

    if ident.me && ct >= CommType::StrongButUnconfirmed && !revoked && expired {
        let passphrase = session.passphrase();
        session
            .crypto
            .renew_key(&fpr, time() + KEY_EXPIRE_DELTA, passphrase.as_deref())?;
        expired = session.crypto.key_expired(&fpr, time())?;
    }

    if revoked {
        ct = CommType::KeyRevoked;
    } else if expired {
        ct = CommType::KeyExpired;
    } else if blacklisted {
        ident.comm_type = CommType::KeyNotFound;
        ident.fpr.clear();
        return Err(Status::KeyBlacklisted);
    }

    match ct {
        CommType::KeyExpired | CommType::KeyRevoked | CommType::KeyBroken => {
            remove_fpr_as_default(session, &fpr)?;
            update_trust_for_fpr(session, &fpr, ct)?;
            ident.fpr.clear();
            ident.comm_type = ct;
            Err(Status::KeyUnsuitable)
        }
        CommType::Mistrusted => {
            ident.fpr.clear();
            ident.comm_type = ct;
            Err(Status::KeyUnsuitable)
        }
        _ => {
            ident.comm_type = ct;
            Ok(())
        }
    }
}

/// Key election for a stored identity: the identity default first,
/// then the person default, then the backend keystore. On total
/// failure the identity ends up with no key and a comm-type explaining
/// why.
pub(crate) fn get_valid_pubkey(
    session: &Session,
    ident: &mut Identity,
    check_blacklist: bool,
) -> Result<()> {
    if ident.user_id.is_empty() {
        return Err(Status::IllegalValue);
    }

    let mut first_reject_ct = CommType::KeyNotFound;
    let mut first_rejected = false;

    if !ident.fpr.is_empty() {
        match validate_fpr(session, ident, check_blacklist) {
            Ok(()) if !ident.fpr.is_empty() => return Ok(()),
            Ok(()) => {}
            Err(Status::KeyNotFound) => {}
            Err(_) => {
                if !first_rejected {
                    first_rejected = true;
                    first_reject_ct = ident.comm_type;
                }
            }
        }
    }
    ident.fpr.clear();

    if let Some(user_fpr) = get_user_default_key(session, &ident.user_id)? {
        ident.fpr = user_fpr;
        match validate_fpr(session, ident, check_blacklist) {
            Ok(()) if !ident.fpr.is_empty() => return Ok(()),
            Ok(()) => {}
            Err(Status::KeyNotFound) => {}
            Err(_) => {
                if !first_rejected {
                    first_rejected = true;
                    first_reject_ct = ident.comm_type;
                }
            }
        }
        ident.fpr.clear();
    }

    elect_pubkey(session, ident, check_blacklist)?;
    if !ident.fpr.is_empty() {
        // Blacklist was already filtered during election.
        let _ = validate_fpr(session, ident, false);
    }

    match ident.comm_type {
        CommType::KeyRevoked
        | CommType::KeyBroken
        | CommType::KeyExpired
        | CommType::Compromised
        | CommType::Mistrusted => {
            // This only happens when a rejected key is all there is.
            ident.fpr.clear();
            if first_rejected {
                ident.comm_type = first_reject_ct;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Establishes an own identity, generating a keypair when the store
/// and the backend hold none that is usable.
pub fn myself(session: &Session, ident: &mut Identity) -> Result<()> {
    if ident.address.is_empty() || ident.user_id.is_empty() {
        return Err(Status::IllegalValue);
    }
    ident.me = true;
    ident.comm_type = CommType::Pep;

    let stored = get_identity(session, &ident.address, &ident.user_id)?;
    let mut revoked_default = String::new();
    if let Some(stored) = &stored {
        if ident.username.is_empty() {
            ident.username = stored.username.clone();
        }
        if ident.lang.is_empty() {
            ident.lang = stored.lang.clone();
        }
        ident.flags = stored.flags;
        if stored.has_key() {
            ident.fpr = stored.fpr.clone();
            match validate_fpr(session, ident, false) {
                Ok(()) if !ident.fpr.is_empty() => {}
                _ => {
                    if ident.comm_type == CommType::KeyRevoked {
                        revoked_default = stored.fpr.clone();
                    }
                    ident.fpr.clear();
                }
            }
        }
    }

    if ident.fpr.is_empty() {
        elect_ownkey(session, ident)?;
    }

    if ident.fpr.is_empty() {
        let passphrase = session.passphrase();
        info!(session, "Generating keypair for {}.", ident.address);
        let fpr = session.crypto.generate_keypair(
            &ident.address,
            &ident.user_id,
            passphrase.as_deref(),
        )?;
        info!(session, "Keypair {} generated.", fpr);
        ident.fpr = fpr;
    }

    if !revoked_default.is_empty() && revoked_default != ident.fpr {
        set_revoked(session, &revoked_default, &ident.fpr, time())?;
    }

    ident.comm_type = CommType::Pep;
    ident.major_ver = crate::constants::PEP_PROTOCOL_VERSION_MAJOR;
    ident.minor_ver = crate::constants::PEP_PROTOCOL_VERSION_MINOR;
    set_identity(session, ident)?;
    set_as_pep_user(session, &ident.user_id)?;
    set_user_default_key(session, &ident.user_id, &ident.fpr)?;
    Ok(())
}

/// Picks the best own private key for the identity's address.
fn elect_ownkey(session: &Session, ident: &mut Identity) -> Result<()> {
    let keylist = session.crypto.find_private_keys(&ident.address)?;
    let mut best = String::new();
    let mut best_ct = CommType::Unknown;
    let mut best_created = i64::MIN;
    for fpr in keylist {
        if session.crypto.key_revoked(&fpr)?
            || session.crypto.key_expired(&fpr, time())?
            || is_mistrusted_key(session, &fpr)?
        {
            continue;
        }
        let ct = session.crypto.get_key_rating(&fpr)?;
        let created = session.crypto.key_created(&fpr).unwrap_or(0);
        if ct > best_ct || (ct == best_ct && created > best_created) {
            best = fpr;
            best_ct = ct;
            best_created = created;
        }
    }
    ident.fpr = best;
    Ok(())
}

/// Adopts `fpr` as the identity's own default key. The key must have a
/// private component.
pub fn set_own_key(session: &Session, ident: &mut Identity, fpr: &str) -> Result<()> {
    let fpr = normalize_fingerprint(fpr);
    if ident.address.is_empty() || ident.user_id.is_empty() || fpr.is_empty() {
        return Err(Status::IllegalValue);
    }
    if !session.crypto.contains_priv_key(&fpr)? {
        return Err(Status::KeyUnsuitable);
    }
    ident.me = true;
    ident.fpr = fpr;
    ident.comm_type = CommType::Pep;
    set_identity(session, ident)?;
    set_as_pep_user(session, &ident.user_id)?;
    set_user_default_key(session, &ident.user_id, &ident.fpr)?;
    Ok(())
}

/// Adds the confirmed bit to the trust record for (user id, fpr).
/// Refused for keys whose intrinsic rating is below
/// strong-but-unconfirmed.
pub fn trust_personal_key(session: &Session, ident: &mut Identity) -> Result<()> {
    if ident.address.is_empty() || ident.user_id.is_empty() || ident.fpr.is_empty() {
        return Err(Status::IllegalValue);
    }
    let fpr = ident.fpr.clone();
    let intrinsic = session.crypto.get_key_rating(&fpr)?;
    if intrinsic < CommType::StrongButUnconfirmed {
        return Err(Status::KeyUnsuitable);
    }

    if get_identity(session, &ident.address, &ident.user_id)?.is_none() {
        let mut probe = ident.clone();
        probe.fpr.clear();
        update_identity(session, &mut probe)?;
    }

    identity::get_trust(session, ident)?;
    let base = if ident.comm_type == CommType::Unknown {
        intrinsic
    } else {
        ident.comm_type
    };
    let mut confirmed = base.confirmed();
    if is_pep_user(session, &ident.user_id)? {
        confirmed = confirmed.promoted_for_pep_user();
    }
    ident.fpr = fpr;
    ident.comm_type = confirmed;
    set_trust(session, &ident.user_id, &ident.fpr, confirmed)?;
    set_identity(session, ident)?;
    Ok(())
}

/// Strips the confirmed bit from the trust record and clears any
/// mistrust marker for the key.
pub fn key_reset_trust(session: &Session, ident: &mut Identity) -> Result<()> {
    if ident.address.is_empty() || ident.user_id.is_empty() || ident.fpr.is_empty() {
        return Err(Status::IllegalValue);
    }
    identity::get_trust(session, ident)?;
    let mut ct = ident.comm_type.unconfirmed();
    if ct == CommType::Unknown {
        ct = session.crypto.get_key_rating(&ident.fpr)?;
    }
    if is_pep_user(session, &ident.user_id)? {
        ct = ct.promoted_for_pep_user();
    }
    delete_mistrusted_key(session, &ident.fpr)?;
    ident.comm_type = ct;
    set_trust(session, &ident.user_id, &ident.fpr, ct)?;
    set_identity(session, ident)?;
    Ok(())
}

/// Marks the identity's key as compromised.
///
/// For an own identity this revokes the key and re-establishes the
/// identity with a fresh one. For peers the fingerprint is mistrusted,
/// the compromise cascades to every trust record carrying it, and the
/// previous identity is kept in a single-slot undo cache.
pub fn key_mistrusted(session: &Session, ident: &mut Identity) -> Result<()> {
    if ident.fpr.is_empty() {
        return Err(Status::IllegalValue);
    }
    let fpr = ident.fpr.clone();

    if ident.me {
        let passphrase = session.passphrase();
        session
            .crypto
            .revoke_key(&fpr, Some("key is mistrusted"), passphrase.as_deref())?;
        ident.fpr.clear();
        return myself(session, ident);
    }

    let cached = get_identity(session, &ident.address, &ident.user_id)?;
    *session.mistrust_undo.lock().unwrap() = cached;

    add_mistrusted_key(session, &fpr)?;
    update_trust_for_fpr(session, &fpr, CommType::Compromised)?;
    set_trust(session, &ident.user_id, &fpr, CommType::Mistrusted)?;
    remove_fpr_as_default(session, &fpr)?;
    ident.fpr.clear();
    ident.comm_type = CommType::Mistrusted;
    Ok(())
}

/// Restores the identity cached by the most recent [`key_mistrusted`].
pub fn undo_last_mistrust(session: &Session) -> Result<()> {
    let cached = session.mistrust_undo.lock().unwrap().take();
    let cached = cached.ok_or(Status::CannotFindIdentity)?;
    delete_mistrusted_key(session, &cached.fpr)?;
    set_identity(session, &cached)?;
    if cached.has_key() {
        set_trust(session, &cached.user_id, &cached.fpr, cached.comm_type)?;
        set_user_default_key(session, &cached.user_id, &cached.fpr)?;
    }
    Ok(())
}

// Mistrusted keys table.

pub(crate) fn add_mistrusted_key(session: &Session, fpr: &str) -> Result<()> {
    session.sql.execute(
        "INSERT OR IGNORE INTO mistrusted_keys (fpr) VALUES (?);",
        [fpr],
    )?;
    Ok(())
}

pub(crate) fn delete_mistrusted_key(session: &Session, fpr: &str) -> Result<()> {
    session
        .sql
        .execute("DELETE FROM mistrusted_keys WHERE fpr=?;", [fpr])?;
    Ok(())
}

pub fn is_mistrusted_key(session: &Session, fpr: &str) -> Result<bool> {
    session
        .sql
        .exists("SELECT fpr FROM mistrusted_keys WHERE fpr=?;", [fpr])
}

/// Fingerprints in use as defaults of own identities.
pub fn own_keys_retrieve(session: &Session) -> Result<Vec<String>> {
    session.sql.query_map_vec(
        "SELECT DISTINCT main_key_id FROM identity
          WHERE is_own=1 AND length(main_key_id)>0 ORDER BY main_key_id;",
        [],
        |row| row.get(0),
    )
}

pub fn own_key_is_listed(session: &Session, fpr: &str) -> Result<bool> {
    let fpr = normalize_fingerprint(fpr);
    Ok(own_keys_retrieve(session)?.iter().any(|k| *k == fpr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::CryptoBackend as _;
    use crate::test_utils::{TestSession, ALICE_ADDR, BOB_ADDR};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_myself_generates_key() {
        let t = TestSession::new();
        let mut me = Identity::new(ALICE_ADDR, "alice-uid");
        me.username = "Alice".to_string();
        myself(&t, &mut me).unwrap();
        assert!(me.me);
        assert!(me.has_key());
        assert_eq!(me.comm_type, CommType::Pep);
        assert!(t.crypto_backend().contains_priv_key(&me.fpr).unwrap());
        assert!(own_key_is_listed(&t, &me.fpr).unwrap());

        // Second call reuses the key.
        let mut again = Identity::new(ALICE_ADDR, "alice-uid");
        myself(&t, &mut again).unwrap();
        assert_eq!(again.fpr, me.fpr);
        assert_eq!(again.username, "Alice");
    }

    #[test]
    fn test_myself_rejects_incomplete() {
        let t = TestSession::new();
        assert_eq!(
            myself(&t, &mut Identity::new("", "uid")),
            Err(Status::IllegalValue)
        );
        assert_eq!(
            myself(&t, &mut Identity::new(ALICE_ADDR, "")),
            Err(Status::IllegalValue)
        );
    }

    #[test]
    fn test_update_identity_rejects_own() {
        let t = TestSession::alice();
        let mut ident = Identity::new(BOB_ADDR, "uid-bob");
        ident.me = true;
        assert_eq!(update_identity(&t, &mut ident), Err(Status::IllegalValue));

        let own_id = get_default_own_user_id(&t).unwrap();
        let mut ident = Identity::new(BOB_ADDR, &own_id);
        assert_eq!(update_identity(&t, &mut ident), Err(Status::IllegalValue));

        let mut ident = Identity::new("", "uid-bob");
        assert_eq!(update_identity(&t, &mut ident), Err(Status::IllegalValue));
    }

    #[test]
    fn test_update_identity_elects_key() {
        let t = TestSession::alice();
        let bob_fpr = t.import_peer_key(BOB_ADDR);
        let mut bob = Identity::new(BOB_ADDR, "uid-bob");
        bob.username = "Bob".to_string();
        update_identity(&t, &mut bob).unwrap();
        assert_eq!(bob.fpr, bob_fpr);
        assert_eq!(bob.comm_type, CommType::OpenPgpUnconfirmed);

        // The row was written back; a second call is idempotent.
        let stored = get_identity(&t, BOB_ADDR, "uid-bob").unwrap().unwrap();
        let mut bob2 = Identity::new(BOB_ADDR, "uid-bob");
        bob2.username = "Bob".to_string();
        update_identity(&t, &mut bob2).unwrap();
        let stored2 = get_identity(&t, BOB_ADDR, "uid-bob").unwrap().unwrap();
        assert_eq!(stored, stored2);
    }

    #[test]
    fn test_update_identity_no_key() {
        let t = TestSession::alice();
        let mut carol = Identity::new("carol@example.com", "uid-carol");
        update_identity(&t, &mut carol).unwrap();
        assert!(!carol.has_key());
        assert_eq!(carol.comm_type, CommType::KeyNotFound);
    }

    #[test]
    fn test_update_identity_synthesizes_tofu() {
        let t = TestSession::alice();
        t.import_peer_key(BOB_ADDR);
        let mut bob = Identity::new(BOB_ADDR, "");
        update_identity(&t, &mut bob).unwrap();
        assert_eq!(bob.user_id, format!("TOFU_{BOB_ADDR}"));
    }

    #[test]
    fn test_update_identity_reconciles_tofu() {
        let t = TestSession::alice();
        t.import_peer_key(BOB_ADDR);
        let mut bob = Identity::new(BOB_ADDR, "");
        update_identity(&t, &mut bob).unwrap();
        assert!(bob.is_tofu_user_id());

        let mut bob_real = Identity::new(BOB_ADDR, "uid-bob");
        bob_real.username = "Bob".to_string();
        update_identity(&t, &mut bob_real).unwrap();
        assert_eq!(bob_real.user_id, "uid-bob");
        // The TOFU row is gone, rewritten to the real user id.
        assert!(get_identity(&t, BOB_ADDR, &format!("TOFU_{BOB_ADDR}"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_update_identity_username_patch_rules() {
        let t = TestSession::alice();
        t.import_peer_key(BOB_ADDR);
        let mut bob = Identity::new(BOB_ADDR, "uid-bob");
        bob.username = "Bob".to_string();
        update_identity(&t, &mut bob).unwrap();

        // An empty caller name prefers the stored one.
        let mut noname = Identity::new(BOB_ADDR, "uid-bob");
        update_identity(&t, &mut noname).unwrap();
        assert_eq!(noname.username, "Bob");

        // A name equal to the address prefers the stored one.
        let mut addrname = Identity::new(BOB_ADDR, "uid-bob");
        addrname.username = BOB_ADDR.to_string();
        update_identity(&t, &mut addrname).unwrap();
        assert_eq!(addrname.username, "Bob");

        // A real caller name wins.
        let mut renamed = Identity::new(BOB_ADDR, "uid-bob");
        renamed.username = "Bobby".to_string();
        update_identity(&t, &mut renamed).unwrap();
        assert_eq!(renamed.username, "Bobby");
    }

    #[test]
    fn test_election_skips_blacklisted() {
        let t = TestSession::alice();
        let bad_fpr = t.import_peer_key(BOB_ADDR);
        crate::blacklist::blacklist_add(&t, &bad_fpr).unwrap();

        let mut bob = Identity::new(BOB_ADDR, "uid-bob");
        update_identity(&t, &mut bob).unwrap();
        assert_eq!(bob.comm_type, CommType::KeyNotFound);
        assert!(!bob.has_key());

        // An alternative key is elected when present.
        let good_fpr = t.import_peer_key(BOB_ADDR);
        let mut bob = Identity::new(BOB_ADDR, "uid-bob");
        update_identity(&t, &mut bob).unwrap();
        assert_eq!(bob.fpr, good_fpr);
    }

    #[test]
    fn test_validate_revoked_key() {
        let t = TestSession::alice();
        let fpr = t.import_peer_key(BOB_ADDR);
        let mut bob = Identity::new(BOB_ADDR, "uid-bob");
        update_identity(&t, &mut bob).unwrap();
        assert_eq!(bob.fpr, fpr);

        t.crypto_backend().revoke_key(&fpr, None, None).unwrap();
        let mut bob = Identity::new(BOB_ADDR, "uid-bob");
        update_identity(&t, &mut bob).unwrap();
        assert!(!bob.has_key());
        assert_eq!(bob.comm_type, CommType::KeyRevoked);
    }

    #[test]
    fn test_own_expired_key_is_renewed() {
        let t = TestSession::new();
        let mut me = Identity::new(ALICE_ADDR, "alice-uid");
        myself(&t, &mut me).unwrap();
        let fpr = me.fpr.clone();
        t.crypto_backend().set_key_expiry(&fpr, time() + 60);

        let mut again = Identity::new(ALICE_ADDR, "alice-uid");
        myself(&t, &mut again).unwrap();
        assert_eq!(again.fpr, fpr);
        assert!(!t.crypto_backend().key_expired(&fpr, time() + 60).unwrap());
    }

    #[test]
    fn test_trust_personal_key_and_reset() {
        let t = TestSession::alice();
        t.import_peer_key(BOB_ADDR);
        let mut bob = Identity::new(BOB_ADDR, "uid-bob");
        update_identity(&t, &mut bob).unwrap();
        assert_eq!(bob.comm_type, CommType::OpenPgpUnconfirmed);

        trust_personal_key(&t, &mut bob).unwrap();
        assert_eq!(bob.comm_type, CommType::OpenPgp);

        key_reset_trust(&t, &mut bob).unwrap();
        assert_eq!(bob.comm_type, CommType::OpenPgpUnconfirmed);
    }

    #[test]
    fn test_trust_personal_key_pep_user() {
        let t = TestSession::alice();
        t.import_peer_key(BOB_ADDR);
        let mut bob = Identity::new(BOB_ADDR, "uid-bob");
        update_identity(&t, &mut bob).unwrap();
        set_as_pep_user(&t, "uid-bob").unwrap();

        trust_personal_key(&t, &mut bob).unwrap();
        assert_eq!(bob.comm_type, CommType::Pep);
    }

    #[test]
    fn test_trust_personal_key_refuses_weak() {
        let t = TestSession::alice();
        let fpr = t.import_peer_key_rated(BOB_ADDR, CommType::KeyTooShort);
        let mut bob = Identity::new(BOB_ADDR, "uid-bob");
        bob.fpr = fpr;
        assert_eq!(trust_personal_key(&t, &mut bob), Err(Status::KeyUnsuitable));
    }

    #[test]
    fn test_key_mistrusted_and_undo() {
        let t = TestSession::alice();
        let fpr = t.import_peer_key(BOB_ADDR);
        let mut bob = Identity::new(BOB_ADDR, "uid-bob");
        update_identity(&t, &mut bob).unwrap();

        key_mistrusted(&t, &mut bob).unwrap();
        assert_eq!(bob.comm_type, CommType::Mistrusted);
        assert!(is_mistrusted_key(&t, &fpr).unwrap());
        let mut probe = Identity::new(BOB_ADDR, "uid-bob");
        update_identity(&t, &mut probe).unwrap();
        assert!(!probe.has_key());

        undo_last_mistrust(&t).unwrap();
        assert!(!is_mistrusted_key(&t, &fpr).unwrap());
        let mut probe = Identity::new(BOB_ADDR, "uid-bob");
        update_identity(&t, &mut probe).unwrap();
        assert_eq!(probe.fpr, fpr);

        // The undo slot only holds one entry.
        assert_eq!(undo_last_mistrust(&t), Err(Status::CannotFindIdentity));
    }

    #[test]
    fn test_key_mistrusted_own_rotates() {
        let t = TestSession::new();
        let mut me = Identity::new(ALICE_ADDR, "alice-uid");
        myself(&t, &mut me).unwrap();
        let old_fpr = me.fpr.clone();

        key_mistrusted(&t, &mut me).unwrap();
        assert!(me.has_key());
        assert_ne!(me.fpr, old_fpr);
        assert!(t.crypto_backend().key_revoked(&old_fpr).unwrap());
    }

    #[test]
    fn test_set_own_key() {
        let t = TestSession::new();
        let fpr = t.generate_own_key(ALICE_ADDR);
        let mut me = Identity::new(ALICE_ADDR, "alice-uid");
        set_own_key(&t, &mut me, &fpr.to_lowercase()).unwrap();
        assert_eq!(me.fpr, fpr);
        assert!(me.me);

        // Keys without a private part are refused.
        let pub_only = t.import_peer_key(BOB_ADDR);
        let mut other = Identity::new(BOB_ADDR, "uid-x");
        assert_eq!(
            set_own_key(&t, &mut other, &pub_only),
            Err(Status::KeyUnsuitable)
        );
    }
}
