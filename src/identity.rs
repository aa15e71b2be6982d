//! Identity and person records, the trust table, user-id aliases and
//! the social graph.
//!
//! An identity is the pair (address, user id); a person aggregates all
//! identities sharing a user id. Multi-row writes (person + identity +
//! trust) are transactional.

use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::constants::{CommType, IdentityFlags, PEP_OWN_USERID, TOFU_PREFIX};
use crate::context::Session;
use crate::error::{Result, Status};
use crate::tools::time;

/// An object representing a single identity in memory.
///
/// The identity object is not updated when the store changes; recreate
/// it via [`get_identity`] or the keymanagement operations for fresh
/// state.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// The email address part of the identity.
    pub address: String,
    /// Stable identifier of the person; may be a synthesized
    /// `TOFU_<address>` until reconciled.
    pub user_id: String,
    /// Display name, from the person record.
    pub username: String,
    /// Default key fingerprint; empty when none is bound.
    pub fpr: String,
    pub comm_type: CommType,
    /// Two-letter language tag, or empty.
    pub lang: String,
    pub flags: IdentityFlags,
    /// Negotiated peer-protocol version, initially (0, 0).
    pub major_ver: u32,
    pub minor_ver: u32,
    /// True for identities of the local user.
    pub me: bool,
}

impl Identity {
    pub fn new(address: &str, user_id: &str) -> Self {
        Identity {
            address: address.to_string(),
            user_id: user_id.to_string(),
            ..Default::default()
        }
    }

    pub fn has_key(&self) -> bool {
        !self.fpr.is_empty()
    }

    pub fn is_tofu_user_id(&self) -> bool {
        self.user_id.starts_with(TOFU_PREFIX)
    }

    /// The `TOFU_<address>` user id for this identity's address.
    pub fn tofu_user_id(&self) -> String {
        format!("{TOFU_PREFIX}{}", self.address)
    }
}

fn identity_from_row(row: &rusqlite::Row) -> rusqlite::Result<Identity> {
    Ok(Identity {
        address: row.get("address")?,
        user_id: row.get("user_id")?,
        fpr: row.get("main_key_id")?,
        flags: IdentityFlags(row.get::<_, i64>("flags")? as u32),
        me: row.get::<_, i64>("is_own")? != 0,
        major_ver: row.get::<_, i64>("pep_version_major")? as u32,
        minor_ver: row.get::<_, i64>("pep_version_minor")? as u32,
        username: row.get("username")?,
        lang: row.get("lang")?,
        comm_type: CommType::from_value(row.get::<_, Option<i32>>("comm_type")?.unwrap_or(0)),
    })
}

const IDENTITY_QUERY: &str = r#"
SELECT i.address, i.user_id, i.main_key_id, i.flags, i.is_own,
       i.pep_version_major, i.pep_version_minor,
       p.username, p.lang, t.comm_type
  FROM identity i
  JOIN person p ON p.id = i.user_id
  LEFT JOIN trust t ON t.user_id = i.user_id AND t.pgp_keypair_fpr = i.main_key_id
"#;

/// Loads the identity (address, user id) from the store. The alias
/// table is consulted exactly once when the direct lookup misses.
pub fn get_identity(session: &Session, address: &str, user_id: &str) -> Result<Option<Identity>> {
    let query = format!(
        "{IDENTITY_QUERY} WHERE i.address=?1 COLLATE NOCASE AND i.user_id=?2;"
    );
    let direct = session
        .sql
        .query_row(&query, [address, user_id], identity_from_row);
    match direct {
        Ok(ident) => Ok(Some(ident)),
        Err(Status::RecordNotFound) => {
            if let Some(canonical) = get_userid_alias_default(session, user_id)? {
                let aliased = session
                    .sql
                    .query_row(&query, [address, canonical.as_str()], identity_from_row);
                match aliased {
                    Ok(ident) => Ok(Some(ident)),
                    Err(Status::RecordNotFound) => Ok(None),
                    Err(err) => Err(err),
                }
            } else {
                Ok(None)
            }
        }
        Err(err) => Err(err),
    }
}

/// All identities stored for an address, most recently created first.
pub fn get_identities_by_address(session: &Session, address: &str) -> Result<Vec<Identity>> {
    let query = format!(
        "{IDENTITY_QUERY} WHERE i.address=?1 COLLATE NOCASE ORDER BY i.timestamp DESC;"
    );
    session.sql.query_map_vec(&query, [address], identity_from_row)
}

/// All own identities.
pub fn own_identities_retrieve(session: &Session) -> Result<Vec<Identity>> {
    let query = format!("{IDENTITY_QUERY} WHERE i.is_own=1 ORDER BY i.timestamp;");
    session.sql.query_map_vec(&query, [], identity_from_row)
}

/// The user id used for own identities: the stored one if any own
/// identity exists, the fixed default otherwise.
pub fn get_default_own_user_id(session: &Session) -> Result<String> {
    let stored: Option<String> = session.sql.query_get_value(
        "SELECT user_id FROM identity WHERE is_own=1 ORDER BY timestamp LIMIT 1;",
        [],
    )?;
    Ok(stored.unwrap_or_else(|| PEP_OWN_USERID.to_string()))
}

/// Writes `ident` back to the store: person, keypair reference,
/// identity row and trust record in one transaction.
pub fn set_identity(session: &Session, ident: &Identity) -> Result<()> {
    if ident.address.is_empty() || ident.user_id.is_empty() {
        return Err(Status::IllegalValue);
    }
    session.sql.transaction(|tx| set_identity_inner(tx, ident))
}

pub(crate) fn set_identity_inner(conn: &Connection, ident: &Identity) -> Result<()> {
    set_person_inner(conn, &ident.user_id, &ident.username, &ident.lang, &ident.fpr)?;
    if !ident.fpr.is_empty() {
        conn.execute(
            "INSERT OR IGNORE INTO pgp_keypair (fpr) VALUES (?);",
            [&ident.fpr],
        )
        .map_err(|_| Status::CannotSetIdentity)?;
    }
    conn.execute(
        "INSERT INTO identity (address, user_id, main_key_id, flags, is_own,
                               pep_version_major, pep_version_minor, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(address, user_id) DO UPDATE SET
             main_key_id=excluded.main_key_id,
             flags=excluded.flags,
             is_own=excluded.is_own,
             pep_version_major=excluded.pep_version_major,
             pep_version_minor=excluded.pep_version_minor;",
        rusqlite::params![
            ident.address,
            ident.user_id,
            ident.fpr,
            i64::from(ident.flags.0),
            ident.me,
            ident.major_ver,
            ident.minor_ver,
            time(),
        ],
    )
    .map_err(|_| Status::CannotSetIdentity)?;
    if !ident.fpr.is_empty() && ident.comm_type != CommType::Unknown {
        set_trust_inner(conn, &ident.user_id, &ident.fpr, ident.comm_type)?;
    }
    Ok(())
}

fn set_person_inner(
    conn: &Connection,
    user_id: &str,
    username: &str,
    lang: &str,
    main_key_id: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO person (id, username, lang, main_key_id)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(id) DO UPDATE SET
             username=CASE WHEN length(excluded.username)>0
                           THEN excluded.username ELSE person.username END,
             lang=CASE WHEN length(excluded.lang)>0
                       THEN excluded.lang ELSE person.lang END,
             main_key_id=CASE WHEN length(excluded.main_key_id)>0
                              THEN excluded.main_key_id ELSE person.main_key_id END;",
        rusqlite::params![user_id, username, lang, main_key_id],
    )
    .map_err(|_| Status::CannotSetPerson)?;
    Ok(())
}

pub fn exists_person(session: &Session, user_id: &str) -> Result<bool> {
    session
        .sql
        .exists("SELECT id FROM person WHERE id=?;", [user_id])
}

/// The person's preferred default key fingerprint, if any.
pub fn get_user_default_key(session: &Session, user_id: &str) -> Result<Option<String>> {
    let fpr: Option<String> = session.sql.query_get_value(
        "SELECT main_key_id FROM person WHERE id=?;",
        [user_id],
    )?;
    Ok(fpr.filter(|f| !f.is_empty()))
}

pub(crate) fn set_user_default_key(session: &Session, user_id: &str, fpr: &str) -> Result<()> {
    session.sql.execute(
        "UPDATE person SET main_key_id=? WHERE id=?;",
        [fpr, user_id],
    )?;
    Ok(())
}

/// Whether this person is known to run the peer protocol.
pub fn is_pep_user(session: &Session, user_id: &str) -> Result<bool> {
    let flag: Option<i64> = session.sql.query_get_value(
        "SELECT is_pep_user FROM person WHERE id=?;",
        [user_id],
    )?;
    Ok(flag.unwrap_or(0) != 0)
}

pub fn set_as_pep_user(session: &Session, user_id: &str) -> Result<()> {
    session.sql.execute(
        "UPDATE person SET is_pep_user=1 WHERE id=?;",
        [user_id],
    )?;
    Ok(())
}

// Trust records: (user id, fingerprint) -> comm-type.

/// Loads the trust record for `(ident.user_id, ident.fpr)` into
/// `ident.comm_type`; `Unknown` when there is none.
pub fn get_trust(session: &Session, ident: &mut Identity) -> Result<()> {
    let value: Option<i32> = session.sql.query_get_value(
        "SELECT comm_type FROM trust WHERE user_id=? AND pgp_keypair_fpr=?;",
        [&ident.user_id, &ident.fpr],
    )?;
    ident.comm_type = CommType::from_value(value.unwrap_or(0));
    Ok(())
}

pub fn set_trust(session: &Session, user_id: &str, fpr: &str, comm_type: CommType) -> Result<()> {
    session
        .sql
        .transaction(|tx| set_trust_inner(tx, user_id, fpr, comm_type))
}

pub(crate) fn set_trust_inner(
    conn: &Connection,
    user_id: &str,
    fpr: &str,
    comm_type: CommType,
) -> Result<()> {
    // Trust rows reference existing person and key rows.
    let person_exists: Option<i64> = conn
        .query_row("SELECT 1 FROM person WHERE id=?;", [user_id], |row| {
            row.get(0)
        })
        .optional()
        .map_err(|_| Status::CannotSetTrust)?;
    if person_exists.is_none() {
        return Err(Status::CannotSetTrust);
    }
    conn.execute(
        "INSERT OR IGNORE INTO pgp_keypair (fpr) VALUES (?);",
        [fpr],
    )
    .map_err(|_| Status::CannotSetTrust)?;
    conn.execute(
        "INSERT INTO trust (user_id, pgp_keypair_fpr, comm_type) VALUES (?1, ?2, ?3)
         ON CONFLICT(user_id, pgp_keypair_fpr) DO UPDATE SET comm_type=excluded.comm_type;",
        rusqlite::params![user_id, fpr, comm_type.value()],
    )
    .map_err(|_| Status::CannotSetTrust)?;
    Ok(())
}

/// Rewrites every trust record for `fpr` to `comm_type`; used to
/// cascade revocation, expiry and compromise marks.
pub fn update_trust_for_fpr(session: &Session, fpr: &str, comm_type: CommType) -> Result<()> {
    session.sql.execute(
        "UPDATE trust SET comm_type=? WHERE pgp_keypair_fpr=?;",
        rusqlite::params![comm_type.value(), fpr],
    )?;
    Ok(())
}

/// The best comm-type any person asserts for this key.
pub(crate) fn best_trust_for_fpr(session: &Session, fpr: &str) -> Result<Option<CommType>> {
    let value: Option<i32> = session.sql.query_get_value(
        "SELECT MAX(comm_type) FROM trust WHERE pgp_keypair_fpr=?;",
        [fpr],
    )?;
    Ok(value.map(CommType::from_value))
}

/// Removes `fpr` as default from all identities and persons carrying
/// it.
pub fn remove_fpr_as_default(session: &Session, fpr: &str) -> Result<()> {
    session.sql.transaction(|tx| {
        tx.execute(
            "UPDATE identity SET main_key_id='' WHERE main_key_id=?;",
            [fpr],
        )?;
        tx.execute(
            "UPDATE person SET main_key_id='' WHERE main_key_id=?;",
            [fpr],
        )?;
        Ok(())
    })
}

// User id aliases.

/// Declares `alias` as an alternate spelling of `default_id`. Later
/// writes referring to the alias are redirected to the canonical id.
pub fn set_userid_alias(session: &Session, alias: &str, default_id: &str) -> Result<()> {
    if alias.is_empty() || default_id.is_empty() {
        return Err(Status::IllegalValue);
    }
    session.sql.execute(
        "INSERT INTO alternate_user_id (alternate_id, default_id) VALUES (?1, ?2)
         ON CONFLICT(alternate_id) DO UPDATE SET default_id=excluded.default_id;",
        [alias, default_id],
    )?;
    Ok(())
}

pub fn get_userid_alias_default(session: &Session, alias: &str) -> Result<Option<String>> {
    session.sql.query_get_value(
        "SELECT default_id FROM alternate_user_id WHERE alternate_id=?;",
        [alias],
    )
}

/// Rewrites a user id everywhere it occurs: person, identities, trust
/// records, social graph and alias targets, in one transaction. Used
/// when a synthesized TOFU user id is reconciled with a real one.
pub fn replace_userid(session: &Session, old_id: &str, new_id: &str) -> Result<()> {
    if old_id.is_empty() || new_id.is_empty() || old_id == new_id {
        return Err(Status::IllegalValue);
    }
    session.sql.transaction(|tx| {
        let clash: Option<i64> = tx
            .query_row("SELECT 1 FROM person WHERE id=?;", [new_id], |row| {
                row.get(0)
            })
            .optional()
            .map_err(|_| Status::CannotSetPerson)?;
        if clash.is_some() {
            return Err(Status::CannotSetPerson);
        }
        tx.execute("UPDATE person SET id=?1 WHERE id=?2;", [new_id, old_id])
            .map_err(|_| Status::CannotSetPerson)?;
        tx.execute(
            "UPDATE identity SET user_id=?1 WHERE user_id=?2;",
            [new_id, old_id],
        )
        .map_err(|_| Status::CannotSetIdentity)?;
        tx.execute(
            "UPDATE trust SET user_id=?1 WHERE user_id=?2;",
            [new_id, old_id],
        )
        .map_err(|_| Status::CannotSetTrust)?;
        tx.execute(
            "UPDATE social_graph SET contact_userid=?1 WHERE contact_userid=?2;",
            [new_id, old_id],
        )?;
        tx.execute(
            "UPDATE alternate_user_id SET default_id=?1 WHERE default_id=?2;",
            [new_id, old_id],
        )?;
        Ok(())
    })
}

// Social graph: which own identity has talked to which contact.

pub fn record_social_graph_edge(
    session: &Session,
    own_user_id: &str,
    own_address: &str,
    contact_user_id: &str,
) -> Result<()> {
    session.sql.execute(
        "INSERT OR IGNORE INTO social_graph (own_userid, own_address, contact_userid)
         VALUES (?1, ?2, ?3);",
        [own_user_id, own_address, contact_user_id],
    )?;
    Ok(())
}

/// User ids of every contact the given own identity has communicated
/// with.
pub fn social_graph_contacts(
    session: &Session,
    own_user_id: &str,
    own_address: &str,
) -> Result<Vec<String>> {
    session.sql.query_map_vec(
        "SELECT contact_userid FROM social_graph
          WHERE own_userid=?1 AND own_address=?2 ORDER BY contact_userid;",
        [own_user_id, own_address],
        |row| row.get(0),
    )
}

/// Identities flags are persisted immediately.
pub fn set_identity_flags(session: &Session, ident: &mut Identity, flags: u32) -> Result<()> {
    ident.flags.set(flags);
    session.sql.execute(
        "UPDATE identity SET flags=?1 WHERE address=?2 COLLATE NOCASE AND user_id=?3;",
        rusqlite::params![i64::from(ident.flags.0), ident.address, ident.user_id],
    )?;
    Ok(())
}

pub fn unset_identity_flags(session: &Session, ident: &mut Identity, flags: u32) -> Result<()> {
    ident.flags.unset(flags);
    session.sql.execute(
        "UPDATE identity SET flags=?1 WHERE address=?2 COLLATE NOCASE AND user_id=?3;",
        rusqlite::params![i64::from(ident.flags.0), ident.address, ident.user_id],
    )?;
    Ok(())
}

/// Bumps the stored peer-protocol version of every identity of this
/// person, never downgrading.
pub fn set_pep_version(
    session: &Session,
    user_id: &str,
    major: u32,
    minor: u32,
) -> Result<()> {
    session.sql.execute(
        "UPDATE identity SET pep_version_major=?1, pep_version_minor=?2
          WHERE user_id=?3
            AND (pep_version_major < ?1
                 OR (pep_version_major = ?1 AND pep_version_minor < ?2));",
        rusqlite::params![major, minor, user_id],
    )?;
    Ok(())
}
