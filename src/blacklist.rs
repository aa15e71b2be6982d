//! User-driven blacklist of peer keys.
//!
//! A blacklisted fingerprint is never elected for a peer. The list is
//! never consulted for own identities.

use crate::context::Session;
use crate::error::{Result, Status};
use crate::tools::normalize_fingerprint;

pub fn blacklist_add(session: &Session, fpr: &str) -> Result<()> {
    let fpr = normalize_fingerprint(fpr);
    if fpr.is_empty() {
        return Err(Status::IllegalValue);
    }
    session.sql.execute(
        "INSERT OR IGNORE INTO blacklist_keys (fpr) VALUES (?);",
        [&fpr],
    )?;
    // A blacklisted key must stop being anybody's default right away.
    crate::identity::remove_fpr_as_default(session, &fpr)?;
    Ok(())
}

pub fn blacklist_delete(session: &Session, fpr: &str) -> Result<()> {
    let fpr = normalize_fingerprint(fpr);
    if fpr.is_empty() {
        return Err(Status::IllegalValue);
    }
    session
        .sql
        .execute("DELETE FROM blacklist_keys WHERE fpr=?;", [&fpr])?;
    Ok(())
}

pub fn blacklist_is_listed(session: &Session, fpr: &str) -> Result<bool> {
    let fpr = normalize_fingerprint(fpr);
    session
        .sql
        .exists("SELECT fpr FROM blacklist_keys WHERE fpr=?;", [&fpr])
}

pub fn blacklist_retrieve(session: &Session) -> Result<Vec<String>> {
    session
        .sql
        .query_map_vec("SELECT fpr FROM blacklist_keys ORDER BY fpr;", [], |row| {
            row.get(0)
        })
}
