//! SQLite wrapper: one connection per session, WAL journal, versioned
//! schema with idempotent upgrades.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension, Transaction};

use crate::context::Session;
use crate::error::{Result, Status};

/// Current schema version. Opening a database written by a newer
/// engine refuses with [`Status::DbDowngradeViolation`].
const DBVERSION: i32 = 2;

/// Lock timeout on store contention.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// A wrapper around the underlying SQLite connection.
#[derive(Debug, Default)]
pub struct Sql {
    conn: Mutex<Option<Connection>>,
}

impl Sql {
    pub fn new() -> Sql {
        Sql {
            conn: Mutex::new(None),
        }
    }

    pub fn is_open(&self) -> bool {
        self.conn.lock().unwrap().is_some()
    }

    /// Opens the database, configures the connection and runs the
    /// migration ladder.
    pub fn open(&self, session: &Session, dbfile: &Path) -> Result<()> {
        let mut guard = self.conn.lock().unwrap();
        if guard.is_some() {
            error!(session, "Cannot open, database already opened.");
            return Err(Status::IllegalValue);
        }
        let conn = Connection::open(dbfile).map_err(|_| Status::UnknownDbError)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        // The journal_mode pragma returns a result row, hence query_row.
        conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))?;
        conn.execute_batch("PRAGMA secure_delete=ON; PRAGMA foreign_keys=ON;")?;

        migrate(session, &conn)?;

        *guard = Some(conn);
        Ok(())
    }

    /// Closes the connection, releasing all cached prepared statements.
    pub fn release(&self) {
        *self.conn.lock().unwrap() = None;
    }

    pub fn execute<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<usize> {
        self.with_conn(|conn| Ok(conn.execute(sql, params)?))
    }

    pub fn query_row<T, P, F>(&self, sql: &str, params: P, f: F) -> Result<T>
    where
        P: rusqlite::Params,
        F: FnOnce(&rusqlite::Row) -> rusqlite::Result<T>,
    {
        self.with_conn(|conn| Ok(conn.query_row(sql, params, f)?))
    }

    /// Single value of the first row, or `None` for an empty result.
    pub fn query_get_value<T, P>(&self, sql: &str, params: P) -> Result<Option<T>>
    where
        T: rusqlite::types::FromSql,
        P: rusqlite::Params,
    {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(sql, params, |row| row.get::<_, T>(0))
                .optional()?)
        })
    }

    /// Collects mapped rows into a `Vec`.
    pub fn query_map_vec<T, P, F>(&self, sql: &str, params: P, f: F) -> Result<Vec<T>>
    where
        P: rusqlite::Params,
        F: FnMut(&rusqlite::Row) -> rusqlite::Result<T>,
    {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(sql)?;
            let rows = stmt.query_map(params, f)?;
            let mut res = Vec::new();
            for row in rows {
                res.push(row?);
            }
            Ok(res)
        })
    }

    pub fn exists<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<bool> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(sql, params, |_| Ok(()))
                .optional()?
                .is_some())
        })
    }

    /// Runs `f` inside a transaction; rolled back when `f` fails,
    /// committed otherwise. Multi-row writes (identity = person +
    /// identity + trust, user merges, version upgrades over aliases)
    /// go through here.
    pub fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction) -> Result<T>,
    {
        let mut guard = self.conn.lock().unwrap();
        let conn = guard.as_mut().ok_or(Status::UnknownDbError)?;
        let tx = conn
            .transaction()
            .map_err(|_| Status::UnknownDbError)?;
        let res = f(&tx)?;
        tx.commit().map_err(|_| Status::CommitFailed)?;
        Ok(res)
    }

    fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let guard = self.conn.lock().unwrap();
        let conn = guard.as_ref().ok_or(Status::UnknownDbError)?;
        f(conn)
    }

    // Raw key/value config access; the typed layer is in config.rs.

    pub fn get_raw_config(&self, key: &str) -> Result<Option<String>> {
        self.query_get_value("SELECT value FROM config WHERE keyname=?;", [key])
    }

    pub fn set_raw_config(&self, key: &str, value: Option<&str>) -> Result<()> {
        match value {
            Some(value) => {
                self.execute(
                    "INSERT INTO config (keyname, value) VALUES (?, ?)
                     ON CONFLICT(keyname) DO UPDATE SET value=excluded.value;",
                    [key, value],
                )?;
            }
            None => {
                self.execute("DELETE FROM config WHERE keyname=?;", [key])?;
            }
        }
        Ok(())
    }

    pub fn get_raw_config_int(&self, key: &str) -> Result<Option<i32>> {
        Ok(self
            .get_raw_config(key)?
            .and_then(|s| s.parse::<i32>().ok()))
    }

    pub fn set_raw_config_int(&self, key: &str, value: i32) -> Result<()> {
        self.set_raw_config(key, Some(&value.to_string()))
    }
}

fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    Ok(conn
        .query_row(
            "SELECT name FROM sqlite_master WHERE type='table' AND name=?;",
            [name],
            |_| Ok(()),
        )
        .optional()?
        .is_some())
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({table});"))
        .map_err(Status::from)?;
    let mut rows = stmt.query([]).map_err(Status::from)?;
    while let Some(row) = rows.next().map_err(Status::from)? {
        let name: String = row.get(1).map_err(Status::from)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

fn get_dbversion(conn: &Connection) -> Result<i32> {
    let version: Option<String> = conn
        .query_row(
            "SELECT value FROM config WHERE keyname='dbversion';",
            [],
            |row| row.get(0),
        )
        .optional()?;
    Ok(version.and_then(|v| v.parse().ok()).unwrap_or(0))
}

fn set_dbversion(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT INTO config (keyname, value) VALUES ('dbversion', ?)
         ON CONFLICT(keyname) DO UPDATE SET value=excluded.value;",
        [version.to_string()],
    )?;
    Ok(())
}

/// Creates or upgrades the schema. Every step is idempotent: a step
/// interrupted between DDL and the version bump is detected by
/// table/column presence and not repeated.
fn migrate(session: &Session, conn: &Connection) -> Result<()> {
    if !table_exists(conn, "config")? {
        info!(session, "First time init: creating tables.");
        conn.execute_batch(
            "CREATE TABLE config (keyname TEXT PRIMARY KEY, value TEXT);",
        )?;
    }

    let dbversion = get_dbversion(conn)?;
    if dbversion > DBVERSION {
        error!(
            session,
            "Database version {} is newer than this engine ({}).", dbversion, DBVERSION
        );
        return Err(Status::DbDowngradeViolation);
    }

    if dbversion < 1 {
        if !table_exists(conn, "person")? {
            conn.execute_batch(
                r#"
CREATE TABLE person (
    id TEXT PRIMARY KEY,
    username TEXT DEFAULT '',
    main_key_id TEXT DEFAULT '',
    lang TEXT DEFAULT '',
    is_pep_user INTEGER DEFAULT 0
);
CREATE TABLE pgp_keypair (
    fpr TEXT PRIMARY KEY,
    created INTEGER DEFAULT 0,
    expires INTEGER DEFAULT 0,
    flags INTEGER DEFAULT 0
);
CREATE TABLE identity (
    address TEXT,
    user_id TEXT,
    main_key_id TEXT DEFAULT '',
    flags INTEGER DEFAULT 0,
    is_own INTEGER DEFAULT 0,
    pep_version_major INTEGER DEFAULT 0,
    pep_version_minor INTEGER DEFAULT 0,
    timestamp INTEGER DEFAULT 0,
    PRIMARY KEY (address, user_id)
);
CREATE INDEX identity_index1 ON identity (address COLLATE NOCASE);
CREATE TABLE trust (
    user_id TEXT,
    pgp_keypair_fpr TEXT,
    comm_type INTEGER DEFAULT 0,
    PRIMARY KEY (user_id, pgp_keypair_fpr)
);
CREATE TABLE alternate_user_id (
    alternate_id TEXT PRIMARY KEY,
    default_id TEXT
);
CREATE TABLE mistrusted_keys (fpr TEXT PRIMARY KEY);
CREATE TABLE blacklist_keys (fpr TEXT PRIMARY KEY);
CREATE TABLE revoked_keys (
    revoked_fpr TEXT PRIMARY KEY,
    replacement_fpr TEXT DEFAULT '',
    revocation_date INTEGER DEFAULT 0
);
CREATE TABLE revocation_contact_list (
    fpr TEXT,
    own_address TEXT,
    contact_id TEXT,
    timestamp INTEGER DEFAULT 0,
    PRIMARY KEY (fpr, own_address, contact_id)
);
CREATE TABLE social_graph (
    own_userid TEXT,
    own_address TEXT,
    contact_userid TEXT,
    PRIMARY KEY (own_userid, own_address, contact_userid)
);
"#,
            )?;
        }
        set_dbversion(conn, 1)?;
    }

    if dbversion < 2 {
        // Echo protocol support: per-identity challenge blob.
        if !column_exists(conn, "identity", "echo_challenge")? {
            conn.execute_batch("ALTER TABLE identity ADD COLUMN echo_challenge BLOB;")?;
        }
        set_dbversion(conn, 2)?;
    }

    Ok(())
}
