//! Read-only lookup store for historical rename and link mappings.
//!
//! Backed by SQLite. The reference deployment supports a single live
//! connection, so the connection sits behind a `Mutex` and every query
//! serializes through it. Version values are stored as dotted strings and
//! compared in Rust ([`Version`] ordering is not expressible in SQL).

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::errors::LookupError;
use crate::version::Version;

/// A single rename row: `old_path` became `new_path` at `effective_version`.
#[derive(Debug, Clone)]
pub struct RenameRow {
    pub old_path: String,
    pub new_path: String,
    pub effective_version: Version,
}

/// A single link row: `path_a` and `path_b` coexist as aliases from
/// `effective_version` onward.
#[derive(Debug, Clone)]
pub struct LinkRow {
    pub path_a: String,
    pub path_b: String,
    pub effective_version: Version,
}

/// Handle on the rename/link lookup store.
pub struct LookupStore {
    conn: Mutex<Connection>,
}

impl LookupStore {
    /// Open the store at `path`. Fails if the file cannot be opened; callers
    /// treat the store as optional and degrade to identity resolution.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, LookupError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(LookupError::Unavailable {
                path: path.display().to_string(),
                detail: "file does not exist".into(),
            });
        }
        let conn = Connection::open(path).map_err(LookupError::SqliteError)?;
        info!(path = %path.display(), "opened lookup store");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory store and create the schema (for tests and local
    /// experimentation).
    pub fn in_memory() -> Result<Self, LookupError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS RENAME_MAPPING (
                 OLD_NAME   TEXT NOT NULL,
                 NEW_NAME   TEXT NOT NULL,
                 VERSION    TEXT NOT NULL,
                 REPOSITORY TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS LINK_MAPPING (
                 NAME1      TEXT NOT NULL,
                 NAME2      TEXT NOT NULL,
                 VERSION    TEXT NOT NULL,
                 REPOSITORY TEXT NOT NULL
             );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| {
            warn!("lookup store mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// All rename rows whose OLD_NAME equals `path` for `repository`.
    ///
    /// Rows with unparsable VERSION values are skipped with a warning; the
    /// table is append-only and occasionally hand-edited.
    pub fn renames_from(&self, repository: &str, path: &str) -> Result<Vec<RenameRow>, LookupError> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT OLD_NAME, NEW_NAME, VERSION FROM RENAME_MAPPING
             WHERE OLD_NAME = ?1 AND REPOSITORY = ?2",
        )?;
        let mut rows = Vec::new();
        let mapped = stmt.query_map(rusqlite::params![path, repository], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        for result in mapped {
            let (old_path, new_path, version) = result?;
            match Version::parse(&version) {
                Ok(effective_version) => rows.push(RenameRow {
                    old_path,
                    new_path,
                    effective_version,
                }),
                Err(e) => {
                    warn!(%version, error = %e, "skipping rename row with bad version");
                }
            }
        }
        debug!(path, count = rows.len(), "queried rename rows");
        Ok(rows)
    }

    /// All link rows where either side equals `path` for `repository`.
    pub fn links_at(&self, repository: &str, path: &str) -> Result<Vec<LinkRow>, LookupError> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT NAME1, NAME2, VERSION FROM LINK_MAPPING
             WHERE (NAME1 = ?1 OR NAME2 = ?1) AND REPOSITORY = ?2",
        )?;
        let mut rows = Vec::new();
        let mapped = stmt.query_map(rusqlite::params![path, repository], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        for result in mapped {
            let (path_a, path_b, version) = result?;
            match Version::parse(&version) {
                Ok(effective_version) => rows.push(LinkRow {
                    path_a,
                    path_b,
                    effective_version,
                }),
                Err(e) => {
                    warn!(%version, error = %e, "skipping link row with bad version");
                }
            }
        }
        debug!(path, count = rows.len(), "queried link rows");
        Ok(rows)
    }

    /// Insert a rename row (test/setup helper; the table is append-only).
    pub fn insert_rename(
        &self,
        repository: &str,
        old_path: &str,
        new_path: &str,
        version: &Version,
    ) -> Result<(), LookupError> {
        self.conn().execute(
            "INSERT INTO RENAME_MAPPING (OLD_NAME, NEW_NAME, VERSION, REPOSITORY)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![old_path, new_path, version.to_string(), repository],
        )?;
        Ok(())
    }

    /// Insert a link row (test/setup helper).
    pub fn insert_link(
        &self,
        repository: &str,
        path_a: &str,
        path_b: &str,
        version: &Version,
    ) -> Result<(), LookupError> {
        self.conn().execute(
            "INSERT INTO LINK_MAPPING (NAME1, NAME2, VERSION, REPOSITORY)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![path_a, path_b, version.to_string(), repository],
        )?;
        Ok(())
    }
}
