//! Storage adapter over an embedded SQLite database.
//!
//! # Layout
//!
//! ```text
//! <namespace>                      one table, the root namespace
//! ├── (session_id, "values")       serialized payload
//! └── (session_id, "expired_at")   decimal Unix seconds, ASCII
//! ```
//!
//! Every row sharing a `session_id` forms that session's child namespace.
//! Each public operation runs in exactly one transaction. The database runs
//! in WAL mode, so readers see a snapshot and never block the single writer;
//! writers take the lock up front (`BEGIN IMMEDIATE`) and wait at most the
//! configured timeout for it.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use r2d2_sqlite::rusqlite::types::ValueRef;
use r2d2_sqlite::rusqlite::{TransactionBehavior, params};
use tracing::{debug, info, trace};

use crate::config::{ConfigError, is_valid_namespace};
use crate::error::{Result, SessionError};

/// Entry holding the serialized payload.
pub const ENTRY_VALUES: &str = "values";

/// Entry holding the absolute expiry instant.
pub const ENTRY_EXPIRED_AT: &str = "expired_at";

/// Handle to the session database. Cheap to clone; clones share the pool.
#[derive(Clone)]
pub struct SessionDb {
    pool: Pool<SqliteConnectionManager>,
    namespace: String,
}

impl std::fmt::Debug for SessionDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionDb")
            .field("namespace", &self.namespace)
            .field("connections", &self.pool.state().connections)
            .finish_non_exhaustive()
    }
}

impl SessionDb {
    /// Open or create the database at `path` and ensure the root namespace
    /// exists.
    ///
    /// `timeout` bounds both waiting for a pooled connection and waiting for
    /// the write lock held by another transaction or process.
    pub fn open(path: impl AsRef<Path>, namespace: &str, timeout: Duration) -> Result<Self> {
        let path = path.as_ref();

        if !is_valid_namespace(namespace) {
            return Err(ConfigError::InvalidNamespace(namespace.to_string()).into());
        }

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let manager = SqliteConnectionManager::file(path).with_init(move |conn| {
            conn.busy_timeout(timeout)?;
            conn.execute_batch("PRAGMA journal_mode=WAL;")
        });
        let pool = Pool::builder().connection_timeout(timeout).build(manager)?;

        let db = Self {
            pool,
            namespace: namespace.to_string(),
        };
        db.create_namespace()?;

        info!(path = ?path, namespace = %namespace, "Session database opened");
        Ok(db)
    }

    /// Name of the root namespace.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    fn invalid_session(&self, id: &str) -> SessionError {
        SessionError::InvalidSession {
            namespace: self.namespace.clone(),
            id: id.to_string(),
        }
    }

    fn create_namespace(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS \"{}\" (
                session_id TEXT NOT NULL,
                entry TEXT NOT NULL,
                value BLOB NOT NULL,
                PRIMARY KEY (session_id, entry)
            ) WITHOUT ROWID;",
            self.namespace
        ))?;
        Ok(())
    }

    /// Write both entries of a session, creating its namespace if needed.
    pub fn put(&self, id: &str, payload: &[u8], expires_at: DateTime<Utc>) -> Result<()> {
        let expires_at = expires_at.timestamp().to_string().into_bytes();

        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        {
            let mut stmt = tx.prepare_cached(&format!(
                "INSERT INTO \"{}\" (session_id, entry, value) VALUES (?1, ?2, ?3)
                 ON CONFLICT (session_id, entry) DO UPDATE SET value = excluded.value",
                self.namespace
            ))?;
            stmt.execute(params![id, ENTRY_VALUES, payload])?;
            stmt.execute(params![id, ENTRY_EXPIRED_AT, expires_at])?;
        }
        tx.commit()?;

        debug!(session_id = %id, bytes = payload.len(), "Session record written");
        Ok(())
    }

    /// Read a session's payload.
    ///
    /// Fails with [`SessionError::InvalidSession`] when the session has no
    /// namespace at all; returns `Ok(None)` when the namespace exists but has
    /// no `values` entry.
    pub fn get(&self, id: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut found = false;
        let mut payload = None;
        {
            let mut stmt = tx.prepare_cached(&format!(
                "SELECT entry, value FROM \"{}\" WHERE session_id = ?1",
                self.namespace
            ))?;
            let mut rows = stmt.query(params![id])?;
            while let Some(row) = rows.next()? {
                found = true;
                let entry: String = row.get(0)?;
                if entry == ENTRY_VALUES {
                    payload = Some(row.get::<_, Vec<u8>>(1)?);
                }
            }
        }
        tx.commit()?;

        if !found {
            return Err(self.invalid_session(id));
        }
        trace!(session_id = %id, has_values = payload.is_some(), "Session record read");
        Ok(payload)
    }

    /// Remove a session's namespace. Fails with
    /// [`SessionError::InvalidSession`] when it does not exist.
    pub fn delete(&self, id: &str) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let removed = tx.execute(
            &format!("DELETE FROM \"{}\" WHERE session_id = ?1", self.namespace),
            params![id],
        )?;
        if removed == 0 {
            return Err(self.invalid_session(id));
        }
        tx.commit()?;

        debug!(session_id = %id, "Session record deleted");
        Ok(())
    }

    /// Scan every session and return the ids whose expiry is missing,
    /// unparsable, or at or before `now`.
    pub fn expired_ids(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let now = now.timestamp();

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut expired = Vec::new();
        {
            let mut stmt = tx.prepare(&format!(
                "SELECT s.session_id, e.value
                 FROM (SELECT DISTINCT session_id FROM \"{ns}\") AS s
                 LEFT JOIN \"{ns}\" AS e
                   ON e.session_id = s.session_id AND e.entry = ?1
                 ORDER BY s.session_id",
                ns = self.namespace
            ))?;
            let mut rows = stmt.query(params![ENTRY_EXPIRED_AT])?;
            while let Some(row) = rows.next()? {
                let id: String = row.get(0)?;
                let expired_at = parse_expiry(row.get_ref(1)?);
                if is_expired(expired_at, now) {
                    trace!(session_id = %id, ?expired_at, "Session expired");
                    expired.push(id);
                }
            }
        }
        tx.commit()?;
        Ok(expired)
    }

    /// Delete a known set of sessions in one transaction.
    ///
    /// Ids that no longer exist are skipped. Any engine failure rolls back the
    /// whole batch. Returns the number of sessions removed.
    pub fn delete_all(&self, ids: &[String]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut deleted = 0;
        {
            let mut stmt = tx.prepare_cached(&format!(
                "DELETE FROM \"{}\" WHERE session_id = ?1",
                self.namespace
            ))?;
            for id in ids {
                if stmt.execute(params![id])? > 0 {
                    deleted += 1;
                }
            }
        }
        tx.commit()?;
        Ok(deleted)
    }

    /// Number of sessions currently stored.
    pub fn session_count(&self) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            &format!(
                "SELECT COUNT(DISTINCT session_id) FROM \"{}\"",
                self.namespace
            ),
            [],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Whether a session namespace exists.
    pub fn contains(&self, id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let exists: bool = conn.query_row(
            &format!(
                "SELECT EXISTS (SELECT 1 FROM \"{}\" WHERE session_id = ?1)",
                self.namespace
            ),
            params![id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// Write a single raw entry. Lets tests build records the store itself
    /// would never produce.
    #[cfg(test)]
    pub(crate) fn put_entry(&self, id: &str, entry: &str, value: &[u8]) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO \"{}\" (session_id, entry, value) VALUES (?1, ?2, ?3)",
                self.namespace
            ),
            params![id, entry, value],
        )?;
        Ok(())
    }
}

/// Read an `expired_at` value as Unix seconds.
fn parse_expiry(value: ValueRef<'_>) -> Option<i64> {
    match value {
        ValueRef::Blob(bytes) | ValueRef::Text(bytes) => {
            std::str::from_utf8(bytes).ok()?.parse().ok()
        }
        ValueRef::Integer(secs) => Some(secs),
        _ => None,
    }
}

/// A missing or unparsable expiry counts as expired.
pub fn is_expired(expired_at: Option<i64>, now: i64) -> bool {
    match expired_at {
        Some(at) => at <= now,
        None => true,
    }
}
