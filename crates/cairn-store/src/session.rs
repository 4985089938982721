//! Session handle over the relational backend.
//!
//! A [`Session`] wraps an already-open SQLite connection scoped to one
//! database file, carries the access mode and store configuration, and
//! bootstraps the relational layout on open. All store operations are
//! defined on `Session` in the sibling modules.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use rusqlite::Connection;
use tracing::debug;

use cairn_core::error::{CairnError, CairnResult};
use cairn_core::StoreConfig;

/// Access mode of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Reads only; mutating operations fail with `ReadOnly`.
    ReadOnly,
    /// Full read-write access.
    Update,
}

/// A transactional handle to the relational backend.
pub struct Session {
    conn: Mutex<Connection>,
    mode: AccessMode,
    config: StoreConfig,
}

impl Session {
    /// Open (or create) a store at the given path.
    pub fn open(
        path: impl AsRef<Path>,
        mode: AccessMode,
        config: StoreConfig,
    ) -> CairnResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path.as_ref())?;
        debug!(path = %path.as_ref().display(), ?mode, "Opening store session");
        Self::from_connection(conn, mode, config)
    }

    /// Open an in-memory store with full access (for tests and demos).
    pub fn in_memory(config: StoreConfig) -> CairnResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, AccessMode::Update, config)
    }

    fn from_connection(
        conn: Connection,
        mode: AccessMode,
        config: StoreConfig,
    ) -> CairnResult<Self> {
        Self::init_connection(&conn, &config)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            mode,
            config,
        })
    }

    fn init_connection(conn: &Connection, config: &StoreConfig) -> CairnResult<()> {
        conn.execute_batch(&format!(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = {};
             PRAGMA foreign_keys = ON;
             PRAGMA synchronous = NORMAL;",
            config.busy_timeout_ms,
        ))?;
        Ok(())
    }

    fn init_schema(conn: &Connection) -> CairnResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS schema_versions (
                schema      TEXT NOT NULL,
                version     INTEGER NOT NULL,
                description TEXT NOT NULL,
                release     TEXT,
                created_by  TEXT NOT NULL,
                created_at  TEXT NOT NULL,
                PRIMARY KEY (schema, version)
            );

            CREATE TABLE IF NOT EXISTS data_versions (
                schema         TEXT NOT NULL,
                version        INTEGER NOT NULL,
                schema_version INTEGER NOT NULL,
                description    TEXT NOT NULL,
                base_version   INTEGER,
                created_by     TEXT NOT NULL,
                created_at     TEXT NOT NULL,
                object_rows    INTEGER NOT NULL,
                relation_rows  INTEGER NOT NULL,
                value_rows     INTEGER NOT NULL,
                PRIMARY KEY (schema, version)
            );

            CREATE TABLE IF NOT EXISTS tags (
                schema         TEXT NOT NULL,
                tag            TEXT NOT NULL,
                schema_version INTEGER NOT NULL,
                data_version   INTEGER NOT NULL,
                created_by     TEXT NOT NULL,
                created_at     TEXT NOT NULL,
                PRIMARY KEY (schema, tag)
            );

            -- Append-only provenance log, no uniqueness constraint.
            CREATE TABLE IF NOT EXISTS archive (
                schema         TEXT NOT NULL,
                schema_version INTEGER NOT NULL,
                data_version   INTEGER NOT NULL,
                partition      TEXT NOT NULL,
                run            INTEGER NOT NULL,
                created_by     TEXT NOT NULL,
                created_at     TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS classes (
                schema       TEXT NOT NULL,
                version      INTEGER NOT NULL,
                name         TEXT NOT NULL,
                description  TEXT NOT NULL,
                is_abstract  INTEGER NOT NULL,
                superclasses TEXT NOT NULL,
                PRIMARY KEY (schema, version, name)
            );

            CREATE TABLE IF NOT EXISTS attributes (
                schema      TEXT NOT NULL,
                version     INTEGER NOT NULL,
                class       TEXT NOT NULL,
                position    INTEGER NOT NULL,
                name        TEXT NOT NULL,
                attr_type   TEXT NOT NULL,
                range       TEXT,
                init_value  TEXT,
                is_multi    INTEGER NOT NULL,
                is_nullable INTEGER NOT NULL,
                description TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS relationships (
                schema       TEXT NOT NULL,
                version      INTEGER NOT NULL,
                class        TEXT NOT NULL,
                position     INTEGER NOT NULL,
                name         TEXT NOT NULL,
                class_type   TEXT NOT NULL,
                low_cc       TEXT NOT NULL,
                high_cc      TEXT NOT NULL,
                is_composite INTEGER NOT NULL,
                is_exclusive INTEGER NOT NULL,
                is_dependent INTEGER NOT NULL,
                description  TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS methods (
                schema      TEXT NOT NULL,
                version     INTEGER NOT NULL,
                class       TEXT NOT NULL,
                position    INTEGER NOT NULL,
                name        TEXT NOT NULL,
                description TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS method_impls (
                schema    TEXT NOT NULL,
                version   INTEGER NOT NULL,
                class     TEXT NOT NULL,
                method    TEXT NOT NULL,
                position  INTEGER NOT NULL,
                language  TEXT NOT NULL,
                prototype TEXT NOT NULL,
                body      TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS object_rows (
                schema       TEXT NOT NULL,
                data_version INTEGER NOT NULL,
                class        TEXT NOT NULL,
                object_id    TEXT NOT NULL,
                op           TEXT NOT NULL
            );

            -- Tombstone rows carry NULL content.
            CREATE TABLE IF NOT EXISTS relation_rows (
                schema       TEXT NOT NULL,
                data_version INTEGER NOT NULL,
                class        TEXT NOT NULL,
                object_id    TEXT NOT NULL,
                name         TEXT NOT NULL,
                ordinal      INTEGER NOT NULL,
                target_class TEXT,
                target_id    TEXT,
                op           TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS value_rows (
                schema       TEXT NOT NULL,
                data_version INTEGER NOT NULL,
                class        TEXT NOT NULL,
                object_id    TEXT NOT NULL,
                name         TEXT NOT NULL,
                ordinal      INTEGER NOT NULL,
                value        TEXT,
                op           TEXT NOT NULL
            );

            -- Indexes for directory scans and chain reconstruction
            CREATE INDEX IF NOT EXISTS idx_data_versions_schema_version
                ON data_versions(schema, schema_version, version DESC);

            CREATE INDEX IF NOT EXISTS idx_object_rows_version
                ON object_rows(schema, data_version);

            CREATE INDEX IF NOT EXISTS idx_relation_rows_version
                ON relation_rows(schema, data_version);

            CREATE INDEX IF NOT EXISTS idx_value_rows_version
                ON value_rows(schema, data_version);

            CREATE INDEX IF NOT EXISTS idx_schema_rows_version
                ON attributes(schema, version, class, position);
        "#,
        )?;
        Ok(())
    }

    /// The session's access mode.
    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    /// The session's store configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }

    /// Fail with `ReadOnly` before any mutating statement is issued.
    pub(crate) fn ensure_writable(&self, operation: &str) -> CairnResult<()> {
        match self.mode {
            AccessMode::Update => Ok(()),
            AccessMode::ReadOnly => Err(CairnError::read_only(operation)),
        }
    }

    /// Author recorded on new rows.
    pub(crate) fn created_by(&self) -> String {
        self.config.effective_user()
    }

    /// Timestamp recorded on new rows.
    pub(crate) fn now(&self) -> String {
        Utc::now().to_rfc3339()
    }
}

/// Whether a backend error is a `(schema, version)` or `(schema, tag)`
/// uniqueness violation, i.e. a lost allocation race.
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_bootstrap_is_idempotent() {
        let session = Session::in_memory(StoreConfig::default()).unwrap();
        // Re-running the DDL against the same connection must be a no-op.
        let conn = session.lock();
        Session::init_schema(&conn).unwrap();
    }

    #[test]
    fn test_open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.db");
        let session =
            Session::open(&path, AccessMode::Update, StoreConfig::default()).unwrap();
        assert_eq!(session.mode(), AccessMode::Update);
        assert!(path.exists());
    }

    #[test]
    fn test_read_only_guard() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        // Bootstrap the file first, then reopen read-only.
        drop(Session::open(&path, AccessMode::Update, StoreConfig::default()).unwrap());

        let session =
            Session::open(&path, AccessMode::ReadOnly, StoreConfig::default()).unwrap();
        let err = session.ensure_writable("put_data").unwrap_err();
        assert!(err.to_string().contains("read-only"));
    }
}
