//! Version directory: the per-schema catalog of schema and data versions.
//!
//! All operations here are read-only and observe a consistent snapshot of
//! the directory tables. Version numbers are allocated by the writers in
//! `schema` and `engine` against [`Session::max_schema_version`] and
//! [`Session::max_data_version`], which ignore release scoping so new
//! numbers never collide with any release's view.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use cairn_core::error::{CairnError, CairnResult};

use crate::session::Session;

/// Directory entry for one schema version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaVersionRecord {
    pub schema: String,
    pub version: i64,
    pub description: String,
    /// Release label the version was created under; `None` means unscoped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

/// Directory entry for one data version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataVersionRecord {
    pub schema: String,
    pub version: i64,
    /// Schema version the data was written against.
    pub schema_version: i64,
    pub description: String,
    /// Base version this version's rows overlay; `None` means full.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_version: Option<i64>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    /// Own stored row counts, per row kind.
    pub object_rows: i64,
    pub relation_rows: i64,
    pub value_rows: i64,
}

impl DataVersionRecord {
    /// Whether this version's row set is self-contained.
    pub fn is_full(&self) -> bool {
        self.base_version.is_none()
    }
}

pub(crate) fn parse_timestamp(raw: &str) -> CairnResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| CairnError::corrupt(format!("bad timestamp '{raw}': {e}")))
}

fn row_to_schema_record(row: &rusqlite::Row<'_>) -> CairnResult<SchemaVersionRecord> {
    let created_at: String = row.get(5)?;
    Ok(SchemaVersionRecord {
        schema: row.get(0)?,
        version: row.get(1)?,
        description: row.get(2)?,
        release: row.get(3)?,
        created_by: row.get(4)?,
        created_at: parse_timestamp(&created_at)?,
    })
}

fn row_to_data_record(row: &rusqlite::Row<'_>) -> CairnResult<DataVersionRecord> {
    let created_at: String = row.get(6)?;
    Ok(DataVersionRecord {
        schema: row.get(0)?,
        version: row.get(1)?,
        schema_version: row.get(2)?,
        description: row.get(3)?,
        base_version: row.get(4)?,
        created_by: row.get(5)?,
        created_at: parse_timestamp(&created_at)?,
        object_rows: row.get(7)?,
        relation_rows: row.get(8)?,
        value_rows: row.get(9)?,
    })
}

impl Session {
    /// Maximum schema version visible to `release` (explicit release, else
    /// the configured release, else unfiltered). Fails with `NotFound` when
    /// no version is visible.
    pub fn head_schema_version(
        &self,
        schema: &str,
        release: Option<&str>,
    ) -> CairnResult<i64> {
        let release = release.or(self.config().release.as_deref());
        let conn = self.lock();
        let max: Option<i64> = conn.query_row(
            "SELECT MAX(version) FROM schema_versions
             WHERE schema = ?1 AND (?2 IS NULL OR release = ?2)",
            params![schema, release],
            |row| row.get(0),
        )?;
        max.ok_or_else(|| CairnError::no_versions(schema))
    }

    /// Unscoped maximum schema version, used to allocate the next number.
    /// Returns 0 when the schema has no versions yet.
    pub fn max_schema_version(&self, schema: &str) -> CairnResult<i64> {
        let conn = self.lock();
        let max: Option<i64> = conn.query_row(
            "SELECT MAX(version) FROM schema_versions WHERE schema = ?1",
            params![schema],
            |row| row.get(0),
        )?;
        Ok(max.unwrap_or(0))
    }

    /// All schema versions visible to `release`, in descending order.
    pub fn list_schema_versions(
        &self,
        schema: &str,
        release: Option<&str>,
    ) -> CairnResult<Vec<i64>> {
        let release = release.or(self.config().release.as_deref());
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT version FROM schema_versions
             WHERE schema = ?1 AND (?2 IS NULL OR release = ?2)
             ORDER BY version DESC",
        )?;
        let versions = stmt
            .query_map(params![schema, release], |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(versions)
    }

    /// Resolve a tag to its `(schema_version, data_version)` pair. An empty
    /// tag bypasses the lookup and returns the head schema version paired
    /// with the head data version under it.
    pub fn resolve_tag(&self, schema: &str, tag: &str) -> CairnResult<(i64, i64)> {
        if tag.is_empty() {
            let schema_version = self.head_schema_version(schema, None)?;
            let data_version = self
                .head_data_version(schema, schema_version)?
                .ok_or_else(|| CairnError::no_versions(schema))?;
            return Ok((schema_version, data_version));
        }
        let conn = self.lock();
        conn.query_row(
            "SELECT schema_version, data_version FROM tags
             WHERE schema = ?1 AND tag = ?2",
            params![schema, tag],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?
        .ok_or_else(|| CairnError::unknown_tag(schema, tag))
    }

    /// Unscoped maximum data version, used to allocate the next number.
    /// Returns 0 when the schema has no data versions yet.
    pub fn max_data_version(&self, schema: &str) -> CairnResult<i64> {
        let conn = self.lock();
        let max: Option<i64> = conn.query_row(
            "SELECT MAX(version) FROM data_versions WHERE schema = ?1",
            params![schema],
            |row| row.get(0),
        )?;
        Ok(max.unwrap_or(0))
    }

    /// Maximum data version recorded against the given schema version, or
    /// `None` when that schema version has no data yet.
    pub fn head_data_version(
        &self,
        schema: &str,
        schema_version: i64,
    ) -> CairnResult<Option<i64>> {
        let conn = self.lock();
        let max: Option<i64> = conn.query_row(
            "SELECT MAX(version) FROM data_versions
             WHERE schema = ?1 AND schema_version = ?2",
            params![schema, schema_version],
            |row| row.get(0),
        )?;
        Ok(max)
    }

    /// Look up one schema version's directory entry.
    pub fn schema_version_record(
        &self,
        schema: &str,
        version: i64,
    ) -> CairnResult<Option<SchemaVersionRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT schema, version, description, release, created_by, created_at
             FROM schema_versions
             WHERE schema = ?1 AND version = ?2",
        )?;
        stmt.query_row(params![schema, version], |row| Ok(row_to_schema_record(row)))
            .optional()?
            .transpose()
    }

    /// Look up one data version's directory entry.
    pub fn data_version_record(
        &self,
        schema: &str,
        version: i64,
    ) -> CairnResult<Option<DataVersionRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT schema, version, schema_version, description, base_version,
                    created_by, created_at, object_rows, relation_rows, value_rows
             FROM data_versions
             WHERE schema = ?1 AND version = ?2",
        )?;
        stmt.query_row(params![schema, version], |row| Ok(row_to_data_record(row)))
            .optional()?
            .transpose()
    }

    /// All data versions of a schema, newest first.
    pub fn list_data_versions(&self, schema: &str) -> CairnResult<Vec<DataVersionRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT schema, version, schema_version, description, base_version,
                    created_by, created_at, object_rows, relation_rows, value_rows
             FROM data_versions
             WHERE schema = ?1
             ORDER BY version DESC",
        )?;
        let results = stmt.query_map(params![schema], |row| Ok(row_to_data_record(row)))?;
        results
            .map(|r| r.map_err(|e| e.into()).and_then(|inner| inner))
            .collect()
    }
}
