//! Tag and archive registry.
//!
//! Tags are immutable aliases from a string to a `(schema_version,
//! data_version)` pair; the archive is an append-only provenance log linking
//! version pairs to operational runs. Neither is ever updated in place.

use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use tracing::info;

use cairn_core::error::{CairnError, CairnResult};

use crate::directory::parse_timestamp;
use crate::session::{is_unique_violation, Session};

/// One tag binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagRecord {
    pub schema: String,
    pub tag: String,
    pub schema_version: i64,
    pub data_version: i64,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

/// One provenance entry: a version pair used by a run of a partition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveRecord {
    pub schema: String,
    pub schema_version: i64,
    pub data_version: i64,
    pub partition: String,
    pub run: i64,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

fn row_to_tag_record(row: &rusqlite::Row<'_>) -> CairnResult<TagRecord> {
    let created_at: String = row.get(5)?;
    Ok(TagRecord {
        schema: row.get(0)?,
        tag: row.get(1)?,
        schema_version: row.get(2)?,
        data_version: row.get(3)?,
        created_by: row.get(4)?,
        created_at: parse_timestamp(&created_at)?,
    })
}

fn row_to_archive_record(row: &rusqlite::Row<'_>) -> CairnResult<ArchiveRecord> {
    let created_at: String = row.get(6)?;
    Ok(ArchiveRecord {
        schema: row.get(0)?,
        schema_version: row.get(1)?,
        data_version: row.get(2)?,
        partition: row.get(3)?,
        run: row.get(4)?,
        created_by: row.get(5)?,
        created_at: parse_timestamp(&created_at)?,
    })
}

impl Session {
    /// Bind a tag to an existing `(schema_version, data_version)` pair.
    /// Fails with `TagConflict` if the tag string is already bound; tags
    /// never move.
    pub fn tag_data(
        &self,
        schema: &str,
        schema_version: i64,
        data_version: i64,
        tag: &str,
    ) -> CairnResult<()> {
        self.ensure_writable("tag_data")?;
        if tag.is_empty() {
            return Err(CairnError::validation("tag must not be empty"));
        }
        self.check_version_pair(schema, schema_version, data_version)?;

        let created_by = self.created_by();
        let created_at = self.now();
        let conn = self.lock();
        conn.execute(
            "INSERT INTO tags
             (schema, tag, schema_version, data_version, created_by, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![schema, tag, schema_version, data_version, created_by, created_at],
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                CairnError::tag_conflict(schema, tag)
            } else {
                e.into()
            }
        })?;
        drop(conn);

        info!(schema, tag, schema_version, data_version, "Tagged data version");
        Ok(())
    }

    /// Append a provenance record for an existing version pair. No
    /// uniqueness constraint: many runs may reference the same pair.
    pub fn create_archive_record(
        &self,
        schema: &str,
        schema_version: i64,
        data_version: i64,
        partition_name: &str,
        run_number: i64,
    ) -> CairnResult<()> {
        self.ensure_writable("create_archive_record")?;
        self.check_version_pair(schema, schema_version, data_version)?;

        let created_by = self.created_by();
        let created_at = self.now();
        let conn = self.lock();
        conn.execute(
            "INSERT INTO archive
             (schema, schema_version, data_version, partition, run, created_by, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                schema,
                schema_version,
                data_version,
                partition_name,
                run_number,
                created_by,
                created_at,
            ],
        )?;
        Ok(())
    }

    /// All tags of a schema, in tag order.
    pub fn list_tags(&self, schema: &str) -> CairnResult<Vec<TagRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT schema, tag, schema_version, data_version, created_by, created_at
             FROM tags
             WHERE schema = ?1
             ORDER BY tag",
        )?;
        let results = stmt.query_map(params![schema], |row| Ok(row_to_tag_record(row)))?;
        results
            .map(|r| r.map_err(|e| e.into()).and_then(|inner| inner))
            .collect()
    }

    /// All provenance records of a schema, newest first.
    pub fn list_archive_records(&self, schema: &str) -> CairnResult<Vec<ArchiveRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT schema, schema_version, data_version, partition, run, created_by,
                    created_at
             FROM archive
             WHERE schema = ?1
             ORDER BY created_at DESC, rowid DESC",
        )?;
        let results = stmt.query_map(params![schema], |row| Ok(row_to_archive_record(row)))?;
        results
            .map(|r| r.map_err(|e| e.into()).and_then(|inner| inner))
            .collect()
    }

    /// Both halves of a version pair must already be committed.
    fn check_version_pair(
        &self,
        schema: &str,
        schema_version: i64,
        data_version: i64,
    ) -> CairnResult<()> {
        if self.schema_version_record(schema, schema_version)?.is_none() {
            return Err(CairnError::schema_not_found(schema, schema_version));
        }
        if self.data_version_record(schema, data_version)?.is_none() {
            return Err(CairnError::data_version_not_found(schema, data_version));
        }
        Ok(())
    }
}
