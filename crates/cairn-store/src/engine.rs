//! Version resolution engine: incremental storage and chain reconstruction.
//!
//! Writes decide between three outcomes: reuse the base when the candidate
//! snapshot is identical (a zero-row alias), store the row-level delta when
//! it fits the incremental threshold, or checkpoint with a full
//! self-contained copy. Reads resolve a version number (directly, via head,
//! or via tag) and rebuild its row set by walking the base chain.

use std::collections::{BTreeMap, BTreeSet};

use rusqlite::params;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use cairn_core::error::{CairnError, CairnResult};
use cairn_core::model::{Kernel, ObjectRef};

use crate::directory::DataVersionRecord;
use crate::rows::{ObjectRow, RelationRow, RowEntry, RowOp, RowSet, ValueRow};
use crate::session::{is_unique_violation, Session};

/// Outcome of a `put_data` call: the version pair to use for reads, and the
/// inserted row counts per row kind.
///
/// When `use_base` is set, the submitted snapshot was identical to its base:
/// nothing was stored, and `schema_version`/`data_version` are the base's
/// pair. The `*_base` counters exist for historical bookkeeping and are
/// always zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PutDataStats {
    pub schema_version: i64,
    pub data_version: i64,
    pub object_rows_this: i64,
    pub object_rows_base: i64,
    pub relation_rows_this: i64,
    pub relation_rows_base: i64,
    pub value_rows_this: i64,
    pub value_rows_base: i64,
    pub use_base: bool,
}

impl PutDataStats {
    fn stored(schema_version: i64, data_version: i64, rows: &RowSet) -> Self {
        Self {
            schema_version,
            data_version,
            object_rows_this: rows.objects.len() as i64,
            object_rows_base: 0,
            relation_rows_this: rows.relations.len() as i64,
            relation_rows_base: 0,
            value_rows_this: rows.values.len() as i64,
            value_rows_base: 0,
            use_base: false,
        }
    }

    fn reused(schema_version: i64, data_version: i64) -> Self {
        Self {
            schema_version,
            data_version,
            object_rows_this: 0,
            object_rows_base: 0,
            relation_rows_this: 0,
            relation_rows_base: 0,
            value_rows_this: 0,
            value_rows_base: 0,
            use_base: true,
        }
    }

    /// Total number of rows stored for the new version. Negative means the
    /// version is identical to its base and nothing was stored.
    pub fn total_rows(&self) -> i64 {
        if self.use_base {
            -1
        } else {
            self.object_rows_this + self.relation_rows_this + self.value_rows_this
        }
    }
}

impl Session {
    /// Store a new data version from the kernel's live objects (or the
    /// named subset).
    ///
    /// `schema_version` 0 resolves the head schema version. `data_version`
    /// 0 allocates the next number; positive uses the exact number.
    /// `base_version` controls the storage decision: negative forces a full
    /// version with no base, 0 selects the head data version under the
    /// resolved schema version as base, positive names the base directly.
    /// With a base, a snapshot identical to it stores nothing (see
    /// [`PutDataStats::use_base`]); a delta larger than `inc_threshold`
    /// rows (when positive) is discarded in favor of a full checkpoint.
    #[allow(clippy::too_many_arguments)]
    pub fn put_data(
        &self,
        kernel: &Kernel,
        objects: Option<&[ObjectRef]>,
        schema: &str,
        schema_version: i64,
        data_version: i64,
        base_version: i64,
        description: &str,
        inc_threshold: i64,
    ) -> CairnResult<PutDataStats> {
        self.ensure_writable("put_data")?;
        if data_version < 0 {
            return Err(CairnError::validation(
                "data version spec must be 0 (allocate) or positive (exact)",
            ));
        }

        let schema_version = match schema_version {
            0 => self.head_schema_version(schema, None)?,
            v if v > 0 => {
                if self.schema_version_record(schema, v)?.is_none() {
                    return Err(CairnError::schema_not_found(schema, v));
                }
                v
            }
            v => {
                return Err(CairnError::validation(format!(
                    "schema version spec must not be negative, got {v}"
                )))
            }
        };

        let base = match base_version {
            v if v < 0 => None,
            0 => self.head_data_version(schema, schema_version)?,
            v => {
                let record = self
                    .data_version_record(schema, v)?
                    .ok_or_else(|| CairnError::data_version_not_found(schema, v))?;
                if record.schema_version != schema_version {
                    return Err(CairnError::validation(format!(
                        "base version {v} was written against schema version {}, \
                         not {schema_version}",
                        record.schema_version
                    )));
                }
                Some(v)
            }
        };

        let candidate = RowSet::materialize(kernel, objects);

        let (rows, stored_base) = match base {
            Some(base) => {
                let (_, base_rows) = self.reconstruct(schema, base)?;
                let delta = RowSet::diff(&candidate, &base_rows);
                if delta.is_empty() {
                    debug!(schema, base, "Snapshot identical to base, reusing");
                    return Ok(PutDataStats::reused(schema_version, base));
                }
                if inc_threshold > 0 && delta.len() as i64 > inc_threshold {
                    info!(
                        schema,
                        base,
                        delta_rows = delta.len(),
                        inc_threshold,
                        "Delta exceeds incremental threshold, writing full checkpoint"
                    );
                    (candidate, None)
                } else {
                    (delta, Some(base))
                }
            }
            None => (candidate, None),
        };

        let mut attempts = self.config().retry_attempts.max(1);
        let version = loop {
            let v = if data_version > 0 {
                data_version
            } else {
                self.max_data_version(schema)? + 1
            };
            match self.try_insert_data_version(
                schema,
                v,
                schema_version,
                stored_base,
                description,
                &rows,
            ) {
                Ok(()) => break v,
                Err(e) if e.is_retryable() && data_version == 0 && attempts > 1 => {
                    attempts -= 1;
                    debug!(schema, version = v, "Data version allocation race, retrying");
                }
                Err(e) => return Err(e),
            }
        };

        info!(
            schema,
            version,
            schema_version,
            base = ?stored_base,
            rows = rows.len(),
            "Created data version"
        );
        Ok(PutDataStats::stored(schema_version, version, &rows))
    }

    /// Read one data version's objects into the caller's kernel, which must
    /// already hold the matching schema version's classes.
    ///
    /// `schema_version` and `data_version` resolve like in [`put_data`]
    /// (0 means head). `pattern`, when given, restricts instantiation to the
    /// named classes. Returns the number of rows read from the backing
    /// tables during chain traversal.
    pub fn get_data(
        &self,
        kernel: &mut Kernel,
        schema: &str,
        schema_version: i64,
        data_version: i64,
        pattern: Option<&BTreeSet<String>>,
    ) -> CairnResult<u64> {
        let schema_version = match schema_version {
            0 => self.head_schema_version(schema, None)?,
            v => v,
        };
        let data_version = match data_version {
            0 => self
                .head_data_version(schema, schema_version)?
                .ok_or_else(|| CairnError::no_versions(schema))?,
            v => v,
        };
        let record = self
            .data_version_record(schema, data_version)?
            .ok_or_else(|| CairnError::data_version_not_found(schema, data_version))?;
        if record.schema_version != schema_version {
            return Err(CairnError::validation(format!(
                "data version {data_version} was written against schema version {}, \
                 not {schema_version}",
                record.schema_version
            )));
        }

        let (rows_read, mut rows) = self.reconstruct(schema, data_version)?;
        if let Some(pattern) = pattern {
            rows.objects.retain(|k, _| pattern.contains(&k.class));
            rows.relations.retain(|k, _| pattern.contains(&k.class));
            rows.values.retain(|k, _| pattern.contains(&k.class));
        }
        debug!(
            schema,
            data_version,
            rows_read,
            objects = rows.objects.len(),
            "Reconstructed data version"
        );

        self.instantiate(kernel, schema, data_version, &rows)?;
        Ok(rows_read)
    }

    /// Rebuild a version's full row set by walking its base chain and
    /// applying each link's rows base-first. Returns the number of rows
    /// read alongside the reconstructed set.
    pub(crate) fn reconstruct(&self, schema: &str, version: i64) -> CairnResult<(u64, RowSet)> {
        let chain = self.load_chain(schema, version)?;
        let mut rows = RowSet::new();
        let mut rows_read = 0;
        for record in &chain {
            let (read, overlay) = self.read_version_rows(schema, record.version)?;
            rows_read += read;
            rows.apply(&overlay);
        }
        Ok((rows_read, rows))
    }

    /// Load the base chain from the requested version down to its full
    /// base, returned base-first.
    fn load_chain(&self, schema: &str, version: i64) -> CairnResult<Vec<DataVersionRecord>> {
        let mut chain: Vec<DataVersionRecord> = Vec::new();
        let mut visited = BTreeSet::new();
        let mut current = version;
        loop {
            if !visited.insert(current) {
                return Err(CairnError::cyclic_chain(schema, current));
            }
            let record = match self.data_version_record(schema, current)? {
                Some(record) => record,
                None => match chain.last() {
                    Some(holder) => {
                        return Err(CairnError::chain_broken(schema, holder.version, current))
                    }
                    None => return Err(CairnError::data_version_not_found(schema, current)),
                },
            };
            let base = record.base_version;
            chain.push(record);
            match base {
                Some(base) => current = base,
                None => break,
            }
        }
        chain.reverse();
        Ok(chain)
    }

    fn read_version_rows(&self, schema: &str, version: i64) -> CairnResult<(u64, RowSet)> {
        let conn = self.lock();
        let mut rows = RowSet::new();
        let mut rows_read: u64 = 0;

        let mut stmt = conn.prepare(
            "SELECT class, object_id, op FROM object_rows
             WHERE schema = ?1 AND data_version = ?2",
        )?;
        let object_rows = stmt.query_map(params![schema, version], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        for row in object_rows {
            let (class, object_id, op) = row?;
            let entry = match parse_op(schema, version, &op)? {
                RowOp::Upsert => RowEntry::Upsert(()),
                RowOp::Tombstone => RowEntry::Tombstone,
            };
            rows.objects.insert(ObjectRow { class, object_id }, entry);
            rows_read += 1;
        }

        let mut stmt = conn.prepare(
            "SELECT class, object_id, name, ordinal, target_class, target_id, op
             FROM relation_rows
             WHERE schema = ?1 AND data_version = ?2",
        )?;
        let relation_rows = stmt.query_map(params![schema, version], |row| {
            Ok((
                RelationRow {
                    class: row.get(0)?,
                    object_id: row.get(1)?,
                    name: row.get(2)?,
                    ordinal: row.get(3)?,
                },
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?;
        for row in relation_rows {
            let (key, target_class, target_id, op) = row?;
            let entry = match parse_op(schema, version, &op)? {
                RowOp::Upsert => match (target_class, target_id) {
                    (Some(class), Some(id)) => RowEntry::Upsert(ObjectRef::new(class, id)),
                    _ => {
                        return Err(CairnError::corrupt(format!(
                            "relation row of data version {version} in schema '{schema}' \
                             has no target"
                        )))
                    }
                },
                RowOp::Tombstone => RowEntry::Tombstone,
            };
            rows.relations.insert(key, entry);
            rows_read += 1;
        }

        let mut stmt = conn.prepare(
            "SELECT class, object_id, name, ordinal, value, op FROM value_rows
             WHERE schema = ?1 AND data_version = ?2",
        )?;
        let value_rows = stmt.query_map(params![schema, version], |row| {
            Ok((
                ValueRow {
                    class: row.get(0)?,
                    object_id: row.get(1)?,
                    name: row.get(2)?,
                    ordinal: row.get(3)?,
                },
                row.get::<_, Option<String>>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;
        for row in value_rows {
            let (key, value, op) = row?;
            let entry = match parse_op(schema, version, &op)? {
                RowOp::Upsert => match value {
                    Some(value) => RowEntry::Upsert(value),
                    None => {
                        return Err(CairnError::corrupt(format!(
                            "value row of data version {version} in schema '{schema}' \
                             has no payload"
                        )))
                    }
                },
                RowOp::Tombstone => RowEntry::Tombstone,
            };
            rows.values.insert(key, entry);
            rows_read += 1;
        }

        Ok((rows_read, rows))
    }

    fn try_insert_data_version(
        &self,
        schema: &str,
        version: i64,
        schema_version: i64,
        base: Option<i64>,
        description: &str,
        rows: &RowSet,
    ) -> CairnResult<()> {
        let created_by = self.created_by();
        let created_at = self.now();

        let conn = self.lock();
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO data_versions
             (schema, version, schema_version, description, base_version,
              created_by, created_at, object_rows, relation_rows, value_rows)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                schema,
                version,
                schema_version,
                description,
                base,
                created_by,
                created_at,
                rows.objects.len() as i64,
                rows.relations.len() as i64,
                rows.values.len() as i64,
            ],
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                CairnError::version_conflict(format!(
                    "schema '{schema}' data version {version} already exists"
                ))
            } else {
                e.into()
            }
        })?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO object_rows (schema, data_version, class, object_id, op)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for (key, entry) in &rows.objects {
                stmt.execute(params![
                    schema,
                    version,
                    key.class,
                    key.object_id,
                    entry.op().as_str(),
                ])?;
            }
        }
        {
            let mut stmt = tx.prepare(
                "INSERT INTO relation_rows
                 (schema, data_version, class, object_id, name, ordinal,
                  target_class, target_id, op)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            for (key, entry) in &rows.relations {
                let target = entry.content();
                stmt.execute(params![
                    schema,
                    version,
                    key.class,
                    key.object_id,
                    key.name,
                    key.ordinal,
                    target.map(|t| t.class_name.as_str()),
                    target.map(|t| t.id.as_str()),
                    entry.op().as_str(),
                ])?;
            }
        }
        {
            let mut stmt = tx.prepare(
                "INSERT INTO value_rows
                 (schema, data_version, class, object_id, name, ordinal, value, op)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for (key, entry) in &rows.values {
                stmt.execute(params![
                    schema,
                    version,
                    key.class,
                    key.object_id,
                    key.name,
                    key.ordinal,
                    entry.content(),
                    entry.op().as_str(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Instantiate a reconstructed row set into the kernel: objects first,
    /// then values and relations, so references resolve.
    fn instantiate(
        &self,
        kernel: &mut Kernel,
        schema: &str,
        data_version: i64,
        rows: &RowSet,
    ) -> CairnResult<()> {
        for key in rows.objects.keys() {
            if kernel.class(&key.class).is_none() {
                return Err(CairnError::corrupt(format!(
                    "data version {data_version} of schema '{schema}' references \
                     class '{}' which is not loaded in the kernel",
                    key.class
                )));
            }
            kernel.create_object(&key.class, &key.object_id)?;
        }

        let mut values: BTreeMap<(ObjectRef, String), Vec<String>> = BTreeMap::new();
        for (key, entry) in &rows.values {
            let owner = ObjectRow {
                class: key.class.clone(),
                object_id: key.object_id.clone(),
            };
            if !rows.objects.contains_key(&owner) {
                return Err(CairnError::corrupt(format!(
                    "value row of '{}@{}' in data version {data_version} of schema \
                     '{schema}' has no object row",
                    key.object_id, key.class
                )));
            }
            let value = entry.content().ok_or_else(|| {
                CairnError::corrupt(format!(
                    "tombstone survived reconstruction of data version {data_version} \
                     in schema '{schema}'"
                ))
            })?;
            values
                .entry((
                    ObjectRef::new(&key.class, &key.object_id),
                    key.name.clone(),
                ))
                .or_default()
                .push(value.clone());
        }
        for ((owner, attribute), values) in values {
            kernel.set_values(&owner, &attribute, values).map_err(|e| {
                CairnError::corrupt(format!(
                    "data version {data_version} of schema '{schema}' does not match \
                     its schema: {e}"
                ))
            })?;
        }

        let mut relations: BTreeMap<(ObjectRef, String), Vec<ObjectRef>> = BTreeMap::new();
        for (key, entry) in &rows.relations {
            let owner = ObjectRow {
                class: key.class.clone(),
                object_id: key.object_id.clone(),
            };
            if !rows.objects.contains_key(&owner) {
                return Err(CairnError::corrupt(format!(
                    "relation row of '{}@{}' in data version {data_version} of schema \
                     '{schema}' has no object row",
                    key.object_id, key.class
                )));
            }
            let target = entry.content().ok_or_else(|| {
                CairnError::corrupt(format!(
                    "tombstone survived reconstruction of data version {data_version} \
                     in schema '{schema}'"
                ))
            })?;
            relations
                .entry((
                    ObjectRef::new(&key.class, &key.object_id),
                    key.name.clone(),
                ))
                .or_default()
                .push(target.clone());
        }
        for ((owner, relationship), targets) in relations {
            kernel
                .set_relations(&owner, &relationship, targets)
                .map_err(|e| {
                    CairnError::corrupt(format!(
                        "data version {data_version} of schema '{schema}' does not \
                         match its schema: {e}"
                    ))
                })?;
        }

        Ok(())
    }
}

fn parse_op(schema: &str, version: i64, raw: &str) -> CairnResult<RowOp> {
    RowOp::parse(raw).ok_or_else(|| {
        CairnError::corrupt(format!(
            "data version {version} of schema '{schema}' has unknown row op '{raw}'"
        ))
    })
}
