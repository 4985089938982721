//! Schema codec: translates class definitions to and from relational rows.
//!
//! Every schema version is fully self-contained: superclasses and
//! relationship targets must resolve within the same version's row set, so
//! reads never consult other versions.

use std::collections::BTreeMap;

use rusqlite::{params, Transaction};
use tracing::{debug, info};

use cairn_core::error::{CairnError, CairnResult};
use cairn_core::model::{
    AttrType, Attribute, Cardinality, ConfClass, Kernel, Method, MethodImpl, Relationship,
};

use crate::directory::SchemaVersionRecord;
use crate::session::{is_unique_violation, Session};

impl Session {
    /// Create a new schema version, or add classes to an existing one.
    ///
    /// `version_spec > 0` uses the exact number and fails with
    /// `VersionConflict` if it is taken. `version_spec == 0` allocates
    /// `max_schema_version + 1`, retrying a bounded number of times when a
    /// concurrent writer wins the race. `version_spec < 0` augments the
    /// existing version `abs(version_spec)` with the given classes.
    pub fn put_schema(
        &self,
        classes: &[ConfClass],
        schema: &str,
        version_spec: i64,
        description: &str,
    ) -> CairnResult<SchemaVersionRecord> {
        self.ensure_writable("put_schema")?;

        if version_spec < 0 {
            return self.augment_schema(classes, schema, -version_spec);
        }

        let mut attempts = self.config().retry_attempts.max(1);
        loop {
            let version = if version_spec > 0 {
                version_spec
            } else {
                self.max_schema_version(schema)? + 1
            };
            match self.try_insert_schema_version(classes, schema, version, description) {
                Ok(record) => {
                    info!(schema, version, classes = classes.len(), "Created schema version");
                    return Ok(record);
                }
                Err(e) if e.is_retryable() && version_spec == 0 && attempts > 1 => {
                    attempts -= 1;
                    debug!(schema, version, "Schema version allocation race, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn try_insert_schema_version(
        &self,
        classes: &[ConfClass],
        schema: &str,
        version: i64,
        description: &str,
    ) -> CairnResult<SchemaVersionRecord> {
        let created_by = self.created_by();
        let created_at = self.now();
        let release = self.config().release.clone();

        let conn = self.lock();
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO schema_versions
             (schema, version, description, release, created_by, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![schema, version, description, release, created_by, created_at],
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                CairnError::version_conflict(format!(
                    "schema '{schema}' version {version} already exists"
                ))
            } else {
                e.into()
            }
        })?;
        for class in classes {
            insert_class_rows(&tx, schema, version, class)?;
        }
        tx.commit()?;

        Ok(SchemaVersionRecord {
            schema: schema.to_string(),
            version,
            description: description.to_string(),
            release,
            created_by,
            created_at: crate::directory::parse_timestamp(&created_at)?,
        })
    }

    fn augment_schema(
        &self,
        classes: &[ConfClass],
        schema: &str,
        version: i64,
    ) -> CairnResult<SchemaVersionRecord> {
        let record = self
            .schema_version_record(schema, version)?
            .ok_or_else(|| CairnError::schema_not_found(schema, version))?;

        let conn = self.lock();
        let tx = conn.unchecked_transaction()?;
        for class in classes {
            insert_class_rows(&tx, schema, version, class)?;
        }
        tx.commit()?;
        drop(conn);

        info!(schema, version, classes = classes.len(), "Augmented schema version");
        Ok(record)
    }

    /// Read one schema version's classes into the caller's kernel.
    ///
    /// `version == 0` resolves the head schema version. `read_methods =
    /// false` skips method declarations and bodies, for callers that only
    /// need data access. Returns the number of classes read.
    pub fn get_schema(
        &self,
        kernel: &mut Kernel,
        schema: &str,
        version: i64,
        read_methods: bool,
    ) -> CairnResult<usize> {
        let version = if version == 0 {
            self.head_schema_version(schema, None)?
        } else {
            version
        };
        if self.schema_version_record(schema, version)?.is_none() {
            return Err(CairnError::schema_not_found(schema, version));
        }

        let mut classes = self.read_class_rows(schema, version)?;
        if read_methods {
            self.read_method_rows(schema, version, &mut classes)?;
        }

        // Self-containment: every referenced class must be in this version.
        for class in classes.values() {
            for superclass in &class.superclasses {
                if !classes.contains_key(superclass) {
                    return Err(CairnError::corrupt(format!(
                        "class '{}' of schema '{schema}' version {version} \
                         references missing superclass '{superclass}'",
                        class.name
                    )));
                }
            }
            for relationship in &class.relationships {
                if !classes.contains_key(&relationship.class_type) {
                    return Err(CairnError::corrupt(format!(
                        "relationship '{}' of class '{}' in schema '{schema}' version \
                         {version} references missing class '{}'",
                        relationship.name, class.name, relationship.class_type
                    )));
                }
            }
        }

        let count = classes.len();
        for (_, class) in classes {
            kernel.add_class(class)?;
        }
        debug!(schema, version, count, "Read schema version");
        Ok(count)
    }

    fn read_class_rows(
        &self,
        schema: &str,
        version: i64,
    ) -> CairnResult<BTreeMap<String, ConfClass>> {
        let conn = self.lock();

        let mut classes: BTreeMap<String, ConfClass> = BTreeMap::new();
        let mut stmt = conn.prepare(
            "SELECT name, description, is_abstract, superclasses
             FROM classes
             WHERE schema = ?1 AND version = ?2",
        )?;
        let rows = stmt.query_map(params![schema, version], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, bool>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;
        for row in rows {
            let (name, description, is_abstract, superclasses) = row?;
            let superclasses: Vec<String> = serde_json::from_str(&superclasses)?;
            classes.insert(
                name.clone(),
                ConfClass {
                    name,
                    description,
                    is_abstract,
                    superclasses,
                    attributes: Vec::new(),
                    relationships: Vec::new(),
                    methods: Vec::new(),
                },
            );
        }

        let mut stmt = conn.prepare(
            "SELECT class, name, attr_type, range, init_value, is_multi, is_nullable,
                    description
             FROM attributes
             WHERE schema = ?1 AND version = ?2
             ORDER BY class, position",
        )?;
        let rows = stmt.query_map(params![schema, version], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, bool>(5)?,
                row.get::<_, bool>(6)?,
                row.get::<_, String>(7)?,
            ))
        })?;
        for row in rows {
            let (class, name, raw_type, range, init_value, is_multi, is_nullable, description) =
                row?;
            let attr_type = AttrType::parse(&raw_type).ok_or_else(|| {
                CairnError::corrupt(format!(
                    "attribute '{name}' of class '{class}' has unknown type '{raw_type}'"
                ))
            })?;
            classes
                .get_mut(&class)
                .ok_or_else(|| {
                    CairnError::corrupt(format!(
                        "attribute row references missing class '{class}' in schema \
                         '{schema}' version {version}"
                    ))
                })?
                .attributes
                .push(Attribute {
                    name,
                    attr_type,
                    range,
                    init_value,
                    is_multi_value: is_multi,
                    is_nullable,
                    description,
                });
        }

        let mut stmt = conn.prepare(
            "SELECT class, name, class_type, low_cc, high_cc, is_composite,
                    is_exclusive, is_dependent, description
             FROM relationships
             WHERE schema = ?1 AND version = ?2
             ORDER BY class, position",
        )?;
        let rows = stmt.query_map(params![schema, version], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, bool>(5)?,
                row.get::<_, bool>(6)?,
                row.get::<_, bool>(7)?,
                row.get::<_, String>(8)?,
            ))
        })?;
        for row in rows {
            let (class, name, class_type, low, high, composite, exclusive, dependent, desc) =
                row?;
            let parse_cc = |raw: &str| {
                Cardinality::parse(raw).ok_or_else(|| {
                    CairnError::corrupt(format!(
                        "relationship '{name}' of class '{class}' has unknown \
                         cardinality '{raw}'"
                    ))
                })
            };
            let relationship = Relationship {
                name: name.clone(),
                class_type,
                low_cc: parse_cc(&low)?,
                high_cc: parse_cc(&high)?,
                is_composite: composite,
                is_exclusive: exclusive,
                is_dependent: dependent,
                description: desc,
            };
            classes
                .get_mut(&class)
                .ok_or_else(|| {
                    CairnError::corrupt(format!(
                        "relationship row references missing class '{class}' in schema \
                         '{schema}' version {version}"
                    ))
                })?
                .relationships
                .push(relationship);
        }

        Ok(classes)
    }

    fn read_method_rows(
        &self,
        schema: &str,
        version: i64,
        classes: &mut BTreeMap<String, ConfClass>,
    ) -> CairnResult<()> {
        let conn = self.lock();

        let mut stmt = conn.prepare(
            "SELECT class, name, description
             FROM methods
             WHERE schema = ?1 AND version = ?2
             ORDER BY class, position",
        )?;
        let rows = stmt.query_map(params![schema, version], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        for row in rows {
            let (class, name, description) = row?;
            classes
                .get_mut(&class)
                .ok_or_else(|| {
                    CairnError::corrupt(format!(
                        "method row references missing class '{class}' in schema \
                         '{schema}' version {version}"
                    ))
                })?
                .methods
                .push(Method {
                    name,
                    description,
                    implementations: Vec::new(),
                });
        }

        let mut stmt = conn.prepare(
            "SELECT class, method, language, prototype, body
             FROM method_impls
             WHERE schema = ?1 AND version = ?2
             ORDER BY class, method, position",
        )?;
        let rows = stmt.query_map(params![schema, version], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                MethodImpl {
                    language: row.get(2)?,
                    prototype: row.get(3)?,
                    body: row.get(4)?,
                },
            ))
        })?;
        for row in rows {
            let (class, method_name, implementation) = row?;
            let method = classes
                .get_mut(&class)
                .and_then(|c| c.methods.iter_mut().find(|m| m.name == method_name))
                .ok_or_else(|| {
                    CairnError::corrupt(format!(
                        "method implementation references missing method \
                         '{method_name}' of class '{class}'"
                    ))
                })?;
            method.implementations.push(implementation);
        }

        Ok(())
    }
}

fn insert_class_rows(
    tx: &Transaction<'_>,
    schema: &str,
    version: i64,
    class: &ConfClass,
) -> CairnResult<()> {
    tx.execute(
        "INSERT INTO classes (schema, version, name, description, is_abstract, superclasses)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            schema,
            version,
            class.name,
            class.description,
            class.is_abstract,
            serde_json::to_string(&class.superclasses)?,
        ],
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            CairnError::version_conflict(format!(
                "class '{}' already exists in schema '{schema}' version {version}",
                class.name
            ))
        } else {
            e.into()
        }
    })?;

    for (position, attribute) in class.attributes.iter().enumerate() {
        tx.execute(
            "INSERT INTO attributes
             (schema, version, class, position, name, attr_type, range, init_value,
              is_multi, is_nullable, description)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                schema,
                version,
                class.name,
                position as i64,
                attribute.name,
                attribute.attr_type.as_str(),
                attribute.range,
                attribute.init_value,
                attribute.is_multi_value,
                attribute.is_nullable,
                attribute.description,
            ],
        )?;
    }

    for (position, relationship) in class.relationships.iter().enumerate() {
        tx.execute(
            "INSERT INTO relationships
             (schema, version, class, position, name, class_type, low_cc, high_cc,
              is_composite, is_exclusive, is_dependent, description)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                schema,
                version,
                class.name,
                position as i64,
                relationship.name,
                relationship.class_type,
                relationship.low_cc.as_str(),
                relationship.high_cc.as_str(),
                relationship.is_composite,
                relationship.is_exclusive,
                relationship.is_dependent,
                relationship.description,
            ],
        )?;
    }

    for (position, method) in class.methods.iter().enumerate() {
        tx.execute(
            "INSERT INTO methods (schema, version, class, position, name, description)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                schema,
                version,
                class.name,
                position as i64,
                method.name,
                method.description,
            ],
        )?;
        for (impl_position, implementation) in method.implementations.iter().enumerate() {
            tx.execute(
                "INSERT INTO method_impls
                 (schema, version, class, method, position, language, prototype, body)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    schema,
                    version,
                    class.name,
                    method.name,
                    impl_position as i64,
                    implementation.language,
                    implementation.prototype,
                    implementation.body,
                ],
            )?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_core::StoreConfig;

    fn session() -> Session {
        Session::in_memory(StoreConfig::default()).unwrap()
    }

    fn detector_classes() -> Vec<ConfClass> {
        vec![
            ConfClass::new("Component")
                .abstract_class()
                .with_description("Anything installed in the detector")
                .with_attribute(Attribute::new("Serial", AttrType::String).not_null()),
            ConfClass::new("Module")
                .with_superclass("Component")
                .with_attribute(Attribute::new("Channels", AttrType::U32))
                .with_attribute(Attribute::new("Labels", AttrType::String).multi_value())
                .with_relationship(Relationship::new("Contains", "Chip").many().composite())
                .with_method(
                    Method::new("configure")
                        .with_implementation("c++", "void configure()", "{ /* ... */ }"),
                ),
            ConfClass::new("Chip"),
        ]
    }

    #[test]
    fn test_put_get_round_trip() {
        let session = session();
        let classes = detector_classes();
        let record = session.put_schema(&classes, "HW", 0, "initial layout").unwrap();
        assert_eq!(record.version, 1);

        let mut kernel = Kernel::new();
        let count = session.get_schema(&mut kernel, "HW", 1, true).unwrap();
        assert_eq!(count, 3);

        let module = kernel.class("Module").unwrap();
        assert_eq!(module.superclasses, vec!["Component"]);
        assert!(module.attribute("Labels").unwrap().is_multi_value);
        assert!(module.relationship("Contains").unwrap().is_composite);
        assert_eq!(module.methods[0].implementations[0].language, "c++");
        assert!(kernel.class("Component").unwrap().is_abstract);
    }

    #[test]
    fn test_get_schema_without_methods() {
        let session = session();
        session.put_schema(&detector_classes(), "HW", 0, "").unwrap();

        let mut kernel = Kernel::new();
        session.get_schema(&mut kernel, "HW", 0, false).unwrap();
        assert!(kernel.class("Module").unwrap().methods.is_empty());
    }

    #[test]
    fn test_version_allocation_increments() {
        let session = session();
        let v1 = session.put_schema(&detector_classes(), "HW", 0, "").unwrap();
        let v2 = session.put_schema(&detector_classes(), "HW", 0, "").unwrap();
        assert_eq!(v1.version, 1);
        assert_eq!(v2.version, 2);
    }

    #[test]
    fn test_explicit_version_conflict() {
        let session = session();
        session.put_schema(&detector_classes(), "HW", 7, "").unwrap();
        let err = session.put_schema(&detector_classes(), "HW", 7, "").unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_augment_adds_classes() {
        let session = session();
        session.put_schema(&detector_classes(), "HW", 0, "").unwrap();
        session
            .put_schema(&[ConfClass::new("Rack")], "HW", -1, "ignored")
            .unwrap();

        let mut kernel = Kernel::new();
        let count = session.get_schema(&mut kernel, "HW", 1, true).unwrap();
        assert_eq!(count, 4);
        assert!(kernel.class("Rack").is_some());
    }

    #[test]
    fn test_augment_missing_version() {
        let session = session();
        let err = session
            .put_schema(&[ConfClass::new("Rack")], "HW", -3, "")
            .unwrap_err();
        assert!(err.to_string().contains("no version 3"));
    }

    #[test]
    fn test_augment_duplicate_class() {
        let session = session();
        session.put_schema(&detector_classes(), "HW", 0, "").unwrap();
        let err = session
            .put_schema(&[ConfClass::new("Chip")], "HW", -1, "")
            .unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn test_get_unknown_version() {
        let session = session();
        let mut kernel = Kernel::new();
        assert!(session.get_schema(&mut kernel, "HW", 9, true).is_err());
    }

    #[test]
    fn test_missing_superclass_is_corrupt() {
        let session = session();
        session.put_schema(&detector_classes(), "HW", 0, "").unwrap();
        // Remove the superclass row out-of-band.
        session
            .lock()
            .execute(
                "DELETE FROM classes WHERE schema = 'HW' AND name = 'Component'",
                [],
            )
            .unwrap();

        let mut kernel = Kernel::new();
        let err = session.get_schema(&mut kernel, "HW", 1, true).unwrap_err();
        assert!(err.to_string().contains("missing superclass"));
    }

    #[test]
    fn test_schema_versions_are_self_contained() {
        let session = session();
        session.put_schema(&detector_classes(), "HW", 0, "").unwrap();
        // A second version that does not carry 'Chip': its 'Contains'
        // relationship must not resolve against version 1.
        session
            .put_schema(
                &[ConfClass::new("Module")
                    .with_relationship(Relationship::new("Contains", "Chip"))],
                "HW",
                0,
                "",
            )
            .unwrap();

        let mut kernel = Kernel::new();
        let err = session.get_schema(&mut kernel, "HW", 2, true).unwrap_err();
        assert!(err.to_string().contains("missing class 'Chip'"));
    }
}
