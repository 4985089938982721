//! Integration tests for the versioned archive.
//!
//! Drives the full lifecycle (schema, data versions with incremental
//! storage, tags, archive records) and verifies the storage policy laws:
//! dedup aliasing, the incremental threshold checkpoint, and chain
//! reconstruction.

use std::collections::BTreeSet;

use cairn_core::{
    AttrType, Attribute, CairnError, ConfClass, Kernel, ObjectRef, Relationship, StoreConfig,
};
use cairn_store::{AccessMode, RowSet, Session};

fn init_logs() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn conf_classes() -> Vec<ConfClass> {
    vec![
        ConfClass::new("Param").with_attribute(Attribute::new("Value", AttrType::String)),
        ConfClass::new("App")
            .with_attribute(Attribute::new("Host", AttrType::String))
            .with_relationship(Relationship::new("Reads", "Param").many()),
    ]
}

fn loaded_kernel(session: &Session) -> Kernel {
    let mut kernel = Kernel::new();
    session.get_schema(&mut kernel, "CONF", 0, true).unwrap();
    kernel
}

fn param_key(i: usize) -> ObjectRef {
    ObjectRef::new("Param", format!("p{i:03}"))
}

/// The storage policy scenario: a full version, a dedup alias, a small
/// incremental delta, and a threshold-forced checkpoint.
#[test]
fn test_storage_policy_scenario() {
    init_logs();
    let session = Session::in_memory(StoreConfig::default()).unwrap();
    session.put_schema(&conf_classes(), "CONF", 0, "initial").unwrap();

    // 100 parameters, one value each: 200 rows in the first full version.
    let mut kernel = loaded_kernel(&session);
    for i in 0..100 {
        let key = kernel.create_object("Param", format!("p{i:03}")).unwrap();
        kernel.set_value(&key, "Value", "0").unwrap();
    }
    let v1 = session
        .put_data(&kernel, None, "CONF", 0, 0, 0, "first", 10)
        .unwrap();
    assert_eq!((v1.schema_version, v1.data_version), (1, 1));
    assert_eq!(v1.total_rows(), 200);
    assert!(session.data_version_record("CONF", 1).unwrap().unwrap().is_full());

    // Identical snapshot: a zero-row alias of version 1.
    let again = session
        .put_data(&kernel, None, "CONF", 0, 0, 0, "same", 10)
        .unwrap();
    assert!(again.use_base);
    assert_eq!((again.schema_version, again.data_version), (1, 1));
    assert!(again.total_rows() < 0);
    assert_eq!(session.max_data_version("CONF").unwrap(), 1);

    // 3 changed values fit the threshold of 10: incremental on base 1.
    for i in 0..3 {
        kernel.set_value(&param_key(i), "Value", "changed").unwrap();
    }
    let v2 = session
        .put_data(&kernel, None, "CONF", 0, 0, 0, "small delta", 10)
        .unwrap();
    assert_eq!(v2.data_version, 2);
    assert_eq!(v2.total_rows(), 3);
    let r2 = session.data_version_record("CONF", 2).unwrap().unwrap();
    assert_eq!(r2.base_version, Some(1));

    // 50 changed values exceed the threshold: forced full checkpoint.
    for i in 0..50 {
        kernel.set_value(&param_key(i), "Value", "bulk").unwrap();
    }
    let v3 = session
        .put_data(&kernel, None, "CONF", 0, 0, 0, "bulk change", 10)
        .unwrap();
    assert_eq!(v3.data_version, 3);
    assert_eq!(v3.total_rows(), 200);
    let r3 = session.data_version_record("CONF", 3).unwrap().unwrap();
    assert!(r3.is_full());

    // Every version reconstructs to what was submitted at the time.
    let rebuilt = {
        let mut k = loaded_kernel(&session);
        session.get_data(&mut k, "CONF", 1, 3, None).unwrap();
        k
    };
    assert_eq!(
        RowSet::materialize(&rebuilt, None),
        RowSet::materialize(&kernel, None)
    );
}

/// Round-trip law: the reconstructed row set equals the submitted one
/// whether the engine stored it full or incrementally.
#[test]
fn test_round_trip_is_storage_independent() {
    let session = Session::in_memory(StoreConfig::default()).unwrap();
    session.put_schema(&conf_classes(), "CONF", 0, "").unwrap();

    let mut kernel = loaded_kernel(&session);
    let app = kernel.create_object("App", "reader").unwrap();
    kernel.set_value(&app, "Host", "node-1").unwrap();
    for i in 0..5 {
        let key = kernel.create_object("Param", format!("p{i:03}")).unwrap();
        kernel.set_value(&key, "Value", "7").unwrap();
        kernel.set_relation(&app, "Reads", key).unwrap();
    }
    let submitted = RowSet::materialize(&kernel, None);

    // Stored full.
    session.put_data(&kernel, None, "CONF", 0, 0, -1, "full", 0).unwrap();
    // Stored incrementally (one changed value on base 1).
    kernel.set_value(&param_key(0), "Value", "8").unwrap();
    session.put_data(&kernel, None, "CONF", 0, 0, 1, "inc", 0).unwrap();

    let mut full = loaded_kernel(&session);
    session.get_data(&mut full, "CONF", 1, 1, None).unwrap();
    assert_eq!(RowSet::materialize(&full, None), submitted);

    let mut inc = loaded_kernel(&session);
    session.get_data(&mut inc, "CONF", 1, 2, None).unwrap();
    assert_eq!(
        RowSet::materialize(&inc, None),
        RowSet::materialize(&kernel, None)
    );
    assert_eq!(
        inc.object(&param_key(0)).unwrap().values_of("Value"),
        ["8".to_string()]
    );
}

/// Chain composition: v3 over v2 over v1 equals the overlays applied in
/// base-first order.
#[test]
fn test_chain_composition() {
    let session = Session::in_memory(StoreConfig::default()).unwrap();
    session.put_schema(&conf_classes(), "CONF", 0, "").unwrap();

    let mut kernel = loaded_kernel(&session);
    for i in 0..4 {
        let key = kernel.create_object("Param", format!("p{i:03}")).unwrap();
        kernel.set_value(&key, "Value", "v1").unwrap();
    }
    session.put_data(&kernel, None, "CONF", 0, 0, 0, "v1", 100).unwrap();
    let after_v1 = RowSet::materialize(&kernel, None);

    kernel.set_value(&param_key(0), "Value", "v2").unwrap();
    session.put_data(&kernel, None, "CONF", 0, 0, 0, "v2", 100).unwrap();
    let after_v2 = RowSet::materialize(&kernel, None);

    kernel.erase_object(&param_key(3));
    kernel.set_value(&param_key(1), "Value", "v3").unwrap();
    session.put_data(&kernel, None, "CONF", 0, 0, 0, "v3", 100).unwrap();
    let after_v3 = RowSet::materialize(&kernel, None);

    let overlay_v2 = RowSet::diff(&after_v2, &after_v1);
    let overlay_v3 = RowSet::diff(&after_v3, &after_v2);
    let mut composed = after_v1.clone();
    composed.apply(&overlay_v2);
    composed.apply(&overlay_v3);

    let mut rebuilt = loaded_kernel(&session);
    session.get_data(&mut rebuilt, "CONF", 1, 3, None).unwrap();
    assert_eq!(RowSet::materialize(&rebuilt, None), composed);
    assert_eq!(composed, after_v3);
}

/// Tags resolve to their bound pair forever; the empty tag tracks head.
#[test]
fn test_tags_and_archive_provenance() {
    let session = Session::in_memory(StoreConfig::default()).unwrap();
    session.put_schema(&conf_classes(), "CONF", 0, "").unwrap();

    let mut kernel = loaded_kernel(&session);
    let key = kernel.create_object("Param", "p000").unwrap();
    kernel.set_value(&key, "Value", "1").unwrap();
    session.put_data(&kernel, None, "CONF", 0, 0, 0, "v1", 0).unwrap();

    session.tag_data("CONF", 1, 1, "golden").unwrap();
    session.create_archive_record("CONF", 1, 1, "initial", 2041).unwrap();

    kernel.set_value(&key, "Value", "2").unwrap();
    session.put_data(&kernel, None, "CONF", 0, 0, 0, "v2", 0).unwrap();
    session.create_archive_record("CONF", 1, 2, "initial", 2042).unwrap();

    // The bound tag still points at version 1; the empty tag follows head.
    assert_eq!(session.resolve_tag("CONF", "golden").unwrap(), (1, 1));
    assert_eq!(session.resolve_tag("CONF", "").unwrap(), (1, 2));

    // Re-binding is rejected and leaves the binding unchanged.
    assert!(matches!(
        session.tag_data("CONF", 1, 2, "golden").unwrap_err(),
        CairnError::TagConflict { .. }
    ));
    assert_eq!(session.resolve_tag("CONF", "golden").unwrap(), (1, 1));

    let runs: Vec<i64> = session
        .list_archive_records("CONF")
        .unwrap()
        .into_iter()
        .map(|r| r.run)
        .collect();
    assert_eq!(runs, vec![2042, 2041]);
}

/// A read-only session observes everything and mutates nothing.
#[test]
fn test_read_only_session() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("conf.db");

    {
        let session = Session::open(&path, AccessMode::Update, StoreConfig::default()).unwrap();
        session.put_schema(&conf_classes(), "CONF", 0, "").unwrap();
        let mut kernel = loaded_kernel(&session);
        let key = kernel.create_object("Param", "p000").unwrap();
        kernel.set_value(&key, "Value", "1").unwrap();
        session.put_data(&kernel, None, "CONF", 0, 0, 0, "", 0).unwrap();
    }

    let session = Session::open(&path, AccessMode::ReadOnly, StoreConfig::default()).unwrap();
    let mut kernel = loaded_kernel(&session);
    let rows = session.get_data(&mut kernel, "CONF", 0, 0, None).unwrap();
    assert_eq!(rows, 2);
    assert_eq!(kernel.object_count(), 1);

    let err = session
        .put_data(&kernel, None, "CONF", 0, 0, 0, "", 0)
        .unwrap_err();
    assert!(matches!(err, CairnError::ReadOnly { .. }));
    assert!(session.tag_data("CONF", 1, 1, "t").is_err());
    assert!(session.create_archive_record("CONF", 1, 1, "p", 1).is_err());
}

/// Pattern reads instantiate only the named classes.
#[test]
fn test_pattern_scoped_read() {
    let session = Session::in_memory(StoreConfig::default()).unwrap();
    session.put_schema(&conf_classes(), "CONF", 0, "").unwrap();

    let mut kernel = loaded_kernel(&session);
    let app = kernel.create_object("App", "reader").unwrap();
    let param = kernel.create_object("Param", "p000").unwrap();
    kernel.set_relation(&app, "Reads", param).unwrap();
    session.put_data(&kernel, None, "CONF", 0, 0, 0, "", 0).unwrap();

    let mut scoped = loaded_kernel(&session);
    let pattern: BTreeSet<String> = ["App".to_string()].into();
    session
        .get_data(&mut scoped, "CONF", 1, 1, Some(&pattern))
        .unwrap();

    assert_eq!(scoped.object_count(), 1);
    let app = scoped.object(&ObjectRef::new("App", "reader")).unwrap();
    // The relation survives even though its target class was filtered out.
    assert_eq!(app.relations_of("Reads")[0].id, "p000");
}
