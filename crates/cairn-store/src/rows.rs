//! Data codec and differ: objects as relational rows, and row-level deltas.
//!
//! A data version's content is three partitioned row sets. Row identity is
//! the slot a row occupies: `(class, id)` for objects, owner + name +
//! ordinal for relations and values. The target or scalar payload is
//! content. A later version overrides a slot with a single row, or deletes
//! it with a tombstone. Keys are ordered, so reconstruction is
//! deterministic.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use cairn_core::model::{Kernel, ObjectRef};

/// What a stored row does when applied onto a base row set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RowOp {
    /// The row introduces or overrides its slot.
    Upsert,
    /// The slot existed in the base and is deleted in this version.
    Tombstone,
}

impl RowOp {
    /// Convert to string for storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upsert => "U",
            Self::Tombstone => "D",
        }
    }

    /// Parse from string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "U" => Some(Self::Upsert),
            "D" => Some(Self::Tombstone),
            _ => None,
        }
    }
}

/// A slot's state within one version's row set: present with content, or
/// tombstoned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RowEntry<T> {
    Upsert(T),
    Tombstone,
}

impl<T> RowEntry<T> {
    /// The operation this entry performs on apply.
    pub fn op(&self) -> RowOp {
        match self {
            Self::Upsert(_) => RowOp::Upsert,
            Self::Tombstone => RowOp::Tombstone,
        }
    }

    /// The content, unless tombstoned.
    pub fn content(&self) -> Option<&T> {
        match self {
            Self::Upsert(content) => Some(content),
            Self::Tombstone => None,
        }
    }
}

/// Identity of an object row. Object rows carry no content beyond their
/// existence.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectRow {
    pub class: String,
    pub object_id: String,
}

/// Identity of a relation slot: one ordinal position of one relationship.
/// Content is the target reference.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelationRow {
    pub class: String,
    pub object_id: String,
    pub name: String,
    pub ordinal: i64,
}

/// Identity of a value slot: one ordinal position of one attribute.
/// Content is the scalar payload.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ValueRow {
    pub class: String,
    pub object_id: String,
    pub name: String,
    pub ordinal: i64,
}

/// The three partitioned row sets of one data version (or of a diff).
///
/// A fully reconstructed set holds no tombstones; a stored delta may hold
/// both upserts and tombstones.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSet {
    pub objects: BTreeMap<ObjectRow, RowEntry<()>>,
    pub relations: BTreeMap<RelationRow, RowEntry<ObjectRef>>,
    pub values: BTreeMap<ValueRow, RowEntry<String>>,
}

impl RowSet {
    /// Create an empty row set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of rows across the three partitions. Tombstones count
    /// like any other row: a deletion costs a stored row exactly like an
    /// addition.
    pub fn len(&self) -> usize {
        self.objects.len() + self.relations.len() + self.values.len()
    }

    /// Whether the set holds no rows at all.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty() && self.relations.is_empty() && self.values.is_empty()
    }

    /// Materialize a candidate snapshot from the kernel's live objects, or
    /// from the named subset. All rows are upserts.
    pub fn materialize(kernel: &Kernel, objects: Option<&[ObjectRef]>) -> Self {
        let mut rows = Self::new();
        let wanted: Option<std::collections::BTreeSet<&ObjectRef>> =
            objects.map(|keys| keys.iter().collect());

        for object in kernel.objects() {
            if let Some(wanted) = &wanted {
                if !wanted.contains(&object.key()) {
                    continue;
                }
            }
            rows.objects.insert(
                ObjectRow {
                    class: object.class_name().to_string(),
                    object_id: object.id().to_string(),
                },
                RowEntry::Upsert(()),
            );
            for (attribute, values) in object.values() {
                for (ordinal, value) in values.iter().enumerate() {
                    rows.values.insert(
                        ValueRow {
                            class: object.class_name().to_string(),
                            object_id: object.id().to_string(),
                            name: attribute.to_string(),
                            ordinal: ordinal as i64,
                        },
                        RowEntry::Upsert(value.clone()),
                    );
                }
            }
            for (relationship, targets) in object.relations() {
                for (ordinal, target) in targets.iter().enumerate() {
                    rows.relations.insert(
                        RelationRow {
                            class: object.class_name().to_string(),
                            object_id: object.id().to_string(),
                            name: relationship.to_string(),
                            ordinal: ordinal as i64,
                        },
                        RowEntry::Upsert(target.clone()),
                    );
                }
            }
        }
        rows
    }

    /// Row-level delta from `base` to `candidate`: slots added or changed in
    /// the candidate become upserts, slots present only in the base become
    /// tombstones, identical slots are dropped. Both inputs must be plain
    /// content sets (no tombstones), i.e. a materialized candidate and a
    /// fully reconstructed base.
    pub fn diff(candidate: &RowSet, base: &RowSet) -> RowSet {
        fn diff_partition<K: Ord + Clone, T: Eq + Clone>(
            candidate: &BTreeMap<K, RowEntry<T>>,
            base: &BTreeMap<K, RowEntry<T>>,
        ) -> BTreeMap<K, RowEntry<T>> {
            let mut delta = BTreeMap::new();
            for (key, entry) in candidate {
                if base.get(key) != Some(entry) {
                    delta.insert(key.clone(), entry.clone());
                }
            }
            for key in base.keys() {
                if !candidate.contains_key(key) {
                    delta.insert(key.clone(), RowEntry::Tombstone);
                }
            }
            delta
        }

        RowSet {
            objects: diff_partition(&candidate.objects, &base.objects),
            relations: diff_partition(&candidate.relations, &base.relations),
            values: diff_partition(&candidate.values, &base.values),
        }
    }

    /// Apply an overlay onto this (fully reconstructed) row set: tombstones
    /// remove their slot, upserts introduce or override it.
    pub fn apply(&mut self, overlay: &RowSet) {
        fn apply_partition<K: Ord + Clone, T: Clone>(
            target: &mut BTreeMap<K, RowEntry<T>>,
            overlay: &BTreeMap<K, RowEntry<T>>,
        ) {
            for (key, entry) in overlay {
                match entry {
                    RowEntry::Upsert(_) => {
                        target.insert(key.clone(), entry.clone());
                    }
                    RowEntry::Tombstone => {
                        target.remove(key);
                    }
                }
            }
        }

        apply_partition(&mut self.objects, &overlay.objects);
        apply_partition(&mut self.relations, &overlay.relations);
        apply_partition(&mut self.values, &overlay.values);
    }
}
