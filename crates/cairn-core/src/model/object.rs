//! Object instances: the content half of the configuration model.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A value-typed reference to an object. Used both as object identity and as
/// relationship target, so the object graph carries no ownership cycles.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    /// Name of the object's class.
    pub class_name: String,
    /// Object id, unique within the class.
    pub id: String,
}

impl ObjectRef {
    /// Create a reference.
    pub fn new(class_name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.class_name)
    }
}

/// An object instance: attribute values and relationship targets.
///
/// Values are text-encoded scalars per the attribute's declared type;
/// multi-valued attributes and relationships keep insertion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfObject {
    class_name: String,
    id: String,
    values: BTreeMap<String, Vec<String>>,
    relations: BTreeMap<String, Vec<ObjectRef>>,
}

impl ConfObject {
    pub(crate) fn new(class_name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            id: id.into(),
            values: BTreeMap::new(),
            relations: BTreeMap::new(),
        }
    }

    /// Name of the object's class.
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// Object id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The object's identity as a reference.
    pub fn key(&self) -> ObjectRef {
        ObjectRef::new(&self.class_name, &self.id)
    }

    /// Values of one attribute, in ordinal order.
    pub fn values_of(&self, attribute: &str) -> &[String] {
        self.values.get(attribute).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Targets of one relationship, in ordinal order.
    pub fn relations_of(&self, relationship: &str) -> &[ObjectRef] {
        self.relations
            .get(relationship)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Iterate over set attributes and their values.
    pub fn values(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Iterate over set relationships and their targets.
    pub fn relations(&self) -> impl Iterator<Item = (&str, &[ObjectRef])> {
        self.relations
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub(crate) fn set_values(&mut self, attribute: impl Into<String>, values: Vec<String>) {
        let attribute = attribute.into();
        if values.is_empty() {
            self.values.remove(&attribute);
        } else {
            self.values.insert(attribute, values);
        }
    }

    pub(crate) fn set_relations(
        &mut self,
        relationship: impl Into<String>,
        targets: Vec<ObjectRef>,
    ) {
        let relationship = relationship.into();
        if targets.is_empty() {
            self.relations.remove(&relationship);
        } else {
            self.relations.insert(relationship, targets);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_ref_display() {
        let r = ObjectRef::new("Module", "mod-01");
        assert_eq!(r.to_string(), "mod-01@Module");
    }

    #[test]
    fn test_set_and_clear_values() {
        let mut obj = ConfObject::new("Module", "mod-01");
        obj.set_values("Channels", vec!["64".to_string()]);
        assert_eq!(obj.values_of("Channels"), ["64".to_string()]);

        obj.set_values("Channels", Vec::new());
        assert!(obj.values_of("Channels").is_empty());
        assert_eq!(obj.values().count(), 0);
    }

    #[test]
    fn test_relations_keep_order() {
        let mut obj = ConfObject::new("Module", "mod-01");
        obj.set_relations(
            "Contains",
            vec![ObjectRef::new("Chip", "c2"), ObjectRef::new("Chip", "c1")],
        );
        let targets = obj.relations_of("Contains");
        assert_eq!(targets[0].id, "c2");
        assert_eq!(targets[1].id, "c1");
    }
}
