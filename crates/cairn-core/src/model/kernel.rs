//! The kernel: container for class definitions and live objects.

use std::collections::BTreeMap;

use crate::error::{CairnError, CairnResult};
use crate::model::{ConfClass, ConfObject, ObjectRef};

/// Container for the in-memory model. Classes are keyed by name, objects by
/// `(class, id)`; both iterate in a stable order.
#[derive(Debug, Clone, Default)]
pub struct Kernel {
    classes: BTreeMap<String, ConfClass>,
    objects: BTreeMap<ObjectRef, ConfObject>,
}

impl Kernel {
    /// Create an empty kernel.
    pub fn new() -> Self {
        Self::default()
    }

    /// Define a class. Fails if a class with the same name is already defined.
    pub fn add_class(&mut self, class: ConfClass) -> CairnResult<()> {
        if self.classes.contains_key(&class.name) {
            return Err(CairnError::validation(format!(
                "class '{}' is already defined",
                class.name
            )));
        }
        self.classes.insert(class.name.clone(), class);
        Ok(())
    }

    /// Find a class by name.
    pub fn class(&self, name: &str) -> Option<&ConfClass> {
        self.classes.get(name)
    }

    /// Iterate over defined classes in name order.
    pub fn classes(&self) -> impl Iterator<Item = &ConfClass> {
        self.classes.values()
    }

    /// Number of defined classes.
    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    /// Create an object of a defined, non-abstract class.
    /// Fails if the id is already taken within the class.
    pub fn create_object(
        &mut self,
        class_name: impl Into<String>,
        id: impl Into<String>,
    ) -> CairnResult<ObjectRef> {
        let class_name = class_name.into();
        let id = id.into();
        let class = self
            .classes
            .get(&class_name)
            .ok_or_else(|| CairnError::validation(format!("unknown class '{class_name}'")))?;
        if class.is_abstract {
            return Err(CairnError::validation(format!(
                "class '{class_name}' is abstract"
            )));
        }
        let key = ObjectRef::new(&class_name, &id);
        if self.objects.contains_key(&key) {
            return Err(CairnError::validation(format!(
                "object '{key}' already exists"
            )));
        }
        self.objects
            .insert(key.clone(), ConfObject::new(class_name, id));
        Ok(key)
    }

    /// Find an object.
    pub fn object(&self, key: &ObjectRef) -> Option<&ConfObject> {
        self.objects.get(key)
    }

    /// Iterate over live objects in key order.
    pub fn objects(&self) -> impl Iterator<Item = &ConfObject> {
        self.objects.values()
    }

    /// Number of live objects.
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Set the values of one attribute on an object. An empty list unsets
    /// the attribute. Fails if the attribute is not declared on the object's
    /// class, or if a single-valued attribute receives more than one value.
    pub fn set_values(
        &mut self,
        key: &ObjectRef,
        attribute: &str,
        values: Vec<String>,
    ) -> CairnResult<()> {
        let class = self
            .classes
            .get(&key.class_name)
            .ok_or_else(|| CairnError::validation(format!("unknown class '{}'", key.class_name)))?;
        let decl = class.attribute(attribute).ok_or_else(|| {
            CairnError::validation(format!(
                "class '{}' has no attribute '{attribute}'",
                key.class_name
            ))
        })?;
        if !decl.is_multi_value && values.len() > 1 {
            return Err(CairnError::validation(format!(
                "attribute '{attribute}' of class '{}' is single-valued",
                key.class_name
            )));
        }
        let object = self
            .objects
            .get_mut(key)
            .ok_or_else(|| CairnError::validation(format!("unknown object '{key}'")))?;
        object.set_values(attribute, values);
        Ok(())
    }

    /// Set one value of a single-valued attribute.
    pub fn set_value(
        &mut self,
        key: &ObjectRef,
        attribute: &str,
        value: impl Into<String>,
    ) -> CairnResult<()> {
        self.set_values(key, attribute, vec![value.into()])
    }

    /// Set the targets of one relationship on an object. An empty list
    /// unsets the relationship. Fails if the relationship is not declared on
    /// the object's class.
    pub fn set_relations(
        &mut self,
        key: &ObjectRef,
        relationship: &str,
        targets: Vec<ObjectRef>,
    ) -> CairnResult<()> {
        let class = self
            .classes
            .get(&key.class_name)
            .ok_or_else(|| CairnError::validation(format!("unknown class '{}'", key.class_name)))?;
        if class.relationship(relationship).is_none() {
            return Err(CairnError::validation(format!(
                "class '{}' has no relationship '{relationship}'",
                key.class_name
            )));
        }
        let object = self
            .objects
            .get_mut(key)
            .ok_or_else(|| CairnError::validation(format!("unknown object '{key}'")))?;
        object.set_relations(relationship, targets);
        Ok(())
    }

    /// Set one target of a relationship.
    pub fn set_relation(
        &mut self,
        key: &ObjectRef,
        relationship: &str,
        target: ObjectRef,
    ) -> CairnResult<()> {
        self.set_relations(key, relationship, vec![target])
    }

    /// Remove an object. Returns whether it existed.
    pub fn erase_object(&mut self, key: &ObjectRef) -> bool {
        self.objects.remove(key).is_some()
    }

    /// Remove all objects, keeping class definitions.
    pub fn clear_objects(&mut self) {
        self.objects.clear();
    }

    /// Remove all classes and objects.
    pub fn clear(&mut self) {
        self.objects.clear();
        self.classes.clear();
    }
}
