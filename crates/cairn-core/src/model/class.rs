//! Class definitions: the structural half of the configuration model.

use serde::{Deserialize, Serialize};

/// Scalar type of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttrType {
    Bool,
    S8,
    U8,
    S16,
    U16,
    S32,
    U32,
    S64,
    U64,
    Float,
    Double,
    Date,
    Time,
    String,
    Enum,
    Class,
}

impl AttrType {
    /// Convert to string for storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::S8 => "s8",
            Self::U8 => "u8",
            Self::S16 => "s16",
            Self::U16 => "u16",
            Self::S32 => "s32",
            Self::U32 => "u32",
            Self::S64 => "s64",
            Self::U64 => "u64",
            Self::Float => "float",
            Self::Double => "double",
            Self::Date => "date",
            Self::Time => "time",
            Self::String => "string",
            Self::Enum => "enum",
            Self::Class => "class",
        }
    }

    /// Parse from string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "bool" => Some(Self::Bool),
            "s8" => Some(Self::S8),
            "u8" => Some(Self::U8),
            "s16" => Some(Self::S16),
            "u16" => Some(Self::U16),
            "s32" => Some(Self::S32),
            "u32" => Some(Self::U32),
            "s64" => Some(Self::S64),
            "u64" => Some(Self::U64),
            "float" => Some(Self::Float),
            "double" => Some(Self::Double),
            "date" => Some(Self::Date),
            "time" => Some(Self::Time),
            "string" => Some(Self::String),
            "enum" => Some(Self::Enum),
            "class" => Some(Self::Class),
            _ => None,
        }
    }
}

/// Cardinality bound of a relationship end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    Zero,
    One,
    Many,
}

impl Cardinality {
    /// Convert to string for storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Zero => "zero",
            Self::One => "one",
            Self::Many => "many",
        }
    }

    /// Parse from string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "zero" => Some(Self::Zero),
            "one" => Some(Self::One),
            "many" => Some(Self::Many),
            _ => None,
        }
    }
}

/// An attribute declaration on a class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    /// Attribute name, unique within the class.
    pub name: String,
    /// Scalar type of each value.
    pub attr_type: AttrType,
    /// Optional range constraint (e.g. an enum value list).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range: Option<String>,
    /// Optional initial value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub init_value: Option<String>,
    /// Whether the attribute holds an ordered list of values.
    pub is_multi_value: bool,
    /// Whether the attribute may be left unset.
    pub is_nullable: bool,
    /// Human-readable description.
    pub description: String,
}

impl Attribute {
    /// Create a single-valued, nullable attribute.
    pub fn new(name: impl Into<String>, attr_type: AttrType) -> Self {
        Self {
            name: name.into(),
            attr_type,
            range: None,
            init_value: None,
            is_multi_value: false,
            is_nullable: true,
            description: String::new(),
        }
    }

    /// Builder: set the range constraint.
    pub fn with_range(mut self, range: impl Into<String>) -> Self {
        self.range = Some(range.into());
        self
    }

    /// Builder: set the initial value.
    pub fn with_init_value(mut self, value: impl Into<String>) -> Self {
        self.init_value = Some(value.into());
        self
    }

    /// Builder: make the attribute multi-valued.
    pub fn multi_value(mut self) -> Self {
        self.is_multi_value = true;
        self
    }

    /// Builder: forbid unset values.
    pub fn not_null(mut self) -> Self {
        self.is_nullable = false;
        self
    }

    /// Builder: set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// A relationship declaration on a class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    /// Relationship name, unique within the class.
    pub name: String,
    /// Name of the target class.
    pub class_type: String,
    /// Lower cardinality bound.
    pub low_cc: Cardinality,
    /// Upper cardinality bound.
    pub high_cc: Cardinality,
    /// Whether the target is part of this object (composition).
    pub is_composite: bool,
    /// Whether the target may belong to at most one composite parent.
    pub is_exclusive: bool,
    /// Whether the target's lifetime is bound to this object.
    pub is_dependent: bool,
    /// Human-readable description.
    pub description: String,
}

impl Relationship {
    /// Create a zero-to-one reference relationship.
    pub fn new(name: impl Into<String>, class_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            class_type: class_type.into(),
            low_cc: Cardinality::Zero,
            high_cc: Cardinality::One,
            is_composite: false,
            is_exclusive: false,
            is_dependent: false,
            description: String::new(),
        }
    }

    /// Builder: set the cardinality bounds.
    pub fn with_cardinality(mut self, low: Cardinality, high: Cardinality) -> Self {
        self.low_cc = low;
        self.high_cc = high;
        self
    }

    /// Builder: allow many targets.
    pub fn many(mut self) -> Self {
        self.high_cc = Cardinality::Many;
        self
    }

    /// Builder: mark as composite.
    pub fn composite(mut self) -> Self {
        self.is_composite = true;
        self
    }

    /// Builder: mark as exclusive.
    pub fn exclusive(mut self) -> Self {
        self.is_exclusive = true;
        self
    }

    /// Builder: mark as dependent.
    pub fn dependent(mut self) -> Self {
        self.is_dependent = true;
        self
    }

    /// Builder: set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// One implementation of a method, in a given language.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodImpl {
    pub language: String,
    pub prototype: String,
    pub body: String,
}

/// A method declaration on a class. Bodies are optionally skipped on schema
/// read when only data access is needed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Method {
    pub name: String,
    pub description: String,
    pub implementations: Vec<MethodImpl>,
}

impl Method {
    /// Create a method with no implementations.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            implementations: Vec::new(),
        }
    }

    /// Builder: set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Builder: add an implementation.
    pub fn with_implementation(
        mut self,
        language: impl Into<String>,
        prototype: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        self.implementations.push(MethodImpl {
            language: language.into(),
            prototype: prototype.into(),
            body: body.into(),
        });
        self
    }
}

/// A class definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfClass {
    /// Class name, unique within a schema version.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Whether the class may have direct instances.
    pub is_abstract: bool,
    /// Direct superclass names.
    pub superclasses: Vec<String>,
    /// Attribute declarations, in declaration order.
    pub attributes: Vec<Attribute>,
    /// Relationship declarations, in declaration order.
    pub relationships: Vec<Relationship>,
    /// Method declarations, in declaration order.
    pub methods: Vec<Method>,
}

impl ConfClass {
    /// Create an empty concrete class.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            is_abstract: false,
            superclasses: Vec::new(),
            attributes: Vec::new(),
            relationships: Vec::new(),
            methods: Vec::new(),
        }
    }

    /// Builder: set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Builder: mark as abstract.
    pub fn abstract_class(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    /// Builder: add a direct superclass.
    pub fn with_superclass(mut self, name: impl Into<String>) -> Self {
        self.superclasses.push(name.into());
        self
    }

    /// Builder: add an attribute.
    pub fn with_attribute(mut self, attribute: Attribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    /// Builder: add a relationship.
    pub fn with_relationship(mut self, relationship: Relationship) -> Self {
        self.relationships.push(relationship);
        self
    }

    /// Builder: add a method.
    pub fn with_method(mut self, method: Method) -> Self {
        self.methods.push(method);
        self
    }

    /// Find a declared attribute by name.
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Find a declared relationship by name.
    pub fn relationship(&self, name: &str) -> Option<&Relationship> {
        self.relationships.iter().find(|r| r.name == name)
    }
}
