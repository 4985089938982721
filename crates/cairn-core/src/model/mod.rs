//! The in-memory configuration model.
//!
//! Classes describe structure (attributes, relationships, methods), objects
//! carry content, and the [`Kernel`] holds both. The relational codecs only
//! touch this model through the accessors and mutators defined here.

mod class;
mod kernel;
mod object;

pub use class::{
    AttrType, Attribute, Cardinality, ConfClass, Method, MethodImpl, Relationship,
};
pub use kernel::Kernel;
pub use object::{ConfObject, ObjectRef};
