//! cairn-core - Core library for cairn.
//!
//! This crate provides the in-memory configuration model (classes,
//! attributes, relationships, objects), the error hierarchy, and store
//! configuration for the cairn versioned configuration archive.
//!
//! # Example
//!
//! ```
//! use cairn_core::{AttrType, Attribute, ConfClass, Kernel};
//!
//! let mut kernel = Kernel::new();
//! kernel.add_class(
//!     ConfClass::new("Module")
//!         .with_attribute(Attribute::new("Channels", AttrType::U32)),
//! )?;
//!
//! let module = kernel.create_object("Module", "mod-01")?;
//! kernel.set_value(&module, "Channels", "64")?;
//! # cairn_core::CairnResult::Ok(())
//! ```

pub mod config;
pub mod error;
pub mod model;

// Re-export commonly used types
pub use config::StoreConfig;
pub use error::{CairnError, CairnResult, ErrorCode};
pub use model::{
    AttrType, Attribute, Cardinality, ConfClass, ConfObject, Kernel, Method, MethodImpl,
    ObjectRef, Relationship,
};
