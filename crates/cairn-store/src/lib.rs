//! cairn-store - Relational persistence for cairn.
//!
//! Stores the hierarchical configuration model into SQLite with full
//! version history. Structure (classes) and content (objects) version
//! independently per named schema; content versions are stored full or as
//! row-level deltas against a base version, and read back by walking the
//! base chain. Tags bind immutable names to version pairs, and the archive
//! keeps an append-only provenance log.
//!
//! # Example
//!
//! ```
//! use cairn_core::{AttrType, Attribute, ConfClass, Kernel, StoreConfig};
//! use cairn_store::Session;
//!
//! let session = Session::in_memory(StoreConfig::default())?;
//!
//! let classes = vec![
//!     ConfClass::new("App").with_attribute(Attribute::new("Host", AttrType::String)),
//! ];
//! session.put_schema(&classes, "CONF", 0, "initial")?;
//!
//! let mut kernel = Kernel::new();
//! session.get_schema(&mut kernel, "CONF", 0, true)?;
//! let app = kernel.create_object("App", "a1")?;
//! kernel.set_value(&app, "Host", "node-1")?;
//!
//! let stats = session.put_data(&kernel, None, "CONF", 0, 0, 0, "first", 100)?;
//! session.tag_data("CONF", stats.schema_version, stats.data_version, "nightly")?;
//! # cairn_core::CairnResult::Ok(())
//! ```

mod directory;
mod engine;
mod registry;
mod rows;
mod schema;
mod session;

pub use directory::{DataVersionRecord, SchemaVersionRecord};
pub use engine::PutDataStats;
pub use registry::{ArchiveRecord, TagRecord};
pub use rows::{ObjectRow, RelationRow, RowEntry, RowOp, RowSet, ValueRow};
pub use session::{AccessMode, Session};
