//! Versioned schema declarations and the migration walk that applies them.
//!
//! Callers declare one [SchemaSnapshot] per version. When a database is
//! opened behind the latest declared version, the engine grants a
//! version-change transaction and the migration manager diffs each
//! version against the live structure, applying the difference in place.

mod manager;
mod plan;
mod schema;

pub(crate) use manager::*;
pub use schema::*;
