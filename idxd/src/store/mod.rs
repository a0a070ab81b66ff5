//! The storage engine boundary and its in-memory implementation.
//!
//! The orchestration layer never touches records directly. It talks to a
//! [`StorageEngine`] through four seams:
//!
//! - [`StorageEngineProvider`]: open and delete databases, dispatch work
//! - [`ConnectionProvider`]: begin transactions on an open database
//! - [`TransactionProvider`]: per-store requests, cursors and structure changes
//! - [`CursorProvider`]: the record a cursor is positioned on
//!
//! Each request completes through a single-shot callback that the engine
//! delivers later, never from inside the issuing call.

mod engine;
pub mod memory;

pub use engine::*;
