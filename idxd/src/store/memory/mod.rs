//! A cooperative in-memory storage engine.
//!
//! Every request is queued and only runs when the engine is dispatched.
//! Transactions auto-commit as soon as one of their tasks finishes with no
//! further request outstanding, conflicting transactions are started in
//! arrival order, and an undo journal rolls back everything a failed
//! transaction wrote, including store and index changes made during an
//! upgrade.

mod connection;
mod cursor;
mod database;
mod engine;
mod transaction;

pub use engine::MemoryEngine;
