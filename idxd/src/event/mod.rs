//! Notifications a database instance publishes on its own event bus.

mod database_event;

pub use database_event::*;
