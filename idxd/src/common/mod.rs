//! Shared building blocks: keys, key paths, ranges, records, the event bus
//! and the small synchronisation helpers the rest of the crate is built on.

mod constants;
mod countdown;
mod event_bus;
mod key;
mod key_path;
mod pending;
mod range;
mod record;
mod target;

pub use constants::*;
pub use countdown::*;
pub use event_bus::*;
pub use key::*;
pub use key_path::*;
pub use pending::*;
pub use range::*;
pub use record::*;
pub use target::*;
