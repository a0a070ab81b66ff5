//! Scripts and the executor that drives them.
//!
//! A script is a resumable state machine. Each time it is resumed it
//! either yields one [PendingOperation](crate::operation::PendingOperation),
//! asks for an abort, or finishes with a value. The executor issues the
//! yielded operation against the session's transaction and resumes the
//! script with the result, one operation at a time.

mod changes;
mod executor;
mod script;
mod selector;

pub(crate) use changes::*;
pub(crate) use executor::*;
pub use script::*;
pub use selector::*;
