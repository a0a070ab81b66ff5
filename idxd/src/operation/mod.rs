//! Store operations a transaction script can yield.
//!
//! [StoreOperation] builds [PendingOperation]s for the verbs of one store,
//! and [FindPipeline] chains filters and maps ahead of a terminal verb.
//! Every multi-record verb is a cursor walk over the engine.

mod cursor;
mod find;
mod outcome;
mod store_operation;

pub(crate) use cursor::scan;
pub use find::*;
pub use outcome::*;
pub use store_operation::*;
