//! Sequential transaction scripts and versioned schema migration over an
//! auto-committing transactional key/value store.

pub mod common;
pub mod errors;
pub mod event;
pub mod idxd;
pub mod idxd_builder;
pub mod idxd_config;
pub mod migration;
pub mod operation;
pub mod store;
pub mod store_api;
pub mod transaction;

pub use crate::idxd::{ConnectionState, Idxd, Scope};
pub use crate::idxd_builder::IdxdBuilder;
pub use crate::idxd_config::IdxdConfig;
pub use crate::store_api::StoreApi;
