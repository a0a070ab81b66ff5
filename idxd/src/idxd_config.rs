//! Configuration of one database instance.

use crate::errors::{ErrorKind, IdxdError, IdxdResult};
use crate::migration::{RescueCallback, SchemaSnapshot, VersionPlan};
use crate::store::memory::MemoryEngine;
use crate::store::StorageEngine;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Name, storage engine and version plan of a database.
///
/// The configuration is frozen once the database starts opening; every
/// setter fails with `InvalidOperation` afterwards.
#[derive(Clone)]
pub struct IdxdConfig {
    inner: Arc<IdxdConfigInner>,
}

impl Default for IdxdConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl IdxdConfig {
    /// Creates an unnamed configuration backed by a fresh in-memory engine.
    pub fn new() -> Self {
        IdxdConfig {
            inner: Arc::new(IdxdConfigInner::new()),
        }
    }

    pub fn name(&self) -> String {
        self.inner.name.read().clone()
    }

    pub fn set_name(&self, name: &str) -> IdxdResult<()> {
        self.inner.set_name(name)
    }

    pub fn engine(&self) -> StorageEngine {
        self.inner.engine.read().clone()
    }

    pub fn set_engine(&self, engine: StorageEngine) -> IdxdResult<()> {
        self.inner.set_engine(engine)
    }

    /// Declares the schema of `version`.
    pub fn add_version(
        &self,
        version: u32,
        snapshot: SchemaSnapshot,
        rescue: Option<RescueCallback>,
    ) -> IdxdResult<()> {
        self.inner.add_version(version, snapshot, rescue)
    }

    pub fn plan(&self) -> VersionPlan {
        self.inner.plan.read().clone()
    }

    pub fn latest_version(&self) -> Option<u32> {
        self.inner.plan.read().latest_version()
    }

    pub fn is_locked(&self) -> bool {
        self.inner.locked.load(Ordering::Relaxed)
    }

    /// Checks the configuration is complete enough to open a database.
    pub fn validate(&self) -> IdxdResult<()> {
        self.inner.validate()
    }

    pub(crate) fn lock(&self) {
        self.inner.locked.store(true, Ordering::Relaxed);
    }
}

struct IdxdConfigInner {
    locked: AtomicBool,
    name: RwLock<String>,
    engine: RwLock<StorageEngine>,
    plan: RwLock<VersionPlan>,
}

impl IdxdConfigInner {
    fn new() -> Self {
        IdxdConfigInner {
            locked: AtomicBool::from(false),
            name: RwLock::new(String::new()),
            engine: RwLock::new(MemoryEngine::new().into()),
            plan: RwLock::new(VersionPlan::new()),
        }
    }

    fn ensure_unlocked(&self, what: &str) -> IdxdResult<()> {
        if self.locked.load(Ordering::Relaxed) {
            log::error!("Cannot change {} after the database started opening", what);
            return Err(IdxdError::new(
                &format!("Cannot change {} after the database started opening", what),
                ErrorKind::InvalidOperation,
            ));
        }
        Ok(())
    }

    fn set_name(&self, name: &str) -> IdxdResult<()> {
        self.ensure_unlocked("the database name")?;
        if name.trim().is_empty() {
            log::error!("Database name cannot be empty");
            return Err(IdxdError::new(
                "Database name cannot be empty",
                ErrorKind::ValidationError,
            ));
        }
        *self.name.write() = name.to_string();
        Ok(())
    }

    fn set_engine(&self, engine: StorageEngine) -> IdxdResult<()> {
        self.ensure_unlocked("the storage engine")?;
        *self.engine.write() = engine;
        Ok(())
    }

    fn add_version(
        &self,
        version: u32,
        snapshot: SchemaSnapshot,
        rescue: Option<RescueCallback>,
    ) -> IdxdResult<()> {
        self.ensure_unlocked("the schema")?;
        self.plan.write().add(version, snapshot, rescue)
    }

    fn validate(&self) -> IdxdResult<()> {
        if self.name.read().is_empty() {
            log::error!("Database name is not set");
            return Err(IdxdError::new(
                "Database name is not set",
                ErrorKind::ValidationError,
            ));
        }
        Ok(())
    }
}
