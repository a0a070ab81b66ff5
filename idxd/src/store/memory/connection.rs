use crate::errors::{ErrorKind, IdxdError, IdxdResult};
use crate::store::memory::engine::MemoryEngineInner;
use crate::store::{ConnectionProvider, EngineTransaction, TransactionMode};
use itertools::Itertools;
use std::sync::Arc;

/// An open connection to one in-memory database.
pub(crate) struct MemoryConnection {
    engine: Arc<MemoryEngineInner>,
    id: u64,
    name: String,
}

impl MemoryConnection {
    pub(crate) fn new(engine: Arc<MemoryEngineInner>, id: u64, name: &str) -> Self {
        MemoryConnection {
            engine,
            id,
            name: name.to_string(),
        }
    }
}

impl ConnectionProvider for MemoryConnection {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn version(&self) -> u32 {
        self.engine
            .lock()
            .database(&self.name)
            .map(|database| database.version)
            .unwrap_or_default()
    }

    fn store_names(&self) -> Vec<String> {
        self.engine
            .lock()
            .database(&self.name)
            .map(|database| database.store_names())
            .unwrap_or_default()
    }

    fn begin_transaction(&self, scope: &[String], mode: TransactionMode) -> IdxdResult<EngineTransaction> {
        if !self.engine.is_connection_open(self.id) {
            log::error!("Transaction requested on closed connection to '{}'", self.name);
            return Err(IdxdError::new(
                &format!("Connection to database '{}' is closed", self.name),
                ErrorKind::DatabaseClosed,
            ));
        }
        if mode == TransactionMode::VersionChange {
            log::error!("Version-change transaction requested explicitly");
            return Err(IdxdError::new(
                "Version-change transactions are only granted during an upgrade",
                ErrorKind::InvalidOperation,
            ));
        }
        if scope.is_empty() {
            log::error!("Transaction requested with an empty scope");
            return Err(IdxdError::new(
                "A transaction needs at least one store in its scope",
                ErrorKind::InvalidOperation,
            ));
        }
        if self.engine.is_upgrading(&self.name) {
            log::error!("Transaction requested while '{}' is being upgraded", self.name);
            return Err(IdxdError::new(
                &format!("Database '{}' is being upgraded", self.name),
                ErrorKind::InvalidOperation,
            ));
        }

        let existing = self.store_names();
        if let Some(missing) = scope.iter().find(|store| !existing.contains(*store)) {
            log::error!("Store '{}' not found in database '{}'", missing, self.name);
            return Err(IdxdError::new(
                &format!("Store '{}' not found in database '{}'", missing, self.name),
                ErrorKind::StoreNotFound,
            ));
        }

        let scope: Vec<String> = scope.iter().cloned().unique().collect();
        Ok(self.engine.begin(&self.name, scope, mode, false, None))
    }

    fn close(&self) {
        self.engine.close_connection(self.id);
    }

    fn is_closed(&self) -> bool {
        !self.engine.is_connection_open(self.id)
    }
}
