use crate::common::{Key, KeyPath, KeyRange, Record};
use crate::errors::{ErrorKind, IdxdError, IdxdResult};
use crate::store::memory::cursor::CursorRequest;
use crate::store::memory::database::{DatabaseData, UndoEntry};
use crate::store::memory::engine::{transaction_inactive, EngineState, MemoryEngineInner, TransactionShared};
use crate::store::{
    CursorCallback, FinishCallback, IndexOptions, RequestCallback, StoreOptions, TransactionMode,
    TransactionOutcome, TransactionProvider,
};
use std::sync::Arc;

/// Handle to a transaction of the in-memory engine.
pub(crate) struct MemoryTransaction {
    engine: Arc<MemoryEngineInner>,
    shared: Arc<TransactionShared>,
}

impl MemoryTransaction {
    pub(crate) fn new(engine: Arc<MemoryEngineInner>, shared: Arc<TransactionShared>) -> Self {
        MemoryTransaction { engine, shared }
    }

    /// Runs a structure change synchronously inside a version-change transaction.
    fn structure<T>(
        &self,
        change: impl FnOnce(&mut DatabaseData, &mut Vec<UndoEntry>) -> IdxdResult<T>,
    ) -> IdxdResult<T> {
        if self.shared.mode != TransactionMode::VersionChange {
            log::error!("Structure change attempted outside a version-change transaction");
            return Err(IdxdError::new(
                "Stores and indexes can only be changed during a version upgrade",
                ErrorKind::InvalidOperation,
            ));
        }
        let mut state = self.engine.lock();
        let (database, journal) = state.context(&self.shared)?;
        change(database, journal)
    }
}

/// Queues a request on behalf of a transaction.
///
/// The request runs against the engine state when dispatched. A failing
/// request reports its error to the callback first and then fails the
/// whole transaction.
pub(crate) fn request<T, F>(
    engine: &Arc<MemoryEngineInner>,
    shared: &Arc<TransactionShared>,
    callback: RequestCallback<T>,
    op: F,
) where
    T: Send + 'static,
    F: FnOnce(&mut EngineState, &TransactionShared) -> IdxdResult<T> + Send + 'static,
{
    let task_engine = engine.clone();
    let task_shared = shared.clone();
    engine.schedule(
        shared.id,
        Box::new(move || {
            let result = {
                let mut state = task_engine.lock();
                op(&mut state, &task_shared)
            };
            match result {
                Ok(value) => callback(Ok(value)),
                Err(e) => {
                    callback(Err(e.clone()));
                    task_engine.fail(task_shared.id, TransactionOutcome::Errored(e));
                }
            }
        }),
    );
}

/// Writes a record inside a transaction and journals what it replaced.
pub(crate) fn write_record(
    state: &mut EngineState,
    shared: &TransactionShared,
    store: &str,
    record: Record,
    key: Option<Key>,
) -> IdxdResult<Key> {
    shared.check_scope(store)?;
    shared.check_write()?;
    let (database, journal) = state.context(shared)?;
    let (key, previous) = database.store_mut(store)?.put(record, key)?;
    journal.push(UndoEntry::Restore {
        store: store.to_string(),
        key: key.clone(),
        previous,
    });
    Ok(key)
}

/// Removes every record in `range` inside a transaction, journaling each removal.
pub(crate) fn delete_records(
    state: &mut EngineState,
    shared: &TransactionShared,
    store: &str,
    range: &KeyRange,
) -> IdxdResult<usize> {
    shared.check_scope(store)?;
    shared.check_write()?;
    let (database, journal) = state.context(shared)?;
    let removed = database.store(store)?.delete_range(range);
    let count = removed.len();
    journal.extend(removed.into_iter().map(|(key, record)| UndoEntry::Restore {
        store: store.to_string(),
        key,
        previous: Some(record),
    }));
    Ok(count)
}

impl TransactionProvider for MemoryTransaction {
    fn id(&self) -> u64 {
        self.shared.id
    }

    fn mode(&self) -> TransactionMode {
        self.shared.mode
    }

    fn scope(&self) -> Vec<String> {
        self.shared.scope.clone()
    }

    fn is_finished(&self) -> bool {
        self.shared.outcome.lock().is_some()
    }

    fn get(&self, store: &str, key: Key, callback: RequestCallback<Option<Record>>) {
        let store = store.to_string();
        request(&self.engine, &self.shared, callback, move |state, shared| {
            shared.check_scope(&store)?;
            Ok(state.database(&shared.database)?.store(&store)?.get(&key))
        });
    }

    fn put(&self, store: &str, record: Record, key: Option<Key>, callback: RequestCallback<Key>) {
        let store = store.to_string();
        request(&self.engine, &self.shared, callback, move |state, shared| {
            write_record(state, shared, &store, record, key)
        });
    }

    fn delete(&self, store: &str, range: KeyRange, callback: RequestCallback<()>) {
        let store = store.to_string();
        request(&self.engine, &self.shared, callback, move |state, shared| {
            delete_records(state, shared, &store, &range).map(|_| ())
        });
    }

    fn open_cursor(
        &self,
        store: &str,
        index: Option<&str>,
        range: Option<KeyRange>,
        callback: CursorCallback,
    ) {
        let cursor = CursorRequest::new(
            self.engine.clone(),
            self.shared.clone(),
            store,
            index,
            range,
            callback,
        );
        cursor.seek();
    }

    fn abort(&self) {
        log::debug!("Transaction {} aborted by request", self.shared.id);
        self.engine.fail(
            self.shared.id,
            TransactionOutcome::Aborted(IdxdError::new(
                "Transaction was aborted",
                ErrorKind::TransactionAborted,
            )),
        );
    }

    fn abort_with(&self, error: IdxdError) {
        log::debug!("Transaction {} failed: {}", self.shared.id, error);
        self.engine
            .fail(self.shared.id, TransactionOutcome::Errored(error));
    }

    fn on_finish(&self, listener: FinishCallback) {
        self.engine.on_finish(&self.shared, listener);
    }

    fn store_names(&self) -> IdxdResult<Vec<String>> {
        let state = self.engine.lock();
        if !state.is_live(self.shared.id) {
            return Err(transaction_inactive(self.shared.id));
        }
        Ok(state.database(&self.shared.database)?.store_names())
    }

    fn index_names(&self, store: &str) -> IdxdResult<Vec<String>> {
        self.shared.check_scope(store)?;
        let state = self.engine.lock();
        if !state.is_live(self.shared.id) {
            return Err(transaction_inactive(self.shared.id));
        }
        Ok(state.database(&self.shared.database)?.store(store)?.index_names())
    }

    fn create_store(&self, name: &str, options: StoreOptions) -> IdxdResult<()> {
        self.structure(|database, journal| {
            journal.push(database.create_store(name, options)?);
            log::debug!("Created store '{}' in '{}'", name, database.name);
            Ok(())
        })
    }

    fn delete_store(&self, name: &str) -> IdxdResult<()> {
        self.structure(|database, journal| {
            journal.push(database.delete_store(name)?);
            log::debug!("Deleted store '{}' from '{}'", name, database.name);
            Ok(())
        })
    }

    fn create_index(&self, store: &str, name: &str, key_path: &KeyPath, options: IndexOptions) -> IdxdResult<()> {
        self.structure(|database, journal| {
            journal.push(database.store_mut(store)?.create_index(name, key_path, options)?);
            log::debug!("Created index '{}' on store '{}'", name, store);
            Ok(())
        })
    }

    fn delete_index(&self, store: &str, name: &str) -> IdxdResult<()> {
        self.structure(|database, journal| {
            journal.push(database.store_mut(store)?.delete_index(name)?);
            log::debug!("Deleted index '{}' from store '{}'", name, store);
            Ok(())
        })
    }
}
