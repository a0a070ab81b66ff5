use crate::common::{Key, KeyRange, Record};
use crate::errors::{ErrorKind, IdxdError, IdxdResult};
use crate::store::memory::engine::{EngineState, MemoryEngineInner, TransactionShared};
use crate::store::memory::transaction::{delete_records, request, write_record};
use crate::store::{CursorCallback, CursorProvider, EngineCursor, RequestCallback, TransactionOutcome};
use parking_lot::Mutex;
use std::sync::Arc;

/// Entry a cursor is positioned on: key, primary key and record.
type Position = (Key, Key, Record);

/// A live cursor request.
///
/// The cursor remembers the last visited `(key, primary key)` pair and
/// re-seeks past it on every advance, so records deleted or written while
/// iterating never derail the scan.
pub(crate) struct CursorRequest {
    engine: Arc<MemoryEngineInner>,
    transaction: Arc<TransactionShared>,
    store: String,
    index: Option<String>,
    range: Option<KeyRange>,
    position: Mutex<Option<(Key, Key)>>,
    callback: Mutex<Option<CursorCallback>>,
    advancing: Mutex<bool>,
}

impl CursorRequest {
    pub(crate) fn new(
        engine: Arc<MemoryEngineInner>,
        transaction: Arc<TransactionShared>,
        store: &str,
        index: Option<&str>,
        range: Option<KeyRange>,
        callback: CursorCallback,
    ) -> Arc<Self> {
        Arc::new(CursorRequest {
            engine,
            transaction,
            store: store.to_string(),
            index: index.map(str::to_string),
            range,
            position: Mutex::new(None),
            callback: Mutex::new(Some(callback)),
            advancing: Mutex::new(true),
        })
    }

    /// Queues the step that moves to the next record and notifies the callback.
    pub(crate) fn seek(self: &Arc<Self>) {
        let cursor = self.clone();
        self.engine.schedule(
            self.transaction.id,
            Box::new(move || {
                let next = {
                    let state = cursor.engine.lock();
                    cursor.next_entry(&state)
                };
                cursor.deliver(next);
            }),
        );
    }

    fn next_entry(&self, state: &EngineState) -> IdxdResult<Option<Position>> {
        self.transaction.check_scope(&self.store)?;
        let store = state.database(&self.transaction.database)?.store(&self.store)?;
        let position = self.position.lock().clone();
        match &self.index {
            None => Ok(store
                .next_record(self.range.as_ref(), position.as_ref().map(|(_, pk)| pk))
                .map(|(key, record)| (key.clone(), key, record))),
            Some(index) => store.next_index_entry(index, self.range.as_ref(), position.as_ref()),
        }
    }

    fn deliver(self: &Arc<Self>, next: IdxdResult<Option<Position>>) {
        *self.advancing.lock() = false;
        let callback = self.callback.lock().take();
        let mut callback = match callback {
            Some(callback) => callback,
            None => {
                log::warn!("Cursor on store '{}' has no callback to notify", self.store);
                return;
            }
        };

        match next {
            Ok(Some((key, primary_key, value))) => {
                *self.position.lock() = Some((key.clone(), primary_key.clone()));
                let cursor = EngineCursor::new(MemoryCursor {
                    request: self.clone(),
                    key,
                    primary_key,
                    value,
                });
                callback(Ok(Some(cursor)));
                let mut slot = self.callback.lock();
                if slot.is_none() {
                    *slot = Some(callback);
                }
            }
            Ok(None) => callback(Ok(None)),
            Err(e) => {
                callback(Err(e.clone()));
                self.engine
                    .fail(self.transaction.id, TransactionOutcome::Errored(e));
            }
        }
    }
}

/// Snapshot of the record a cursor visits.
pub(crate) struct MemoryCursor {
    request: Arc<CursorRequest>,
    key: Key,
    primary_key: Key,
    value: Record,
}

impl CursorProvider for MemoryCursor {
    fn key(&self) -> &Key {
        &self.key
    }

    fn primary_key(&self) -> &Key {
        &self.primary_key
    }

    fn value(&self) -> &Record {
        &self.value
    }

    fn advance(&self) {
        {
            let mut advancing = self.request.advancing.lock();
            if *advancing {
                log::warn!("Cursor on store '{}' is already advancing", self.request.store);
                return;
            }
            *advancing = true;
        }
        self.request.seek();
    }

    fn delete(&self, callback: RequestCallback<()>) {
        let store = self.request.store.clone();
        let key = self.primary_key.clone();
        request(&self.request.engine, &self.request.transaction, callback, move |state, shared| {
            delete_records(state, shared, &store, &KeyRange::only(key)).map(|_| ())
        });
    }

    fn update(&self, record: Record, callback: RequestCallback<Key>) {
        let store = self.request.store.clone();
        let key = self.primary_key.clone();
        request(&self.request.engine, &self.request.transaction, callback, move |state, shared| {
            let key_path = state
                .database(&shared.database)?
                .store(&store)?
                .options
                .key_path
                .clone();
            match key_path {
                Some(key_path) => {
                    if key_path.extract(&record).as_ref() != Some(&key) {
                        log::error!("Cursor update on '{}' changes the record's primary key", store);
                        return Err(IdxdError::new(
                            &format!("Cursor update must keep the primary key {} unchanged", key),
                            ErrorKind::DataError,
                        ));
                    }
                    write_record(state, shared, &store, record, None)
                }
                None => write_record(state, shared, &store, record, Some(key)),
            }
        });
    }
}
