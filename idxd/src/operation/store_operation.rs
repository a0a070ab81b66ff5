use crate::common::{Key, KeyRange, Record, Target};
use crate::errors::IdxdResult;
use crate::operation::cursor::{acknowledge, scan};
use crate::operation::{FindPipeline, Outcome, OutcomeCallback, PendingOperation};
use crate::store::EngineTransaction;
use crate::transaction::ChangeLog;

/// What an issued operation runs against: the session's transaction and
/// the change log that feeds change notifications after commit.
pub(crate) struct OperationContext {
    pub(crate) transaction: EngineTransaction,
    pub(crate) changes: ChangeLog,
}

/// The verbs available on a single object store.
///
/// Every verb produces a [PendingOperation] that does nothing until a
/// script yields it; the result arrives as the next [Outcome].
pub trait Operation {
    /// Number of records in the store. Resolves to [Outcome::Count].
    fn count(&self) -> PendingOperation;

    /// Record stored under `key`. Resolves to [Outcome::Record].
    fn get(&self, key: Key) -> PendingOperation;

    /// Every record in primary-key order. Resolves to [Outcome::Records].
    fn get_all(&self) -> PendingOperation;

    /// Records selected by `target`, in scan order. Resolves to [Outcome::Records].
    fn get_by_range(&self, target: Target) -> PendingOperation;

    /// Inserts or replaces `record`, keyed by the store's key path or key
    /// generator. Resolves to the record as stored.
    fn set(&self, record: Record) -> PendingOperation;

    /// Inserts or replaces `record` under an explicit out-of-line key.
    fn set_with_key(&self, record: Record, key: Key) -> PendingOperation;

    /// Removes the record under `key`. Resolves to the removed record, or
    /// `None` when nothing was stored there.
    fn delete(&self, key: Key) -> PendingOperation;

    /// Removes every record `target` selects. Resolves to the removed records.
    fn delete_by_range(&self, target: Target) -> PendingOperation;

    /// Removes every record. Resolves to the removed records.
    fn clear(&self) -> PendingOperation;

    /// Starts a lazy filter/map pipeline over the records `target` selects.
    fn find(&self, target: Target) -> FindPipeline;
}

/// Operation builder bound to one store name.
#[derive(Debug, Clone)]
pub struct StoreOperation {
    store: String,
}

impl StoreOperation {
    pub(crate) fn new(store: &str) -> Self {
        StoreOperation {
            store: store.to_string(),
        }
    }

    pub fn store_name(&self) -> &str {
        &self.store
    }

    fn write(&self, verb: &'static str, record: Record, key: Option<Key>) -> PendingOperation {
        let store = self.store.clone();
        PendingOperation::new(&self.store, verb, move |context, done| {
            write_and_read_back(context, &store, record, key, done)
        })
    }
}

/// Puts a record, then reads it back so the caller sees the stored form
/// including any generated key.
fn write_and_read_back(
    context: &OperationContext,
    store: &str,
    record: Record,
    key: Option<Key>,
    done: OutcomeCallback,
) {
    let transaction = context.transaction.clone();
    let changes = context.changes.clone();
    let store_name = store.to_string();
    context.transaction.put(
        store,
        record,
        key,
        Box::new(move |result| match result {
            Ok(key) => {
                let read_store = store_name.clone();
                transaction.get(
                    &read_store,
                    key,
                    Box::new(move |result| match result {
                        Ok(stored) => {
                            if let Some(stored) = &stored {
                                changes.added(&store_name, [stored.clone()]);
                            }
                            done(Ok(Outcome::Record(stored)))
                        }
                        Err(e) => done(Err(e)),
                    }),
                )
            }
            Err(e) => done(Err(e)),
        }),
    );
}

/// Deletes what `target` selects through a cursor, collecting the removed
/// records.
fn delete_selected(context: &OperationContext, store: &str, target: Target, done: OutcomeCallback) {
    let changes = context.changes.clone();
    let store_name = store.to_string();
    let ack_store = store.to_string();
    scan(
        &context.transaction,
        store,
        &target,
        Vec::new(),
        move |removed: &mut Vec<Record>, cursor| {
            removed.push(cursor.value().clone());
            cursor.delete(acknowledge(&ack_store, "delete"));
            Ok(())
        },
        move |result: IdxdResult<Vec<Record>>| match result {
            Ok(removed) => {
                changes.removed(&store_name, removed.iter().cloned());
                done(Ok(Outcome::Records(removed)))
            }
            Err(e) => done(Err(e)),
        },
    );
}

impl Operation for StoreOperation {
    fn count(&self) -> PendingOperation {
        let store = self.store.clone();
        PendingOperation::new(&self.store, "count", move |context, done| {
            scan(
                &context.transaction,
                &store,
                &Target::all(),
                0u64,
                |count, _| {
                    *count += 1;
                    Ok(())
                },
                move |result| done(result.map(Outcome::Count)),
            )
        })
    }

    fn get(&self, key: Key) -> PendingOperation {
        let store = self.store.clone();
        PendingOperation::new(&self.store, "get", move |context, done| {
            context
                .transaction
                .get(&store, key, Box::new(move |result| done(result.map(Outcome::Record))))
        })
    }

    fn get_all(&self) -> PendingOperation {
        self.get_by_range(Target::all())
    }

    fn get_by_range(&self, target: Target) -> PendingOperation {
        let store = self.store.clone();
        PendingOperation::new(&self.store, "get_by_range", move |context, done| {
            scan(
                &context.transaction,
                &store,
                &target,
                Vec::new(),
                |records: &mut Vec<Record>, cursor| {
                    records.push(cursor.value().clone());
                    Ok(())
                },
                move |result| done(result.map(Outcome::Records)),
            )
        })
    }

    fn set(&self, record: Record) -> PendingOperation {
        self.write("set", record, None)
    }

    fn set_with_key(&self, record: Record, key: Key) -> PendingOperation {
        self.write("set_with_key", record, Some(key))
    }

    fn delete(&self, key: Key) -> PendingOperation {
        let store = self.store.clone();
        PendingOperation::new(&self.store, "delete", move |context, done| {
            delete_selected(
                context,
                &store,
                Target::range(KeyRange::only(key)),
                Box::new(move |result| {
                    done(result.and_then(Outcome::into_records).map(|removed| {
                        Outcome::Record(removed.into_iter().next())
                    }))
                }),
            )
        })
    }

    fn delete_by_range(&self, target: Target) -> PendingOperation {
        let store = self.store.clone();
        PendingOperation::new(&self.store, "delete_by_range", move |context, done| {
            delete_selected(context, &store, target, done)
        })
    }

    fn clear(&self) -> PendingOperation {
        let store = self.store.clone();
        PendingOperation::new(&self.store, "clear", move |context, done| {
            delete_selected(context, &store, Target::all(), done)
        })
    }

    fn find(&self, target: Target) -> FindPipeline {
        FindPipeline::new(&self.store, target)
    }
}
