use crate::common::{Key, Pending, Record, Target};
use crate::errors::IdxdResult;
use crate::idxd::Idxd;
use crate::operation::{FindPipeline, Operation, Outcome, PendingOperation, StoreOperation};
use crate::store::TransactionMode;
use crate::transaction::{script_fn, Script, Selector, Sequence, Step};
use std::collections::VecDeque;

/// Convenience operations on one store.
///
/// Every method runs exactly one transaction scoped to this store.
#[derive(Debug, Clone)]
pub struct StoreApi {
    db: Idxd,
    store: String,
}

impl StoreApi {
    pub(crate) fn new(db: Idxd, store: &str) -> Self {
        StoreApi {
            db,
            store: store.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.store
    }

    fn single<T: Send + 'static>(
        &self,
        mode: TransactionMode,
        operation: impl FnOnce(StoreOperation) -> PendingOperation + Send + 'static,
        finish: impl FnOnce(Outcome) -> IdxdResult<T> + Send + 'static,
    ) -> Pending<T> {
        let store = self.store.clone();
        let script = Sequence::new()
            .then(move |tx, _| Ok(operation(tx.store(&store)?)))
            .finish(finish);
        self.db.transaction(self.store.as_str(), mode, script)
    }

    pub fn count(&self) -> Pending<u64> {
        self.single(TransactionMode::ReadOnly, |store| store.count(), Outcome::into_count)
    }

    pub fn get(&self, key: impl Into<Key>) -> Pending<Option<Record>> {
        let key = key.into();
        self.single(
            TransactionMode::ReadOnly,
            move |store| store.get(key),
            Outcome::into_record,
        )
    }

    pub fn get_all(&self) -> Pending<Vec<Record>> {
        self.single(TransactionMode::ReadOnly, |store| store.get_all(), Outcome::into_records)
    }

    pub fn get_by_range(&self, target: Target) -> Pending<Vec<Record>> {
        self.single(
            TransactionMode::ReadOnly,
            move |store| store.get_by_range(target),
            Outcome::into_records,
        )
    }

    /// Collects the records `target` selects after `refine` has added its
    /// filters and maps.
    pub fn find(
        &self,
        target: Target,
        refine: impl FnOnce(FindPipeline) -> FindPipeline + Send + 'static,
    ) -> Pending<Vec<Record>> {
        self.single(
            TransactionMode::ReadOnly,
            move |store| refine(store.find(target)).to_array(),
            Outcome::into_records,
        )
    }

    pub fn set(&self, record: Record) -> Pending<Option<Record>> {
        self.single(
            TransactionMode::ReadWrite,
            move |store| store.set(record),
            Outcome::into_record,
        )
    }

    pub fn set_with_key(&self, record: Record, key: impl Into<Key>) -> Pending<Option<Record>> {
        let key = key.into();
        self.single(
            TransactionMode::ReadWrite,
            move |store| store.set_with_key(record, key),
            Outcome::into_record,
        )
    }

    /// Writes every record in one transaction, in order. Resolves to the
    /// records as stored.
    pub fn bulk_set(&self, records: Vec<Record>) -> Pending<Vec<Record>> {
        let store = self.store.clone();
        let mut remaining: VecDeque<Record> = records.into();
        self.db.transaction(
            self.store.as_str(),
            TransactionMode::ReadWrite,
            each_in_turn(move |tx| {
                Ok(match remaining.pop_front() {
                    Some(record) => Some(tx.store(&store)?.set(record)),
                    None => None,
                })
            }),
        )
    }

    pub fn delete(&self, key: impl Into<Key>) -> Pending<Option<Record>> {
        let key = key.into();
        self.single(
            TransactionMode::ReadWrite,
            move |store| store.delete(key),
            Outcome::into_record,
        )
    }

    /// Deletes every key in one transaction. Keys with no record are left
    /// out of the result.
    pub fn bulk_delete(&self, keys: Vec<Key>) -> Pending<Vec<Record>> {
        let store = self.store.clone();
        let mut remaining: VecDeque<Key> = keys.into();
        self.db.transaction(
            self.store.as_str(),
            TransactionMode::ReadWrite,
            each_in_turn(move |tx| {
                Ok(match remaining.pop_front() {
                    Some(key) => Some(tx.store(&store)?.delete(key)),
                    None => None,
                })
            }),
        )
    }

    /// Deletes every record. Resolves to the deleted records.
    pub fn clear(&self) -> Pending<Vec<Record>> {
        self.single(TransactionMode::ReadWrite, |store| store.clear(), Outcome::into_records)
    }
}

/// A script that yields whatever `next` produces until it returns `None`,
/// collecting every single-record outcome that found a record.
fn each_in_turn<F>(mut next: F) -> impl Script<Output = Vec<Record>>
where
    F: FnMut(&Selector) -> IdxdResult<Option<PendingOperation>> + Send + 'static,
{
    let mut collected = Vec::new();
    let mut started = false;
    script_fn(move |tx, input: Outcome| {
        if started {
            if let Some(record) = input.into_record()? {
                collected.push(record);
            }
        }
        started = true;
        Ok(match next(tx)? {
            Some(operation) => Step::Yield(operation),
            None => Step::Done(std::mem::take(&mut collected)),
        })
    })
}
