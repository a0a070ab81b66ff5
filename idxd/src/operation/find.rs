use crate::common::{Record, Target};
use crate::errors::{IdxdError, IdxdResult};
use crate::operation::cursor::{acknowledge, scan};
use crate::operation::{Outcome, OutcomeCallback, PendingOperation};
use crate::transaction::ChangeLog;
use parking_lot::Mutex;
use std::sync::Arc;

enum Stage {
    Filter(Box<dyn Fn(&Record) -> bool + Send>),
    Map(Box<dyn Fn(Record) -> Record + Send>),
}

/// Runs a record through the stages; `None` once a filter rejects it.
fn apply(stages: &[Stage], record: Record) -> Option<Record> {
    stages.iter().try_fold(record, |record, stage| match stage {
        Stage::Filter(predicate) => predicate(&record).then_some(record),
        Stage::Map(mapper) => Some(mapper(record)),
    })
}

/// A lazy chain of filters and maps over the records of one store.
///
/// Stages run in the order they were added, once per record visited by
/// the cursor. Nothing touches the store until a terminal method turns the
/// pipeline into a [PendingOperation] and a script yields it.
pub struct FindPipeline {
    store: String,
    target: Target,
    stages: Vec<Stage>,
}

impl FindPipeline {
    pub(crate) fn new(store: &str, target: Target) -> Self {
        FindPipeline {
            store: store.to_string(),
            target,
            stages: Vec::new(),
        }
    }

    /// Keeps only records for which `predicate` holds.
    pub fn filter(mut self, predicate: impl Fn(&Record) -> bool + Send + 'static) -> Self {
        self.stages.push(Stage::Filter(Box::new(predicate)));
        self
    }

    /// Replaces each surviving record with `mapper`'s output.
    pub fn map(mut self, mapper: impl Fn(Record) -> Record + Send + 'static) -> Self {
        self.stages.push(Stage::Map(Box::new(mapper)));
        self
    }

    /// Collects every surviving record. Resolves to [Outcome::Records].
    pub fn to_array(self) -> PendingOperation {
        self.each(|_| {})
    }

    /// Calls `visitor` with each surviving record as the cursor reaches it
    /// and resolves to the collected records.
    pub fn each(self, mut visitor: impl FnMut(&Record) + Send + 'static) -> PendingOperation {
        let FindPipeline { store, target, stages } = self;
        PendingOperation::new(&store.clone(), "find", move |context, done| {
            scan(
                &context.transaction,
                &store,
                &target,
                Vec::new(),
                move |found: &mut Vec<Record>, cursor| {
                    if let Some(record) = apply(&stages, cursor.value().clone()) {
                        visitor(&record);
                        found.push(record);
                    }
                    Ok(())
                },
                move |result| done(result.map(Outcome::Records)),
            )
        })
    }

    /// Deletes the records that survive every stage. Resolves to the
    /// surviving records as the pipeline produced them.
    pub fn batch_delete(self) -> PendingOperation {
        let FindPipeline { store, target, stages } = self;
        PendingOperation::new(&store.clone(), "batch_delete", move |context, done| {
            let changes = context.changes.clone();
            let ack_store = store.clone();
            let change_store = store.clone();
            scan(
                &context.transaction,
                &store,
                &target,
                (Vec::new(), Vec::new()),
                move |(survivors, removed): &mut (Vec<Record>, Vec<Record>), cursor| {
                    if let Some(record) = apply(&stages, cursor.value().clone()) {
                        survivors.push(record);
                        removed.push(cursor.value().clone());
                        cursor.delete(acknowledge(&ack_store, "batch_delete"));
                    }
                    Ok(())
                },
                move |result| match result {
                    Ok((survivors, removed)) => {
                        changes.removed(&change_store, removed);
                        done(Ok(Outcome::Records(survivors)))
                    }
                    Err(e) => done(Err(e)),
                },
            )
        })
    }

    /// Rewrites each surviving record with `updater`; records for which
    /// `updater` returns `None` are left alone. Resolves once every update
    /// has been written and read back, to the records as stored.
    pub fn batch_update(
        self,
        updater: impl Fn(Record) -> Option<Record> + Send + 'static,
    ) -> PendingOperation {
        let FindPipeline { store, target, stages } = self;
        PendingOperation::new(&store.clone(), "batch_update", move |context, done| {
            let batch = BatchUpdate::new(&store, context.changes.clone(), done);
            let visit_batch = batch.clone();
            let scan_batch = batch.clone();
            let transaction = context.transaction.clone();
            let visit_store = store.clone();
            scan(
                &context.transaction,
                &store,
                &target,
                (),
                move |_, cursor| {
                    let updated = match apply(&stages, cursor.value().clone()).and_then(&updater) {
                        Some(updated) => updated,
                        None => return Ok(()),
                    };
                    let slot = visit_batch.reserve();
                    let read_batch = visit_batch.clone();
                    let transaction = transaction.clone();
                    let read_store = visit_store.clone();
                    cursor.update(
                        updated,
                        Box::new(move |result| match result {
                            Ok(key) => {
                                let fill_batch = read_batch.clone();
                                transaction.get(
                                    &read_store,
                                    key,
                                    Box::new(move |result| match result {
                                        Ok(stored) => fill_batch.fill(slot, stored),
                                        Err(e) => fill_batch.fail(e),
                                    }),
                                )
                            }
                            Err(e) => read_batch.fail(e),
                        }),
                    );
                    Ok(())
                },
                move |result: IdxdResult<()>| match result {
                    Ok(()) => scan_batch.scanned(),
                    Err(e) => scan_batch.fail(e),
                },
            );
        })
    }
}

struct BatchState {
    results: Vec<Option<Record>>,
    outstanding: usize,
    scanned: bool,
    done: Option<OutcomeCallback>,
}

/// Tracks updates issued by a batch update until each has been read back.
#[derive(Clone)]
struct BatchUpdate {
    store: String,
    changes: ChangeLog,
    state: Arc<Mutex<BatchState>>,
}

impl BatchUpdate {
    fn new(store: &str, changes: ChangeLog, done: OutcomeCallback) -> Self {
        BatchUpdate {
            store: store.to_string(),
            changes,
            state: Arc::new(Mutex::new(BatchState {
                results: Vec::new(),
                outstanding: 0,
                scanned: false,
                done: Some(done),
            })),
        }
    }

    fn reserve(&self) -> usize {
        let mut state = self.state.lock();
        state.results.push(None);
        state.outstanding += 1;
        state.results.len() - 1
    }

    fn fill(&self, slot: usize, record: Option<Record>) {
        {
            let mut state = self.state.lock();
            if let Some(entry) = state.results.get_mut(slot) {
                *entry = record;
            }
            state.outstanding = state.outstanding.saturating_sub(1);
        }
        self.settle();
    }

    fn scanned(&self) {
        self.state.lock().scanned = true;
        self.settle();
    }

    fn fail(&self, error: IdxdError) {
        let done = self.state.lock().done.take();
        if let Some(done) = done {
            done(Err(error));
        }
    }

    fn settle(&self) {
        let finished = {
            let mut state = self.state.lock();
            if !state.scanned || state.outstanding > 0 {
                return;
            }
            match state.done.take() {
                Some(done) => {
                    let records: Vec<Record> = state.results.drain(..).flatten().collect();
                    Some((done, records))
                }
                None => None,
            }
        };
        if let Some((done, records)) = finished {
            self.changes.added(&self.store, records.iter().cloned());
            done(Ok(Outcome::Records(records)));
        }
    }
}
