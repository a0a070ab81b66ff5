use crate::common::{from_record, from_records, Record};
use crate::errors::{ErrorKind, IdxdError, IdxdResult};
use crate::operation::OperationContext;
use serde::de::DeserializeOwned;
use std::fmt::{Debug, Formatter};

/// Completion of an issued operation.
pub(crate) type OutcomeCallback = Box<dyn FnOnce(IdxdResult<Outcome>) + Send>;

type Issue = Box<dyn FnOnce(&OperationContext, OutcomeCallback) + Send>;

/// The value an operation resolves to, fed back into the script.
///
/// A script's first step always receives `Empty`.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Empty,
    Count(u64),
    Record(Option<Record>),
    Records(Vec<Record>),
}

impl Outcome {
    pub fn into_count(self) -> IdxdResult<u64> {
        match self {
            Outcome::Count(count) => Ok(count),
            other => Err(mismatch("a count", &other)),
        }
    }

    pub fn into_record(self) -> IdxdResult<Option<Record>> {
        match self {
            Outcome::Record(record) => Ok(record),
            other => Err(mismatch("a record", &other)),
        }
    }

    pub fn into_records(self) -> IdxdResult<Vec<Record>> {
        match self {
            Outcome::Records(records) => Ok(records),
            other => Err(mismatch("a list of records", &other)),
        }
    }

    /// Maps a single record outcome onto a typed value.
    pub fn into_typed<T: DeserializeOwned>(self) -> IdxdResult<Option<T>> {
        self.into_record()?.map(from_record).transpose()
    }

    /// Maps a list outcome onto typed values.
    pub fn into_typed_list<T: DeserializeOwned>(self) -> IdxdResult<Vec<T>> {
        from_records(self.into_records()?)
    }
}

fn mismatch(expected: &str, actual: &Outcome) -> IdxdError {
    log::error!("Expected {} but the operation produced {:?}", expected, actual);
    IdxdError::new(
        &format!("Expected {} but the operation produced {:?}", expected, actual),
        ErrorKind::ScriptError,
    )
}

/// An operation bound to one store and one verb, not yet issued.
///
/// Scripts yield pending operations; the executor issues them against the
/// session's transaction one at a time.
pub struct PendingOperation {
    store: String,
    verb: &'static str,
    issue: Issue,
}

impl PendingOperation {
    pub(crate) fn new(
        store: &str,
        verb: &'static str,
        issue: impl FnOnce(&OperationContext, OutcomeCallback) + Send + 'static,
    ) -> Self {
        PendingOperation {
            store: store.to_string(),
            verb,
            issue: Box::new(issue),
        }
    }

    pub fn store(&self) -> &str {
        &self.store
    }

    pub fn verb(&self) -> &'static str {
        self.verb
    }

    /// Sends the operation to the engine; `done` fires once with its result.
    pub(crate) fn issue(self, context: &OperationContext, done: OutcomeCallback) {
        log::debug!(
            "Issuing {} on store '{}' in transaction {}",
            self.verb,
            self.store,
            context.transaction.id()
        );
        (self.issue)(context, done)
    }
}

impl Debug for PendingOperation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingOperation")
            .field("store", &self.store)
            .field("verb", &self.verb)
            .finish()
    }
}
