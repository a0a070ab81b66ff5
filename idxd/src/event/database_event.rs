use crate::common::{IdxdEventBus, Record};
use crate::errors::{IdxdError, IdxdResult};
use crate::store::EngineConnection;
use anyhow::Error;
use basu::error::BasuError;
use basu::event::Event;
use basu::Handle;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

/// Records a committed transaction added to or removed from one store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeInfo {
    store: String,
    added: Vec<Record>,
    removed: Vec<Record>,
}

impl ChangeInfo {
    pub fn new(store: &str) -> Self {
        ChangeInfo {
            store: store.to_string(),
            added: Vec::new(),
            removed: Vec::new(),
        }
    }

    pub fn store(&self) -> &str {
        &self.store
    }

    /// Records written by the transaction, as stored.
    pub fn added(&self) -> &[Record] {
        &self.added
    }

    /// Records the transaction deleted, as they were before deletion.
    pub fn removed(&self) -> &[Record] {
        &self.removed
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    pub(crate) fn push_added(&mut self, records: impl IntoIterator<Item = Record>) {
        self.added.extend(records);
    }

    pub(crate) fn push_removed(&mut self, records: impl IntoIterator<Item = Record>) {
        self.removed.extend(records);
    }
}

/// Lifecycle and data notifications of one database instance.
#[derive(Clone)]
pub enum DatabaseEvent {
    /// The connection is open and every migration step has committed.
    Ready(EngineConnection),
    /// Opening, a migration step, or a session failed.
    Error(IdxdError),
    /// A session committed changes to a store.
    Change(ChangeInfo),
}

impl DatabaseEvent {
    pub fn name(&self) -> &'static str {
        match self {
            DatabaseEvent::Ready(_) => "ready",
            DatabaseEvent::Error(_) => "error",
            DatabaseEvent::Change(_) => "change",
        }
    }
}

impl Debug for DatabaseEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            DatabaseEvent::Ready(connection) => f
                .debug_tuple("Ready")
                .field(&connection.name())
                .finish(),
            DatabaseEvent::Error(error) => f.debug_tuple("Error").field(error).finish(),
            DatabaseEvent::Change(change) => f.debug_tuple("Change").field(change).finish(),
        }
    }
}

/// The bus each database instance publishes its events on.
pub type DatabaseEventBus = IdxdEventBus<DatabaseEvent, DatabaseEventListener>;

/// Callback signature for database event listeners.
///
/// Any `Send + Sync` closure taking a [DatabaseEvent] and returning
/// `IdxdResult<()>` implements it.
pub trait DatabaseEventCallback: Send + Sync + Fn(DatabaseEvent) -> IdxdResult<()> {}

impl<F> DatabaseEventCallback for F where F: Send + Sync + Fn(DatabaseEvent) -> IdxdResult<()> {}

/// Listener for database events.
///
/// ```ignore
/// database.subscribe(DatabaseEventListener::new(|event| {
///     println!("event: {}", event.name());
///     Ok(())
/// }))?;
/// ```
#[derive(Clone)]
pub struct DatabaseEventListener {
    on_event: Arc<dyn DatabaseEventCallback>,
}

impl DatabaseEventListener {
    pub fn new(on_event: impl DatabaseEventCallback + 'static) -> Self {
        DatabaseEventListener {
            on_event: Arc::new(on_event),
        }
    }
}

impl Handle<DatabaseEvent> for DatabaseEventListener {
    fn handle(&self, event: &Event<DatabaseEvent>) -> Result<(), BasuError> {
        match (self.on_event)(event.data.clone()) {
            Ok(_) => Ok(()),
            Err(e) => Err(BasuError::HandlerError(Error::from(e))),
        }
    }
}

impl Debug for DatabaseEventListener {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseEventListener").finish()
    }
}
