use crate::errors::{ErrorKind, IdxdError, IdxdResult};
use crate::store::memory::connection::MemoryConnection;
use crate::store::memory::database::{DatabaseData, UndoEntry};
use crate::store::memory::transaction::MemoryTransaction;
use crate::store::{
    BlockedCallback, EngineConnection, EngineTransaction, FinishCallback, RequestCallback,
    StorageEngine, StorageEngineProvider, TransactionMode, TransactionOutcome, UpgradeCallback,
    VersionChange,
};
use indexmap::IndexMap;
use parking_lot::{Mutex, MutexGuard};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

type Job = Box<dyn FnOnce() + Send>;

/// A queued unit of work. Tasks bound to a transaction are dropped once
/// that transaction has finished.
struct Task {
    transaction: Option<u64>,
    run: Job,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransactionState {
    /// Waiting for a conflicting transaction to finish
    Parked,
    /// Its tasks are being dispatched
    Active,
}

/// Identity and outcome of a transaction, shared with its handles.
pub(crate) struct TransactionShared {
    pub(crate) id: u64,
    pub(crate) database: String,
    pub(crate) scope: Vec<String>,
    pub(crate) mode: TransactionMode,
    pub(crate) outcome: Mutex<Option<TransactionOutcome>>,
}

impl TransactionShared {
    pub(crate) fn check_scope(&self, store: &str) -> IdxdResult<()> {
        if self.mode == TransactionMode::VersionChange || self.scope.iter().any(|s| s == store) {
            Ok(())
        } else {
            log::error!("Store '{}' is outside the scope of transaction {}", store, self.id);
            Err(IdxdError::new(
                &format!("Store '{}' is not part of this transaction's scope", store),
                ErrorKind::StoreNotFound,
            ))
        }
    }

    pub(crate) fn check_write(&self) -> IdxdResult<()> {
        if self.mode.is_write() {
            Ok(())
        } else {
            log::error!("Write attempted in read-only transaction {}", self.id);
            Err(IdxdError::new(
                "Cannot write inside a read-only transaction",
                ErrorKind::ReadOnlyError,
            ))
        }
    }

    fn conflicts_with(&self, other: &TransactionShared) -> bool {
        if self.database != other.database {
            return false;
        }
        if self.mode == TransactionMode::VersionChange || other.mode == TransactionMode::VersionChange {
            return true;
        }
        (self.mode.is_write() || other.mode.is_write())
            && self.scope.iter().any(|store| other.scope.contains(store))
    }
}

struct TransactionEntry {
    shared: Arc<TransactionShared>,
    state: TransactionState,
    outstanding: usize,
    backlog: VecDeque<Task>,
    journal: Vec<UndoEntry>,
    listeners: Vec<FinishCallback>,
    created_database: bool,
}

struct ConnectionEntry {
    database: String,
}

struct PendingDelete {
    database: String,
    on_done: RequestCallback<()>,
}

pub(crate) struct EngineState {
    databases: HashMap<String, DatabaseData>,
    connections: HashMap<u64, ConnectionEntry>,
    transactions: IndexMap<u64, TransactionEntry>,
    queue: VecDeque<Task>,
    pending_deletes: Vec<PendingDelete>,
    next_id: u64,
}

impl EngineState {
    fn new() -> Self {
        EngineState {
            databases: HashMap::new(),
            connections: HashMap::new(),
            transactions: IndexMap::new(),
            queue: VecDeque::new(),
            pending_deletes: Vec::new(),
            next_id: 1,
        }
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub(crate) fn database(&self, name: &str) -> IdxdResult<&DatabaseData> {
        self.databases.get(name).ok_or_else(|| database_missing(name))
    }

    /// The database and undo journal of a live transaction.
    pub(crate) fn context(&mut self, transaction: &TransactionShared) -> IdxdResult<(&mut DatabaseData, &mut Vec<UndoEntry>)> {
        let entry = self
            .transactions
            .get_mut(&transaction.id)
            .ok_or_else(|| transaction_inactive(transaction.id))?;
        let database = self
            .databases
            .get_mut(&transaction.database)
            .ok_or_else(|| database_missing(&transaction.database))?;
        Ok((database, &mut entry.journal))
    }

    pub(crate) fn is_live(&self, transaction: u64) -> bool {
        self.transactions.contains_key(&transaction)
    }

    fn has_open_connection(&self, database: &str) -> bool {
        self.connections.values().any(|c| c.database == database)
    }

    fn has_version_change(&self, database: &str) -> bool {
        self.transactions.values().any(|entry| {
            entry.shared.database == database && entry.shared.mode == TransactionMode::VersionChange
        })
    }

    /// Starts every parked transaction that no longer conflicts with a
    /// running one or with an earlier parked one.
    fn activate_parked(&mut self) {
        let ids: Vec<u64> = self.transactions.keys().copied().collect();
        for (position, id) in ids.iter().enumerate() {
            let candidate = match self.transactions.get(id) {
                Some(entry) if entry.state == TransactionState::Parked => entry.shared.clone(),
                _ => continue,
            };
            let blocked = ids[..position].iter().any(|earlier| {
                self.transactions
                    .get(earlier)
                    .map_or(false, |entry| entry.shared.conflicts_with(&candidate))
            }) || ids[position + 1..].iter().any(|later| {
                self.transactions.get(later).map_or(false, |entry| {
                    entry.state == TransactionState::Active && entry.shared.conflicts_with(&candidate)
                })
            });
            if blocked {
                continue;
            }
            if let Some(entry) = self.transactions.get_mut(id) {
                log::debug!("Starting parked transaction {}", id);
                entry.state = TransactionState::Active;
                let backlog: Vec<Task> = entry.backlog.drain(..).collect();
                self.queue.extend(backlog);
            }
        }
    }

    /// Removes a transaction, rolling back its journal unless it committed.
    fn finish(&mut self, id: u64, outcome: TransactionOutcome) -> Option<Vec<FinishCallback>> {
        let entry = self.transactions.shift_remove(&id)?;
        let committed = outcome.is_committed();
        if !committed {
            if let Some(database) = self.databases.get_mut(&entry.shared.database) {
                for undo in entry.journal.into_iter().rev() {
                    database.undo(undo);
                }
            }
            if entry.created_database {
                log::debug!("Discarding database '{}' created by a failed upgrade", entry.shared.database);
                self.databases.remove(&entry.shared.database);
            }
        }
        log::debug!(
            "Transaction {} finished: {}",
            id,
            if committed { "committed" } else { "rolled back" }
        );
        *entry.shared.outcome.lock() = Some(outcome);
        self.activate_parked();
        Some(entry.listeners)
    }
}

/// Shared core of the in-memory engine.
pub(crate) struct MemoryEngineInner {
    state: Mutex<EngineState>,
}

impl MemoryEngineInner {
    pub(crate) fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock()
    }

    fn schedule_detached(&self, run: Job) {
        self.state.lock().queue.push_back(Task {
            transaction: None,
            run,
        });
    }

    /// Queues work on behalf of a transaction, counting it as outstanding.
    pub(crate) fn schedule(&self, transaction: u64, run: Job) {
        let mut state = self.state.lock();
        let active = match state.transactions.get_mut(&transaction) {
            Some(entry) => {
                entry.outstanding += 1;
                entry.state == TransactionState::Active
            }
            None => {
                log::warn!("Dropping request against finished transaction {}", transaction);
                return;
            }
        };
        let task = Task {
            transaction: Some(transaction),
            run,
        };
        if active {
            state.queue.push_back(task);
        } else if let Some(entry) = state.transactions.get_mut(&transaction) {
            entry.backlog.push_back(task);
        }
    }

    /// Ends a transaction without committing and notifies its listeners
    /// from a separate task.
    pub(crate) fn fail(&self, transaction: u64, outcome: TransactionOutcome) {
        let mut state = self.state.lock();
        if let Some(listeners) = state.finish(transaction, outcome.clone()) {
            state.queue.push_back(Task {
                transaction: None,
                run: Box::new(move || notify(listeners, outcome)),
            });
        }
    }

    pub(crate) fn on_finish(&self, shared: &TransactionShared, listener: FinishCallback) {
        let mut state = self.state.lock();
        if let Some(entry) = state.transactions.get_mut(&shared.id) {
            entry.listeners.push(listener);
            return;
        }
        let outcome = shared.outcome.lock().clone();
        match outcome {
            Some(outcome) => state.queue.push_back(Task {
                transaction: None,
                run: Box::new(move || listener(outcome)),
            }),
            None => log::warn!("Transaction {} is unknown to the engine", shared.id),
        }
    }

    /// Registers a transaction and queues its first task.
    pub(crate) fn begin(
        self: &Arc<Self>,
        database: &str,
        scope: Vec<String>,
        mode: TransactionMode,
        created_database: bool,
        first: Option<Box<dyn FnOnce(EngineTransaction) + Send>>,
    ) -> EngineTransaction {
        let mut state = self.state.lock();
        let id = state.next_id();
        let shared = Arc::new(TransactionShared {
            id,
            database: database.to_string(),
            scope,
            mode,
            outcome: Mutex::new(None),
        });
        let parked = state
            .transactions
            .values()
            .any(|entry| entry.shared.conflicts_with(&shared));

        let handle = EngineTransaction::new(MemoryTransaction::new(self.clone(), shared.clone()));
        let first_handle = handle.clone();
        let task = Task {
            transaction: Some(id),
            run: Box::new(move || {
                if let Some(first) = first {
                    first(first_handle);
                }
            }),
        };

        let mut entry = TransactionEntry {
            shared,
            state: if parked {
                TransactionState::Parked
            } else {
                TransactionState::Active
            },
            outstanding: 1,
            backlog: VecDeque::new(),
            journal: Vec::new(),
            listeners: Vec::new(),
            created_database,
        };
        if parked {
            log::debug!("Transaction {} parked behind a conflicting transaction", id);
            entry.backlog.push_back(task);
        } else {
            state.queue.push_back(task);
        }
        state.transactions.insert(id, entry);
        log::debug!("Transaction {} started in {:?} mode on '{}'", id, mode, database);
        handle
    }

    /// Delivers one queued task.
    fn dispatch(&self) -> IdxdResult<bool> {
        let task = match self.state.lock().queue.pop_front() {
            Some(task) => task,
            None => return Ok(false),
        };

        let transaction = match task.transaction {
            Some(transaction) => transaction,
            None => {
                (task.run)();
                return Ok(true);
            }
        };

        if self.state.lock().is_live(transaction) {
            (task.run)();
        } else {
            log::debug!("Skipping task of finished transaction {}", transaction);
        }

        let committed = {
            let mut state = self.state.lock();
            let ready = match state.transactions.get_mut(&transaction) {
                Some(entry) => {
                    entry.outstanding = entry.outstanding.saturating_sub(1);
                    entry.outstanding == 0 && entry.state == TransactionState::Active
                }
                None => false,
            };
            if ready {
                state.finish(transaction, TransactionOutcome::Committed)
            } else {
                None
            }
        };
        if let Some(listeners) = committed {
            notify(listeners, TransactionOutcome::Committed);
        }
        Ok(true)
    }

    fn open(
        self: &Arc<Self>,
        name: &str,
        version: u32,
        on_upgrade: UpgradeCallback,
        on_done: RequestCallback<EngineConnection>,
    ) {
        if version == 0 {
            log::error!("Cannot open database '{}' at version 0", name);
            on_done(Err(IdxdError::new(
                "Database version must be at least 1",
                ErrorKind::ConnectionError,
            )));
            return;
        }

        let prepared = {
            let mut state = self.state.lock();
            let created = !state.databases.contains_key(name);
            let current = match state.databases.get(name) {
                Some(database) => database.version,
                None => {
                    state.databases.insert(name.to_string(), DatabaseData::new(name));
                    0
                }
            };
            if version < current {
                Err(IdxdError::new(
                    &format!(
                        "Requested version {} of database '{}' is lower than the stored version {}",
                        version, name, current
                    ),
                    ErrorKind::VersionError,
                ))
            } else if state.has_version_change(name) {
                Err(IdxdError::new(
                    &format!("Database '{}' is being upgraded by another connection", name),
                    ErrorKind::Blocked,
                ))
            } else {
                let id = state.next_id();
                state.connections.insert(
                    id,
                    ConnectionEntry {
                        database: name.to_string(),
                    },
                );
                Ok((id, current, created))
            }
        };

        let (connection_id, current, created) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                log::error!("Failed to open database '{}': {}", name, e);
                on_done(Err(e));
                return;
            }
        };

        let connection = EngineConnection::new(MemoryConnection::new(self.clone(), connection_id, name));
        if version == current {
            log::debug!("Opened database '{}' at version {}", name, version);
            on_done(Ok(connection));
            return;
        }

        log::debug!("Upgrading database '{}' from version {} to {}", name, current, version);
        let scope = self
            .state
            .lock()
            .database(name)
            .map(DatabaseData::store_names)
            .unwrap_or_default();
        let transaction = self.begin(
            name,
            scope,
            TransactionMode::VersionChange,
            created,
            Some(Box::new(move |transaction| {
                on_upgrade(VersionChange {
                    old_version: current,
                    new_version: version,
                    transaction,
                })
            })),
        );
        {
            let mut state = self.state.lock();
            if let Some(database) = state.databases.get_mut(name) {
                database.version = version;
            }
            if let Some(entry) = state.transactions.get_mut(&transaction.id()) {
                entry.journal.push(UndoEntry::RestoreVersion(current));
            }
        }

        let closing = connection.clone();
        transaction.on_finish(Box::new(move |outcome| match outcome {
            TransactionOutcome::Committed => on_done(Ok(connection)),
            TransactionOutcome::Aborted(e) | TransactionOutcome::Errored(e) => {
                log::debug!("Upgrade transaction failed: {}", e);
                closing.close();
                on_done(Err(e));
            }
        }));
    }

    pub(crate) fn close_connection(&self, id: u64) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.connections.remove(&id).is_none() {
            return;
        }
        log::debug!("Connection {} closed", id);

        let connections = &state.connections;
        let (ready, waiting): (Vec<PendingDelete>, Vec<PendingDelete>) = state
            .pending_deletes
            .drain(..)
            .partition(|pending| !connections.values().any(|c| c.database == pending.database));
        state.pending_deletes = waiting;
        for pending in ready {
            state.databases.remove(&pending.database);
            log::debug!("Deleted database '{}' after its connections closed", pending.database);
            let on_done = pending.on_done;
            state.queue.push_back(Task {
                transaction: None,
                run: Box::new(move || on_done(Ok(()))),
            });
        }
    }

    pub(crate) fn is_connection_open(&self, id: u64) -> bool {
        self.state.lock().connections.contains_key(&id)
    }

    pub(crate) fn is_upgrading(&self, database: &str) -> bool {
        self.state.lock().has_version_change(database)
    }

    fn delete_database(&self, name: &str, on_blocked: BlockedCallback, on_done: RequestCallback<()>) {
        let mut state = self.state.lock();
        if state.has_open_connection(name) {
            log::debug!("Deleting database '{}' is blocked by open connections", name);
            state.pending_deletes.push(PendingDelete {
                database: name.to_string(),
                on_done,
            });
            drop(state);
            on_blocked();
        } else {
            state.databases.remove(name);
            drop(state);
            log::debug!("Deleted database '{}'", name);
            on_done(Ok(()));
        }
    }
}

fn notify(listeners: Vec<FinishCallback>, outcome: TransactionOutcome) {
    for listener in listeners {
        listener(outcome.clone());
    }
}

fn database_missing(name: &str) -> IdxdError {
    log::error!("Database '{}' no longer exists", name);
    IdxdError::new(
        &format!("Database '{}' no longer exists", name),
        ErrorKind::DatabaseClosed,
    )
}

pub(crate) fn transaction_inactive(id: u64) -> IdxdError {
    IdxdError::new(
        &format!("Transaction {} has already finished", id),
        ErrorKind::TransactionInactive,
    )
}

/// A cooperative, single-threaded in-memory storage engine.
///
/// All requests are queued and nothing runs until [`dispatch`] is called,
/// which is what `Pending::wait` does. Data lives only as long as the
/// engine value and its clones.
///
/// [`dispatch`]: StorageEngineProvider::dispatch
///
/// # Examples
///
/// ```rust
/// use idxd::store::memory::MemoryEngine;
/// use idxd::store::StorageEngineProvider;
///
/// let engine = MemoryEngine::new();
/// assert!(!engine.dispatch().unwrap());
/// assert!(engine.database_names().is_empty());
/// ```
#[derive(Clone)]
pub struct MemoryEngine {
    inner: Arc<MemoryEngineInner>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        MemoryEngine {
            inner: Arc::new(MemoryEngineInner {
                state: Mutex::new(EngineState::new()),
            }),
        }
    }

    /// Number of queued tasks, for diagnostics.
    pub fn queued_tasks(&self) -> usize {
        self.inner.lock().queue.len()
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageEngineProvider for MemoryEngine {
    fn open_connection(
        &self,
        name: &str,
        version: u32,
        on_upgrade: UpgradeCallback,
        on_done: RequestCallback<EngineConnection>,
    ) {
        let inner = self.inner.clone();
        let name = name.to_string();
        self.inner.schedule_detached(Box::new(move || {
            inner.open(&name, version, on_upgrade, on_done)
        }));
    }

    fn delete_database(&self, name: &str, on_blocked: BlockedCallback, on_done: RequestCallback<()>) {
        let inner = self.inner.clone();
        let name = name.to_string();
        self.inner.schedule_detached(Box::new(move || {
            inner.delete_database(&name, on_blocked, on_done)
        }));
    }

    fn database_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.lock().databases.keys().cloned().collect();
        names.sort();
        names
    }

    fn dispatch(&self) -> IdxdResult<bool> {
        self.inner.dispatch()
    }
}

impl From<MemoryEngine> for StorageEngine {
    fn from(engine: MemoryEngine) -> Self {
        StorageEngine::new(engine)
    }
}
