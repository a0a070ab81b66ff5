use crate::common::{Pending, Resolver, SubscriberRef};
use crate::errors::{ErrorKind, IdxdError, IdxdResult};
use crate::event::{DatabaseEvent, DatabaseEventBus, DatabaseEventListener};
use crate::idxd_builder::IdxdBuilder;
use crate::idxd_config::IdxdConfig;
use crate::migration::{LostData, MigrationManager, SchemaSnapshot};
use crate::store::{EngineConnection, StorageEngine, TransactionMode, VersionChange};
use crate::store_api::StoreApi;
use crate::transaction::{Script, Session};
use parking_lot::Mutex;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

type ReadyWaiter = Box<dyn FnOnce(IdxdResult<EngineConnection>) + Send>;

/// Lifecycle of a database instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Opening,
    Open,
    Errored,
}

/// The stores a transaction covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope(Vec<String>);

impl Scope {
    pub fn names(&self) -> &[String] {
        &self.0
    }
}

impl From<&str> for Scope {
    fn from(store: &str) -> Self {
        Scope(vec![store.to_string()])
    }
}

impl From<String> for Scope {
    fn from(store: String) -> Self {
        Scope(vec![store])
    }
}

impl From<Vec<String>> for Scope {
    fn from(stores: Vec<String>) -> Self {
        Scope(stores)
    }
}

impl From<Vec<&str>> for Scope {
    fn from(stores: Vec<&str>) -> Self {
        Scope(stores.into_iter().map(str::to_string).collect())
    }
}

impl From<&[&str]> for Scope {
    fn from(stores: &[&str]) -> Self {
        Scope(stores.iter().map(|store| store.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for Scope {
    fn from(stores: [&str; N]) -> Self {
        Scope(stores.iter().map(|store| store.to_string()).collect())
    }
}

/// A database instance: a name, a storage engine and a version plan.
///
/// `Idxd` is a cheap handle; clones share the same connection and event
/// bus. Declare every schema version, then [open](Idxd::open) it and run
/// [transactions](Idxd::transaction) against it. Work requested while the
/// database is still opening waits until it is ready.
///
/// ```ignore
/// let db = Idxd::new("library")?;
/// db.version(1, SchemaSnapshot::new().store(StoreSpec::new("books").key_path("id")))?;
/// db.open().wait()?;
///
/// let title = db
///     .transaction("books", TransactionMode::ReadOnly, Sequence::new()
///         .then(|tx, _| Ok(tx.store("books")?.get(1.into())))
///         .finish(|book| book.into_record()))
///     .wait()?;
/// ```
#[derive(Clone)]
pub struct Idxd {
    inner: Arc<IdxdInner>,
}

impl Idxd {
    pub fn builder() -> IdxdBuilder {
        IdxdBuilder::new()
    }

    /// A database named `name` on a private in-memory engine.
    pub fn new(name: &str) -> IdxdResult<Idxd> {
        Idxd::builder().name(name).build()
    }

    pub fn with_engine(name: &str, engine: impl Into<StorageEngine>) -> IdxdResult<Idxd> {
        Idxd::builder().name(name).engine(engine).build()
    }

    pub(crate) fn from_config(config: IdxdConfig) -> Idxd {
        Idxd {
            inner: Arc::new(IdxdInner {
                config,
                events: DatabaseEventBus::new(),
                slot: Mutex::new(ConnectionSlot {
                    state: ConnectionState::Closed,
                    connection: None,
                    waiters: Vec::new(),
                }),
            }),
        }
    }

    /// Declares the schema of `version`. Only allowed before the first open.
    pub fn version(&self, version: u32, schema: SchemaSnapshot) -> IdxdResult<()> {
        self.inner.ensure_closed()?;
        self.inner.config.add_version(version, schema, None)
    }

    /// Declares `version` with a callback that receives the records of the
    /// stores this version deletes.
    pub fn version_with_rescue(
        &self,
        version: u32,
        schema: SchemaSnapshot,
        rescue: impl Fn(LostData) -> IdxdResult<()> + Send + Sync + 'static,
    ) -> IdxdResult<()> {
        self.inner.ensure_closed()?;
        self.inner
            .config
            .add_version(version, schema, Some(Arc::new(rescue)))
    }

    /// Opens the database at its latest declared version, migrating it
    /// first when the stored version is behind.
    ///
    /// Opening an open database resolves immediately. Concurrent calls
    /// while opening share the same result.
    pub fn open(&self) -> Pending<Idxd> {
        let engine = self.inner.config.engine();
        let (pending, resolver) = Pending::new(engine.clone());

        let version = {
            let mut slot = self.inner.slot.lock();
            let state = slot.state;
            match state {
                ConnectionState::Open => return Pending::settled(engine, Ok(self.clone())),
                ConnectionState::Opening => {
                    slot.waiters.push(self.ready_waiter(resolver));
                    return pending;
                }
                ConnectionState::Closed | ConnectionState::Errored => {}
            }

            let version = match self.inner.config.latest_version() {
                Some(version) => version,
                None => {
                    log::error!("Database '{}' has no declared schema version", self.name());
                    return Pending::settled(
                        engine,
                        Err(IdxdError::new(
                            "At least one schema version must be declared before opening",
                            ErrorKind::ValidationError,
                        )),
                    );
                }
            };
            self.inner.config.lock();
            slot.state = ConnectionState::Opening;
            slot.waiters.push(self.ready_waiter(resolver));
            version
        };

        log::debug!("Opening database '{}' at version {}", self.name(), version);
        let plan = self.inner.config.plan();
        let db = self.clone();
        engine.open_connection(
            &self.name(),
            version,
            Box::new(move |change: VersionChange| MigrationManager::new(plan, change).start()),
            Box::new(move |result| db.opened(result)),
        );
        pending
    }

    /// Closes the connection. Work requested afterwards fails with
    /// `DatabaseClosed` until the database is opened again.
    pub fn close(&self) -> IdxdResult<()> {
        let mut slot = self.inner.slot.lock();
        if slot.state == ConnectionState::Opening {
            log::error!("Cannot close database '{}' while it is opening", self.name());
            return Err(IdxdError::new(
                "Cannot close a database while it is opening",
                ErrorKind::InvalidOperation,
            ));
        }
        if let Some(connection) = slot.connection.take() {
            connection.close();
            log::debug!("Closed database '{}'", self.name());
        }
        slot.state = ConnectionState::Closed;
        Ok(())
    }

    /// Closes this instance's connection and deletes the database.
    pub fn delete_database(&self) -> Pending<()> {
        self.delete_database_with(|| {})
    }

    /// Like [delete_database](Idxd::delete_database), calling `on_blocked`
    /// while other connections keep the database open.
    pub fn delete_database_with(&self, on_blocked: impl FnOnce() + Send + 'static) -> Pending<()> {
        let engine = self.inner.config.engine();
        if let Err(e) = self.close() {
            return Pending::settled(engine, Err(e));
        }
        let (pending, resolver) = Pending::new(engine.clone());
        log::debug!("Deleting database '{}'", self.name());
        engine.delete_database(
            &self.name(),
            Box::new(on_blocked),
            Box::new(move |result| resolver.resolve(result)),
        );
        pending
    }

    /// Runs `script` as one transaction over `scope`.
    ///
    /// The result settles after the transaction commits. If the script
    /// aborts, fails, or any operation fails, nothing it wrote is kept and
    /// the result is the originating error.
    pub fn transaction<S>(&self, scope: impl Into<Scope>, mode: TransactionMode, script: S) -> Pending<S::Output>
    where
        S: Script + 'static,
    {
        let engine = self.inner.config.engine();
        if mode == TransactionMode::VersionChange {
            log::error!("Sessions cannot request a version-change transaction");
            return Pending::settled(
                engine,
                Err(IdxdError::new(
                    "Version-change transactions are only granted during an upgrade",
                    ErrorKind::InvalidOperation,
                )),
            );
        }

        let (pending, resolver) = Pending::new(engine);
        let scope = scope.into().0;
        let mut slot = self.inner.slot.lock();
        let state = slot.state;
        let connection = slot.connection.clone();
        match state {
            ConnectionState::Open => match connection {
                Some(connection) => {
                    drop(slot);
                    self.inner.start_session(&connection, &scope, mode, script, resolver);
                }
                None => resolver.resolve(Err(database_closed(&self.name()))),
            },
            ConnectionState::Opening => {
                let inner = self.inner.clone();
                slot.waiters.push(Box::new(move |result| match result {
                    Ok(connection) => inner.start_session(&connection, &scope, mode, script, resolver),
                    Err(e) => resolver.resolve(Err(e)),
                }));
            }
            ConnectionState::Closed | ConnectionState::Errored => {
                resolver.resolve(Err(database_closed(&self.name())))
            }
        }
        pending
    }

    /// Single-store convenience operations.
    pub fn store(&self, name: &str) -> StoreApi {
        StoreApi::new(self.clone(), name)
    }

    pub fn name(&self) -> String {
        self.inner.config.name()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.slot.lock().state
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Version of the open connection.
    pub fn current_version(&self) -> Option<u32> {
        self.inner
            .slot
            .lock()
            .connection
            .as_ref()
            .map(|connection| connection.version())
    }

    pub fn store_names(&self) -> IdxdResult<Vec<String>> {
        match &self.inner.slot.lock().connection {
            Some(connection) => Ok(connection.store_names()),
            None => Err(database_closed(&self.name())),
        }
    }

    pub fn config(&self) -> IdxdConfig {
        self.inner.config.clone()
    }

    pub fn subscribe(&self, listener: DatabaseEventListener) -> IdxdResult<SubscriberRef> {
        self.inner.events.register(listener)
    }

    pub fn unsubscribe(&self, subscriber: SubscriberRef) -> IdxdResult<()> {
        self.inner.events.deregister(subscriber)
    }

    fn ready_waiter(&self, resolver: Resolver<Idxd>) -> ReadyWaiter {
        let db = self.clone();
        Box::new(move |result| resolver.resolve(result.map(|_| db)))
    }

    fn opened(&self, result: IdxdResult<EngineConnection>) {
        let (waiters, event) = {
            let mut slot = self.inner.slot.lock();
            let event = match &result {
                Ok(connection) => {
                    log::debug!("Database '{}' is ready at version {}", self.name(), connection.version());
                    slot.state = ConnectionState::Open;
                    slot.connection = Some(connection.clone());
                    DatabaseEvent::Ready(connection.clone())
                }
                Err(e) => {
                    log::debug!("Failed to open database '{}': {}", self.name(), e);
                    slot.state = ConnectionState::Errored;
                    slot.connection = None;
                    DatabaseEvent::Error(e.clone())
                }
            };
            (std::mem::take(&mut slot.waiters), event)
        };

        self.inner.publish(event);
        for waiter in waiters {
            waiter(result.clone());
        }
    }
}

impl Debug for Idxd {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Idxd")
            .field("name", &self.name())
            .field("state", &self.state())
            .finish()
    }
}

struct ConnectionSlot {
    state: ConnectionState,
    connection: Option<EngineConnection>,
    waiters: Vec<ReadyWaiter>,
}

struct IdxdInner {
    config: IdxdConfig,
    events: DatabaseEventBus,
    slot: Mutex<ConnectionSlot>,
}

impl IdxdInner {
    fn ensure_closed(&self) -> IdxdResult<()> {
        let state = self.slot.lock().state;
        if state != ConnectionState::Closed || self.config.is_locked() {
            log::error!("Schema versions can only be declared before the database is opened");
            return Err(IdxdError::new(
                "Schema versions can only be declared before the database is opened",
                ErrorKind::InvalidOperation,
            ));
        }
        Ok(())
    }

    fn start_session<S: Script + 'static>(
        &self,
        connection: &EngineConnection,
        scope: &[String],
        mode: TransactionMode,
        script: S,
        resolver: Resolver<S::Output>,
    ) {
        match connection.begin_transaction(scope, mode) {
            Ok(transaction) => Session::run(transaction, script, self.events.clone(), resolver),
            Err(e) => {
                log::debug!("Failed to begin transaction over {:?}: {}", scope, e);
                self.publish(DatabaseEvent::Error(e.clone()));
                resolver.resolve(Err(e));
            }
        }
    }

    fn publish(&self, event: DatabaseEvent) {
        if let Err(e) = self.events.publish(event) {
            log::warn!("Failed to publish database event: {}", e);
        }
    }
}

fn database_closed(name: &str) -> IdxdError {
    log::error!("Database '{}' is not open", name);
    IdxdError::new(
        &format!("Database '{}' is not open", name),
        ErrorKind::DatabaseClosed,
    )
}
