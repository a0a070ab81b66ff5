use crate::common::{Key, KeyPath, KeyRange, Record};
use crate::errors::{IdxdError, IdxdResult};
use std::fmt::{Debug, Formatter};
use std::ops::Deref;
use std::sync::Arc;

/// Single-shot completion of an engine request.
///
/// Engines never invoke a request callback from inside the call that
/// issued the request; completions are always delivered by
/// [`StorageEngineProvider::dispatch`].
pub type RequestCallback<T> = Box<dyn FnOnce(IdxdResult<T>) + Send>;

/// Per-record notification of a cursor request.
///
/// Called with `Ok(Some(cursor))` for each visited record, `Ok(None)` once
/// the range is exhausted, or `Err` if the request failed. After a record
/// notification the cursor only moves on when [`CursorProvider::advance`]
/// is called.
pub type CursorCallback = Box<dyn FnMut(IdxdResult<Option<EngineCursor>>) + Send>;

/// Terminal notification of a transaction.
pub type FinishCallback = Box<dyn FnOnce(TransactionOutcome) + Send>;

/// Invoked inside the version-change transaction granted on upgrade.
pub type UpgradeCallback = Box<dyn FnOnce(VersionChange) + Send>;

/// Invoked when other open connections delay a database deletion.
pub type BlockedCallback = Box<dyn FnOnce() + Send>;

/// Access mode of an engine transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionMode {
    ReadOnly,
    ReadWrite,
    /// Granted by the engine during an upgrade; may change the structure.
    VersionChange,
}

impl TransactionMode {
    pub fn is_write(&self) -> bool {
        !matches!(self, TransactionMode::ReadOnly)
    }
}

/// The one terminal notification every transaction emits.
#[derive(Debug, Clone)]
pub enum TransactionOutcome {
    Committed,
    Aborted(IdxdError),
    Errored(IdxdError),
}

impl TransactionOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, TransactionOutcome::Committed)
    }

    /// The originating error of a failed transaction.
    pub fn error(&self) -> Option<&IdxdError> {
        match self {
            TransactionOutcome::Committed => None,
            TransactionOutcome::Aborted(e) | TransactionOutcome::Errored(e) => Some(e),
        }
    }
}

/// Primary key policy of a store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreOptions {
    pub key_path: Option<KeyPath>,
    pub auto_increment: bool,
}

/// Behaviour of a secondary index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexOptions {
    pub unique: bool,
    pub multi_entry: bool,
}

/// Payload of the upgrade notification.
pub struct VersionChange {
    pub old_version: u32,
    pub new_version: u32,
    pub transaction: EngineTransaction,
}

/// A transactional key/value storage engine.
///
/// The engine is cooperative: nothing happens until [`dispatch`] is
/// called, and each call delivers at most one queued notification.
///
/// [`dispatch`]: StorageEngineProvider::dispatch
pub trait StorageEngineProvider: Send + Sync {
    /// Opens a connection to `name` at `version`, creating the database if needed.
    ///
    /// If the stored version is lower, `on_upgrade` runs inside a
    /// version-change transaction first and `on_done` only fires once that
    /// transaction has finished.
    fn open_connection(
        &self,
        name: &str,
        version: u32,
        on_upgrade: UpgradeCallback,
        on_done: RequestCallback<EngineConnection>,
    );

    /// Deletes the database `name`, waiting for its open connections to close.
    fn delete_database(&self, name: &str, on_blocked: BlockedCallback, on_done: RequestCallback<()>);

    /// Names of every database the engine holds.
    fn database_names(&self) -> Vec<String>;

    /// Delivers one queued notification. Returns `false` when idle.
    fn dispatch(&self) -> IdxdResult<bool>;
}

/// An open connection to one database.
pub trait ConnectionProvider: Send + Sync {
    fn name(&self) -> String;

    fn version(&self) -> u32;

    fn store_names(&self) -> Vec<String>;

    /// Starts a transaction over `scope`.
    ///
    /// Fails synchronously when the connection is closed, the scope is
    /// empty or names a missing store, or `mode` is `VersionChange`.
    fn begin_transaction(&self, scope: &[String], mode: TransactionMode) -> IdxdResult<EngineTransaction>;

    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// An engine transaction. It auto-commits once no request is outstanding.
pub trait TransactionProvider: Send + Sync {
    fn id(&self) -> u64;

    fn mode(&self) -> TransactionMode;

    fn scope(&self) -> Vec<String>;

    fn is_finished(&self) -> bool;

    fn get(&self, store: &str, key: Key, callback: RequestCallback<Option<Record>>);

    /// Upserts a record and reports the key it was stored under.
    fn put(&self, store: &str, record: Record, key: Option<Key>, callback: RequestCallback<Key>);

    /// Removes every record whose primary key lies in `range`.
    fn delete(&self, store: &str, range: KeyRange, callback: RequestCallback<()>);

    fn open_cursor(
        &self,
        store: &str,
        index: Option<&str>,
        range: Option<KeyRange>,
        callback: CursorCallback,
    );

    /// Aborts the transaction, rolling back everything it wrote.
    fn abort(&self);

    /// Fails the transaction with a caller supplied error.
    fn abort_with(&self, error: IdxdError);

    /// Registers a listener for the terminal notification.
    fn on_finish(&self, listener: FinishCallback);

    fn store_names(&self) -> IdxdResult<Vec<String>>;

    fn index_names(&self, store: &str) -> IdxdResult<Vec<String>>;

    fn create_store(&self, name: &str, options: StoreOptions) -> IdxdResult<()>;

    fn delete_store(&self, name: &str) -> IdxdResult<()>;

    fn create_index(&self, store: &str, name: &str, key_path: &KeyPath, options: IndexOptions) -> IdxdResult<()>;

    fn delete_index(&self, store: &str, name: &str) -> IdxdResult<()>;
}

/// The record a cursor is positioned on.
pub trait CursorProvider: Send + Sync {
    /// The index key for index cursors, the primary key otherwise.
    fn key(&self) -> &Key;

    fn primary_key(&self) -> &Key;

    fn value(&self) -> &Record;

    /// Moves on to the next record; the cursor callback fires again.
    fn advance(&self);

    fn delete(&self, callback: RequestCallback<()>);

    fn update(&self, record: Record, callback: RequestCallback<Key>);
}

macro_rules! engine_handle {
    ($(#[$meta:meta])* $name:ident, $provider:ident) => {
        $(#[$meta])*
        #[derive(Clone)]
        pub struct $name {
            inner: Arc<dyn $provider>,
        }

        impl $name {
            pub fn new<T: $provider + 'static>(inner: T) -> Self {
                $name { inner: Arc::new(inner) }
            }
        }

        impl Deref for $name {
            type Target = Arc<dyn $provider>;

            fn deref(&self) -> &Self::Target {
                &self.inner
            }
        }
    };
}

engine_handle!(
    /// Shared handle to a storage engine.
    StorageEngine,
    StorageEngineProvider
);

engine_handle!(
    /// Shared handle to an open connection.
    EngineConnection,
    ConnectionProvider
);

engine_handle!(
    /// Shared handle to an engine transaction.
    EngineTransaction,
    TransactionProvider
);

engine_handle!(
    /// A cursor positioned on one record.
    EngineCursor,
    CursorProvider
);

impl Debug for EngineConnection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineConnection")
            .field("name", &self.inner.name())
            .field("version", &self.inner.version())
            .finish()
    }
}

impl Debug for EngineTransaction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineTransaction")
            .field("id", &self.inner.id())
            .field("mode", &self.inner.mode())
            .finish()
    }
}
