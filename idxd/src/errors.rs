use backtrace::Backtrace;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::result::Result;
use std::sync::Arc;

/// Error kinds for idxd operations.
///
/// Each kind names one category of failure so callers can branch on
/// `error.kind()` instead of matching message text.
///
/// # Examples
///
/// ```rust
/// use idxd::errors::{ErrorKind, IdxdError, IdxdResult};
///
/// fn example() -> IdxdResult<()> {
///     Err(IdxdError::new("store 'books' not found", ErrorKind::StoreNotFound))
/// }
///
/// assert_eq!(example().unwrap_err().kind(), &ErrorKind::StoreNotFound);
/// ```
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum ErrorKind {
    // Connection Errors
    /// The engine could not open the connection
    ConnectionError,
    /// Requested version is lower than the stored version
    VersionError,
    /// Other open connections prevent the request
    Blocked,
    /// The database is not open
    DatabaseClosed,

    // Transaction Errors
    /// The transaction was aborted explicitly
    TransactionAborted,
    /// A request was issued against a finished transaction
    TransactionInactive,
    /// A write was issued inside a read-only transaction
    ReadOnlyError,

    // Data Errors
    /// A unique index or primary key constraint was violated
    ConstraintError,
    /// A key, key path or key range is invalid
    DataError,
    /// The named store does not exist or is outside the transaction scope
    StoreNotFound,
    /// The named index does not exist on the store
    IndexNotFound,
    /// A store with that name already exists
    StoreAlreadyExists,
    /// An index with that name already exists on the store
    IndexAlreadyExists,
    /// Error mapping a typed value to or from a record
    ObjectMappingError,

    // Usage Errors
    /// The operation is not valid in the current state
    InvalidOperation,
    /// A schema or argument failed validation
    ValidationError,
    /// A session script reported a failure
    ScriptError,

    // Migration Errors
    /// Error while walking the version plan
    MigrationError,

    // Event Errors
    /// Error in event delivery
    EventError,

    /// Internal error (usually indicates a bug)
    InternalError,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::ConnectionError => write!(f, "Connection error"),
            ErrorKind::VersionError => write!(f, "Version error"),
            ErrorKind::Blocked => write!(f, "Blocked"),
            ErrorKind::DatabaseClosed => write!(f, "Database closed"),
            ErrorKind::TransactionAborted => write!(f, "Transaction aborted"),
            ErrorKind::TransactionInactive => write!(f, "Transaction inactive"),
            ErrorKind::ReadOnlyError => write!(f, "Read-only error"),
            ErrorKind::ConstraintError => write!(f, "Constraint error"),
            ErrorKind::DataError => write!(f, "Data error"),
            ErrorKind::StoreNotFound => write!(f, "Store not found"),
            ErrorKind::IndexNotFound => write!(f, "Index not found"),
            ErrorKind::StoreAlreadyExists => write!(f, "Store already exists"),
            ErrorKind::IndexAlreadyExists => write!(f, "Index already exists"),
            ErrorKind::ObjectMappingError => write!(f, "Object mapping error"),
            ErrorKind::InvalidOperation => write!(f, "Invalid operation"),
            ErrorKind::ValidationError => write!(f, "Validation error"),
            ErrorKind::ScriptError => write!(f, "Script error"),
            ErrorKind::MigrationError => write!(f, "Migration error"),
            ErrorKind::EventError => write!(f, "Event error"),
            ErrorKind::InternalError => write!(f, "Internal error"),
        }
    }
}

/// Custom idxd error type.
///
/// `IdxdError` carries a message, a kind and an optional cause. One
/// transaction failure is delivered both to the failing request and to the
/// session awaiting the transaction outcome, so errors are cloned freely.
///
/// # Examples
///
/// ```rust
/// use idxd::errors::{ErrorKind, IdxdError};
///
/// let cause = IdxdError::new("duplicate key", ErrorKind::ConstraintError);
/// let err = IdxdError::new_with_cause("put failed", ErrorKind::ScriptError, cause);
/// assert!(err.cause().is_some());
/// ```
#[derive(Clone)]
pub struct IdxdError {
    message: String,
    error_kind: ErrorKind,
    cause: Option<Box<IdxdError>>,
    backtrace: Arc<Backtrace>,
}

impl IdxdError {
    /// Creates a new `IdxdError` with the specified message and error kind.
    pub fn new(message: &str, error_kind: ErrorKind) -> Self {
        IdxdError {
            message: message.to_string(),
            error_kind,
            cause: None,
            backtrace: Arc::new(Backtrace::new()),
        }
    }

    /// Creates a new `IdxdError` that wraps an underlying cause.
    pub fn new_with_cause(message: &str, error_kind: ErrorKind, cause: IdxdError) -> Self {
        IdxdError {
            message: message.to_string(),
            error_kind,
            cause: Some(Box::new(cause)),
            backtrace: Arc::new(Backtrace::new()),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.error_kind
    }

    pub fn cause(&self) -> Option<&IdxdError> {
        self.cause.as_deref()
    }
}

impl Display for IdxdError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Debug for IdxdError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.cause {
            Some(cause) => write!(f, "{} ({})\nCaused by: {:?}", self.message, self.error_kind, cause),
            None => write!(f, "{} ({})\n{:?}", self.message, self.error_kind, self.backtrace),
        }
    }
}

impl Error for IdxdError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self.cause {
            Some(cause) => Some(cause.as_ref()),
            None => None,
        }
    }
}

/// A result type alias for idxd operations.
pub type IdxdResult<T> = Result<T, IdxdError>;

impl From<serde_json::Error> for IdxdError {
    fn from(err: serde_json::Error) -> Self {
        IdxdError::new(
            &format!("Record mapping error: {}", err),
            ErrorKind::ObjectMappingError,
        )
    }
}

impl From<String> for IdxdError {
    fn from(msg: String) -> Self {
        IdxdError::new(&msg, ErrorKind::InternalError)
    }
}

impl From<&str> for IdxdError {
    fn from(msg: &str) -> Self {
        IdxdError::new(msg, ErrorKind::InternalError)
    }
}
