use crate::common::{Key, Record};
use crate::errors::{ErrorKind, IdxdError, IdxdResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt::{Display, Formatter};

/// Path from a record to one of its keys.
///
/// A `Single` path is a dot separated chain of property names; the empty
/// path addresses the record itself. A `Compound` path lists several
/// single paths and yields an array key.
///
/// In JSON a key path is written either as a string or an array of strings.
///
/// # Examples
///
/// ```rust
/// use idxd::common::{Key, KeyPath};
/// use serde_json::json;
///
/// let path = KeyPath::from("author.name");
/// let record = json!({"author": {"name": "Ursula"}});
/// assert_eq!(path.extract(&record), Some(Key::from("Ursula")));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyPath {
    Single(String),
    Compound(Vec<String>),
}

impl KeyPath {
    /// The dot-joined form of the path, used as the default index identity.
    pub fn name(&self) -> String {
        match self {
            KeyPath::Single(path) => path.clone(),
            KeyPath::Compound(paths) => paths.join("."),
        }
    }

    pub fn is_compound(&self) -> bool {
        matches!(self, KeyPath::Compound(_))
    }

    /// Checks that every component is a valid property chain.
    pub fn validate(&self) -> IdxdResult<()> {
        match self {
            KeyPath::Single(path) => validate_single(path),
            KeyPath::Compound(paths) => {
                if paths.is_empty() {
                    log::error!("Compound key path must not be empty");
                    return Err(IdxdError::new(
                        "Invalid key path: compound key path must list at least one path",
                        ErrorKind::ValidationError,
                    ));
                }
                for path in paths {
                    if path.is_empty() {
                        log::error!("Compound key path {:?} contains an empty path", paths);
                        return Err(IdxdError::new(
                            "Invalid key path: compound key path contains an empty path",
                            ErrorKind::ValidationError,
                        ));
                    }
                    validate_single(path)?;
                }
                Ok(())
            }
        }
    }

    /// Resolves a single path to the raw value it addresses.
    ///
    /// Returns `None` for compound paths and for paths with a missing component.
    pub fn resolve<'a>(&self, record: &'a Record) -> Option<&'a Value> {
        match self {
            KeyPath::Single(path) => resolve_single(path, record),
            KeyPath::Compound(_) => None,
        }
    }

    /// Extracts the key at this path.
    ///
    /// Returns `None` when a component is missing or the addressed value
    /// is not a valid key.
    pub fn extract(&self, record: &Record) -> Option<Key> {
        match self {
            KeyPath::Single(path) => resolve_single(path, record).and_then(Key::try_from_value),
            KeyPath::Compound(paths) => paths
                .iter()
                .map(|path| resolve_single(path, record).and_then(Key::try_from_value))
                .collect::<Option<Vec<_>>>()
                .map(Key::Array),
        }
    }

    /// Writes `key` into the record at this path, creating missing objects on the way.
    pub fn inject(&self, record: &mut Record, key: &Key) -> IdxdResult<()> {
        let path = match self {
            KeyPath::Single(path) if !path.is_empty() => path,
            _ => {
                log::error!("Cannot inject a key at key path {}", self);
                return Err(IdxdError::new(
                    &format!("Cannot inject a generated key at key path '{}'", self),
                    ErrorKind::DataError,
                ));
            }
        };

        let mut current = record;
        let mut parts = path.split('.').peekable();
        while let Some(part) = parts.next() {
            let object = match current {
                Value::Object(object) => object,
                _ => {
                    log::error!("Cannot inject key at '{}': '{}' is not an object", path, part);
                    return Err(IdxdError::new(
                        &format!("Cannot inject a generated key at key path '{}'", path),
                        ErrorKind::DataError,
                    ));
                }
            };
            if parts.peek().is_none() {
                object.insert(part.to_string(), key.to_value());
                return Ok(());
            }
            current = object
                .entry(part.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
        }
        Ok(())
    }
}

impl Display for KeyPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyPath::Single(path) => write!(f, "{}", path),
            KeyPath::Compound(paths) => write!(f, "[{}]", paths.join(", ")),
        }
    }
}

impl From<&str> for KeyPath {
    fn from(value: &str) -> Self {
        KeyPath::Single(value.to_string())
    }
}

impl From<String> for KeyPath {
    fn from(value: String) -> Self {
        KeyPath::Single(value)
    }
}

impl From<Vec<&str>> for KeyPath {
    fn from(value: Vec<&str>) -> Self {
        KeyPath::Compound(value.into_iter().map(str::to_string).collect())
    }
}

impl From<Vec<String>> for KeyPath {
    fn from(value: Vec<String>) -> Self {
        KeyPath::Compound(value)
    }
}

fn validate_single(path: &str) -> IdxdResult<()> {
    if path.is_empty() {
        return Ok(());
    }
    let valid = path.split('.').all(|part| {
        let mut chars = part.chars();
        match chars.next() {
            Some(first) if first.is_alphabetic() || first == '_' || first == '$' => {
                chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
            }
            _ => false,
        }
    });
    if valid {
        Ok(())
    } else {
        log::error!("Invalid key path '{}'", path);
        Err(IdxdError::new(
            &format!("Invalid key path '{}'", path),
            ErrorKind::ValidationError,
        ))
    }
}

fn resolve_single<'a>(path: &str, record: &'a Record) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(record);
    }
    path.split('.')
        .try_fold(record, |current, part| current.as_object()?.get(part))
}
