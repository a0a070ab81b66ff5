use crate::errors::{ErrorKind, IdxdError, IdxdResult};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt::{Display, Formatter};

/// Largest integer magnitude an `f64` represents exactly.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// A totally ordered record key.
///
/// Keys identify records inside a store and order entries inside an index.
/// Three kinds exist and they sort by kind first:
///
/// * `Number` sorts before `String`
/// * `String` sorts before `Array`
/// * `Array` compares element-wise, a shorter prefix sorting first
///
/// Numbers must be finite; `-0.0` is normalised to `0.0` so both compare
/// equal. Booleans, `null` and objects are not valid keys.
///
/// # Examples
///
/// ```rust
/// use idxd::common::Key;
///
/// assert!(Key::from(10) < Key::from("a"));
/// assert!(Key::from("z") < Key::from(vec![Key::from(1)]));
/// ```
#[derive(Debug, Clone)]
pub enum Key {
    Number(f64),
    String(String),
    Array(Vec<Key>),
}

impl Key {
    /// Creates a numeric key, rejecting NaN and infinities.
    pub fn number(value: f64) -> IdxdResult<Key> {
        if !value.is_finite() {
            log::error!("Invalid numeric key {}", value);
            return Err(IdxdError::new(
                &format!("Invalid key: {} is not a finite number", value),
                ErrorKind::DataError,
            ));
        }
        Ok(Key::Number(if value == 0.0 { 0.0 } else { value }))
    }

    /// Converts a JSON value into a key, or `None` if the value is not a valid key.
    pub fn try_from_value(value: &Value) -> Option<Key> {
        match value {
            Value::Number(n) => n.as_f64().and_then(|f| Key::number(f).ok()),
            Value::String(s) => Some(Key::String(s.clone())),
            Value::Array(items) => items
                .iter()
                .map(Key::try_from_value)
                .collect::<Option<Vec<_>>>()
                .map(Key::Array),
            _ => None,
        }
    }

    /// Converts a JSON value into a key, failing with `DataError` when it is not one.
    pub fn from_value(value: &Value) -> IdxdResult<Key> {
        Key::try_from_value(value).ok_or_else(|| {
            log::error!("Value {} is not a valid key", value);
            IdxdError::new(
                &format!("Invalid key: {} is not a number, string or array of keys", value),
                ErrorKind::DataError,
            )
        })
    }

    /// Converts the key back into JSON. Integral numbers are written as integers.
    pub fn to_value(&self) -> Value {
        match self {
            Key::Number(n) => {
                if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
                    Value::from(*n as i64)
                } else {
                    serde_json::Number::from_f64(*n)
                        .map(Value::Number)
                        .unwrap_or(Value::Null)
                }
            }
            Key::String(s) => Value::String(s.clone()),
            Key::Array(items) => Value::Array(items.iter().map(Key::to_value).collect()),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Key::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Key::String(s) => Some(s),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Key::Number(_) => 0,
            Key::String(_) => 1,
            Key::Array(_) => 2,
        }
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Key::Number(a), Key::Number(b)) => a.total_cmp(b),
            (Key::String(a), Key::String(b)) => a.cmp(b),
            (Key::Array(a), Key::Array(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Key {}

impl Display for Key {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_value())
    }
}

macro_rules! key_from_integer {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Key {
                fn from(value: $t) -> Self {
                    Key::Number(value as f64)
                }
            }
        )*
    };
}

key_from_integer!(i32, i64, u32, u64, usize);

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Key::String(value.to_string())
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Key::String(value)
    }
}

impl From<Vec<Key>> for Key {
    fn from(value: Vec<Key>) -> Self {
        Key::Array(value)
    }
}

impl TryFrom<&Value> for Key {
    type Error = IdxdError;

    fn try_from(value: &Value) -> Result<Self, Self::Error> {
        Key::from_value(value)
    }
}

impl TryFrom<f64> for Key {
    type Error = IdxdError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Key::number(value)
    }
}
