use crate::errors::IdxdResult;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// A stored value. Stores do not enforce any row schema.
pub type Record = serde_json::Value;

/// Converts a typed value into a record.
///
/// # Examples
///
/// ```rust
/// use idxd::common::{from_record, to_record};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize, PartialEq, Debug)]
/// struct Book { id: u32, title: String }
///
/// let book = Book { id: 1, title: "Dune".into() };
/// let record = to_record(&book).unwrap();
/// assert_eq!(from_record::<Book>(record).unwrap(), book);
/// ```
pub fn to_record<T: Serialize>(value: &T) -> IdxdResult<Record> {
    Ok(serde_json::to_value(value)?)
}

/// Converts a record back into a typed value.
pub fn from_record<T: DeserializeOwned>(record: Record) -> IdxdResult<T> {
    Ok(serde_json::from_value(record)?)
}

/// Converts a list of records into typed values, failing on the first mismatch.
pub fn from_records<T: DeserializeOwned>(records: Vec<Record>) -> IdxdResult<Vec<T>> {
    records.into_iter().map(from_record).collect()
}
