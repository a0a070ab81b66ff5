use crate::common::KeyRange;

/// Where a scan reads its records from.
///
/// A scan either walks the store itself in primary key order, or walks a
/// named index in index key order. Either way an optional range restricts
/// which keys are visited.
///
/// # Examples
///
/// ```rust
/// use idxd::common::{KeyRange, Target};
///
/// let by_author = Target::index("author", KeyRange::only("Le Guin"));
/// assert_eq!(by_author.index_name(), Some("author"));
/// assert!(Target::all().key_range().is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    ByPrimaryKey(Option<KeyRange>),
    ByIndex(String, Option<KeyRange>),
}

impl Target {
    /// Every record of the store, in primary key order.
    pub fn all() -> Target {
        Target::ByPrimaryKey(None)
    }

    pub fn range(range: KeyRange) -> Target {
        Target::ByPrimaryKey(Some(range))
    }

    pub fn index(name: &str, range: KeyRange) -> Target {
        Target::ByIndex(name.to_string(), Some(range))
    }

    /// Every record that has an entry in the named index.
    pub fn whole_index(name: &str) -> Target {
        Target::ByIndex(name.to_string(), None)
    }

    pub fn index_name(&self) -> Option<&str> {
        match self {
            Target::ByPrimaryKey(_) => None,
            Target::ByIndex(name, _) => Some(name),
        }
    }

    pub fn key_range(&self) -> Option<&KeyRange> {
        match self {
            Target::ByPrimaryKey(range) | Target::ByIndex(_, range) => range.as_ref(),
        }
    }
}

impl Default for Target {
    fn default() -> Self {
        Target::all()
    }
}

impl From<KeyRange> for Target {
    fn from(range: KeyRange) -> Self {
        Target::ByPrimaryKey(Some(range))
    }
}
