use crate::common::Key;
use crate::errors::{ErrorKind, IdxdError, IdxdResult};
use std::ops::Bound;

/// A possibly open-ended interval over keys used to restrict a scan.
///
/// Either end may be unbounded, inclusive or exclusive. Ranges built with
/// [`KeyRange::bound`] are validated so that the lower end never exceeds
/// the upper end.
///
/// # Examples
///
/// ```rust
/// use idxd::common::{Key, KeyRange};
///
/// let range = KeyRange::bound(Key::from(1), Key::from(5), false, true).unwrap();
/// assert!(range.contains(&Key::from(1)));
/// assert!(!range.contains(&Key::from(5)));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    lower: Bound<Key>,
    upper: Bound<Key>,
}

impl KeyRange {
    /// A range matching every key.
    pub fn all() -> KeyRange {
        KeyRange {
            lower: Bound::Unbounded,
            upper: Bound::Unbounded,
        }
    }

    /// A range matching exactly one key.
    pub fn only(key: impl Into<Key>) -> KeyRange {
        let key = key.into();
        KeyRange {
            lower: Bound::Included(key.clone()),
            upper: Bound::Included(key),
        }
    }

    pub fn lower_bound(key: impl Into<Key>, open: bool) -> KeyRange {
        KeyRange {
            lower: bound_of(key.into(), open),
            upper: Bound::Unbounded,
        }
    }

    pub fn upper_bound(key: impl Into<Key>, open: bool) -> KeyRange {
        KeyRange {
            lower: Bound::Unbounded,
            upper: bound_of(key.into(), open),
        }
    }

    /// A range with both ends bounded.
    ///
    /// Fails with `DataError` when `lower > upper`, or when both keys are
    /// equal and either end is open, since such a range can never match.
    pub fn bound(
        lower: impl Into<Key>,
        upper: impl Into<Key>,
        lower_open: bool,
        upper_open: bool,
    ) -> IdxdResult<KeyRange> {
        let lower = lower.into();
        let upper = upper.into();
        if lower > upper || (lower == upper && (lower_open || upper_open)) {
            log::error!("Invalid key range from {} to {}", lower, upper);
            return Err(IdxdError::new(
                &format!("Invalid key range: lower bound {} is past upper bound {}", lower, upper),
                ErrorKind::DataError,
            ));
        }
        Ok(KeyRange {
            lower: bound_of(lower, lower_open),
            upper: bound_of(upper, upper_open),
        })
    }

    pub fn lower(&self) -> &Bound<Key> {
        &self.lower
    }

    pub fn upper(&self) -> &Bound<Key> {
        &self.upper
    }

    /// Returns true if `key` lies inside the range.
    pub fn contains(&self, key: &Key) -> bool {
        let above_lower = match &self.lower {
            Bound::Included(l) => key >= l,
            Bound::Excluded(l) => key > l,
            Bound::Unbounded => true,
        };
        let below_upper = match &self.upper {
            Bound::Included(u) => key <= u,
            Bound::Excluded(u) => key < u,
            Bound::Unbounded => true,
        };
        above_lower && below_upper
    }

    /// Returns true if `key` lies past the upper end, which ends a forward scan.
    pub fn is_past_upper(&self, key: &Key) -> bool {
        match &self.upper {
            Bound::Included(u) => key > u,
            Bound::Excluded(u) => key >= u,
            Bound::Unbounded => false,
        }
    }

    /// Returns the single key this range matches, if it is a point range.
    pub fn as_point(&self) -> Option<&Key> {
        match (&self.lower, &self.upper) {
            (Bound::Included(l), Bound::Included(u)) if l == u => Some(l),
            _ => None,
        }
    }

    /// Bounds in the form `SkipMap::range` and friends accept.
    pub fn as_bounds(&self) -> (Bound<Key>, Bound<Key>) {
        (self.lower.clone(), self.upper.clone())
    }
}

impl Default for KeyRange {
    fn default() -> Self {
        KeyRange::all()
    }
}

impl From<Key> for KeyRange {
    fn from(key: Key) -> Self {
        KeyRange::only(key)
    }
}

fn bound_of(key: Key, open: bool) -> Bound<Key> {
    if open {
        Bound::Excluded(key)
    } else {
        Bound::Included(key)
    }
}
