use crate::common::Record;
use crate::event::ChangeInfo;
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::sync::Arc;

/// Per-store record of what a session wrote, published only after commit.
#[derive(Clone, Default)]
pub(crate) struct ChangeLog {
    inner: Arc<Mutex<IndexMap<String, ChangeInfo>>>,
}

impl ChangeLog {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn added(&self, store: &str, records: impl IntoIterator<Item = Record>) {
        let mut inner = self.inner.lock();
        inner
            .entry(store.to_string())
            .or_insert_with(|| ChangeInfo::new(store))
            .push_added(records);
    }

    pub(crate) fn removed(&self, store: &str, records: impl IntoIterator<Item = Record>) {
        let mut inner = self.inner.lock();
        inner
            .entry(store.to_string())
            .or_insert_with(|| ChangeInfo::new(store))
            .push_removed(records);
    }

    /// Takes every non-empty change, in the order stores were first touched.
    pub(crate) fn drain(&self) -> Vec<ChangeInfo> {
        let mut inner = self.inner.lock();
        inner
            .drain(..)
            .map(|(_, change)| change)
            .filter(|change| !change.is_empty())
            .collect()
    }
}
