use crate::migration::{IndexSpec, SchemaSnapshot, StoreSpec};
use std::collections::BTreeMap;

/// Index changes for one store that exists both before and after a version.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct IndexReconcile {
    pub(crate) store: String,
    pub(crate) create: Vec<IndexSpec>,
    pub(crate) drop: Vec<String>,
}

/// Structural changes one version applies, in phase order.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct VersionDiff {
    pub(crate) create: Vec<StoreSpec>,
    pub(crate) reconcile: Vec<IndexReconcile>,
    pub(crate) delete: Vec<String>,
}

impl VersionDiff {
    /// Compares `snapshot` with the live structure, given as store name to
    /// index names.
    ///
    /// Version 1 always starts from an empty database, so it only creates.
    pub(crate) fn compute(
        version: u32,
        snapshot: &SchemaSnapshot,
        existing: &BTreeMap<String, Vec<String>>,
    ) -> VersionDiff {
        let empty = BTreeMap::new();
        let existing = if version == 1 { &empty } else { existing };

        let mut diff = VersionDiff::default();
        for store in snapshot.stores() {
            match existing.get(store.name()) {
                None => diff.create.push(store.clone()),
                Some(indexes) => {
                    let declared: Vec<String> = store.indexes().iter().map(IndexSpec::identity).collect();
                    let reconcile = IndexReconcile {
                        store: store.name().to_string(),
                        create: store
                            .indexes()
                            .iter()
                            .filter(|index| !indexes.contains(&index.identity()))
                            .cloned()
                            .collect(),
                        drop: indexes
                            .iter()
                            .filter(|index| !declared.contains(index))
                            .cloned()
                            .collect(),
                    };
                    if !reconcile.create.is_empty() || !reconcile.drop.is_empty() {
                        diff.reconcile.push(reconcile);
                    }
                }
            }
        }

        diff.delete = existing
            .keys()
            .filter(|name| snapshot.get(name).is_none())
            .cloned()
            .collect();
        diff
    }
}
