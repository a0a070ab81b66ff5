use crate::common::{KeyPath, Record};
use crate::errors::{ErrorKind, IdxdError, IdxdResult};
use crate::store::{IndexOptions, StoreOptions};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

/// Records of the stores a version deleted, by store name.
pub type LostData = BTreeMap<String, Vec<Record>>;

/// Receives the records of stores deleted by a version, after their
/// deletion and before the next version is applied. Returning an error
/// fails the whole migration.
pub type RescueCallback = Arc<dyn Fn(LostData) -> IdxdResult<()> + Send + Sync>;

/// Declaration of one secondary index.
///
/// The index is identified across versions by its name when one is given,
/// otherwise by the dot-joined key path. Changing anything but the identity
/// of an existing index has no effect; give it a new name instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexSpec {
    key_path: KeyPath,
    #[serde(default, rename = "as", skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default)]
    multi_entry: bool,
    #[serde(default)]
    unique: bool,
}

impl IndexSpec {
    pub fn new(key_path: impl Into<KeyPath>) -> Self {
        IndexSpec {
            key_path: key_path.into(),
            name: None,
            multi_entry: false,
            unique: false,
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn multi_entry(mut self, multi_entry: bool) -> Self {
        self.multi_entry = multi_entry;
        self
    }

    pub fn unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    /// The name the index is created under and diffed by.
    pub fn identity(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => self.key_path.name(),
        }
    }

    pub fn key_path(&self) -> &KeyPath {
        &self.key_path
    }

    pub fn is_multi_entry(&self) -> bool {
        self.multi_entry
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }

    pub(crate) fn options(&self) -> IndexOptions {
        IndexOptions {
            unique: self.unique,
            multi_entry: self.multi_entry,
        }
    }
}

/// Declaration of one object store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSpec {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    key_path: Option<KeyPath>,
    #[serde(default)]
    auto_increment: bool,
    #[serde(default)]
    indexes: Vec<IndexSpec>,
}

impl StoreSpec {
    pub fn new(name: &str) -> Self {
        StoreSpec {
            name: name.to_string(),
            key_path: None,
            auto_increment: false,
            indexes: Vec::new(),
        }
    }

    /// Keys records in-line at `key_path`.
    pub fn key_path(mut self, key_path: impl Into<KeyPath>) -> Self {
        self.key_path = Some(key_path.into());
        self
    }

    pub fn auto_increment(mut self, auto_increment: bool) -> Self {
        self.auto_increment = auto_increment;
        self
    }

    pub fn index(mut self, index: IndexSpec) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn primary_key_path(&self) -> Option<&KeyPath> {
        self.key_path.as_ref()
    }

    pub fn is_auto_increment(&self) -> bool {
        self.auto_increment
    }

    pub fn indexes(&self) -> &[IndexSpec] {
        &self.indexes
    }

    pub(crate) fn options(&self) -> StoreOptions {
        StoreOptions {
            key_path: self.key_path.clone(),
            auto_increment: self.auto_increment,
        }
    }

    fn validate(&self) -> IdxdResult<()> {
        if self.name.trim().is_empty() {
            return Err(invalid("Store name cannot be empty"));
        }
        if let Some(key_path) = &self.key_path {
            key_path.validate()?;
        }

        let mut identities = HashSet::new();
        for index in &self.indexes {
            index.key_path.validate()?;
            let identity = index.identity();
            if identity.is_empty() {
                return Err(invalid(&format!(
                    "Index on store '{}' needs a name or a non-empty key path",
                    self.name
                )));
            }
            if !identities.insert(identity.clone()) {
                return Err(invalid(&format!(
                    "Index '{}' is declared twice on store '{}'",
                    identity, self.name
                )));
            }
        }
        Ok(())
    }
}

/// The stores that exist as of one version.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaSnapshot {
    stores: Vec<StoreSpec>,
}

impl SchemaSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(mut self, store: StoreSpec) -> Self {
        self.stores.push(store);
        self
    }

    pub fn stores(&self) -> &[StoreSpec] {
        &self.stores
    }

    pub fn get(&self, name: &str) -> Option<&StoreSpec> {
        self.stores.iter().find(|store| store.name == name)
    }

    pub fn store_names(&self) -> Vec<String> {
        self.stores.iter().map(|store| store.name.clone()).collect()
    }

    /// Rejects duplicate store names and duplicate index identities.
    pub fn validate(&self) -> IdxdResult<()> {
        let mut names = HashSet::new();
        for store in &self.stores {
            store.validate()?;
            if !names.insert(store.name.as_str()) {
                return Err(invalid(&format!("Store '{}' is declared twice", store.name)));
            }
        }
        Ok(())
    }
}

impl From<Vec<StoreSpec>> for SchemaSnapshot {
    fn from(stores: Vec<StoreSpec>) -> Self {
        SchemaSnapshot { stores }
    }
}

/// Schema and optional rescue callback registered for one version.
#[derive(Clone)]
pub struct VersionEntry {
    snapshot: SchemaSnapshot,
    rescue: Option<RescueCallback>,
}

impl VersionEntry {
    pub fn snapshot(&self) -> &SchemaSnapshot {
        &self.snapshot
    }

    pub fn rescue(&self) -> Option<&RescueCallback> {
        self.rescue.as_ref()
    }
}

impl Debug for VersionEntry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionEntry")
            .field("snapshot", &self.snapshot)
            .field("rescue", &self.rescue.is_some())
            .finish()
    }
}

/// Every declared version, ordered by version number.
#[derive(Debug, Clone, Default)]
pub struct VersionPlan {
    versions: BTreeMap<u32, VersionEntry>,
}

impl VersionPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `snapshot` for `version`, replacing an earlier declaration
    /// of the same version.
    pub fn add(
        &mut self,
        version: u32,
        snapshot: SchemaSnapshot,
        rescue: Option<RescueCallback>,
    ) -> IdxdResult<()> {
        if version == 0 {
            return Err(invalid("Schema version must be at least 1"));
        }
        snapshot.validate()?;
        if self
            .versions
            .insert(version, VersionEntry { snapshot, rescue })
            .is_some()
        {
            log::warn!("Schema for version {} was declared again and replaced", version);
        }
        Ok(())
    }

    pub fn get(&self, version: u32) -> Option<&VersionEntry> {
        self.versions.get(&version)
    }

    /// The lowest declared version in `from..=to`.
    pub(crate) fn next_declared(&self, from: u32, to: u32) -> Option<(u32, &VersionEntry)> {
        if from > to {
            return None;
        }
        self.versions
            .range(from..=to)
            .next()
            .map(|(version, entry)| (*version, entry))
    }

    /// Highest declared version, the one the database is opened at.
    pub fn latest_version(&self) -> Option<u32> {
        self.versions.keys().next_back().copied()
    }

    pub fn versions(&self) -> Vec<u32> {
        self.versions.keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}

fn invalid(message: &str) -> IdxdError {
    log::error!("{}", message);
    IdxdError::new(message, ErrorKind::ValidationError)
}
