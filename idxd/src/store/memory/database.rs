use crate::common::{Key, KeyPath, KeyRange, Record, INITIAL_DATABASE_VERSION, INITIAL_GENERATED_KEY, MAX_GENERATED_KEY};
use crate::errors::{ErrorKind, IdxdError, IdxdResult};
use crate::store::{IndexOptions, StoreOptions};
use crossbeam_skiplist::{SkipMap, SkipSet};
use smallvec::SmallVec;
use std::collections::BTreeMap;
use std::ops::Bound;

/// One entry of an index scan: index key, primary key and record.
pub(crate) type IndexEntry = (Key, Key, Record);

/// Index key to the primary keys of the records carrying it.
type IndexMap = SkipMap<Key, SkipSet<Key>>;

/// Everything needed to revert one change made inside a transaction.
#[derive(Debug)]
pub(crate) enum UndoEntry {
    Restore {
        store: String,
        key: Key,
        previous: Option<Record>,
    },
    DropCreatedStore(String),
    RestoreStore(StoreData),
    DropCreatedIndex {
        store: String,
        name: String,
    },
    RestoreIndex {
        store: String,
        index: IndexData,
    },
    RestoreVersion(u32),
}

pub(crate) struct DatabaseData {
    pub(crate) name: String,
    pub(crate) version: u32,
    pub(crate) stores: BTreeMap<String, StoreData>,
}

impl DatabaseData {
    pub(crate) fn new(name: &str) -> Self {
        DatabaseData {
            name: name.to_string(),
            version: INITIAL_DATABASE_VERSION,
            stores: BTreeMap::new(),
        }
    }

    pub(crate) fn store(&self, name: &str) -> IdxdResult<&StoreData> {
        self.stores.get(name).ok_or_else(|| store_not_found(name))
    }

    pub(crate) fn store_mut(&mut self, name: &str) -> IdxdResult<&mut StoreData> {
        self.stores.get_mut(name).ok_or_else(|| store_not_found(name))
    }

    pub(crate) fn store_names(&self) -> Vec<String> {
        self.stores.keys().cloned().collect()
    }

    pub(crate) fn create_store(&mut self, name: &str, options: StoreOptions) -> IdxdResult<UndoEntry> {
        if self.stores.contains_key(name) {
            log::error!("Store '{}' already exists in database '{}'", name, self.name);
            return Err(IdxdError::new(
                &format!("Store '{}' already exists", name),
                ErrorKind::StoreAlreadyExists,
            ));
        }
        if let Some(key_path) = &options.key_path {
            key_path.validate()?;
            if options.auto_increment && (key_path.is_compound() || key_path.name().is_empty()) {
                log::error!("Store '{}' cannot auto-generate keys at key path {}", name, key_path);
                return Err(IdxdError::new(
                    &format!("Store '{}' cannot auto-generate keys at key path '{}'", name, key_path),
                    ErrorKind::ValidationError,
                ));
            }
        }
        self.stores.insert(name.to_string(), StoreData::new(name, options));
        Ok(UndoEntry::DropCreatedStore(name.to_string()))
    }

    pub(crate) fn delete_store(&mut self, name: &str) -> IdxdResult<UndoEntry> {
        match self.stores.remove(name) {
            Some(store) => Ok(UndoEntry::RestoreStore(store)),
            None => Err(store_not_found(name)),
        }
    }

    /// Reverts one journal entry. Entries must be replayed newest first.
    pub(crate) fn undo(&mut self, entry: UndoEntry) {
        match entry {
            UndoEntry::Restore { store, key, previous } => {
                if let Some(store) = self.stores.get(&store) {
                    match previous {
                        Some(record) => {
                            store.insert_record(key, record);
                        }
                        None => {
                            store.remove_record(&key);
                        }
                    }
                }
            }
            UndoEntry::DropCreatedStore(name) => {
                self.stores.remove(&name);
            }
            UndoEntry::RestoreStore(store) => {
                self.stores.insert(store.name.clone(), store);
            }
            UndoEntry::DropCreatedIndex { store, name } => {
                if let Some(store) = self.stores.get_mut(&store) {
                    store.indexes.remove(&name);
                }
            }
            UndoEntry::RestoreIndex { store, index } => {
                if let Some(store) = self.stores.get_mut(&store) {
                    store.indexes.insert(index.name.clone(), index);
                }
            }
            UndoEntry::RestoreVersion(version) => {
                self.version = version;
            }
        }
    }
}

#[derive(Debug)]
pub(crate) struct IndexData {
    pub(crate) name: String,
    pub(crate) key_path: KeyPath,
    pub(crate) options: IndexOptions,
    entries: IndexMap,
}

impl IndexData {
    fn new(name: &str, key_path: &KeyPath, options: IndexOptions) -> Self {
        IndexData {
            name: name.to_string(),
            key_path: key_path.clone(),
            options,
            entries: SkipMap::new(),
        }
    }

    fn add_entries(&self, primary_key: &Key, record: &Record) {
        for index_key in self.keys_of(record) {
            let ids = self.entries.get_or_insert_with(index_key, SkipSet::new);
            ids.value().insert(primary_key.clone());
        }
    }

    fn remove_entries(&self, primary_key: &Key, record: &Record) {
        for index_key in self.keys_of(record) {
            if let Some(ids) = self.entries.get(&index_key) {
                ids.value().remove(primary_key);
                if ids.value().is_empty() {
                    ids.remove();
                }
            }
        }
    }

    /// Whether `index_key` is held by a record other than `primary_key`.
    fn is_taken(&self, index_key: &Key, primary_key: &Key) -> bool {
        match self.entries.get(index_key) {
            Some(ids) => ids.value().iter().any(|id| id.value() != primary_key),
            None => false,
        }
    }

    /// The first `(index key, primary key)` pair inside `range` that sorts
    /// after `position`.
    pub(crate) fn next_entry(&self, range: Option<&KeyRange>, position: Option<&(Key, Key)>) -> Option<(Key, Key)> {
        let (lower, upper) = range.map(KeyRange::as_bounds).unwrap_or((Bound::Unbounded, Bound::Unbounded));
        let lower = match position {
            Some((last_key, last_id)) => {
                let same_key = self.entries.get(last_key).and_then(|ids| {
                    let mut later = ids.value().range((Bound::Excluded(last_id), Bound::Unbounded));
                    later.next().map(|id| (last_key.clone(), id.value().clone()))
                });
                if same_key.is_some() {
                    return same_key;
                }
                Bound::Excluded(last_key.clone())
            }
            None => lower,
        };
        self.entries
            .range((lower, upper))
            .find_map(|ids| ids.value().front().map(|id| (ids.key().clone(), id.value().clone())))
    }

    /// Index keys a record contributes; empty if the record is not indexed.
    pub(crate) fn keys_of(&self, record: &Record) -> SmallVec<[Key; 1]> {
        if self.options.multi_entry {
            if let Some(serde_json::Value::Array(items)) = self.key_path.resolve(record) {
                let mut keys: SmallVec<[Key; 1]> =
                    items.iter().filter_map(Key::try_from_value).collect();
                keys.sort();
                keys.dedup();
                return keys;
            }
        }
        self.key_path.extract(record).into_iter().collect()
    }
}

#[derive(Debug)]
pub(crate) struct StoreData {
    pub(crate) name: String,
    pub(crate) options: StoreOptions,
    pub(crate) key_generator: u64,
    pub(crate) records: SkipMap<Key, Record>,
    pub(crate) indexes: BTreeMap<String, IndexData>,
}

impl StoreData {
    pub(crate) fn new(name: &str, options: StoreOptions) -> Self {
        StoreData {
            name: name.to_string(),
            options,
            key_generator: INITIAL_GENERATED_KEY,
            records: SkipMap::new(),
            indexes: BTreeMap::new(),
        }
    }

    pub(crate) fn get(&self, key: &Key) -> Option<Record> {
        self.records.get(key).map(|entry| entry.value().clone())
    }

    /// Stores a record under `key` and moves its index entries along.
    fn insert_record(&self, key: Key, record: Record) -> Option<Record> {
        let previous = self.remove_record(&key);
        for index in self.indexes.values() {
            index.add_entries(&key, &record);
        }
        self.records.insert(key, record);
        previous
    }

    fn remove_record(&self, key: &Key) -> Option<Record> {
        let removed = self.records.remove(key)?;
        for index in self.indexes.values() {
            index.remove_entries(key, removed.value());
        }
        Some(removed.value().clone())
    }

    pub(crate) fn index(&self, name: &str) -> IdxdResult<&IndexData> {
        self.indexes.get(name).ok_or_else(|| {
            log::error!("Index '{}' not found on store '{}'", name, self.name);
            IdxdError::new(
                &format!("Index '{}' not found on store '{}'", name, self.name),
                ErrorKind::IndexNotFound,
            )
        })
    }

    pub(crate) fn index_names(&self) -> Vec<String> {
        self.indexes.keys().cloned().collect()
    }

    /// Resolves the primary key for a write, generating one when allowed.
    ///
    /// Returns the key and the record to store, which carries an injected
    /// key when the store keeps its keys in-line.
    fn resolve_key(&mut self, mut record: Record, key: Option<Key>) -> IdxdResult<(Key, Record)> {
        match (&self.options.key_path, key) {
            (Some(key_path), Some(_)) => {
                log::error!("Explicit key given for store '{}' with in-line keys", self.name);
                Err(IdxdError::new(
                    &format!(
                        "Store '{}' uses in-line keys at '{}'; an explicit key is not allowed",
                        self.name, key_path
                    ),
                    ErrorKind::DataError,
                ))
            }
            (Some(key_path), None) => {
                let key_path = key_path.clone();
                let existing = if key_path.is_compound() {
                    key_path.extract(&record)
                } else {
                    key_path.resolve(&record).map(Key::from_value).transpose()?
                };
                if let Some(key) = existing {
                    self.observe_key(&key);
                    return Ok((key, record));
                }
                if !self.options.auto_increment {
                    log::error!("Record has no key at '{}' for store '{}'", key_path, self.name);
                    return Err(IdxdError::new(
                        &format!(
                            "Record has no valid key at '{}' and store '{}' does not generate keys",
                            key_path, self.name
                        ),
                        ErrorKind::DataError,
                    ));
                }
                let key = self.generate_key()?;
                key_path.inject(&mut record, &key)?;
                Ok((key, record))
            }
            (None, Some(key)) => {
                self.observe_key(&key);
                Ok((key, record))
            }
            (None, None) => {
                if self.options.auto_increment {
                    let key = self.generate_key()?;
                    Ok((key, record))
                } else {
                    log::error!("No key given for store '{}' with out-of-line keys", self.name);
                    Err(IdxdError::new(
                        &format!("Store '{}' uses out-of-line keys; a key is required", self.name),
                        ErrorKind::DataError,
                    ))
                }
            }
        }
    }

    fn generate_key(&mut self) -> IdxdResult<Key> {
        if self.key_generator > MAX_GENERATED_KEY {
            log::error!("Key generator of store '{}' is exhausted", self.name);
            return Err(IdxdError::new(
                &format!("Key generator of store '{}' is exhausted", self.name),
                ErrorKind::ConstraintError,
            ));
        }
        let key = Key::from(self.key_generator);
        self.key_generator += 1;
        Ok(key)
    }

    /// Explicit numeric keys push the generator past them.
    fn observe_key(&mut self, key: &Key) {
        if !self.options.auto_increment {
            return;
        }
        if let Some(n) = key.as_number() {
            if n >= self.key_generator as f64 {
                let next = n.floor() + 1.0;
                self.key_generator = if next > MAX_GENERATED_KEY as f64 {
                    MAX_GENERATED_KEY + 1
                } else {
                    next as u64
                };
            }
        }
    }

    fn check_unique(&self, key: &Key, record: &Record) -> IdxdResult<()> {
        for index in self.indexes.values().filter(|index| index.options.unique) {
            if index.keys_of(record).iter().any(|index_key| index.is_taken(index_key, key)) {
                log::error!("Unique index '{}' on store '{}' violated", index.name, self.name);
                return Err(IdxdError::new(
                    &format!(
                        "Unique index '{}' on store '{}' already holds one of the record's keys",
                        index.name, self.name
                    ),
                    ErrorKind::ConstraintError,
                ));
            }
        }
        Ok(())
    }

    /// Upserts a record. Returns the key used and the record it replaced.
    pub(crate) fn put(&mut self, record: Record, key: Option<Key>) -> IdxdResult<(Key, Option<Record>)> {
        let (key, record) = self.resolve_key(record, key)?;
        self.check_unique(&key, &record)?;
        let previous = self.insert_record(key.clone(), record);
        Ok((key, previous))
    }

    /// Removes every record in `range`, returning what was removed.
    pub(crate) fn delete_range(&self, range: &KeyRange) -> Vec<(Key, Record)> {
        let keys: Vec<Key> = self
            .records
            .range(range.as_bounds())
            .map(|entry| entry.key().clone())
            .collect();
        keys.into_iter()
            .filter_map(|key| self.remove_record(&key).map(|record| (key, record)))
            .collect()
    }

    /// The first record after `position` inside `range`, in primary key order.
    pub(crate) fn next_record(&self, range: Option<&KeyRange>, position: Option<&Key>) -> Option<(Key, Record)> {
        let (lower, upper) = range.map(KeyRange::as_bounds).unwrap_or((Bound::Unbounded, Bound::Unbounded));
        let lower = match position {
            Some(position) => Bound::Excluded(position.clone()),
            None => lower,
        };
        self.records
            .range((lower, upper))
            .next()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
    }

    /// The first index entry inside `range` past `position`, ordered by
    /// index key and then primary key.
    pub(crate) fn next_index_entry(
        &self,
        index: &str,
        range: Option<&KeyRange>,
        position: Option<&(Key, Key)>,
    ) -> IdxdResult<Option<IndexEntry>> {
        let index = self.index(index)?;
        let mut position = position.cloned();
        while let Some((index_key, primary_key)) = index.next_entry(range, position.as_ref()) {
            if let Some(record) = self.get(&primary_key) {
                return Ok(Some((index_key, primary_key, record)));
            }
            log::warn!("Index '{}' of store '{}' points at a missing record", index.name, self.name);
            position = Some((index_key, primary_key));
        }
        Ok(None)
    }

    pub(crate) fn create_index(&mut self, name: &str, key_path: &KeyPath, options: IndexOptions) -> IdxdResult<UndoEntry> {
        if self.indexes.contains_key(name) {
            log::error!("Index '{}' already exists on store '{}'", name, self.name);
            return Err(IdxdError::new(
                &format!("Index '{}' already exists on store '{}'", name, self.name),
                ErrorKind::IndexAlreadyExists,
            ));
        }
        key_path.validate()?;
        if options.multi_entry && key_path.is_compound() {
            log::error!("Multi-entry index '{}' cannot use a compound key path", name);
            return Err(IdxdError::new(
                &format!("Multi-entry index '{}' cannot use a compound key path", name),
                ErrorKind::ValidationError,
            ));
        }

        let index = IndexData::new(name, key_path, options);
        for entry in self.records.iter() {
            index.add_entries(entry.key(), entry.value());
        }
        if options.unique && index.entries.iter().any(|ids| ids.value().len() > 1) {
            log::error!("Existing records violate unique index '{}' on '{}'", name, self.name);
            return Err(IdxdError::new(
                &format!("Existing records of store '{}' violate unique index '{}'", self.name, name),
                ErrorKind::ConstraintError,
            ));
        }

        self.indexes.insert(name.to_string(), index);
        Ok(UndoEntry::DropCreatedIndex {
            store: self.name.clone(),
            name: name.to_string(),
        })
    }

    pub(crate) fn delete_index(&mut self, name: &str) -> IdxdResult<UndoEntry> {
        self.index(name)?;
        match self.indexes.remove(name) {
            Some(index) => Ok(UndoEntry::RestoreIndex {
                store: self.name.clone(),
                index,
            }),
            None => Err(IdxdError::new(
                &format!("Index '{}' not found on store '{}'", name, self.name),
                ErrorKind::IndexNotFound,
            )),
        }
    }
}

fn store_not_found(name: &str) -> IdxdError {
    log::error!("Store '{}' not found", name);
    IdxdError::new(&format!("Store '{}' not found", name), ErrorKind::StoreNotFound)
}
