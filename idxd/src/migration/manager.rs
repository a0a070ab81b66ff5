use crate::common::{Countdown, Record, Target};
use crate::errors::{ErrorKind, IdxdError, IdxdResult};
use crate::migration::plan::VersionDiff;
use crate::migration::{LostData, RescueCallback, VersionEntry, VersionPlan};
use crate::operation::scan;
use crate::store::{EngineTransaction, VersionChange};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Walks a database from its stored version to the target version inside
/// the engine's version-change transaction.
///
/// Each version runs three phases. Stores new in this version are created
/// with their indexes. Stores that already exist get their indexes
/// reconciled by identity. Stores the version no longer declares are
/// deleted, after being scanned for backup when the version registered a
/// rescue callback. The next version starts only after every deletion of
/// the current one has reported back and the rescue callback has run.
/// Versions the plan does not declare are skipped without any work.
///
/// Any failure aborts the version-change transaction, which rolls back
/// every version applied so far.
#[derive(Clone)]
pub(crate) struct MigrationManager {
    inner: Arc<MigrationInner>,
}

/// Where a version's delete phase stands once `apply` returns.
enum DeletePhase {
    Done(LostData),
    AwaitingBackup,
}

struct MigrationInner {
    plan: VersionPlan,
    transaction: EngineTransaction,
    old_version: u32,
    target: u32,
}

impl MigrationManager {
    pub(crate) fn new(plan: VersionPlan, change: VersionChange) -> Self {
        MigrationManager {
            inner: Arc::new(MigrationInner {
                plan,
                transaction: change.transaction,
                old_version: change.old_version,
                target: change.new_version,
            }),
        }
    }

    pub(crate) fn start(&self) {
        log::debug!(
            "Migrating from version {} to {}",
            self.inner.old_version,
            self.inner.target
        );
        self.migrate(self.inner.old_version.checked_add(1));
    }

    /// Applies the declared versions from `from` up to the target, stopping
    /// early when a version has to wait for its backup scans.
    fn migrate(&self, mut from: Option<u32>) {
        while let Some(start) = from {
            if self.inner.transaction.is_finished() {
                log::warn!("Migration stopped at version {}: transaction already finished", start);
                return;
            }

            let (version, entry) = match self.inner.plan.next_declared(start, self.inner.target) {
                Some((version, entry)) => (version, entry.clone()),
                None => break,
            };

            match self.apply(version, &entry) {
                Ok(DeletePhase::Done(lost)) => {
                    if !self.rescue(version, entry.rescue(), lost) {
                        return;
                    }
                    from = version.checked_add(1);
                }
                Ok(DeletePhase::AwaitingBackup) => return,
                Err(e) => {
                    self.fail(version, e);
                    return;
                }
            }
        }
        log::debug!("Migration to version {} applied", self.inner.target);
    }

    /// Runs the create and update phases, then the delete phase.
    fn apply(&self, version: u32, entry: &VersionEntry) -> IdxdResult<DeletePhase> {
        let transaction = &self.inner.transaction;
        let existing = self.live_structure()?;
        let diff = VersionDiff::compute(version, entry.snapshot(), &existing);
        log::debug!(
            "Version {}: creating {:?}, reconciling {:?}, deleting {:?}",
            version,
            diff.create.iter().map(|store| store.name()).collect::<Vec<_>>(),
            diff.reconcile.iter().map(|change| &change.store).collect::<Vec<_>>(),
            diff.delete
        );

        for store in &diff.create {
            transaction.create_store(store.name(), store.options())?;
            for index in store.indexes() {
                transaction.create_index(store.name(), &index.identity(), index.key_path(), index.options())?;
            }
        }

        for change in &diff.reconcile {
            for index in &change.create {
                transaction.create_index(&change.store, &index.identity(), index.key_path(), index.options())?;
            }
            for index in &change.drop {
                transaction.delete_index(&change.store, index)?;
            }
        }

        match entry.rescue() {
            Some(rescue) if !diff.delete.is_empty() => {
                self.back_up_and_delete(version, diff.delete, rescue.clone());
                Ok(DeletePhase::AwaitingBackup)
            }
            _ => {
                let mut lost = LostData::new();
                for store in diff.delete {
                    transaction.delete_store(&store)?;
                    lost.insert(store, Vec::new());
                }
                Ok(DeletePhase::Done(lost))
            }
        }
    }

    /// Scans every store for backup before deleting it. Once all of them
    /// have reported back, the rescue callback runs and the walk resumes
    /// with the next version.
    fn back_up_and_delete(&self, version: u32, stores: Vec<String>, rescue: RescueCallback) {
        let lost: Arc<Mutex<LostData>> = Arc::new(Mutex::new(BTreeMap::new()));

        let manager = self.clone();
        let collected = lost.clone();
        let countdown = Countdown::new(stores.len(), move || {
            let lost = std::mem::take(&mut *collected.lock());
            if manager.rescue(version, Some(&rescue), lost) {
                manager.migrate(version.checked_add(1));
            }
        });

        for store in stores {
            let manager = self.clone();
            let lost = lost.clone();
            let countdown = countdown.clone();
            scan(
                &self.inner.transaction,
                &store.clone(),
                &Target::all(),
                Vec::new(),
                |records: &mut Vec<Record>, cursor| {
                    records.push(cursor.value().clone());
                    Ok(())
                },
                move |result: IdxdResult<Vec<Record>>| {
                    let deleted = result.and_then(|records| {
                        manager.inner.transaction.delete_store(&store)?;
                        log::debug!("Backed up {} records of deleted store '{}'", records.len(), store);
                        lost.lock().insert(store, records);
                        Ok(())
                    });
                    match deleted {
                        Ok(()) => countdown.tick(),
                        Err(e) => manager.fail(version, e),
                    }
                },
            );
        }
    }

    /// Hands the deleted stores' records to the rescue callback. Returns
    /// false when the callback failed and the migration was aborted.
    fn rescue(&self, version: u32, rescue: Option<&RescueCallback>, lost: LostData) -> bool {
        if let Some(rescue) = rescue {
            if let Err(e) = rescue(lost) {
                self.fail(version, e);
                return false;
            }
        }
        log::debug!("Version {} applied", version);
        true
    }

    fn live_structure(&self) -> IdxdResult<BTreeMap<String, Vec<String>>> {
        let transaction = &self.inner.transaction;
        transaction
            .store_names()?
            .into_iter()
            .map(|store| {
                let indexes = transaction.index_names(&store)?;
                Ok((store, indexes))
            })
            .collect()
    }

    fn fail(&self, version: u32, cause: IdxdError) {
        log::debug!("Migration to version {} failed: {}", version, cause);
        self.inner.transaction.abort_with(IdxdError::new_with_cause(
            &format!("Migration to version {} failed", version),
            ErrorKind::MigrationError,
            cause,
        ));
    }
}
