use crate::errors::{ErrorKind, IdxdError, IdxdResult};
use crate::store::StorageEngine;
use parking_lot::Mutex;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

type Slot<T> = Arc<Mutex<Option<IdxdResult<T>>>>;

/// The eventual result of an asynchronous call.
///
/// Every call that needs the storage engine to make progress returns a
/// `Pending`. Results are produced by engine notifications, so
/// [`Pending::wait`] drives the engine's dispatcher until the result
/// settles.
pub struct Pending<T> {
    slot: Slot<T>,
    engine: StorageEngine,
}

/// The producing half of a [`Pending`]. Only the first settlement counts.
pub(crate) struct Resolver<T> {
    slot: Slot<T>,
}

impl<T> Clone for Resolver<T> {
    fn clone(&self) -> Self {
        Resolver {
            slot: self.slot.clone(),
        }
    }
}

impl<T> Resolver<T> {
    pub(crate) fn resolve(&self, result: IdxdResult<T>) {
        let mut slot = self.slot.lock();
        if slot.is_none() {
            *slot = Some(result);
        } else {
            log::debug!("Ignoring second settlement of a pending result");
        }
    }
}

impl<T> Pending<T> {
    pub(crate) fn new(engine: StorageEngine) -> (Pending<T>, Resolver<T>) {
        let slot: Slot<T> = Arc::new(Mutex::new(None));
        let pending = Pending {
            slot: slot.clone(),
            engine,
        };
        (pending, Resolver { slot })
    }

    /// A pending result that is already settled.
    pub(crate) fn settled(engine: StorageEngine, result: IdxdResult<T>) -> Pending<T> {
        Pending {
            slot: Arc::new(Mutex::new(Some(result))),
            engine,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Takes the result if it has settled, without driving the engine.
    pub fn try_take(&self) -> Option<IdxdResult<T>> {
        self.slot.lock().take()
    }

    /// Drives the engine until the result settles and returns it.
    ///
    /// Fails with `InternalError` if the engine runs out of work while the
    /// result is still unsettled, which means nothing will ever settle it.
    pub fn wait(self) -> IdxdResult<T> {
        loop {
            if let Some(result) = self.slot.lock().take() {
                return result;
            }
            if !self.engine.dispatch()? {
                return match self.slot.lock().take() {
                    Some(result) => result,
                    None => {
                        log::error!("Storage engine is idle but the result never settled");
                        Err(IdxdError::new(
                            "Storage engine is idle but the pending result never settled",
                            ErrorKind::InternalError,
                        ))
                    }
                };
            }
        }
    }
}

impl<T> Debug for Pending<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pending")
            .field("settled", &self.is_settled())
            .finish()
    }
}
