use crate::common::IDXD_EVENT;
use crate::errors::{ErrorKind, IdxdError, IdxdResult};
use basu::error::BasuError;
use basu::event::Event;
use basu::{EventBus, Handle, HandlerId};
use std::marker::PhantomData;
use std::sync::Arc;

/// A multi-subscriber notification channel scoped to one owner.
///
/// Each database instance owns its own bus, so listeners registered on one
/// instance never observe another instance's events. Publishing with no
/// registered listener is a cheap no-op.
///
/// # Example
///
/// ```ignore
/// let bus: IdxdEventBus<DatabaseEvent, DatabaseEventListener> = IdxdEventBus::new();
/// let subscriber = bus.register(listener)?;
/// bus.publish(DatabaseEvent::Error(error))?;
/// bus.deregister(subscriber)?;
/// ```
#[derive(Clone)]
pub struct IdxdEventBus<E, L> {
    inner: Arc<IdxdEventBusInner<E, L>>,
}

impl<E, L> Default for IdxdEventBus<E, L>
where
    L: Handle<E> + 'static,
    E: Send + Sync,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<E, L> IdxdEventBus<E, L>
where
    L: Handle<E> + 'static,
    E: Send + Sync,
{
    pub fn new() -> Self {
        IdxdEventBus {
            inner: Arc::new(IdxdEventBusInner::new()),
        }
    }

    /// Registers a listener and returns the handle needed to remove it.
    pub fn register(&self, listener: L) -> IdxdResult<SubscriberRef> {
        self.inner.register(listener)
    }

    pub fn deregister(&self, subscriber: SubscriberRef) -> IdxdResult<()> {
        self.inner.deregister(subscriber)
    }

    /// Delivers an event to every registered listener.
    pub fn publish(&self, event: E) -> IdxdResult<()> {
        self.inner.publish(event)
    }

    /// Removes every listener.
    pub fn close(&self) -> IdxdResult<()> {
        self.inner.close()
    }

    pub fn has_listeners(&self) -> bool {
        self.inner.has_listeners()
    }
}

/// Handle to a registered listener.
#[derive(Debug)]
pub struct SubscriberRef {
    pub(crate) inner: HandlerId,
}

impl SubscriberRef {
    pub fn new(inner: HandlerId) -> Self {
        SubscriberRef { inner }
    }
}

struct IdxdEventBusInner<E, L> {
    event_bus: EventBus<E>,
    phantom_data: PhantomData<L>,
}

impl<E, L> IdxdEventBusInner<E, L>
where
    L: Handle<E> + 'static,
    E: Send + Sync,
{
    fn new() -> Self {
        IdxdEventBusInner {
            event_bus: EventBus::new(),
            phantom_data: PhantomData,
        }
    }

    fn register(&self, listener: L) -> IdxdResult<SubscriberRef> {
        self.event_bus
            .subscribe(IDXD_EVENT, Box::new(listener))
            .map(SubscriberRef::new)
            .map_err(Self::idxd_error)
    }

    fn deregister(&self, subscriber: SubscriberRef) -> IdxdResult<()> {
        self.event_bus
            .unsubscribe(IDXD_EVENT, &subscriber.inner)
            .map(|_| ())
            .map_err(Self::idxd_error)
    }

    fn publish(&self, event: E) -> IdxdResult<()> {
        match self.event_bus.get_handler_count(IDXD_EVENT) {
            Ok(0) => return Ok(()),
            Ok(_) => {}
            Err(BasuError::EventTypeNotFOUND) => return Ok(()),
            Err(e) => return Err(Self::idxd_error(e)),
        }

        self.event_bus
            .publish(IDXD_EVENT, &Event::new(event))
            .map(|_| ())
            .map_err(Self::idxd_error)
    }

    fn close(&self) -> IdxdResult<()> {
        self.event_bus.clear().map(|_| ()).map_err(Self::idxd_error)
    }

    fn has_listeners(&self) -> bool {
        match self.event_bus.get_handler_count(IDXD_EVENT) {
            Ok(count) => count > 0,
            Err(BasuError::EventTypeNotFOUND) => false,
            Err(e) => {
                log::warn!("Failed to count event listeners: {}", e);
                false
            }
        }
    }

    fn idxd_error(e: BasuError) -> IdxdError {
        match e {
            BasuError::EventTypeNotFOUND => IdxdError::new(
                "Event bus error: no listener was ever registered for database events",
                ErrorKind::EventError,
            ),
            BasuError::MutexPoisoned => IdxdError::new(
                "Event bus error: internal mutex poisoned",
                ErrorKind::EventError,
            ),
            BasuError::HandlerError(e) => IdxdError::new(
                &format!("Event listener failed: {}", e),
                ErrorKind::EventError,
            ),
        }
    }
}
