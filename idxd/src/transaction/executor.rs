use crate::common::Resolver;
use crate::errors::{ErrorKind, IdxdError};
use crate::event::{DatabaseEvent, DatabaseEventBus};
use crate::operation::{OperationContext, Outcome};
use crate::store::{EngineTransaction, TransactionOutcome};
use crate::transaction::{ChangeLog, Script, Selector, Step};
use parking_lot::Mutex;
use std::sync::Arc;
use uuid::Uuid;

/// One script driven to completion over one engine transaction.
///
/// The session keeps at most one operation in flight. The next operation
/// is issued from inside the completion of the previous one, so the engine
/// always sees outstanding work until the script is done and the
/// transaction cannot commit halfway through.
pub(crate) struct Session<S: Script> {
    id: Uuid,
    selector: Selector,
    context: OperationContext,
    script: Mutex<S>,
    result: Mutex<Option<S::Output>>,
}

impl<S: Script + 'static> Session<S> {
    /// Runs `script` against `transaction` and settles `resolver` with its
    /// result once the transaction has finished.
    pub(crate) fn run(
        transaction: EngineTransaction,
        script: S,
        events: DatabaseEventBus,
        resolver: Resolver<S::Output>,
    ) {
        let session = Arc::new(Session {
            id: Uuid::new_v4(),
            selector: Selector::new(transaction.scope()),
            context: OperationContext {
                transaction,
                changes: ChangeLog::new(),
            },
            script: Mutex::new(script),
            result: Mutex::new(None),
        });
        log::debug!(
            "Session {} started on transaction {} over {:?}",
            session.id,
            session.context.transaction.id(),
            session.selector.scope()
        );

        let finished = session.clone();
        session
            .context
            .transaction
            .on_finish(Box::new(move |outcome| finished.finish(outcome, &events, &resolver)));
        session.tick(Outcome::Empty);
    }

    fn tick(self: &Arc<Self>, input: Outcome) {
        let step = {
            let mut script = self.script.lock();
            script.resume(&self.selector, input)
        };

        match step {
            Ok(Step::Yield(operation)) => {
                let session = self.clone();
                operation.issue(
                    &self.context,
                    Box::new(move |result| match result {
                        Ok(outcome) => session.tick(outcome),
                        Err(e) => {
                            log::debug!("Session {} operation failed: {}", session.id, e);
                            session.context.transaction.abort_with(e);
                        }
                    }),
                );
            }
            Ok(Step::Abort) => {
                log::debug!("Session {} requested abort", self.id);
                self.context.transaction.abort();
            }
            Ok(Step::Done(output)) => {
                *self.result.lock() = Some(output);
            }
            Err(e) => {
                log::debug!("Session {} script failed: {}", self.id, e);
                self.context.transaction.abort_with(e);
            }
        }
    }

    fn finish(&self, outcome: TransactionOutcome, events: &DatabaseEventBus, resolver: &Resolver<S::Output>) {
        match outcome {
            TransactionOutcome::Committed => {
                log::debug!("Session {} committed", self.id);
                for change in self.context.changes.drain() {
                    if let Err(e) = events.publish(DatabaseEvent::Change(change)) {
                        log::warn!("Failed to publish change event: {}", e);
                    }
                }
                let result = self.result.lock().take().ok_or_else(|| {
                    IdxdError::new(
                        "Transaction committed before the script produced a result",
                        ErrorKind::InternalError,
                    )
                });
                resolver.resolve(result);
            }
            TransactionOutcome::Aborted(e) | TransactionOutcome::Errored(e) => {
                log::debug!("Session {} did not commit: {}", self.id, e);
                if let Err(publish_error) = events.publish(DatabaseEvent::Error(e.clone())) {
                    log::warn!("Failed to publish error event: {}", publish_error);
                }
                resolver.resolve(Err(e));
            }
        }
    }
}
