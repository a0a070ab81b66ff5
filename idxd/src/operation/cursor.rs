use crate::common::Target;
use crate::errors::IdxdResult;
use crate::store::{EngineCursor, EngineTransaction, RequestCallback};

/// Walks every record `target` selects, in scan order.
///
/// `visit` sees each record together with its cursor and may issue a
/// cursor delete or update; the walk advances only after `visit` returns,
/// so such writes are always queued ahead of the advance. `done` receives
/// the accumulated state once the range is exhausted, or the first error
/// raised by the engine or by `visit`.
pub(crate) fn scan<S, V, D>(
    transaction: &EngineTransaction,
    store: &str,
    target: &Target,
    state: S,
    mut visit: V,
    done: D,
) where
    S: Send + 'static,
    V: FnMut(&mut S, &EngineCursor) -> IdxdResult<()> + Send + 'static,
    D: FnOnce(IdxdResult<S>) + Send + 'static,
{
    let mut state = Some(state);
    let mut done = Some(done);
    transaction.open_cursor(
        store,
        target.index_name(),
        target.key_range().cloned(),
        Box::new(move |step| match step {
            Ok(Some(cursor)) => {
                let visited = match state.as_mut() {
                    Some(state) => visit(state, &cursor),
                    None => return,
                };
                match visited {
                    Ok(()) => cursor.advance(),
                    Err(e) => {
                        state = None;
                        if let Some(done) = done.take() {
                            done(Err(e));
                        }
                    }
                }
            }
            Ok(None) => {
                if let (Some(state), Some(done)) = (state.take(), done.take()) {
                    done(Ok(state));
                }
            }
            Err(e) => {
                state = None;
                if let Some(done) = done.take() {
                    done(Err(e));
                }
            }
        }),
    );
}

/// Completion for writes whose result only matters through the
/// transaction outcome.
pub(crate) fn acknowledge<T>(store: &str, verb: &'static str) -> RequestCallback<T> {
    let store = store.to_string();
    Box::new(move |result| {
        if let Err(e) = result {
            log::debug!("{} on store '{}' failed: {}", verb, store, e);
        }
    })
}
