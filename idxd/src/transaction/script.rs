use crate::errors::{ErrorKind, IdxdError, IdxdResult};
use crate::operation::{Outcome, PendingOperation};
use crate::transaction::Selector;
use std::collections::VecDeque;
use std::fmt::{Debug, Formatter};
use std::marker::PhantomData;

/// What a script asks of the executor next.
pub enum Step<T> {
    /// Issue this operation and resume with its outcome.
    Yield(PendingOperation),
    /// Abort the session.
    Abort,
    /// The session's result; it resolves once the transaction commits.
    Done(T),
}

impl<T> Debug for Step<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Step::Yield(operation) => f.debug_tuple("Yield").field(operation).finish(),
            Step::Abort => f.write_str("Abort"),
            Step::Done(_) => f.write_str("Done"),
        }
    }
}

/// A resumable unit of work driven by the executor.
///
/// The executor calls [resume](Script::resume) once with
/// [Outcome::Empty], then once more with the outcome of every operation
/// the script yields, until the script returns [Step::Done] or
/// [Step::Abort]. Returning an error aborts the session with that error.
pub trait Script: Send {
    type Output: Send + 'static;

    fn resume(&mut self, selector: &Selector, input: Outcome) -> IdxdResult<Step<Self::Output>>;
}

/// A script backed by a closure that keeps its own state.
pub struct ScriptFn<T, F> {
    resume: F,
    _output: PhantomData<fn() -> T>,
}

/// Wraps a closure as a [Script].
///
/// ```ignore
/// let mut written = false;
/// let script = script_fn(move |db, input| {
///     if written {
///         return Ok(Step::Done(input.into_record()?));
///     }
///     written = true;
///     Ok(Step::Yield(db.store("books")?.set(json!({"title": "Dune"}))))
/// });
/// ```
pub fn script_fn<T, F>(resume: F) -> ScriptFn<T, F>
where
    T: Send + 'static,
    F: FnMut(&Selector, Outcome) -> IdxdResult<Step<T>> + Send,
{
    ScriptFn {
        resume,
        _output: PhantomData,
    }
}

impl<T, F> Script for ScriptFn<T, F>
where
    T: Send + 'static,
    F: FnMut(&Selector, Outcome) -> IdxdResult<Step<T>> + Send,
{
    type Output = T;

    fn resume(&mut self, selector: &Selector, input: Outcome) -> IdxdResult<Step<T>> {
        (self.resume)(selector, input)
    }
}

type Stage<T> = Box<dyn FnOnce(&Selector, Outcome) -> IdxdResult<Step<T>> + Send>;
type Finish<T> = Box<dyn FnOnce(Outcome) -> IdxdResult<T> + Send>;

/// A script built as an ordered list of stages.
///
/// Each stage receives the outcome of the previous one and produces the
/// next step. Once every stage has run, the finishing stage turns the
/// last outcome into the session result.
///
/// ```ignore
/// let script = Sequence::new()
///     .then(|db, _| Ok(db.store("books")?.set(json!({"title": "Dune"}))))
///     .then(|db, _| Ok(db.store("books")?.count()))
///     .finish(|count| count.into_count());
/// ```
pub struct Sequence<T> {
    stages: VecDeque<Stage<T>>,
    finish: Option<Finish<T>>,
}

impl<T: Send + 'static> Default for Sequence<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> Sequence<T> {
    pub fn new() -> Self {
        Sequence {
            stages: VecDeque::new(),
            finish: None,
        }
    }

    /// Appends a stage that yields one operation.
    pub fn then(
        self,
        stage: impl FnOnce(&Selector, Outcome) -> IdxdResult<PendingOperation> + Send + 'static,
    ) -> Self {
        self.then_step(move |selector, input| stage(selector, input).map(Step::Yield))
    }

    /// Appends a stage that picks its own step, so it may also end or
    /// abort the session early.
    pub fn then_step(
        mut self,
        stage: impl FnOnce(&Selector, Outcome) -> IdxdResult<Step<T>> + Send + 'static,
    ) -> Self {
        self.stages.push_back(Box::new(stage));
        self
    }

    /// Appends a stage that aborts the session.
    pub fn then_abort(self) -> Self {
        self.then_step(|selector, _| Ok(selector.abort()))
    }

    /// Sets how the last outcome becomes the session result.
    pub fn finish(mut self, finish: impl FnOnce(Outcome) -> IdxdResult<T> + Send + 'static) -> Self {
        self.finish = Some(Box::new(finish));
        self
    }
}

impl<T: Send + 'static> Script for Sequence<T> {
    type Output = T;

    fn resume(&mut self, selector: &Selector, input: Outcome) -> IdxdResult<Step<T>> {
        if let Some(stage) = self.stages.pop_front() {
            return stage(selector, input);
        }
        match self.finish.take() {
            Some(finish) => finish(input).map(Step::Done),
            None => {
                log::error!("Sequence ran out of stages without a finishing stage");
                Err(IdxdError::new(
                    "Sequence has no finishing stage",
                    ErrorKind::ScriptError,
                ))
            }
        }
    }
}
