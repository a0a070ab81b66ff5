use crate::errors::{ErrorKind, IdxdError, IdxdResult};
use crate::operation::StoreOperation;
use crate::transaction::Step;

/// Hands a script the stores of its session.
#[derive(Debug, Clone)]
pub struct Selector {
    scope: Vec<String>,
}

impl Selector {
    pub(crate) fn new(scope: Vec<String>) -> Self {
        Selector { scope }
    }

    /// Operations on `name`, which must be part of the session scope.
    pub fn store(&self, name: &str) -> IdxdResult<StoreOperation> {
        if !self.scope.iter().any(|store| store == name) {
            log::error!("Store '{}' is not in the session scope {:?}", name, self.scope);
            return Err(IdxdError::new(
                &format!("Store '{}' is not part of this transaction's scope", name),
                ErrorKind::StoreNotFound,
            ));
        }
        Ok(StoreOperation::new(name))
    }

    /// The step that aborts the session. Nothing the script yields after
    /// it is ever issued.
    pub fn abort<T>(&self) -> Step<T> {
        Step::Abort
    }

    pub fn scope(&self) -> &[String] {
        &self.scope
    }
}
