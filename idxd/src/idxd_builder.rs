use crate::common::Pending;
use crate::errors::{IdxdError, IdxdResult};
use crate::idxd::Idxd;
use crate::idxd_config::IdxdConfig;
use crate::migration::{LostData, SchemaSnapshot};
use crate::store::StorageEngine;
use std::sync::Arc;

/// Fluent builder for [Idxd].
///
/// The first failing step is remembered and reported by [build](IdxdBuilder::build)
/// or [open](IdxdBuilder::open); later steps are skipped.
///
/// ```ignore
/// let db = Idxd::builder()
///     .name("library")
///     .version(1, SchemaSnapshot::new().store(StoreSpec::new("books").key_path("id")))
///     .open()?
///     .wait()?;
/// ```
#[derive(Default)]
pub struct IdxdBuilder {
    error: Option<IdxdError>,
    config: IdxdConfig,
}

impl IdxdBuilder {
    pub fn new() -> Self {
        IdxdBuilder {
            error: None,
            config: IdxdConfig::new(),
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        if self.error.is_none() {
            if let Err(e) = self.config.set_name(name) {
                self.error = Some(e);
            }
        }
        self
    }

    /// Uses `engine` instead of a private in-memory engine.
    pub fn engine(mut self, engine: impl Into<StorageEngine>) -> Self {
        if self.error.is_none() {
            if let Err(e) = self.config.set_engine(engine.into()) {
                self.error = Some(e);
            }
        }
        self
    }

    pub fn version(mut self, version: u32, schema: SchemaSnapshot) -> Self {
        if self.error.is_none() {
            if let Err(e) = self.config.add_version(version, schema, None) {
                self.error = Some(e);
            }
        }
        self
    }

    /// Declares `version` with a callback that receives the records of the
    /// stores this version deletes.
    pub fn version_with_rescue(
        mut self,
        version: u32,
        schema: SchemaSnapshot,
        rescue: impl Fn(LostData) -> IdxdResult<()> + Send + Sync + 'static,
    ) -> Self {
        if self.error.is_none() {
            if let Err(e) = self
                .config
                .add_version(version, schema, Some(Arc::new(rescue)))
            {
                self.error = Some(e);
            }
        }
        self
    }

    pub fn build(self) -> IdxdResult<Idxd> {
        if let Some(error) = self.error {
            return Err(error);
        }
        self.config.validate()?;
        Ok(Idxd::from_config(self.config))
    }

    /// Builds the database and starts opening it.
    pub fn open(self) -> IdxdResult<Pending<Idxd>> {
        let db = self.build()?;
        Ok(db.open())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::migration::StoreSpec;
    use crate::store::memory::MemoryEngine;

    #[test]
    fn test_build_requires_name() {
        let result = IdxdBuilder::new().build();
        assert_eq!(result.unwrap_err().kind(), &ErrorKind::ValidationError);
    }

    #[test]
    fn test_build() {
        let db = IdxdBuilder::new()
            .name("library")
            .engine(MemoryEngine::new())
            .version(1, SchemaSnapshot::new().store(StoreSpec::new("books")))
            .build()
            .unwrap();
        assert_eq!(db.name(), "library");
    }

    #[test]
    fn test_first_error_is_kept() {
        let result = IdxdBuilder::new()
            .name("")
            .version(0, SchemaSnapshot::new())
            .name("library")
            .build();
        let err = result.unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::ValidationError);
        assert!(err.message().contains("name"));
    }

    #[test]
    fn test_invalid_schema_is_reported() {
        let result = IdxdBuilder::new()
            .name("library")
            .version(
                1,
                SchemaSnapshot::new()
                    .store(StoreSpec::new("books"))
                    .store(StoreSpec::new("books")),
            )
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_open_without_versions_fails() {
        let pending = IdxdBuilder::new().name("library").open().unwrap();
        assert_eq!(pending.wait().unwrap_err().kind(), &ErrorKind::ValidationError);
    }

    #[test]
    fn test_open() {
        let db = IdxdBuilder::new()
            .name("library")
            .version_with_rescue(1, SchemaSnapshot::new().store(StoreSpec::new("books")), |_| Ok(()))
            .open()
            .unwrap()
            .wait()
            .unwrap();
        assert!(db.is_open());
        assert_eq!(db.store_names().unwrap(), vec!["books".to_string()]);
    }
}
