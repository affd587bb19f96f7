//! Executor registry
//!
//! Maps driver names to factories that build an executor from the driver's
//! configuration store.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;

use crate::error::ExecutorError;
use crate::executor::StorageExecutor;
use crate::executors::{vfs, VfsExecutor};
use crate::store::Store;

/// Builds an executor from its driver configuration
pub type ExecutorFactory = fn(&Store) -> Result<Arc<dyn StorageExecutor>, ExecutorError>;

/// Errors raised by registry operations
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("driver '{0}' is already registered")]
    DuplicateDriver(String),

    #[error("unknown driver '{name}' (available: {available})")]
    UnknownDriver { name: String, available: String },

    #[error("failed to create driver '{name}': {source}")]
    Creation {
        name: String,
        #[source]
        source: ExecutorError,
    },
}

/// Driver name to executor factory
#[derive(Default)]
pub struct ExecutorRegistry {
    factories: BTreeMap<String, ExecutorFactory>,
}

impl ExecutorRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every bundled executor
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.factories.insert(vfs::NAME.to_string(), create_vfs);
        registry
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        factory: ExecutorFactory,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(RegistryError::DuplicateDriver(name));
        }
        log::debug!("Registered executor driver '{}'", name);
        self.factories.insert(name, factory);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered driver names, sorted
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Build the named executor from its configuration
    pub fn create(
        &self,
        name: &str,
        config: &Store,
    ) -> Result<Arc<dyn StorageExecutor>, RegistryError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| RegistryError::UnknownDriver {
                name: name.to_string(),
                available: self.names().join(", "),
            })?;

        factory(config).map_err(|source| RegistryError::Creation {
            name: name.to_string(),
            source,
        })
    }
}

fn create_vfs(config: &Store) -> Result<Arc<dyn StorageExecutor>, ExecutorError> {
    Ok(Arc::new(VfsExecutor::from_store(config)?))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_contains_vfs() {
        let registry = ExecutorRegistry::with_builtin();
        assert!(registry.contains("vfs"));
        assert_eq!(registry.names(), vec!["vfs"]);
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = ExecutorRegistry::with_builtin();
        let err = registry.register("vfs", create_vfs).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateDriver(ref n) if n == "vfs"));
    }

    #[test]
    fn test_unknown_driver_lists_available() {
        let registry = ExecutorRegistry::with_builtin();
        let err = registry.create("ebs", &Store::new()).err().unwrap();
        assert_eq!(
            err.to_string(),
            "unknown driver 'ebs' (available: vfs)"
        );
    }

    #[test]
    fn test_create_passes_config() {
        let registry = ExecutorRegistry::with_builtin();

        let err = registry.create("vfs", &Store::new()).err().unwrap();
        assert!(matches!(err, RegistryError::Creation { .. }));

        let exec = registry
            .create("vfs", &Store::new().with(vfs::ROOT_KEY, "/tmp/vfs"))
            .unwrap();
        assert_eq!(exec.name(), "vfs");
    }
}
