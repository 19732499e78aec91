use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use crate::error::SqlExecutorError;
use crate::results::CustomDbRow;

/// Converts one result row into a `T`.
///
/// Returning `Ok(None)` skips the row. Any `Fn(&CustomDbRow) -> Result<Option<T>, _>`
/// closure is an adapter.
pub trait ResultAdapter<T>: Send + Sync {
    /// # Errors
    /// Returns an error when the row cannot be decoded into `T`.
    fn adapt(&self, row: &CustomDbRow) -> Result<Option<T>, SqlExecutorError>;
}

impl<T, F> ResultAdapter<T> for F
where
    F: Fn(&CustomDbRow) -> Result<Option<T>, SqlExecutorError> + Send + Sync,
{
    fn adapt(&self, row: &CustomDbRow) -> Result<Option<T>, SqlExecutorError> {
        self(row)
    }
}

/// Shared handle to a registered adapter.
pub type AdapterRef<T> = Arc<dyn ResultAdapter<T>>;

/// Per-executor mapping from result type to adapter.
///
/// Starts with an identity adapter for [`CustomDbRow`].
pub struct AdapterRegistry {
    adapters: RwLock<HashMap<TypeId, Box<dyn Any + Send + Sync>>>,
}

impl AdapterRegistry {
    #[must_use]
    pub fn new() -> Self {
        let registry = Self {
            adapters: RwLock::new(HashMap::new()),
        };
        registry.register::<CustomDbRow, _>(|row| Ok(Some(row.clone())));
        registry
    }

    /// Register a closure adapter for `T`, replacing any previous one.
    pub fn register<T, F>(&self, adapter: F)
    where
        T: 'static,
        F: Fn(&CustomDbRow) -> Result<Option<T>, SqlExecutorError> + Send + Sync + 'static,
    {
        self.register_adapter::<T>(Arc::new(adapter));
    }

    /// Register an adapter object for `T`, replacing any previous one.
    pub fn register_adapter<T: 'static>(&self, adapter: AdapterRef<T>) {
        let mut guard = match self.adapters.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if guard
            .insert(TypeId::of::<T>(), Box::new(adapter))
            .is_some()
        {
            tracing::debug!(result_type = type_name::<T>(), "result adapter replaced");
        }
    }

    /// Look up the adapter for `T`.
    ///
    /// # Errors
    /// Returns `SqlExecutorError::AdapterNotFound` naming `T` when none is registered.
    pub fn get<T: 'static>(&self) -> Result<AdapterRef<T>, SqlExecutorError> {
        let guard = match self.adapters.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard
            .get(&TypeId::of::<T>())
            .and_then(|entry| entry.downcast_ref::<AdapterRef<T>>())
            .cloned()
            .ok_or(SqlExecutorError::AdapterNotFound(type_name::<T>()))
    }

    #[must_use]
    pub fn contains<T: 'static>(&self) -> bool {
        match self.adapters.read() {
            Ok(guard) => guard.contains_key(&TypeId::of::<T>()),
            Err(poisoned) => poisoned.into_inner().contains_key(&TypeId::of::<T>()),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self.adapters.read() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("adapters", &self.len())
            .finish()
    }
}
