//! Process-wide service registry.
//!
//! One plugin registers a capability under a name during its on-load hook;
//! another looks it up by that name. Load order across plugins is not
//! guaranteed, so a lookup may run before the provider has loaded and
//! callers must handle [`ServiceError::NotFound`].

use std::any::Any;
use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;

/// Opaque capability handle stored in the registry.
pub type ServiceHandle = Arc<dyn Any + Send + Sync>;

/// Errors returned by service lookups.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ServiceError {
    /// No service is registered under this name.
    #[error("service '{name}' is not registered")]
    NotFound { name: String },

    /// A service exists but is not of the requested type.
    #[error("service '{name}' is registered with a different type than '{expected}'")]
    TypeMismatch { name: String, expected: &'static str },
}

/// Name → capability map shared by all plugins.
#[derive(Default)]
pub struct ServiceRegistry {
    services: DashMap<String, ServiceHandle>,
}

impl ServiceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a service, replacing any existing entry with the same name.
    pub fn register<T>(&self, name: impl Into<String>, service: T)
    where
        T: Any + Send + Sync,
    {
        self.register_handle(name, Arc::new(service));
    }

    /// Register an already-shared handle, replacing any existing entry.
    pub fn register_handle(&self, name: impl Into<String>, handle: ServiceHandle) {
        let name = name.into();
        if self.services.insert(name.clone(), handle).is_some() {
            tracing::debug!(service = %name, "replaced registered service");
        }
    }

    /// Look up the raw handle for a service.
    pub fn get_handle(&self, name: &str) -> Result<ServiceHandle, ServiceError> {
        self.services
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| ServiceError::NotFound {
                name: name.to_string(),
            })
    }

    /// Look up a service and downcast it to `T`.
    pub fn get<T>(&self, name: &str) -> Result<Arc<T>, ServiceError>
    where
        T: Any + Send + Sync,
    {
        self.get_handle(name)?
            .downcast::<T>()
            .map_err(|_| ServiceError::TypeMismatch {
                name: name.to_string(),
                expected: std::any::type_name::<T>(),
            })
    }

    /// Remove a service. Removing a name that is not registered is a no-op.
    pub fn unregister(&self, name: &str) {
        self.services.remove(name);
    }

    /// Whether a service is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    /// Registered service names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.services.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("services", &self.names())
            .finish()
    }
}
