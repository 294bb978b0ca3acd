// # Service Registry and Lifecycle
//
// Name-keyed registration of service factories with lazy singleton
// construction, deterministic dependency-respecting initialization, and
// fault-tolerant reverse-order shutdown.
//
// Core services initialize first in a fixed priority order so that
// cross-cutting collaborators (metrics, cache) are reachable from within
// other services' construction paths; everything else follows in
// registration order. Shutdown is strictly reverse of construction order and
// swallows per-service errors so one bad teardown cannot block the rest.

pub mod container;

pub use container::ServiceContainer;

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::{AppError, Result};

/// Fixed core-first initialization order. Remaining services follow in
/// registration order.
pub const CORE_PRIORITY: [&str; 6] = [
    "logging",
    "error",
    "validation",
    "metrics",
    "cache",
    "security",
];

/// Optional async init/shutdown hooks for registered services.
#[async_trait]
pub trait LifecycleService: Send + Sync {
    fn service_name(&self) -> &str;

    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

/// What a factory hands back: the instance plus its optional lifecycle hooks.
#[derive(Clone)]
pub struct ServiceHandle {
    pub instance: Arc<dyn Any + Send + Sync>,
    pub lifecycle: Option<Arc<dyn LifecycleService>>,
}

impl ServiceHandle {
    pub fn plain<T: Any + Send + Sync>(instance: Arc<T>) -> Self {
        Self {
            instance,
            lifecycle: None,
        }
    }

    pub fn with_lifecycle<T: Any + Send + Sync>(
        instance: Arc<T>,
        lifecycle: Arc<dyn LifecycleService>,
    ) -> Self {
        Self {
            instance,
            lifecycle: Some(lifecycle),
        }
    }
}

type Factory = Arc<dyn Fn(&ServiceRegistry) -> Result<ServiceHandle> + Send + Sync>;

pub struct ServiceRegistry {
    factories: RwLock<HashMap<String, Factory>>,
    registration_order: RwLock<Vec<String>>,
    instances: RwLock<HashMap<String, ServiceHandle>>,
    construction_order: RwLock<Vec<String>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
            registration_order: RwLock::new(Vec::new()),
            instances: RwLock::new(HashMap::new()),
            construction_order: RwLock::new(Vec::new()),
        }
    }

    /// Register a factory under `name`. Registering twice replaces the prior
    /// factory; an already-constructed singleton is kept.
    pub fn register_factory<F>(&self, name: &str, factory: F)
    where
        F: Fn(&ServiceRegistry) -> Result<ServiceHandle> + Send + Sync + 'static,
    {
        let mut factories = self.factories.write();
        if !factories.contains_key(name) {
            self.registration_order.write().push(name.to_string());
        }
        factories.insert(name.to_string(), Arc::new(factory));
        tracing::debug!(service = name, "service factory registered");
    }

    /// Register an already-built singleton.
    pub fn register_instance<T: Any + Send + Sync>(&self, name: &str, instance: Arc<T>) {
        self.register_handle(name, ServiceHandle::plain(instance));
    }

    pub fn register_handle(&self, name: &str, handle: ServiceHandle) {
        {
            let factories = self.factories.read();
            if !factories.contains_key(name)
                && !self.registration_order.read().contains(&name.to_string())
            {
                drop(factories);
                self.registration_order.write().push(name.to_string());
            }
        }
        let mut instances = self.instances.write();
        if instances.insert(name.to_string(), handle).is_none() {
            self.construction_order.write().push(name.to_string());
        }
    }

    fn construct(&self, name: &str) -> Result<ServiceHandle> {
        let factory = self
            .factories
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| AppError::Configuration(format!("service not registered: {}", name)))?;
        // Factory runs without registry locks held so it may resolve its own
        // dependencies recursively.
        factory(self)
    }

    /// Resolve the cached singleton, constructing it on first use.
    pub fn handle(&self, name: &str) -> Result<ServiceHandle> {
        if let Some(handle) = self.instances.read().get(name) {
            return Ok(handle.clone());
        }
        let handle = self.construct(name)?;
        let mut instances = self.instances.write();
        // A concurrent caller may have won the race; keep the first instance.
        if let Some(existing) = instances.get(name) {
            return Ok(existing.clone());
        }
        instances.insert(name.to_string(), handle.clone());
        self.construction_order.write().push(name.to_string());
        Ok(handle)
    }

    /// Typed singleton resolution.
    pub fn get<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>> {
        let handle = self.handle(name)?;
        handle.instance.downcast::<T>().map_err(|_| {
            AppError::Configuration(format!("service '{}' has unexpected type", name))
        })
    }

    /// Construct a fresh, uncached instance (scoped-resource variant).
    pub fn get_fresh<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>> {
        let handle = self.construct(name)?;
        handle.instance.downcast::<T>().map_err(|_| {
            AppError::Configuration(format!("service '{}' has unexpected type", name))
        })
    }

    /// Non-erroring lookup for cross-cutting collaborators that must degrade
    /// gracefully when a dependency is not registered or not yet built.
    pub fn get_service<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        let handle = self.instances.read().get(name).cloned()?;
        handle.instance.downcast::<T>().ok()
    }

    pub fn registered_names(&self) -> Vec<String> {
        self.registration_order.read().clone()
    }

    fn initialization_order(&self) -> Vec<String> {
        let registered = self.registration_order.read().clone();
        let mut ordered: Vec<String> = CORE_PRIORITY
            .iter()
            .filter(|name| registered.iter().any(|r| r == *name))
            .map(|name| name.to_string())
            .collect();
        for name in registered {
            if !ordered.contains(&name) {
                ordered.push(name);
            }
        }
        ordered
    }

    /// Initialize all registered services: core priority list first, then
    /// registration order. A failure short-circuits and is re-raised after
    /// logging.
    pub async fn initialize_all(&self) -> Result<()> {
        for name in self.initialization_order() {
            let handle = self.handle(&name)?;
            if let Some(lifecycle) = handle.lifecycle {
                if let Err(err) = lifecycle.initialize().await {
                    tracing::error!(service = %name, error = %err, "service initialization failed");
                    return Err(err);
                }
                tracing::info!(service = %name, "service initialized");
            }
        }
        Ok(())
    }

    /// Shut down constructed services in reverse construction order.
    /// Individual failures are logged and swallowed.
    pub async fn shutdown_all(&self) {
        let order: Vec<String> = {
            let mut order = self.construction_order.write();
            let names = order.clone();
            order.clear();
            names
        };
        for name in order.into_iter().rev() {
            let handle = self.instances.write().remove(&name);
            if let Some(ServiceHandle {
                lifecycle: Some(lifecycle),
                ..
            }) = handle
            {
                if let Err(err) = lifecycle.shutdown().await {
                    tracing::error!(service = %name, error = %err, "service shutdown failed");
                } else {
                    tracing::info!(service = %name, "service shut down");
                }
            }
        }
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
