// Typed service container.
//
// Built once at startup: a struct of strongly typed service handles wired in
// dependency order, plus the name-keyed registry for components that need
// late binding. Cross-cutting collaborators (metrics into cache/events) are
// attached after construction so construction paths never cycle.

use std::sync::Arc;

use async_trait::async_trait;

use crate::cache::{CacheManager, MemoryCacheBackend, RedisCacheBackend};
use crate::catalog::CatalogStore;
use crate::chat::{ChatFabric, ChatService, ChatStore, ConnectionManager, RedisChatBroker};
use crate::config::Settings;
use crate::error::Result;
use crate::events::EventBus;
use crate::metrics::MetricsService;
use crate::permissions::PermissionService;
use crate::security::{SecurityLifecycle, SecurityService};
use crate::services::{LifecycleService, ServiceHandle, ServiceRegistry};
use crate::sync::{SyncHistoryRepository, SyncService};

pub struct ServiceContainer {
    pub settings: Settings,
    pub registry: Arc<ServiceRegistry>,
    pub metrics: Arc<MetricsService>,
    pub cache: Arc<CacheManager>,
    pub events: Arc<EventBus>,
    pub security: Arc<SecurityService>,
    pub permissions: Arc<PermissionService>,
    pub chat: Arc<ChatService>,
    pub catalog: Arc<CatalogStore>,
    pub sync: Arc<SyncService>,
}

struct SyncLifecycle(Arc<SyncService>);

#[async_trait]
impl LifecycleService for SyncLifecycle {
    fn service_name(&self) -> &str {
        "sync"
    }

    async fn initialize(&self) -> Result<()> {
        self.0.initialize().await
    }

    async fn shutdown(&self) -> Result<()> {
        self.0.shutdown().await;
        Ok(())
    }
}

impl ServiceContainer {
    /// Build the full graph against in-process backends. Redis is attached
    /// separately so construction never needs the network.
    pub fn build(settings: Settings) -> Result<Arc<Self>> {
        let registry = Arc::new(ServiceRegistry::new());

        let metrics = Arc::new(MetricsService::new(
            &settings.metrics_namespace,
            &settings.metrics_subsystem,
        ));

        let cache = Arc::new(CacheManager::new());
        cache.register_backend("memory", Arc::new(MemoryCacheBackend::new()));
        cache.set_metrics(metrics.clone());

        let events = Arc::new(EventBus::new());
        events.set_metrics(metrics.clone());

        let security = Arc::new(SecurityService::new(&settings, cache.clone(), events.clone())?);
        security.set_metrics(metrics.clone());

        let permissions = Arc::new(PermissionService::new(cache.clone(), events.clone()));

        let chat_store = Arc::new(ChatStore::new());
        let fabric = Arc::new(ChatFabric::new(Arc::new(ConnectionManager::new())));
        let chat = Arc::new(ChatService::new(
            chat_store,
            security.encryption.clone(),
            fabric,
            cache.clone(),
        ));
        chat.set_metrics(metrics.clone());

        let catalog = Arc::new(CatalogStore::new());
        let sync = Arc::new(SyncService::new(
            settings.clone(),
            Arc::new(SyncHistoryRepository::new()),
            catalog.clone(),
            events.clone(),
        ));
        sync.set_metrics(metrics.clone());

        // Name-keyed registration keeps the ordered lifecycle walk and late
        // binding available alongside the typed handles.
        {
            let metrics = metrics.clone();
            registry.register_factory("metrics", move |_| {
                Ok(ServiceHandle::plain(metrics.clone()))
            });
        }
        {
            let cache = cache.clone();
            registry.register_factory("cache", move |_| Ok(ServiceHandle::plain(cache.clone())));
        }
        {
            let events = events.clone();
            registry.register_factory("events", move |_| Ok(ServiceHandle::plain(events.clone())));
        }
        {
            let security = security.clone();
            registry.register_factory("security", move |_| {
                Ok(ServiceHandle::with_lifecycle(
                    security.clone(),
                    Arc::new(SecurityLifecycle(security.clone())),
                ))
            });
        }
        {
            let permissions = permissions.clone();
            registry.register_factory("permissions", move |_| {
                Ok(ServiceHandle::plain(permissions.clone()))
            });
        }
        {
            let chat = chat.clone();
            registry.register_factory("chat", move |_| Ok(ServiceHandle::plain(chat.clone())));
        }
        {
            let sync = sync.clone();
            registry.register_factory("sync", move |_| {
                Ok(ServiceHandle::with_lifecycle(
                    sync.clone(),
                    Arc::new(SyncLifecycle(sync.clone())),
                ))
            });
        }

        Ok(Arc::new(Self {
            settings,
            registry,
            metrics,
            cache,
            events,
            security,
            permissions,
            chat,
            catalog,
            sync,
        }))
    }

    /// Attach the Redis backends: cache, and the chat room channel bridge
    /// (publisher plus the singleton listener task).
    pub async fn attach_redis(&self) -> Result<tokio::task::JoinHandle<()>> {
        let url = self.settings.redis_url.clone();

        let backend = RedisCacheBackend::connect(&url).await?;
        self.cache.register_backend("redis", Arc::new(backend));
        self.cache.set_default_backend("redis")?;

        let broker = RedisChatBroker::connect(&url).await?;
        let fabric = self.chat.fabric();
        fabric.set_broker(Arc::new(broker));
        crate::chat::start_redis_listener(&url, fabric).await
    }

    pub async fn initialize_all(&self) -> Result<()> {
        self.registry.initialize_all().await
    }

    pub async fn shutdown_all(&self) {
        self.registry.shutdown_all().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_build_and_lifecycle() {
        let container = ServiceContainer::build(Settings::default()).unwrap();
        container.initialize_all().await.unwrap();

        // Typed handles and the registry agree.
        let via_registry = container
            .registry
            .get::<MetricsService>("metrics")
            .unwrap();
        assert!(Arc::ptr_eq(&via_registry, &container.metrics));

        container.shutdown_all().await;
    }

    #[tokio::test]
    async fn test_token_round_trip_through_container() {
        let container = ServiceContainer::build(Settings::default()).unwrap();
        let pair = container
            .security
            .create_token_pair("u1", "member", Vec::new(), serde_json::Value::Null)
            .await
            .unwrap();
        let claims = container
            .security
            .validate_token(&pair.access_token)
            .await
            .unwrap();
        assert_eq!(claims.sub, "u1");
    }
}
