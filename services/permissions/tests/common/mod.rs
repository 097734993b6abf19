#![allow(dead_code)]

use keyward_bus::InProcessBus;
use keyward_client::PermissionsClient;
use permissions::cache::PermissionCache;
use permissions::cache::memory::MemoryCacheBackend;
use permissions::dispatcher::{Dispatcher, DispatcherHandle};
use permissions::handlers::PermissionService;
use permissions::store::PermissionStore;
use permissions::store::memory::InMemoryStore;
use std::sync::Arc;
use std::time::Duration;

pub struct Stack {
    pub bus: Arc<InProcessBus>,
    pub client: PermissionsClient,
    pub cache: Arc<MemoryCacheBackend>,
    pub store: Arc<dyn PermissionStore>,
    pub dispatcher: DispatcherHandle,
}

pub async fn start_stack() -> Stack {
    start_stack_with_store(Arc::new(InMemoryStore::new())).await
}

pub async fn start_stack_with_store(store: Arc<dyn PermissionStore>) -> Stack {
    let bus = Arc::new(InProcessBus::new());
    let cache = Arc::new(MemoryCacheBackend::new(None));
    let service = PermissionService::new(store.clone(), PermissionCache::new(cache.clone()));
    let dispatcher = Dispatcher::new(bus.clone(), service)
        .start()
        .await
        .expect("start dispatcher");
    let client = PermissionsClient::new(bus.clone()).with_timeout(Duration::from_secs(2));
    Stack {
        bus,
        client,
        cache,
        store,
        dispatcher,
    }
}

pub fn unique_key() -> String {
    format!("key-{}", uuid::Uuid::new_v4())
}
