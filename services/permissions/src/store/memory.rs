//! In-memory permission store.
//!
//! Not durable: all grants are lost on restart, and multiple service instances
//! each hold independent state. Intended for local runs and the test suite.
use super::{PermissionStore, StoreResult};
use async_trait::async_trait;
use keyward_authz::PermissionSet;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
pub struct InMemoryStore {
    grants: RwLock<HashMap<String, PermissionSet>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PermissionStore for InMemoryStore {
    async fn grant(&self, api_key: &str, module: &str, action: &str) -> StoreResult<()> {
        let mut grants = self.grants.write().await;
        grants
            .entry(api_key.to_string())
            .or_default()
            .insert(module, action);
        Ok(())
    }

    async fn revoke(&self, api_key: &str, module: &str, action: &str) -> StoreResult<()> {
        let mut grants = self.grants.write().await;
        if let Some(set) = grants.get_mut(api_key) {
            set.remove(module, action);
            if set.is_empty() {
                grants.remove(api_key);
            }
        }
        Ok(())
    }

    async fn list(&self, api_key: &str) -> StoreResult<PermissionSet> {
        let grants = self.grants.read().await;
        Ok(grants.get(api_key).cloned().unwrap_or_default())
    }

    async fn check(&self, api_key: &str, module: &str, action: &str) -> StoreResult<bool> {
        let grants = self.grants.read().await;
        Ok(grants
            .get(api_key)
            .is_some_and(|set| set.contains(module, action)))
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }

    fn is_durable(&self) -> bool {
        false
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
