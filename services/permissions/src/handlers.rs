//! Grant, revoke, list and check.
//!
//! # Key invariants
//! - Writes are validated against the static schema before any I/O; an invalid
//!   pair never reaches the store or the cache.
//! - The store is the source of truth. After a committed write the cache entry
//!   is rebuilt from a fresh full read, so later reads never see pre-write data.
//!   If that read fails the entry is invalidated instead.
//! - A cache hit always answers reads; `check` touches the store only on a miss.
//! - The refresh spawned by an affirmative `check` miss is detached: its failure
//!   is logged and counted, never reported to the caller.
use crate::cache::PermissionCache;
use crate::error::{ServiceError, ServiceResult};
use crate::store::PermissionStore;
use keyward_authz::wire::{
    CheckRequest, CheckResponse, GrantRequest, ListRequest, ListResponse, PermissionRequest,
    RevokeRequest, StatusResponse,
};
use keyward_authz::{canonical_case, schema};
use std::sync::Arc;
use tokio::task::JoinHandle;

#[derive(Clone)]
pub struct PermissionService {
    store: Arc<dyn PermissionStore>,
    cache: PermissionCache,
}

impl PermissionService {
    pub fn new(store: Arc<dyn PermissionStore>, cache: PermissionCache) -> Self {
        Self { store, cache }
    }

    pub fn store(&self) -> &Arc<dyn PermissionStore> {
        &self.store
    }

    pub fn cache(&self) -> &PermissionCache {
        &self.cache
    }

    pub async fn grant(&self, request: GrantRequest) -> ServiceResult<StatusResponse> {
        validate(&request)?;
        self.store
            .grant(&request.api_key, &request.module, &request.action)
            .await?;
        self.rebuild_cache(&request.api_key).await?;
        tracing::debug!(module = %request.module, action = %request.action, "permission granted");
        Ok(StatusResponse::ok())
    }

    pub async fn revoke(&self, request: RevokeRequest) -> ServiceResult<StatusResponse> {
        validate(&request)?;
        self.store
            .revoke(&request.api_key, &request.module, &request.action)
            .await?;
        self.rebuild_cache(&request.api_key).await?;
        tracing::debug!(module = %request.module, action = %request.action, "permission revoked");
        Ok(StatusResponse::ok())
    }

    pub async fn list(&self, request: ListRequest) -> ServiceResult<ListResponse> {
        if let Some(cached) = self.cache.get(&request.api_key).await {
            return Ok(ListResponse {
                permissions: cached.to_vec(),
            });
        }
        let permissions = self.store.list(&request.api_key).await?;
        self.cache.put(&request.api_key, &permissions).await;
        Ok(ListResponse {
            permissions: permissions.to_vec(),
        })
    }

    pub async fn check(&self, request: CheckRequest) -> ServiceResult<CheckResponse> {
        if let Some(actions) = self.cache.get_action_map(&request.api_key).await {
            let allowed = actions
                .get(&canonical_case(&request.module))
                .is_some_and(|set| set.contains(&canonical_case(&request.action)));
            return Ok(CheckResponse { allowed });
        }
        let allowed = self
            .store
            .check(&request.api_key, &request.module, &request.action)
            .await?;
        if allowed {
            self.spawn_refresh(request.api_key);
        }
        Ok(CheckResponse { allowed })
    }

    async fn rebuild_cache(&self, api_key: &str) -> ServiceResult<()> {
        match self.store.list(api_key).await {
            Ok(permissions) => {
                self.cache.put(api_key, &permissions).await;
                Ok(())
            }
            Err(err) => {
                // The write is committed; never leave a pre-write entry behind.
                self.cache.invalidate(api_key).await;
                Err(ServiceError::Database(err))
            }
        }
    }

    /// Populate the cache for `api_key` without holding up the current request.
    pub fn spawn_refresh(&self, api_key: String) -> JoinHandle<()> {
        let store = self.store.clone();
        let cache = self.cache.clone();
        tokio::spawn(async move {
            match store.list(&api_key).await {
                Ok(permissions) => {
                    cache.put(&api_key, &permissions).await;
                    metrics::counter!("keyward_background_refresh_total", "result" => "ok")
                        .increment(1);
                }
                Err(err) => {
                    metrics::counter!("keyward_background_refresh_total", "result" => "error")
                        .increment(1);
                    tracing::error!(error = %err, "background cache refresh failed");
                }
            }
        })
    }
}

fn validate(request: &PermissionRequest) -> ServiceResult<()> {
    if schema::is_valid(&request.module, &request.action) {
        return Ok(());
    }
    Err(ServiceError::InvalidPermission {
        module: request.module.clone(),
        action: request.action.clone(),
    })
}
