//! Per-identity permission cache.
//!
//! # Purpose
//! [`PermissionCache`] is the read accelerator in front of the permission
//! store. It holds one entry per identity: the identity's complete permission
//! set as a module → sorted action list object.
//!
//! # Key invariants
//! - An absent entry means "unknown", never "no permissions"; an identity with
//!   nothing granted is cached as an empty object.
//! - Every write replaces the whole entry.
//! - Backend faults are logged and counted, never returned: a failed read is a
//!   miss, a failed write leaves the entry as it was.
//! - Backend keys are `k_` + URL-safe base64 (no padding) of the identity, so any
//!   identity string (including the empty string) maps to a legal key.
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use bytes::Bytes;
use keyward_authz::{ActionMap, PermissionSet};
use std::sync::Arc;
use thiserror::Error;

pub mod memory;
pub mod nats_kv;

const KEY_PREFIX: &str = "k_";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),
    #[error("malformed cache entry: {0}")]
    Decode(#[from] serde_json::Error),
}

pub type CacheResult<T> = Result<T, CacheError>;

#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> CacheResult<Option<Bytes>>;
    async fn put(&self, key: &str, value: Bytes) -> CacheResult<()>;
    async fn delete(&self, key: &str) -> CacheResult<()>;
    fn backend_name(&self) -> &'static str;
}

pub fn cache_key(api_key: &str) -> String {
    format!("{KEY_PREFIX}{}", URL_SAFE_NO_PAD.encode(api_key.as_bytes()))
}

/// Fail-open gateway over a [`CacheBackend`].
#[derive(Clone)]
pub struct PermissionCache {
    backend: Arc<dyn CacheBackend>,
}

impl PermissionCache {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self { backend }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.backend_name()
    }

    /// Cached permission set, or `None` on miss or backend fault.
    pub async fn get(&self, api_key: &str) -> Option<PermissionSet> {
        self.lookup("get", api_key).await
    }

    /// Cached module → actions view, or `None` on miss or backend fault.
    pub async fn get_action_map(&self, api_key: &str) -> Option<ActionMap> {
        self.lookup("get_action_map", api_key)
            .await
            .map(PermissionSet::into_action_map)
    }

    /// Replace the entry for `api_key` with `permissions`.
    pub async fn put(&self, api_key: &str, permissions: &PermissionSet) {
        let result = match serde_json::to_vec(permissions) {
            Ok(body) => self.backend.put(&cache_key(api_key), Bytes::from(body)).await,
            Err(err) => Err(err.into()),
        };
        match result {
            Ok(()) => {
                metrics::counter!("keyward_cache_writes_total", "result" => "ok").increment(1);
            }
            Err(err) => {
                metrics::counter!("keyward_cache_writes_total", "result" => "error").increment(1);
                tracing::error!(
                    backend = self.backend.backend_name(),
                    error = %err,
                    "failed to update permission cache"
                );
            }
        }
    }

    /// Best-effort removal of the entry for `api_key`.
    pub async fn invalidate(&self, api_key: &str) {
        if let Err(err) = self.backend.delete(&cache_key(api_key)).await {
            tracing::error!(
                backend = self.backend.backend_name(),
                error = %err,
                "failed to invalidate permission cache entry"
            );
        }
    }

    async fn lookup(&self, op: &'static str, api_key: &str) -> Option<PermissionSet> {
        let outcome = match self.backend.get(&cache_key(api_key)).await {
            Ok(Some(body)) => serde_json::from_slice::<PermissionSet>(&body)
                .map(Some)
                .map_err(CacheError::from),
            Ok(None) => Ok(None),
            Err(err) => Err(err),
        };
        let result = match &outcome {
            Ok(Some(_)) => "hit",
            Ok(None) => "miss",
            Err(_) => "error",
        };
        metrics::counter!("keyward_cache_lookups_total", "op" => op, "result" => result)
            .increment(1);
        match outcome {
            Ok(entry) => entry,
            Err(err) => {
                tracing::error!(
                    backend = self.backend.backend_name(),
                    error = %err,
                    "failed to read permission cache"
                );
                None
            }
        }
    }
}
