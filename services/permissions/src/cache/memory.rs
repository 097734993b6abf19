//! In-memory cache backend with optional TTL expiry.
use super::{CacheBackend, CacheResult};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Bytes,
    expires_at: Option<Instant>,
}

/// Process-local cache backend.
///
/// ```
/// use bytes::Bytes;
/// use permissions::cache::{CacheBackend, memory::MemoryCacheBackend};
///
/// let cache = MemoryCacheBackend::new(None);
/// let rt = tokio::runtime::Runtime::new().expect("rt");
/// rt.block_on(async {
///     cache.put("k", Bytes::from_static(b"v")).await.expect("put");
///     assert_eq!(cache.get("k").await.expect("get"), Some(Bytes::from_static(b"v")));
/// });
/// ```
#[derive(Debug, Default)]
pub struct MemoryCacheBackend {
    inner: RwLock<HashMap<String, CacheEntry>>,
    ttl: Option<Duration>,
}

impl MemoryCacheBackend {
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Drop every entry.
    pub async fn clear(&self) {
        self.inner.write().await.clear();
    }
}

#[async_trait]
impl CacheBackend for MemoryCacheBackend {
    async fn get(&self, key: &str) -> CacheResult<Option<Bytes>> {
        {
            let guard = self.inner.read().await;
            match guard.get(key) {
                None => return Ok(None),
                Some(entry) if entry.expires_at.is_none_or(|at| Instant::now() < at) => {
                    return Ok(Some(entry.value.clone()));
                }
                Some(_) => {}
            }
        }
        // Expired: evict lazily, unless a writer refreshed it in between.
        let mut guard = self.inner.write().await;
        if let Some(entry) = guard.get(key) {
            if entry.expires_at.is_none_or(|at| Instant::now() < at) {
                return Ok(Some(entry.value.clone()));
            }
            guard.remove(key);
        }
        Ok(None)
    }

    async fn put(&self, key: &str, value: Bytes) -> CacheResult<()> {
        let expires_at = self.ttl.map(|ttl| Instant::now() + ttl);
        self.inner
            .write()
            .await
            .insert(key.to_string(), CacheEntry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.inner.write().await.remove(key);
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
