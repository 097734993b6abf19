//! Cache backend on a NATS JetStream key-value bucket.
//!
//! The bucket handle is opened (or created) once at startup and shared by all
//! handlers. A bucket that already exists is used with its existing settings;
//! `max_age` only applies when this process creates it.
use super::{CacheBackend, CacheError, CacheResult};
use async_nats::jetstream::{self, kv};
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

pub struct NatsKvBackend {
    store: kv::Store,
    bucket: String,
}

impl NatsKvBackend {
    pub async fn open(
        client: async_nats::Client,
        bucket: &str,
        max_age: Option<Duration>,
    ) -> CacheResult<Self> {
        let context = jetstream::new(client);
        let store = match context.get_key_value(bucket).await {
            Ok(store) => store,
            Err(err) => {
                tracing::info!(bucket = %bucket, reason = %err, "creating cache bucket");
                context
                    .create_key_value(kv::Config {
                        bucket: bucket.to_string(),
                        history: 1,
                        max_age: max_age.unwrap_or_default(),
                        ..Default::default()
                    })
                    .await
                    .map_err(|err| CacheError::Backend(err.to_string()))?
            }
        };
        Ok(Self {
            store,
            bucket: bucket.to_string(),
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl CacheBackend for NatsKvBackend {
    async fn get(&self, key: &str) -> CacheResult<Option<Bytes>> {
        self.store
            .get(key)
            .await
            .map_err(|err| CacheError::Backend(err.to_string()))
    }

    async fn put(&self, key: &str, value: Bytes) -> CacheResult<()> {
        self.store
            .put(key, value)
            .await
            .map(|_revision| ())
            .map_err(|err| CacheError::Backend(err.to_string()))
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.store
            .delete(key)
            .await
            .map_err(|err| CacheError::Backend(err.to_string()))
    }

    fn backend_name(&self) -> &'static str {
        "nats_kv"
    }
}
