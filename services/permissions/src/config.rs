use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_METRICS_BIND: &str = "0.0.0.0:8080";
const DEFAULT_NATS_URL: &str = "nats://127.0.0.1:4222";
const DEFAULT_CACHE_BUCKET: &str = "permissions_cache";
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5000;
const DEFAULT_PG_MAX_CONNECTIONS: u32 = 20;
const DEFAULT_PG_CONNECT_TIMEOUT_MS: u64 = 2000;
const DEFAULT_PG_ACQUIRE_TIMEOUT_MS: u64 = 2000;

// Permissions service configuration sourced from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    // HTTP listener for /metrics and /health.
    pub metrics_bind: SocketAddr,
    // Request/reply transport the dispatcher subscribes on.
    pub bus: BusBackend,
    pub nats_url: String,
    // Source-of-truth store.
    pub storage: StorageBackend,
    pub postgres: Option<PostgresConfig>,
    // Per-identity cache backend.
    pub cache: CacheBackendKind,
    pub cache_bucket: String,
    // Optional expiry for cache entries; unset means entries never expire.
    pub cache_ttl_secs: Option<u64>,
    // Bounded wait for the self-test client.
    pub request_timeout_ms: u64,
    // Identity used by the start-up self-test; unset skips it.
    pub self_test_api_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostgresConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout_ms: u64,
    pub acquire_timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusBackend {
    Nats,
    InProcess,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackendKind {
    NatsKv,
    Memory,
}

impl FromStr for BusBackend {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "nats" => Ok(Self::Nats),
            "in_process" | "inprocess" => Ok(Self::InProcess),
            other => bail!("unknown bus backend: {other}"),
        }
    }
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "postgres" => Ok(Self::Postgres),
            "memory" => Ok(Self::Memory),
            other => bail!("unknown storage backend: {other}"),
        }
    }
}

impl FromStr for CacheBackendKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "nats_kv" | "natskv" => Ok(Self::NatsKv),
            "memory" => Ok(Self::Memory),
            other => bail!("unknown cache backend: {other}"),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct PostgresConfigOverride {
    url: Option<String>,
    max_connections: Option<u32>,
    connect_timeout_ms: Option<u64>,
    acquire_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServiceConfigOverride {
    metrics_bind: Option<String>,
    bus: Option<String>,
    nats_url: Option<String>,
    storage: Option<String>,
    postgres: Option<PostgresConfigOverride>,
    cache: Option<String>,
    cache_bucket: Option<String>,
    cache_ttl_secs: Option<u64>,
    request_timeout_ms: Option<u64>,
    self_test_api_key: Option<String>,
}

fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|err| anyhow::anyhow!("parse {key}: {err}")),
        Err(_) => Ok(None),
    }
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self> {
        let metrics_bind = std::env::var("KEYWARD_METRICS_BIND")
            .unwrap_or_else(|_| DEFAULT_METRICS_BIND.to_string())
            .parse()
            .with_context(|| "parse KEYWARD_METRICS_BIND")?;
        let bus = env_parse::<BusBackend>("KEYWARD_BUS")?.unwrap_or(BusBackend::Nats);
        let nats_url = std::env::var("KEYWARD_NATS_URL")
            .or_else(|_| std::env::var("NATS_URL"))
            .unwrap_or_else(|_| DEFAULT_NATS_URL.to_string());
        let storage =
            env_parse::<StorageBackend>("KEYWARD_STORAGE")?.unwrap_or(StorageBackend::Memory);
        let postgres = match std::env::var("KEYWARD_POSTGRES_URL")
            .or_else(|_| std::env::var("DATABASE_URL"))
        {
            Ok(url) => Some(PostgresConfig {
                url,
                max_connections: env_parse("KEYWARD_POSTGRES_MAX_CONNECTIONS")?
                    .unwrap_or(DEFAULT_PG_MAX_CONNECTIONS),
                connect_timeout_ms: env_parse("KEYWARD_POSTGRES_CONNECT_TIMEOUT_MS")?
                    .unwrap_or(DEFAULT_PG_CONNECT_TIMEOUT_MS),
                acquire_timeout_ms: env_parse("KEYWARD_POSTGRES_ACQUIRE_TIMEOUT_MS")?
                    .unwrap_or(DEFAULT_PG_ACQUIRE_TIMEOUT_MS),
            }),
            Err(_) => None,
        };
        let cache =
            env_parse::<CacheBackendKind>("KEYWARD_CACHE")?.unwrap_or(CacheBackendKind::Memory);
        let cache_bucket = std::env::var("KEYWARD_CACHE_BUCKET")
            .unwrap_or_else(|_| DEFAULT_CACHE_BUCKET.to_string());
        let cache_ttl_secs = env_parse::<u64>("KEYWARD_CACHE_TTL_SECS")?.filter(|secs| *secs > 0);
        let request_timeout_ms = env_parse::<u64>("KEYWARD_REQUEST_TIMEOUT_MS")?
            .filter(|ms| *ms > 0)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS);
        let self_test_api_key = std::env::var("KEYWARD_SELF_TEST_API_KEY")
            .ok()
            .filter(|key| !key.is_empty());
        Ok(Self {
            metrics_bind,
            bus,
            nats_url,
            storage,
            postgres,
            cache,
            cache_bucket,
            cache_ttl_secs,
            request_timeout_ms,
            self_test_api_key,
        })
    }

    pub fn from_env_or_yaml() -> Result<Self> {
        let mut config = Self::from_env()?;
        if let Ok(path) = std::env::var("KEYWARD_CONFIG") {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("read KEYWARD_CONFIG: {path}"))?;
            config.apply_yaml(&contents)?;
        }
        config.validate()?;
        Ok(config)
    }

    fn apply_yaml(&mut self, contents: &str) -> Result<()> {
        let override_cfg: ServiceConfigOverride =
            serde_yaml::from_str(contents).with_context(|| "parse permissions config yaml")?;
        if let Some(value) = override_cfg.metrics_bind {
            self.metrics_bind = value.parse().with_context(|| "parse metrics_bind")?;
        }
        if let Some(value) = override_cfg.bus {
            self.bus = value.parse().with_context(|| "parse bus")?;
        }
        if let Some(value) = override_cfg.nats_url {
            self.nats_url = value;
        }
        if let Some(value) = override_cfg.storage {
            self.storage = value.parse().with_context(|| "parse storage")?;
        }
        if let Some(pg) = override_cfg.postgres {
            let base = self.postgres.take();
            let url = pg
                .url
                .or_else(|| base.as_ref().map(|cfg| cfg.url.clone()))
                .context("postgres.url missing in config yaml")?;
            self.postgres = Some(PostgresConfig {
                url,
                max_connections: pg
                    .max_connections
                    .or(base.as_ref().map(|cfg| cfg.max_connections))
                    .unwrap_or(DEFAULT_PG_MAX_CONNECTIONS),
                connect_timeout_ms: pg
                    .connect_timeout_ms
                    .or(base.as_ref().map(|cfg| cfg.connect_timeout_ms))
                    .unwrap_or(DEFAULT_PG_CONNECT_TIMEOUT_MS),
                acquire_timeout_ms: pg
                    .acquire_timeout_ms
                    .or(base.as_ref().map(|cfg| cfg.acquire_timeout_ms))
                    .unwrap_or(DEFAULT_PG_ACQUIRE_TIMEOUT_MS),
            });
        }
        if let Some(value) = override_cfg.cache {
            self.cache = value.parse().with_context(|| "parse cache")?;
        }
        if let Some(value) = override_cfg.cache_bucket {
            self.cache_bucket = value;
        }
        if let Some(value) = override_cfg.cache_ttl_secs {
            self.cache_ttl_secs = Some(value).filter(|secs| *secs > 0);
        }
        if let Some(value) = override_cfg.request_timeout_ms.filter(|ms| *ms > 0) {
            self.request_timeout_ms = value;
        }
        if let Some(value) = override_cfg.self_test_api_key {
            self.self_test_api_key = Some(value).filter(|key| !key.is_empty());
        }
        Ok(())
    }

    /// Reject combinations that cannot start.
    pub fn validate(&self) -> Result<()> {
        if self.storage == StorageBackend::Postgres && self.postgres.is_none() {
            bail!("storage=postgres requires KEYWARD_POSTGRES_URL or DATABASE_URL");
        }
        if self.cache == CacheBackendKind::NatsKv && self.bus != BusBackend::Nats {
            bail!("cache=nats_kv requires bus=nats");
        }
        if self.cache_bucket.trim().is_empty() {
            bail!("cache bucket name must not be empty");
        }
        Ok(())
    }

    pub fn cache_ttl(&self) -> Option<Duration> {
        self.cache_ttl_secs.map(Duration::from_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// In-process everything; used by tests and local runs.
    pub fn local() -> Self {
        Self {
            metrics_bind: SocketAddr::from(([127, 0, 0, 1], 0)),
            bus: BusBackend::InProcess,
            nats_url: DEFAULT_NATS_URL.to_string(),
            storage: StorageBackend::Memory,
            postgres: None,
            cache: CacheBackendKind::Memory,
            cache_bucket: DEFAULT_CACHE_BUCKET.to_string(),
            cache_ttl_secs: None,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            self_test_api_key: None,
        }
    }
}
