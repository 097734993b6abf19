//! Source-of-truth persistence for granted permissions.
//!
//! # Purpose
//! Defines the [`PermissionStore`] trait used by the operation handlers and the
//! two backends behind it:
//! - [`postgres::PostgresStore`]: durable, shared relational store.
//! - [`memory::InMemoryStore`]: process-local store for development and tests.
//!
//! # Key invariants
//! - `grant` and `revoke` are idempotent: a duplicate grant and a revoke of a
//!   missing triple both succeed without changing state.
//! - Module and action are compared and stored lower-case; the identity is opaque
//!   and compared exactly.
//! - No method retries internally; any fault surfaces as [`StoreError`].
use async_trait::async_trait;
use keyward_authz::PermissionSet;
use thiserror::Error;

pub mod memory;
pub mod postgres;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait PermissionStore: Send + Sync {
    async fn grant(&self, api_key: &str, module: &str, action: &str) -> StoreResult<()>;
    async fn revoke(&self, api_key: &str, module: &str, action: &str) -> StoreResult<()>;
    /// Full current set for `api_key`; empty when nothing was granted.
    async fn list(&self, api_key: &str) -> StoreResult<PermissionSet>;
    async fn check(&self, api_key: &str, module: &str, action: &str) -> StoreResult<bool>;

    async fn health_check(&self) -> StoreResult<()>;
    fn is_durable(&self) -> bool;
    fn backend_name(&self) -> &'static str;

    /// Release backend resources on shutdown.
    async fn close(&self) {}
}
