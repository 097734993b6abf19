#![cfg(feature = "pg-tests")]

use keyward_authz::Permission;
use permissions::config::PostgresConfig;
use permissions::store::PermissionStore;
use permissions::store::postgres::PostgresStore;
use serial_test::serial;

async fn pg_store() -> Option<PostgresStore> {
    let url = match std::env::var("KEYWARD_TEST_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
    {
        Ok(url) => url,
        Err(_) => {
            eprintln!("skipping pg-tests: set KEYWARD_TEST_DATABASE_URL or DATABASE_URL");
            return None;
        }
    };
    let pg = PostgresConfig {
        url,
        max_connections: 5,
        connect_timeout_ms: 5_000,
        acquire_timeout_ms: 5_000,
    };
    match PostgresStore::connect(&pg).await {
        Ok(store) => Some(store),
        Err(err) => {
            eprintln!("skipping pg-tests: connect postgres store failed: {err}");
            None
        }
    }
}

fn unique_key() -> String {
    format!("pg-{}", uuid::Uuid::new_v4())
}

#[tokio::test]
#[serial]
async fn pg_grant_is_idempotent_and_normalized() {
    let Some(store) = pg_store().await else {
        return;
    };
    let key = unique_key();
    store.grant(&key, "TRADES", "CREATE").await.expect("grant");
    store.grant(&key, "trades", "create").await.expect("grant again");
    let set = store.list(&key).await.expect("list");
    assert_eq!(set.to_vec(), vec![Permission::new("trades", "create")]);
    assert!(store.check(&key, "Trades", "Create").await.expect("check"));
    store.revoke(&key, "TRADES", "create").await.expect("cleanup");
}

#[tokio::test]
#[serial]
async fn pg_revoke_missing_is_noop() {
    let Some(store) = pg_store().await else {
        return;
    };
    let key = unique_key();
    store.revoke(&key, "inventory", "read").await.expect("revoke");
    store.grant(&key, "inventory", "read").await.expect("grant");
    store.revoke(&key, "inventory", "update").await.expect("revoke");
    assert_eq!(store.list(&key).await.expect("list").len(), 1);
    store.revoke(&key, "inventory", "read").await.expect("revoke");
    assert!(store.list(&key).await.expect("list").is_empty());
    assert!(!store.check(&key, "inventory", "read").await.expect("check"));
}

#[tokio::test]
#[serial]
async fn pg_migrations_are_repeatable_and_health_passes() {
    let Some(store) = pg_store().await else {
        return;
    };
    store.health_check().await.expect("health");
    assert!(store.is_durable());
    assert_eq!(store.backend_name(), "postgres");
    // A second connect re-runs the migrator against an up-to-date schema.
    let Some(again) = pg_store().await else {
        return;
    };
    again.health_check().await.expect("health");
    again.close().await;
    store.close().await;
}
