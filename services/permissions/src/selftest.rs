//! Start-up self-test.
//!
//! Drives the service's own request/reply surface through the client, the same
//! path external callers use: grant, check, list, revoke, check. Use an identity
//! reserved for this purpose; the list step expects exactly one permission.
use anyhow::{Result, bail};
use keyward_authz::Permission;
use keyward_authz::wire::{ListRequest, PermissionRequest};
use keyward_client::PermissionsClient;

const MODULE: &str = "TRADES";
const ACTION: &str = "create";

pub async fn run(client: &PermissionsClient, api_key: &str) -> Result<()> {
    let request = PermissionRequest::new(api_key, MODULE, ACTION);

    client
        .grant(&request)
        .await
        .map_err(|err| anyhow::anyhow!("self-test grant failed: {err}"))?;

    let check = client
        .check(&request)
        .await
        .map_err(|err| anyhow::anyhow!("self-test check after grant failed: {err}"))?;
    if !check.allowed {
        bail!("self-test check after grant: expected allowed");
    }

    let listed = client
        .list(&ListRequest::new(api_key))
        .await
        .map_err(|err| anyhow::anyhow!("self-test list failed: {err}"))?;
    let expected = vec![Permission::new(MODULE, ACTION)];
    if listed.permissions != expected {
        bail!(
            "self-test list: expected {expected:?}, got {:?}",
            listed.permissions
        );
    }

    client
        .revoke(&request)
        .await
        .map_err(|err| anyhow::anyhow!("self-test revoke failed: {err}"))?;

    let check = client
        .check(&request)
        .await
        .map_err(|err| anyhow::anyhow!("self-test check after revoke failed: {err}"))?;
    if check.allowed {
        bail!("self-test check after revoke: expected denied");
    }

    tracing::info!("self-test passed");
    Ok(())
}
