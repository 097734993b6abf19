//! Client for the permissions service request/reply surface.
//!
//! Every call returns a `Reply<T>`: the operation's success payload, or the same
//! structured `ErrorBody` the service emits. Failures that never reach the
//! service (timeout, no responders, connection faults, undecodable replies) are
//! folded into that shape with `ErrorCode::UnknownError`, so callers handle one
//! response type regardless of where a failure happened.
use keyward_authz::wire::{
    self, CheckRequest, CheckResponse, GrantRequest, ListRequest, ListResponse, RevokeRequest,
    StatusResponse,
};
use keyward_authz::{ErrorBody, ErrorCode, Reply};
use keyward_bus::Bus;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

/// Bounded wait applied to every request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Request/reply wrapper around a [`Bus`].
///
/// ```
/// use keyward_bus::InProcessBus;
/// use keyward_client::PermissionsClient;
/// use keyward_authz::{ErrorCode, wire::ListRequest};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let client = PermissionsClient::new(Arc::new(InProcessBus::new()))
///     .with_timeout(Duration::from_millis(50));
/// let rt = tokio::runtime::Runtime::new().expect("rt");
/// rt.block_on(async {
///     // Nothing is serving the subject, so the failure is reported as a reply.
///     let reply = client.list(&ListRequest::new("key-1")).await;
///     assert_eq!(reply.unwrap_err().code, ErrorCode::UnknownError);
/// });
/// ```
#[derive(Clone)]
pub struct PermissionsClient {
    bus: Arc<dyn Bus>,
    timeout: Duration,
}

impl PermissionsClient {
    pub fn new(bus: Arc<dyn Bus>) -> Self {
        Self {
            bus,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn grant(&self, request: &GrantRequest) -> Reply<StatusResponse> {
        self.request(wire::SUBJECT_GRANT, request).await
    }

    pub async fn revoke(&self, request: &RevokeRequest) -> Reply<StatusResponse> {
        self.request(wire::SUBJECT_REVOKE, request).await
    }

    pub async fn check(&self, request: &CheckRequest) -> Reply<CheckResponse> {
        self.request(wire::SUBJECT_CHECK, request).await
    }

    pub async fn list(&self, request: &ListRequest) -> Reply<ListResponse> {
        self.request(wire::SUBJECT_LIST, request).await
    }

    async fn request<Req, Resp>(&self, subject: &str, payload: &Req) -> Reply<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let body = wire::encode(payload)
            .map_err(|err| unknown_error(format!("failed to encode request: {err}")))?;
        let reply = self
            .bus
            .request(subject, body, self.timeout)
            .await
            .map_err(|err| {
                tracing::debug!(subject = %subject, error = %err, "permissions request failed");
                unknown_error(format!("{} request failed: {err}", self.bus.backend_name()))
            })?;
        wire::decode_reply(&reply)
            .map_err(|err| unknown_error(format!("malformed reply on {subject}: {err}")))?
    }
}

fn unknown_error(message: String) -> ErrorBody {
    ErrorBody::new(ErrorCode::UnknownError, message)
}
