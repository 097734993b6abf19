//! Bus subscription and request dispatch.
//!
//! # Purpose
//! Turns bus messages into typed handler calls and handler results into exactly
//! one reply per message, using the shared error shape for every failure.
//!
//! # Concurrency model
//! - One receive loop per subject; messages on a subject are handled in order,
//!   subjects run concurrently.
//! - A panic while handling one message is caught and answered with
//!   `unknown_error`. A panic anywhere else in a loop is caught by its supervisor,
//!   which restarts the loop on the same subscription after a short pause.
//! - Shutdown stops each loop between messages; an in-flight message finishes
//!   and is answered first.
use crate::error::ServiceError;
use crate::handlers::PermissionService;
use anyhow::Context;
use bytes::Bytes;
use futures::FutureExt;
use keyward_authz::wire::{self, Reply};
use keyward_bus::{Bus, IncomingRequest, Subscription};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;

const RESTART_BACKOFF: Duration = Duration::from_millis(100);

// Used only if the error envelope itself fails to serialize.
const FALLBACK_ERROR_REPLY: &[u8] =
    br#"{"error":{"code":"unknown_error","message":"failed to encode reply"}}"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Grant,
    Revoke,
    List,
    Check,
}

impl Route {
    pub const ALL: [Route; 4] = [Route::Grant, Route::Revoke, Route::List, Route::Check];

    pub fn subject(self) -> &'static str {
        match self {
            Route::Grant => wire::SUBJECT_GRANT,
            Route::Revoke => wire::SUBJECT_REVOKE,
            Route::List => wire::SUBJECT_LIST,
            Route::Check => wire::SUBJECT_CHECK,
        }
    }
}

pub struct Dispatcher {
    bus: Arc<dyn Bus>,
    service: PermissionService,
}

/// Running subject loops.
///
/// Dropping the handle detaches the loops: they keep serving until their
/// subscriptions close. Use [`DispatcherHandle::shutdown`] to stop them.
pub struct DispatcherHandle {
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl DispatcherHandle {
    /// Stop all loops and wait for them to finish their current message.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks {
            if let Err(err) = task.await {
                tracing::error!(error = %err, "subject loop ended abnormally");
            }
        }
    }
}

enum LoopExit {
    Shutdown,
    Closed,
}

impl Dispatcher {
    pub fn new(bus: Arc<dyn Bus>, service: PermissionService) -> Self {
        Self { bus, service }
    }

    /// Subscribe to every subject, then start one supervised loop per subject.
    ///
    /// All subscriptions exist when this returns, so requests sent afterwards
    /// are not lost.
    pub async fn start(self) -> anyhow::Result<DispatcherHandle> {
        let mut subscriptions = Vec::with_capacity(Route::ALL.len());
        for route in Route::ALL {
            let subscription = self
                .bus
                .subscribe(route.subject())
                .await
                .with_context(|| format!("subscribe to {}", route.subject()))?;
            subscriptions.push((route, subscription));
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let tasks = subscriptions
            .into_iter()
            .map(|(route, subscription)| {
                tracing::info!(
                    subject = route.subject(),
                    bus = self.bus.backend_name(),
                    "listening for requests"
                );
                tokio::spawn(supervise(
                    route,
                    subscription,
                    self.service.clone(),
                    shutdown_rx.clone(),
                ))
            })
            .collect();
        Ok(DispatcherHandle { shutdown_tx, tasks })
    }
}

async fn supervise(
    route: Route,
    mut subscription: Subscription,
    service: PermissionService,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let run = serve_subject(route, &mut subscription, &service, &mut shutdown);
        match AssertUnwindSafe(run).catch_unwind().await {
            Ok(LoopExit::Shutdown) => {
                tracing::info!(subject = route.subject(), "subject loop stopped");
                return;
            }
            Ok(LoopExit::Closed) => {
                tracing::warn!(subject = route.subject(), "subscription closed");
                return;
            }
            Err(panic) => {
                metrics::counter!("keyward_subject_loop_restarts_total", "subject" => route.subject())
                    .increment(1);
                tracing::error!(
                    subject = route.subject(),
                    panic = %panic_message(panic.as_ref()),
                    "subject loop panicked; restarting"
                );
                tokio::time::sleep(RESTART_BACKOFF).await;
            }
        }
    }
}

async fn serve_subject(
    route: Route,
    subscription: &mut Subscription,
    service: &PermissionService,
    shutdown: &mut watch::Receiver<bool>,
) -> LoopExit {
    // Cleared once the handle is dropped; the loop then serves until its
    // subscription closes.
    let mut watching = true;
    loop {
        if *shutdown.borrow() {
            return LoopExit::Shutdown;
        }
        let request = tokio::select! {
            biased;
            changed = shutdown.changed(), if watching => {
                match changed {
                    Ok(()) if *shutdown.borrow() => return LoopExit::Shutdown,
                    Ok(()) => {}
                    Err(_) => watching = false,
                }
                continue;
            }
            next = subscription.next() => match next {
                Some(request) => request,
                None => return LoopExit::Closed,
            },
        };
        process(route, service, request).await;
    }
}

async fn process(route: Route, service: &PermissionService, request: IncomingRequest) {
    let started = Instant::now();
    let result = AssertUnwindSafe(dispatch(route, service, request.payload()))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| {
            Err(ServiceError::Unknown(format!(
                "handler panicked: {}",
                panic_message(panic.as_ref())
            )))
        });

    let (outcome, reply) = match result {
        Ok(reply) => ("ok", reply),
        Err(err) => {
            log_failure(route, &err);
            (err.code().as_str(), encode_error(&err))
        }
    };
    metrics::counter!(
        "keyward_requests_total",
        "subject" => route.subject(),
        "outcome" => outcome
    )
    .increment(1);
    metrics::histogram!("keyward_request_duration_seconds", "subject" => route.subject())
        .record(started.elapsed().as_secs_f64());

    if let Err(err) = request.respond(reply).await {
        tracing::warn!(subject = route.subject(), error = %err, "failed to send reply");
    }
}

/// Decode, run the bound handler, and encode its success payload.
async fn dispatch(
    route: Route,
    service: &PermissionService,
    payload: &[u8],
) -> Result<Bytes, ServiceError> {
    match route {
        Route::Grant => encode_ok(&service.grant(decode(payload)?).await?),
        Route::Revoke => encode_ok(&service.revoke(decode(payload)?).await?),
        Route::List => encode_ok(&service.list(decode(payload)?).await?),
        Route::Check => encode_ok(&service.check(decode(payload)?).await?),
    }
}

fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T, ServiceError> {
    wire::decode(payload).map_err(|err| ServiceError::InvalidPayload(err.to_string()))
}

fn encode_ok<T: Serialize>(value: &T) -> Result<Bytes, ServiceError> {
    wire::encode(value).map_err(|err| ServiceError::Unknown(format!("failed to encode reply: {err}")))
}

fn encode_error(err: &ServiceError) -> Bytes {
    let reply: Reply<()> = Err(err.to_body());
    wire::encode_reply(&reply).unwrap_or_else(|_| Bytes::from_static(FALLBACK_ERROR_REPLY))
}

fn log_failure(route: Route, err: &ServiceError) {
    match err {
        ServiceError::InvalidPayload(_) | ServiceError::InvalidPermission { .. } => {
            tracing::warn!(subject = route.subject(), error = %err, "request rejected");
        }
        ServiceError::Database(_) | ServiceError::Unknown(_) => {
            tracing::error!(subject = route.subject(), error = %err, "request failed");
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::PermissionCache;
    use crate::cache::memory::MemoryCacheBackend;
    use crate::store::memory::InMemoryStore;
    use crate::store::{PermissionStore, StoreResult};
    use async_trait::async_trait;
    use keyward_authz::wire::{CheckResponse, ErrorResponse, StatusResponse};
    use keyward_authz::{ErrorCode, PermissionSet};
    use keyward_bus::{BusResult, InProcessBus, ReplySink};
    use tokio::sync::{mpsc, oneshot};

    const TIMEOUT: Duration = Duration::from_secs(2);

    /// Panics on `list` for one identity, otherwise delegates.
    #[derive(Default)]
    struct PanickyStore {
        inner: InMemoryStore,
    }

    #[async_trait]
    impl PermissionStore for PanickyStore {
        async fn grant(&self, api_key: &str, module: &str, action: &str) -> StoreResult<()> {
            self.inner.grant(api_key, module, action).await
        }

        async fn revoke(&self, api_key: &str, module: &str, action: &str) -> StoreResult<()> {
            self.inner.revoke(api_key, module, action).await
        }

        async fn list(&self, api_key: &str) -> StoreResult<PermissionSet> {
            if api_key == "explode" {
                panic!("store exploded");
            }
            self.inner.list(api_key).await
        }

        async fn check(&self, api_key: &str, module: &str, action: &str) -> StoreResult<bool> {
            self.inner.check(api_key, module, action).await
        }

        async fn health_check(&self) -> StoreResult<()> {
            Ok(())
        }

        fn is_durable(&self) -> bool {
            false
        }

        fn backend_name(&self) -> &'static str {
            "panicky"
        }
    }

    async fn start(store: Arc<dyn PermissionStore>) -> (Arc<InProcessBus>, DispatcherHandle) {
        let bus = Arc::new(InProcessBus::new());
        let cache = PermissionCache::new(Arc::new(MemoryCacheBackend::new(None)));
        let service = PermissionService::new(store, cache);
        let handle = Dispatcher::new(bus.clone(), service)
            .start()
            .await
            .expect("start dispatcher");
        (bus, handle)
    }

    async fn call(bus: &InProcessBus, subject: &str, payload: &'static [u8]) -> Bytes {
        bus.request(subject, Bytes::from_static(payload), TIMEOUT)
            .await
            .expect("reply")
    }

    fn error_code(reply: &[u8]) -> ErrorCode {
        let body: ErrorResponse = serde_json::from_slice(reply).expect("error reply");
        body.error.code
    }

    #[test]
    fn routes_cover_every_subject() {
        let subjects: Vec<_> = Route::ALL.iter().map(|route| route.subject()).collect();
        assert_eq!(subjects, wire::SUBJECTS.to_vec());
    }

    #[tokio::test]
    async fn malformed_payloads_get_invalid_payload_and_loop_continues() {
        let (bus, handle) = start(Arc::new(InMemoryStore::new())).await;

        let payloads: [&[u8]; 5] = [b"", b"   ", b"null", b"{not json", br#"{"apiKey":1}"#];
        for payload in payloads {
            let reply = bus
                .request(wire::SUBJECT_CHECK, Bytes::copy_from_slice(payload), TIMEOUT)
                .await
                .expect("reply");
            assert_eq!(error_code(&reply), ErrorCode::InvalidPayload);
            let body: ErrorResponse = serde_json::from_slice(&reply).expect("error");
            assert_eq!(body.error.message, "Failed to parse JSON payload.");
        }

        let reply = call(
            &bus,
            wire::SUBJECT_CHECK,
            br#"{"apiKey":"k","module":"TRADES","action":"create"}"#,
        )
        .await;
        let check: CheckResponse = serde_json::from_slice(&reply).expect("check");
        assert!(!check.allowed);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn invalid_permission_is_reported() {
        let (bus, handle) = start(Arc::new(InMemoryStore::new())).await;
        let reply = call(
            &bus,
            wire::SUBJECT_GRANT,
            br#"{"apiKey":"k","module":"TRADES","action":"delete"}"#,
        )
        .await;
        assert_eq!(error_code(&reply), ErrorCode::InvalidPermission);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn handler_panic_becomes_unknown_error_and_loop_survives() {
        let (bus, handle) = start(Arc::new(PanickyStore::default())).await;

        let reply = call(&bus, wire::SUBJECT_LIST, br#"{"apiKey":"explode"}"#).await;
        let body: ErrorResponse = serde_json::from_slice(&reply).expect("error");
        assert_eq!(body.error.code, ErrorCode::UnknownError);
        assert!(body.error.message.contains("store exploded"));

        let reply = call(&bus, wire::SUBJECT_LIST, br#"{"apiKey":"fine"}"#).await;
        assert_eq!(reply, Bytes::from_static(br#"{"permissions":[]}"#));
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn subjects_are_independent() {
        let (bus, handle) = start(Arc::new(PanickyStore::default())).await;
        let _ = call(&bus, wire::SUBJECT_LIST, br#"{"apiKey":"explode"}"#).await;
        let reply = call(
            &bus,
            wire::SUBJECT_GRANT,
            br#"{"apiKey":"k","module":"inventory","action":"read"}"#,
        )
        .await;
        let status: StatusResponse = serde_json::from_slice(&reply).expect("status");
        assert_eq!(status, StatusResponse::ok());
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_stops_loops() {
        let (bus, handle) = start(Arc::new(InMemoryStore::new())).await;
        handle.shutdown().await;
        let err = bus
            .request(
                wire::SUBJECT_LIST,
                Bytes::from_static(br#"{"apiKey":"k"}"#),
                Duration::from_millis(100),
            )
            .await
            .expect_err("no loop");
        assert_eq!(err, keyward_bus::BusError::NoResponders(wire::SUBJECT_LIST.to_string()));
    }

    #[tokio::test]
    async fn dropped_handle_leaves_loops_serving() {
        let (bus, handle) = start(Arc::new(InMemoryStore::new())).await;
        drop(handle);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let reply = call(&bus, wire::SUBJECT_LIST, br#"{"apiKey":"k"}"#).await;
        assert_eq!(reply, Bytes::from_static(br#"{"permissions":[]}"#));
    }

    struct PanickingSink;

    #[async_trait]
    impl ReplySink for PanickingSink {
        async fn send(self: Box<Self>, _payload: Bytes) -> BusResult<()> {
            panic!("reply transport exploded");
        }
    }

    struct CapturingSink(oneshot::Sender<Bytes>);

    #[async_trait]
    impl ReplySink for CapturingSink {
        async fn send(self: Box<Self>, payload: Bytes) -> BusResult<()> {
            let _ = self.0.send(payload);
            Ok(())
        }
    }

    #[tokio::test]
    async fn supervisor_restarts_loop_after_panic_outside_handler() {
        let (tx, rx) = mpsc::channel(4);
        let service = PermissionService::new(
            Arc::new(InMemoryStore::new()),
            PermissionCache::new(Arc::new(MemoryCacheBackend::new(None))),
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(supervise(
            Route::List,
            Subscription::new(wire::SUBJECT_LIST, rx),
            service,
            shutdown_rx,
        ));

        // The reply sink panics after the handler returned, so only the
        // supervisor can catch it.
        tx.send(IncomingRequest::new(
            wire::SUBJECT_LIST,
            Bytes::from_static(br#"{"apiKey":"k"}"#),
            Some(Box::new(PanickingSink) as Box<dyn ReplySink>),
        ))
        .await
        .expect("send first");

        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(IncomingRequest::new(
            wire::SUBJECT_LIST,
            Bytes::from_static(br#"{"apiKey":"k"}"#),
            Some(Box::new(CapturingSink(reply_tx)) as Box<dyn ReplySink>),
        ))
        .await
        .expect("send second");

        let reply = tokio::time::timeout(TIMEOUT, reply_rx)
            .await
            .expect("restarted loop answers in time")
            .expect("reply");
        assert_eq!(reply, Bytes::from_static(br#"{"permissions":[]}"#));

        shutdown_tx.send(true).expect("signal shutdown");
        tokio::time::timeout(TIMEOUT, task)
            .await
            .expect("supervisor stops")
            .expect("supervisor task");
    }

    #[test]
    fn panic_messages_are_extracted() {
        let boxed: Box<dyn Any + Send> = Box::new("static message");
        assert_eq!(panic_message(boxed.as_ref()), "static message");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned message"));
        assert_eq!(panic_message(boxed.as_ref()), "owned message");
        let boxed: Box<dyn Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }

    #[test]
    fn error_replies_use_shared_envelope() {
        let reply = encode_error(&ServiceError::Unknown("boom".to_string()));
        let json: serde_json::Value = serde_json::from_slice(&reply).expect("json");
        assert_eq!(
            json,
            serde_json::json!({"error": {"code": "unknown_error", "message": "boom"}})
        );
    }
}
