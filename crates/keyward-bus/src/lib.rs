//! Request/reply message bus used by the permissions service and its clients.
//!
//! The service only needs two capabilities from a bus: a per-subject stream of
//! incoming requests that can each be answered exactly once, and a correlated
//! request that waits a bounded time for one reply. `Bus` captures exactly that
//! so the dispatcher and client are agnostic to the transport underneath.
//!
//! Two backends are provided:
//! - `InProcessBus`: subject registry of bounded queues inside one process.
//!   Used for local runs and the test suite.
//! - `NatsBus`: NATS core request/reply via `async-nats`.
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

pub mod in_process;
pub mod nats;

pub use in_process::InProcessBus;
pub use nats::NatsBus;

/// Per-subscription queue depth between the transport and the receive loop.
pub const SUBSCRIPTION_QUEUE_DEPTH: usize = 1024;

pub type BusResult<T> = std::result::Result<T, BusError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("request timed out")]
    Timeout,
    #[error("no responders for subject {0}")]
    NoResponders(String),
    #[error("request has no reply target")]
    NoReplyTarget,
    #[error("bus connection closed")]
    Closed,
    #[error("transport error: {0}")]
    Transport(String),
}

#[async_trait]
pub trait Bus: Send + Sync {
    /// Start receiving requests published to `subject`.
    async fn subscribe(&self, subject: &str) -> BusResult<Subscription>;

    /// Send one request and wait at most `timeout` for its reply.
    async fn request(&self, subject: &str, payload: Bytes, timeout: Duration) -> BusResult<Bytes>;

    fn backend_name(&self) -> &'static str;
}

/// Destination for the single reply to an [`IncomingRequest`].
#[async_trait]
pub trait ReplySink: Send {
    async fn send(self: Box<Self>, payload: Bytes) -> BusResult<()>;
}

/// One request received on a subscription.
pub struct IncomingRequest {
    subject: String,
    payload: Bytes,
    reply: Option<Box<dyn ReplySink>>,
}

impl IncomingRequest {
    pub fn new(
        subject: impl Into<String>,
        payload: Bytes,
        reply: Option<Box<dyn ReplySink>>,
    ) -> Self {
        Self {
            subject: subject.into(),
            payload,
            reply,
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Answer the request. Consumes `self`, so a request is answered at most once.
    pub async fn respond(self, payload: Bytes) -> BusResult<()> {
        match self.reply {
            Some(reply) => reply.send(payload).await,
            None => Err(BusError::NoReplyTarget),
        }
    }
}

impl std::fmt::Debug for IncomingRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncomingRequest")
            .field("subject", &self.subject)
            .field("payload_len", &self.payload.len())
            .field("has_reply", &self.reply.is_some())
            .finish()
    }
}

/// Stream of requests for one subject.
///
/// Dropping the subscription stops delivery for that subject.
#[derive(Debug)]
pub struct Subscription {
    subject: String,
    rx: mpsc::Receiver<IncomingRequest>,
}

impl Subscription {
    pub fn new(subject: impl Into<String>, rx: mpsc::Receiver<IncomingRequest>) -> Self {
        Self {
            subject: subject.into(),
            rx,
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Next request, or `None` once the transport side has gone away.
    pub async fn next(&mut self) -> Option<IncomingRequest> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn respond_without_reply_target_fails() {
        let request = IncomingRequest::new("permissions.check", Bytes::new(), None);
        assert_eq!(
            request.respond(Bytes::from_static(b"{}")).await,
            Err(BusError::NoReplyTarget)
        );
    }

    #[tokio::test]
    async fn subscription_ends_when_sender_dropped() {
        let (tx, rx) = mpsc::channel(1);
        let mut subscription = Subscription::new("permissions.list", rx);
        assert_eq!(subscription.subject(), "permissions.list");
        drop(tx);
        assert!(subscription.next().await.is_none());
    }

    #[test]
    fn error_display_variants() {
        let errors = [
            BusError::Timeout,
            BusError::NoResponders("permissions.grant".to_string()),
            BusError::NoReplyTarget,
            BusError::Closed,
            BusError::Transport("reset".to_string()),
        ];
        for error in errors {
            assert!(!error.to_string().is_empty());
        }
    }
}
