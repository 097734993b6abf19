//! In-process request/reply bus.
use crate::{
    Bus, BusError, BusResult, IncomingRequest, ReplySink, SUBSCRIPTION_QUEUE_DEPTH, Subscription,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{RwLock, mpsc, oneshot};

/// Bus that routes requests to subscribers living in the same process.
///
/// One subscriber per subject; subscribing again replaces the previous one,
/// which then sees its subscription end.
///
/// ```
/// use bytes::Bytes;
/// use keyward_bus::{Bus, InProcessBus};
/// use std::time::Duration;
///
/// let bus = InProcessBus::new();
/// let rt = tokio::runtime::Runtime::new().expect("rt");
/// rt.block_on(async {
///     let mut sub = bus.subscribe("echo").await.expect("subscribe");
///     tokio::spawn(async move {
///         while let Some(request) = sub.next().await {
///             let payload = request.payload().clone();
///             let _ = request.respond(payload).await;
///         }
///     });
///     let reply = bus
///         .request("echo", Bytes::from_static(b"ping"), Duration::from_secs(1))
///         .await
///         .expect("reply");
///     assert_eq!(reply, Bytes::from_static(b"ping"));
/// });
/// ```
#[derive(Debug)]
pub struct InProcessBus {
    subjects: RwLock<HashMap<String, mpsc::Sender<IncomingRequest>>>,
    queue_depth: usize,
}

impl Default for InProcessBus {
    fn default() -> Self {
        Self {
            subjects: RwLock::new(HashMap::new()),
            queue_depth: SUBSCRIPTION_QUEUE_DEPTH,
        }
    }
}

impl InProcessBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_queue_depth(queue_depth: usize) -> Self {
        Self {
            subjects: RwLock::new(HashMap::new()),
            queue_depth: queue_depth.max(1),
        }
    }
}

struct OneshotReply(oneshot::Sender<Bytes>);

#[async_trait]
impl ReplySink for OneshotReply {
    async fn send(self: Box<Self>, payload: Bytes) -> BusResult<()> {
        // The requester may have timed out and dropped its receiver.
        self.0.send(payload).map_err(|_| BusError::Closed)
    }
}

#[async_trait]
impl Bus for InProcessBus {
    async fn subscribe(&self, subject: &str) -> BusResult<Subscription> {
        let (tx, rx) = mpsc::channel(self.queue_depth);
        self.subjects.write().await.insert(subject.to_string(), tx);
        tracing::debug!(subject = %subject, "in-process subscription registered");
        Ok(Subscription::new(subject, rx))
    }

    async fn request(&self, subject: &str, payload: Bytes, timeout: Duration) -> BusResult<Bytes> {
        let sender = self
            .subjects
            .read()
            .await
            .get(subject)
            .filter(|sender| !sender.is_closed())
            .cloned()
            .ok_or_else(|| BusError::NoResponders(subject.to_string()))?;

        let (reply_tx, reply_rx) = oneshot::channel();
        let request = IncomingRequest::new(subject, payload, Some(Box::new(OneshotReply(reply_tx))));
        let exchange = async {
            sender
                .send(request)
                .await
                .map_err(|_| BusError::NoResponders(subject.to_string()))?;
            // A dropped sender means the request was discarded unanswered.
            reply_rx.await.map_err(|_| BusError::Closed)
        };
        tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| BusError::Timeout)?
    }

    fn backend_name(&self) -> &'static str {
        "in_process"
    }
}
