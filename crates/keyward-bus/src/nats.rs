//! NATS request/reply bus backed by `async-nats`.
use crate::{
    Bus, BusError, BusResult, IncomingRequest, ReplySink, SUBSCRIPTION_QUEUE_DEPTH, Subscription,
};
use async_nats::client::RequestErrorKind;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;

/// Bus over a NATS core connection.
///
/// Connection management (reconnects, server discovery) is left to the
/// `async-nats` client.
#[derive(Clone, Debug)]
pub struct NatsBus {
    client: async_nats::Client,
}

impl NatsBus {
    /// Connect to the NATS server(s) at `url`.
    ///
    /// Avoid logging `url` verbatim; it may embed credentials.
    pub async fn connect(url: &str) -> BusResult<Self> {
        let client = async_nats::connect(url)
            .await
            .map_err(|err| BusError::Transport(err.to_string()))?;
        tracing::info!("connected to nats");
        Ok(Self { client })
    }

    pub fn from_client(client: async_nats::Client) -> Self {
        Self { client }
    }

    /// Underlying client, e.g. for opening a JetStream context.
    pub fn client(&self) -> &async_nats::Client {
        &self.client
    }

    /// Flush buffered publishes (including pending replies).
    pub async fn flush(&self) -> BusResult<()> {
        self.client
            .flush()
            .await
            .map_err(|err| BusError::Transport(err.to_string()))
    }
}

struct NatsReply {
    client: async_nats::Client,
    subject: async_nats::Subject,
}

#[async_trait]
impl ReplySink for NatsReply {
    async fn send(self: Box<Self>, payload: Bytes) -> BusResult<()> {
        self.client
            .publish(self.subject, payload)
            .await
            .map_err(|err| BusError::Transport(err.to_string()))
    }
}

fn map_request_error(subject: &str, kind: RequestErrorKind, detail: &str) -> BusError {
    match kind {
        RequestErrorKind::TimedOut => BusError::Timeout,
        RequestErrorKind::NoResponders => BusError::NoResponders(subject.to_string()),
        _ => BusError::Transport(detail.to_string()),
    }
}

/// Move requests from `source` into the subscription queue.
///
/// Returns when the source ends or the receiving [`Subscription`] is dropped,
/// whichever comes first, so the caller can unsubscribe without waiting for
/// another message.
async fn forward<S>(source: &mut S, tx: &mpsc::Sender<IncomingRequest>)
where
    S: Stream<Item = IncomingRequest> + Unpin,
{
    loop {
        let request = tokio::select! {
            _ = tx.closed() => return,
            next = source.next() => match next {
                Some(request) => request,
                None => return,
            },
        };
        if tx.send(request).await.is_err() {
            return;
        }
    }
}

#[async_trait]
impl Bus for NatsBus {
    async fn subscribe(&self, subject: &str) -> BusResult<Subscription> {
        let mut subscriber = self
            .client
            .subscribe(subject.to_string())
            .await
            .map_err(|err| BusError::Transport(err.to_string()))?;
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_QUEUE_DEPTH);
        let client = self.client.clone();
        let forward_subject = subject.to_string();
        tokio::spawn(async move {
            {
                let mut requests = subscriber.by_ref().map(|message| {
                    let reply = message.reply.map(|reply| {
                        Box::new(NatsReply {
                            client: client.clone(),
                            subject: reply,
                        }) as Box<dyn ReplySink>
                    });
                    IncomingRequest::new(message.subject.as_str(), message.payload, reply)
                });
                forward(&mut requests, &tx).await;
            }
            if let Err(err) = subscriber.unsubscribe().await {
                tracing::debug!(subject = %forward_subject, error = %err, "nats unsubscribe failed");
            }
            tracing::debug!(subject = %forward_subject, "nats subscription forwarder exited");
        });
        Ok(Subscription::new(subject, rx))
    }

    async fn request(&self, subject: &str, payload: Bytes, timeout: Duration) -> BusResult<Bytes> {
        let message = tokio::time::timeout(timeout, self.client.request(subject.to_string(), payload))
            .await
            .map_err(|_| BusError::Timeout)?
            .map_err(|err| map_request_error(subject, err.kind(), &err.to_string()))?;
        Ok(message.payload)
    }

    fn backend_name(&self) -> &'static str {
        "nats"
    }
}
