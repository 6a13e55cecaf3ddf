//! Value ingress queue
//!
//! At-least-once delivery into the broker. Each item is handed to a
//! [`ValueSink`]; success acknowledges it, failure puts it back on the queue
//! after a delay until it runs out of attempts. Requests the sink can never
//! accept (an empty ticker) are dropped straight away.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::broker::Broker;
use crate::broker::ids::PublisherId;
use crate::broker::message::TickerUpdate;
use crate::broker::topic::Topic;
use crate::config::IngestSettings;
use crate::debug::{ComponentKind, Endpoint, Interaction, Operation};
use crate::utils::{BrokerError, Result};

pub const QUEUE_NAME: &str = "ingest";

/// Where queued values end up.
#[async_trait]
pub trait ValueSink: Send + Sync + 'static {
    async fn deliver(&self, update: &TickerUpdate) -> Result<()>;
}

#[async_trait]
impl ValueSink for Broker {
    async fn deliver(&self, update: &TickerUpdate) -> Result<()> {
        let target = Topic::parse(&update.ticker)
            .map(|topic| Endpoint::publisher(&PublisherId::for_topic(&topic)))
            .unwrap_or_else(|| Endpoint::new(ComponentKind::Publisher, "unknown"));
        let interaction = Interaction::new(
            Operation::Publish,
            Endpoint::new(ComponentKind::Queue, QUEUE_NAME),
            target,
        )
        .with_data(serde_json::json!(update));
        self.directory()
            .tracking()
            .timed(interaction, async { self.publish(update.clone()).await })
            .await
            .map(|_| ())
    }
}

struct Delivery {
    update: TickerUpdate,
    attempts: u32,
}

#[derive(Debug, Default)]
struct Counters {
    acked: AtomicU64,
    retried: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    pub acked: u64,
    pub retried: u64,
    pub dropped: u64,
}

#[derive(Clone)]
pub struct IngestQueue {
    tx: mpsc::Sender<Delivery>,
    counters: Arc<Counters>,
}

impl IngestQueue {
    /// Starts the consumer. It runs until every `IngestQueue` clone is
    /// dropped and the queue has drained.
    pub fn start<S: ValueSink>(sink: Arc<S>, settings: IngestSettings) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(settings.buffer.max(1));
        let counters = Arc::new(Counters::default());
        let consumer = Consumer {
            sink,
            retry: tx.downgrade(),
            counters: counters.clone(),
            settings,
        };
        let handle = tokio::spawn(consumer.run(rx));
        (Self { tx, counters }, handle)
    }

    /// Waits for room when the queue is full.
    pub async fn enqueue(&self, update: TickerUpdate) -> Result<()> {
        self.tx
            .send(Delivery {
                update,
                attempts: 0,
            })
            .await
            .map_err(|_| BrokerError::unreachable(QUEUE_NAME))
    }

    pub async fn enqueue_batch(&self, updates: Vec<TickerUpdate>) -> Result<usize> {
        let count = updates.len();
        for update in updates {
            self.enqueue(update).await?;
        }
        Ok(count)
    }

    pub fn stats(&self) -> IngestStats {
        IngestStats {
            acked: self.counters.acked.load(Ordering::Relaxed),
            retried: self.counters.retried.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }
}

struct Consumer<S> {
    sink: Arc<S>,
    retry: mpsc::WeakSender<Delivery>,
    counters: Arc<Counters>,
    settings: IngestSettings,
}

impl<S: ValueSink> Consumer<S> {
    async fn run(self, mut rx: mpsc::Receiver<Delivery>) {
        while let Some(delivery) = rx.recv().await {
            self.process(delivery).await;
        }
        debug!("ingest queue closed");
    }

    async fn process(&self, mut delivery: Delivery) {
        let err = match self.sink.deliver(&delivery.update).await {
            Ok(()) => {
                self.counters.acked.fetch_add(1, Ordering::Relaxed);
                return;
            }
            Err(err) => err,
        };

        delivery.attempts += 1;
        let ticker = delivery.update.ticker.clone();
        if matches!(err, BrokerError::InvalidRequest(_)) {
            warn!(ticker = %ticker, error = err.as_label(), "dropping unprocessable value: {err}");
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        if delivery.attempts >= self.settings.max_attempts {
            error!(ticker = %ticker, attempts = delivery.attempts, error = err.as_label(), "giving up on value: {err}");
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }

        warn!(
            ticker = %ticker,
            attempts = delivery.attempts,
            error = err.as_label(),
            "value not processed, will redeliver: {err}"
        );
        self.counters.retried.fetch_add(1, Ordering::Relaxed);
        self.redeliver(delivery, self.settings.retry_delay());
    }

    fn redeliver(&self, delivery: Delivery, after: Duration) {
        let retry = self.retry.clone();
        let counters = self.counters.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let sent = match retry.upgrade() {
                Some(tx) => tx.send(delivery).await.is_ok(),
                None => false,
            };
            if !sent {
                counters.dropped.fetch_add(1, Ordering::Relaxed);
            }
        });
    }
}
