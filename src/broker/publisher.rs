//! Publisher actor
//!
//! One per topic. Owns the subscriber set and the latest value, fans both
//! values and heartbeats out through distributors, and keeps a heartbeat
//! deadline armed exactly while it has subscribers.
//!
//! Persisted keys (tree `publisher/<uuid>`):
//! - `topic`: the topic name
//! - `latest`: the last [`PublishMessage`]
//! - `subscriber/<uuid>`: one row per subscriber

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::json;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::actor::directory::Directory;
use crate::actor::{self, Actor, ActorRef, Pending};
use crate::broker::fanout::{self, Batch};
use crate::broker::ids::{DistributorId, PublisherId, SubscriberId};
use crate::broker::message::{Payload, PublishMessage, TopicValue};
use crate::broker::topic::Topic;
use crate::debug::{Endpoint, Interaction, Operation};
use crate::persistence::ActorStore;
use crate::utils::Result;

const TOPIC_KEY: &str = "topic";
const LATEST_KEY: &str = "latest";
const SUBSCRIBER_PREFIX: &str = "subscriber/";

fn subscriber_key(id: &SubscriberId) -> String {
    format!("{SUBSCRIBER_PREFIX}{id}")
}

pub enum PublisherMessage {
    Subscribe {
        subscriber: SubscriberId,
        reply: oneshot::Sender<()>,
    },
    Unsubscribe {
        subscriber: SubscriberId,
        reply: Option<oneshot::Sender<()>>,
    },
    Publish {
        value: TopicValue,
        reply: oneshot::Sender<FanoutReport>,
    },
    Alarm,
    Snapshot {
        reply: oneshot::Sender<PublisherSnapshot>,
    },
}

/// What happened to one batch of a fanout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    pub index: usize,
    pub distributor: DistributorId,
    pub size: usize,
    pub delivered: usize,
    pub failed: usize,
    /// Set when the distributor itself could not be reached.
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanoutReport {
    pub batches: Vec<BatchOutcome>,
}

impl FanoutReport {
    pub fn delivered(&self) -> usize {
        self.batches.iter().map(|b| b.delivered).sum()
    }

    pub fn failed_batches(&self) -> usize {
        self.batches.iter().filter(|b| b.error.is_some()).count()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PublisherSnapshot {
    pub id: PublisherId,
    pub topic: Option<Topic>,
    pub subscribers: BTreeSet<SubscriberId>,
    pub latest: Option<PublishMessage>,
    pub timer_armed: bool,
    pub store_empty: bool,
}

#[derive(Clone, Debug)]
pub struct PublisherHandle {
    pub id: PublisherId,
    actor: ActorRef<PublisherMessage>,
    timeout: Duration,
}

impl PublisherHandle {
    pub async fn subscribe(&self, subscriber: SubscriberId) -> Result<()> {
        self.request_subscribe(subscriber)?.wait(self.timeout).await
    }

    /// Enqueues a subscribe now and hands back the pending acknowledgement.
    pub fn request_subscribe(&self, subscriber: SubscriberId) -> Result<Pending<()>> {
        self.actor
            .request(|reply| PublisherMessage::Subscribe { subscriber, reply })
    }

    pub async fn unsubscribe(&self, subscriber: SubscriberId) -> Result<()> {
        self.actor
            .ask(
                |reply| PublisherMessage::Unsubscribe {
                    subscriber,
                    reply: Some(reply),
                },
                self.timeout,
            )
            .await
    }

    /// Fire-and-forget unsubscribe, for callers that must not wait on the
    /// publisher.
    pub fn notify_unsubscribe(&self, subscriber: SubscriberId) -> Result<()> {
        self.actor.tell(PublisherMessage::Unsubscribe {
            subscriber,
            reply: None,
        })
    }

    /// Publishing waits on distributors, which in turn wait on subscribers,
    /// so the reply gets three call timeouts.
    pub async fn publish(&self, value: TopicValue) -> Result<FanoutReport> {
        self.actor
            .ask(
                |reply| PublisherMessage::Publish { value, reply },
                self.timeout * 3,
            )
            .await
    }

    /// Fires the heartbeat now instead of waiting for the deadline.
    pub fn alarm(&self) -> Result<()> {
        self.actor.tell(PublisherMessage::Alarm)
    }

    pub async fn snapshot(&self) -> Result<PublisherSnapshot> {
        self.actor
            .ask(|reply| PublisherMessage::Snapshot { reply }, self.timeout)
            .await
    }
}

pub struct Publisher {
    id: PublisherId,
    name: String,
    me: ActorRef<PublisherMessage>,
    topic: Option<Topic>,
    subscribers: BTreeSet<SubscriberId>,
    latest: Option<PublishMessage>,
    store: ActorStore,
    directory: Directory,
}

impl Publisher {
    pub fn spawn(
        id: PublisherId,
        topic: Option<Topic>,
        directory: Directory,
    ) -> Result<PublisherHandle> {
        let name = id.actor_name();
        let store = directory.persistence().store(&name)?;
        let timeout = directory.settings().call_timeout();
        let actor = actor::spawn(name.clone(), |me| Publisher {
            id,
            name,
            me,
            topic,
            subscribers: BTreeSet::new(),
            latest: None,
            store,
            directory,
        });
        Ok(PublisherHandle { id, actor, timeout })
    }

    fn load(&mut self) -> Result<()> {
        if self.topic.is_none() {
            self.topic = self.store.get(TOPIC_KEY)?;
        }
        self.latest = self.store.get(LATEST_KEY)?;
        self.subscribers = self
            .store
            .scan_prefix::<SubscriberId>(SUBSCRIBER_PREFIX)?
            .into_iter()
            .map(|(_, id)| id)
            .collect();
        Ok(())
    }

    fn topic_label(&self) -> &str {
        self.topic.as_ref().map_or("?", Topic::as_str)
    }

    fn subscribe(&mut self, subscriber: SubscriberId) {
        if let Err(e) = self.store.insert_if_absent(&subscriber_key(&subscriber), &subscriber) {
            warn!(publisher = %self.id, "failed to persist subscriber: {e}");
        }
        if let Some(topic) = &self.topic {
            if let Err(e) = self.store.put(TOPIC_KEY, topic) {
                warn!(publisher = %self.id, "failed to persist topic: {e}");
            }
        }
        if self.subscribers.insert(subscriber) {
            debug!(topic = self.topic_label(), subscriber = %subscriber, "subscriber added");
        }
        if !self.directory.timers().is_armed(&self.name) {
            self.arm_heartbeat();
        }
        if let Some(latest) = self.latest.clone() {
            self.push_latest(subscriber, latest);
        }
    }

    /// Sends the latest value to one new subscriber, outside the batch path.
    /// A failed push unsubscribes the target, same as a failed fanout.
    fn push_latest(&self, subscriber: SubscriberId, latest: PublishMessage) {
        let interaction = Interaction::new(
            Operation::Message,
            Endpoint::publisher(&self.id),
            Endpoint::subscriber(&subscriber),
        );
        let pending = self
            .directory
            .subscriber(subscriber)
            .and_then(|target| target.request_delivery(Payload::Value(latest)));
        let tracking = self.directory.tracking().clone();
        let timeout = self.directory.settings().call_timeout();
        let me = self.me.clone();
        let publisher = self.id;

        tokio::spawn(async move {
            let pushed = tracking
                .timed(interaction, async move { pending?.wait(timeout).await })
                .await;
            if let Err(e) = pushed {
                warn!(publisher = %publisher, subscriber = %subscriber, "latest value push failed: {e}");
                let _ = me.tell(PublisherMessage::Unsubscribe {
                    subscriber,
                    reply: None,
                });
            }
        });
    }

    fn unsubscribe(&mut self, subscriber: SubscriberId) {
        if self.subscribers.remove(&subscriber) {
            if let Err(e) = self.store.remove(&subscriber_key(&subscriber)) {
                warn!(publisher = %self.id, "failed to delete subscriber row: {e}");
            }
            debug!(topic = self.topic_label(), subscriber = %subscriber, "subscriber removed");
            if let Some(target) = self.directory.find_subscriber(&subscriber) {
                let _ = target.notify_unsubscribed(self.id);
            }
        }
        if self.subscribers.is_empty() {
            self.clear();
        }
    }

    /// Drops every subscriber, the latest value and the heartbeat deadline.
    fn clear(&mut self) {
        self.directory.timers().disarm(&self.name);
        self.subscribers.clear();
        self.latest = None;
        if let Err(e) = self.store.clear() {
            warn!(publisher = %self.id, "failed to clear persisted state: {e}");
        }
        debug!(topic = self.topic_label(), "publisher cleared");
    }

    async fn publish(&mut self, value: TopicValue) -> FanoutReport {
        self.topic = Some(value.ticker.clone());
        let message = PublishMessage::new(self.id, value);
        if let Err(e) = self
            .store
            .put(LATEST_KEY, &message)
            .and_then(|_| self.store.put(TOPIC_KEY, &message.content.ticker))
        {
            warn!(publisher = %self.id, "failed to persist latest value: {e}");
        }
        self.latest = Some(message.clone());

        if self.subscribers.is_empty() {
            self.clear();
            return FanoutReport::default();
        }
        self.fanout(Payload::Value(message)).await
    }

    async fn heartbeat(&mut self) {
        if self.subscribers.is_empty() {
            self.clear();
            return;
        }
        self.fanout(Payload::Heartbeat(self.id)).await;
        self.arm_heartbeat();
    }

    /// One distributor per batch, all in flight at once. A batch that fails
    /// as a whole is logged and does not affect its siblings.
    async fn fanout(&self, payload: Payload) -> FanoutReport {
        let operation = match payload {
            Payload::Value(_) => Operation::DistributeMessage,
            Payload::Heartbeat(_) => Operation::DistributePing,
        };
        let batches = fanout::plan(
            &self.id,
            &self.subscribers,
            self.directory.settings().batch_size,
        );
        let publisher = self.id;
        let directory = &self.directory;
        let tracking = directory.tracking();

        let calls = batches.into_iter().map(|batch| {
            let Batch {
                index,
                distributor,
                targets,
            } = batch;
            let size = targets.len();
            let payload = payload.clone();
            let interaction = Interaction::new(
                operation,
                Endpoint::publisher(&publisher),
                Endpoint::distributor(&distributor),
            )
            .with_metadata("batch", json!(index))
            .with_metadata("size", json!(size));

            async move {
                let result = tracking
                    .timed(interaction, async move {
                        directory
                            .distributor(distributor)?
                            .distribute(payload, targets)
                            .await
                    })
                    .await;
                match result {
                    Ok(report) => BatchOutcome {
                        index,
                        distributor,
                        size,
                        delivered: report.delivered,
                        failed: report.failed.len(),
                        error: None,
                    },
                    Err(e) => {
                        warn!(publisher = %publisher, batch = index, size, "distributor batch failed: {e}");
                        BatchOutcome {
                            index,
                            distributor,
                            size,
                            delivered: 0,
                            failed: size,
                            error: Some(e.to_string()),
                        }
                    }
                }
            }
        });

        let report = FanoutReport {
            batches: join_all(calls).await,
        };
        debug!(
            topic = self.topic_label(),
            kind = payload.kind(),
            batches = report.batches.len(),
            delivered = report.delivered(),
            "fanout complete"
        );
        report
    }

    fn arm_heartbeat(&self) {
        let me = self.me.clone();
        self.directory.timers().arm(
            &self.name,
            self.directory.settings().heartbeat_interval(),
            move || {
                let _ = me.tell(PublisherMessage::Alarm);
            },
        );
    }

    fn snapshot(&self) -> PublisherSnapshot {
        PublisherSnapshot {
            id: self.id,
            topic: self.topic.clone(),
            subscribers: self.subscribers.clone(),
            latest: self.latest.clone(),
            timer_armed: self.directory.timers().is_armed(&self.name),
            store_empty: self.store.is_empty(),
        }
    }
}

#[async_trait]
impl Actor for Publisher {
    type Message = PublisherMessage;

    async fn started(&mut self) {
        if let Err(e) = self.load() {
            warn!(publisher = %self.id, "failed to load persisted state: {e}");
        }
        if !self.subscribers.is_empty() {
            info!(
                topic = self.topic_label(),
                subscribers = self.subscribers.len(),
                "publisher restored"
            );
            self.arm_heartbeat();
        }
    }

    async fn handle(&mut self, msg: PublisherMessage) {
        match msg {
            PublisherMessage::Subscribe { subscriber, reply } => {
                self.subscribe(subscriber);
                let _ = reply.send(());
            }
            PublisherMessage::Unsubscribe { subscriber, reply } => {
                self.unsubscribe(subscriber);
                if let Some(reply) = reply {
                    let _ = reply.send(());
                }
            }
            PublisherMessage::Publish { value, reply } => {
                let report = self.publish(value).await;
                let _ = reply.send(report);
            }
            PublisherMessage::Alarm => self.heartbeat().await,
            PublisherMessage::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
        }
    }
}
