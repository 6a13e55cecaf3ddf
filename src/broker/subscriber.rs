//! Subscriber actor
//!
//! Multiplexes any number of client connections. Each connection is a
//! session with its own topic set; the actor subscribes to the union of
//! those sets and drops a publisher as soon as no session wants its topic.
//!
//! Liveness: every subscription remembers when its publisher was last heard
//! from (heartbeat or value). A periodic sweep resubscribes anything silent
//! for longer than the heartbeat timeout, one attempt per sweep.
//!
//! The actor never waits on a publisher inside its mailbox. Subscribe calls
//! are enqueued here and awaited by a spawned task, which reports back with
//! [`SubscriberMessage::SubscribeSettled`]; unsubscribes are fire-and-forget.
//!
//! Persisted keys (tree `subscriber/<uuid>`):
//! - `session/<uuid>`: the session's topic set
//! - `subscription/<uuid>`: one [`Subscription`] per publisher

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use tungstenite::protocol::Message as WsMessage;

use crate::actor::directory::Directory;
use crate::actor::{self, Actor, ActorRef, Pending};
use crate::broker::ids::{PublisherId, SessionId, SubscriberId};
use crate::broker::message::{Payload, PublishMessage};
use crate::broker::topic::{Topic, parse_topic_list};
use crate::client::Connection;
use crate::debug::{ComponentKind, Endpoint, Interaction, Operation};
use crate::persistence::ActorStore;
use crate::utils::Result;

const SESSION_PREFIX: &str = "session/";
const SUBSCRIPTION_PREFIX: &str = "subscription/";

fn session_key(id: &SessionId) -> String {
    format!("{SESSION_PREFIX}{id}")
}

fn subscription_key(id: &PublisherId) -> String {
    format!("{SUBSCRIPTION_PREFIX}{id}")
}

fn websocket(session: &SessionId) -> Endpoint {
    Endpoint::new(ComponentKind::Websocket, session)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    Subscribing,
    Subscribed,
    Stale,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub topic: Topic,
    pub last_heartbeat_at: i64,
    pub state: SubscriptionState,
    /// Resubscribe attempts since the publisher was last heard from.
    pub attempts: u32,
}

impl Subscription {
    fn new(topic: Topic, now: i64) -> Self {
        Self {
            topic,
            last_heartbeat_at: now,
            state: SubscriptionState::Subscribing,
            attempts: 0,
        }
    }

    fn heard_from(&mut self, now: i64) {
        self.last_heartbeat_at = now;
        self.state = SubscriptionState::Subscribed;
        self.attempts = 0;
    }
}

pub enum SubscriberMessage {
    Connect {
        sender: UnboundedSender<WsMessage>,
        reply: oneshot::Sender<SessionId>,
    },
    Topics {
        session: SessionId,
        text: String,
    },
    Disconnect {
        session: SessionId,
    },
    OnValue {
        message: PublishMessage,
        reply: oneshot::Sender<()>,
    },
    OnHeartbeat {
        publisher: PublisherId,
        reply: oneshot::Sender<()>,
    },
    OnUnsubscribed {
        publisher: PublisherId,
    },
    SubscribeSettled {
        results: Vec<(PublisherId, Result<()>)>,
    },
    Alarm,
    Snapshot {
        reply: oneshot::Sender<SubscriberSnapshot>,
    },
    /// Empties a session's topic set without reconciling.
    #[cfg(test)]
    ForgetTopics {
        session: SessionId,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubscriberSnapshot {
    pub id: SubscriberId,
    pub connections: usize,
    pub sessions: BTreeMap<SessionId, BTreeSet<Topic>>,
    pub subscriptions: BTreeMap<PublisherId, Subscription>,
    pub timer_armed: bool,
    pub store_empty: bool,
}

#[derive(Clone, Debug)]
pub struct SubscriberHandle {
    pub id: SubscriberId,
    actor: ActorRef<SubscriberMessage>,
    timeout: Duration,
}

impl SubscriberHandle {
    /// Attaches a connection and returns its new session id.
    pub async fn connect(&self, sender: UnboundedSender<WsMessage>) -> Result<SessionId> {
        self.actor
            .ask(|reply| SubscriberMessage::Connect { sender, reply }, self.timeout)
            .await
    }

    /// Replaces the session's topic set with the comma-separated `text`.
    pub fn set_topics(&self, session: SessionId, text: impl Into<String>) -> Result<()> {
        self.actor.tell(SubscriberMessage::Topics {
            session,
            text: text.into(),
        })
    }

    pub fn disconnect(&self, session: SessionId) -> Result<()> {
        self.actor.tell(SubscriberMessage::Disconnect { session })
    }

    pub fn request_delivery(&self, payload: Payload) -> Result<Pending<()>> {
        match payload {
            Payload::Value(message) => self
                .actor
                .request(|reply| SubscriberMessage::OnValue { message, reply }),
            Payload::Heartbeat(publisher) => self
                .actor
                .request(|reply| SubscriberMessage::OnHeartbeat { publisher, reply }),
        }
    }

    pub async fn deliver(&self, payload: Payload) -> Result<()> {
        self.request_delivery(payload)?.wait(self.timeout).await
    }

    pub fn notify_unsubscribed(&self, publisher: PublisherId) -> Result<()> {
        self.actor
            .tell(SubscriberMessage::OnUnsubscribed { publisher })
    }

    /// Runs the liveness sweep now.
    pub fn alarm(&self) -> Result<()> {
        self.actor.tell(SubscriberMessage::Alarm)
    }

    pub async fn snapshot(&self) -> Result<SubscriberSnapshot> {
        self.actor
            .ask(|reply| SubscriberMessage::Snapshot { reply }, self.timeout)
            .await
    }

    /// Leaves the session's subscriptions in place with nobody wanting them.
    #[cfg(test)]
    pub(crate) fn forget_topics(&self, session: SessionId) -> Result<()> {
        self.actor.tell(SubscriberMessage::ForgetTopics { session })
    }

    /// A subscriber that accepts calls and never answers. Its mailbox is
    /// handed back so the test keeps it open.
    #[cfg(test)]
    pub(crate) fn stalled(
        id: SubscriberId,
        timeout: Duration,
    ) -> (Self, tokio::sync::mpsc::UnboundedReceiver<SubscriberMessage>) {
        let (actor, mailbox) = ActorRef::stalled(&id.actor_name());
        (Self { id, actor, timeout }, mailbox)
    }

    /// A subscriber that is already gone.
    #[cfg(test)]
    pub(crate) fn detached(id: SubscriberId, timeout: Duration) -> Self {
        Self {
            id,
            actor: ActorRef::detached(&id.actor_name()),
            timeout,
        }
    }
}

pub struct Subscriber {
    id: SubscriberId,
    name: String,
    me: ActorRef<SubscriberMessage>,
    connections: HashMap<SessionId, Connection>,
    session_topics: HashMap<SessionId, BTreeSet<Topic>>,
    subscriptions: BTreeMap<PublisherId, Subscription>,
    store: ActorStore,
    directory: Directory,
}

impl Subscriber {
    pub fn spawn(id: SubscriberId, directory: Directory) -> Result<SubscriberHandle> {
        let name = id.actor_name();
        let store = directory.persistence().store(&name)?;
        let timeout = directory.settings().call_timeout();
        let actor = actor::spawn(name.clone(), |me| Subscriber {
            id,
            name,
            me,
            connections: HashMap::new(),
            session_topics: HashMap::new(),
            subscriptions: BTreeMap::new(),
            store,
            directory,
        });
        Ok(SubscriberHandle { id, actor, timeout })
    }

    fn now(&self) -> i64 {
        self.directory.clock().now_ms()
    }

    fn persist_subscription(&self, publisher: &PublisherId) {
        if let Some(subscription) = self.subscriptions.get(publisher) {
            if let Err(e) = self.store.put(&subscription_key(publisher), subscription) {
                warn!(subscriber = %self.id, "failed to persist subscription: {e}");
            }
        }
    }

    /// Rows left over from a previous run belong to connections that no
    /// longer exist. Tell their publishers and start clean.
    fn discard_previous_run(&mut self) -> Result<()> {
        let orphaned = self
            .store
            .scan_prefix::<Subscription>(SUBSCRIPTION_PREFIX)?;
        if orphaned.is_empty() && self.store.is_empty() {
            return Ok(());
        }
        for (key, _) in &orphaned {
            let Some(publisher) = key
                .strip_prefix(SUBSCRIPTION_PREFIX)
                .and_then(|raw| raw.parse::<PublisherId>().ok())
            else {
                continue;
            };
            if let Ok(handle) = self.directory.publisher(publisher) {
                let _ = handle.notify_unsubscribe(self.id);
            }
        }
        self.store.clear()?;
        info!(
            subscriber = %self.id,
            subscriptions = orphaned.len(),
            "discarded subscriptions from a previous run"
        );
        Ok(())
    }

    fn connect(&mut self, sender: UnboundedSender<WsMessage>) -> SessionId {
        let session = SessionId::random();
        self.connections
            .insert(session, Connection::new(session, sender));
        self.session_topics.insert(session, BTreeSet::new());
        if let Err(e) = self.store.put(&session_key(&session), &BTreeSet::<Topic>::new()) {
            warn!(subscriber = %self.id, "failed to persist session: {e}");
        }
        self.directory.tracking().record(Interaction::new(
            Operation::WebsocketConnect,
            websocket(&session),
            Endpoint::subscriber(&self.id),
        ));
        info!(subscriber = %self.id, session = %session, "connection attached");
        session
    }

    fn set_topics(&mut self, session: SessionId, text: &str) {
        if !self.connections.contains_key(&session) {
            warn!(subscriber = %self.id, session = %session, "topics for unknown session ignored");
            return;
        }
        let topics = parse_topic_list(text);
        if let Err(e) = self.store.put(&session_key(&session), &topics) {
            warn!(subscriber = %self.id, "failed to persist session topics: {e}");
        }
        debug!(session = %session, topics = ?topics, "session topics replaced");
        self.session_topics.insert(session, topics);
        self.reconcile();
    }

    fn wanted_topics(&self) -> BTreeSet<Topic> {
        self.session_topics.values().flatten().cloned().collect()
    }

    /// Brings `subscriptions` in line with what the sessions want.
    fn reconcile(&mut self) {
        let wanted = self.wanted_topics();

        let unwanted: Vec<PublisherId> = self
            .subscriptions
            .iter()
            .filter(|(_, s)| !wanted.contains(&s.topic))
            .map(|(id, _)| *id)
            .collect();
        for publisher in unwanted {
            self.drop_subscription(publisher);
        }

        let now = self.now();
        let mut fresh = Vec::new();
        for topic in wanted {
            let publisher = PublisherId::for_topic(&topic);
            if self.subscriptions.contains_key(&publisher) {
                continue;
            }
            self.subscriptions
                .insert(publisher, Subscription::new(topic, now));
            self.persist_subscription(&publisher);
            fresh.push(publisher);
        }
        self.request_subscriptions(fresh);
        self.sync_timer();
    }

    fn drop_subscription(&mut self, publisher: PublisherId) {
        let Some(subscription) = self.subscriptions.remove(&publisher) else {
            return;
        };
        if let Err(e) = self.store.remove(&subscription_key(&publisher)) {
            warn!(subscriber = %self.id, "failed to delete subscription row: {e}");
        }
        let told = self
            .directory
            .publisher(publisher)
            .and_then(|handle| handle.notify_unsubscribe(self.id));
        let mut interaction = Interaction::new(
            Operation::Unsubscribe,
            Endpoint::subscriber(&self.id),
            Endpoint::publisher(&publisher),
        )
        .with_data(json!({ "topic": subscription.topic }));
        if let Err(e) = told {
            warn!(subscriber = %self.id, topic = %subscription.topic, "unsubscribe not delivered: {e}");
            interaction = interaction.with_error(e);
        }
        self.directory.tracking().record(interaction);
        debug!(subscriber = %self.id, topic = %subscription.topic, "subscription dropped");
    }

    /// Enqueues a subscribe to every publisher in `publishers` and gathers
    /// the replies off the mailbox.
    fn request_subscriptions(&self, publishers: Vec<PublisherId>) {
        if publishers.is_empty() {
            return;
        }
        let mut calls = Vec::with_capacity(publishers.len());
        for publisher in publishers {
            let topic = self.subscriptions.get(&publisher).map(|s| s.topic.clone());
            let handle = match &topic {
                Some(topic) => self.directory.publisher_for_topic(topic),
                None => self.directory.publisher(publisher),
            };
            let pending = handle.and_then(|h| h.request_subscribe(self.id));
            let interaction = Interaction::new(
                Operation::Subscribe,
                Endpoint::subscriber(&self.id),
                Endpoint::publisher(&publisher),
            )
            .with_data(json!({ "topic": topic }));
            calls.push((publisher, interaction, pending));
        }

        let tracking = self.directory.tracking().clone();
        let timeout = self.directory.settings().call_timeout();
        let me = self.me.clone();
        tokio::spawn(async move {
            let tracking = &tracking;
            let results = join_all(calls.into_iter().map(|(publisher, interaction, pending)| async move {
                let settled = tracking
                    .timed(interaction, async move { pending?.wait(timeout).await })
                    .await;
                (publisher, settled)
            }))
            .await;
            let _ = me.tell(SubscriberMessage::SubscribeSettled { results });
        });
    }

    fn subscribe_settled(&mut self, results: Vec<(PublisherId, Result<()>)>) {
        for (publisher, result) in results {
            let Some(subscription) = self.subscriptions.get_mut(&publisher) else {
                continue;
            };
            match result {
                Ok(()) => {
                    if subscription.state != SubscriptionState::Subscribed {
                        subscription.state = SubscriptionState::Subscribed;
                    }
                }
                Err(e) => {
                    warn!(subscriber = %self.id, topic = %subscription.topic, "subscribe failed: {e}");
                    subscription.state = SubscriptionState::Stale;
                }
            }
            self.persist_subscription(&publisher);
        }
    }

    /// A heartbeat deadline is armed exactly while there are subscriptions.
    fn sync_timer(&self) {
        let timers = self.directory.timers();
        if self.subscriptions.is_empty() {
            timers.disarm(&self.name);
        } else if !timers.is_armed(&self.name) {
            self.arm_sweep();
        }
    }

    fn arm_sweep(&self) {
        let me = self.me.clone();
        self.directory.timers().arm(
            &self.name,
            self.directory.settings().heartbeat_interval(),
            move || {
                let _ = me.tell(SubscriberMessage::Alarm);
            },
        );
    }

    fn disconnect(&mut self, session: SessionId, close: bool) {
        let Some(connection) = self.connections.remove(&session) else {
            return;
        };
        if close {
            connection.close("delivery failed");
        }
        self.session_topics.remove(&session);
        if let Err(e) = self.store.remove(&session_key(&session)) {
            warn!(subscriber = %self.id, "failed to delete session row: {e}");
        }
        self.directory.tracking().record(Interaction::new(
            Operation::WebsocketDisconnect,
            websocket(&session),
            Endpoint::subscriber(&self.id),
        ));
        info!(subscriber = %self.id, session = %session, "connection detached");

        self.reconcile();
        if self.connections.is_empty() {
            self.teardown();
        }
    }

    /// Unsubscribes from everything and forgets all state.
    fn teardown(&mut self) {
        let publishers: Vec<_> = self.subscriptions.keys().copied().collect();
        for publisher in publishers {
            self.drop_subscription(publisher);
        }
        for connection in self.connections.values() {
            connection.close("subscriber reset");
        }
        self.connections.clear();
        self.session_topics.clear();
        self.directory.timers().disarm(&self.name);
        if let Err(e) = self.store.clear() {
            warn!(subscriber = %self.id, "failed to clear persisted state: {e}");
        }
        debug!(subscriber = %self.id, "subscriber torn down");
    }

    /// Tells a publisher we do not track to stop sending.
    fn reject(&self, publisher: PublisherId, what: &str) {
        warn!(subscriber = %self.id, publisher = %publisher, "{what} from untracked publisher, unsubscribing");
        if let Ok(handle) = self.directory.publisher(publisher) {
            let _ = handle.notify_unsubscribe(self.id);
        }
    }

    fn on_value(&mut self, message: PublishMessage) {
        let publisher = message.publisher_id;
        if self.connections.is_empty() {
            self.reject(publisher, "value with no live connections");
            self.teardown();
            return;
        }
        let now = self.now();
        let Some(subscription) = self.subscriptions.get_mut(&publisher) else {
            self.reject(publisher, "value");
            return;
        };
        subscription.heard_from(now);
        self.persist_subscription(&publisher);

        let frame = match serde_json::to_string(&message) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(subscriber = %self.id, "failed to encode value: {e}");
                return;
            }
        };

        let topic = &message.content.ticker;
        let mut failed = Vec::new();
        for (session, topics) in &self.session_topics {
            if !topics.contains(topic) {
                continue;
            }
            let Some(connection) = self.connections.get(session) else {
                continue;
            };
            let mut interaction = Interaction::new(
                Operation::Message,
                Endpoint::subscriber(&self.id),
                websocket(session),
            );
            if let Err(e) = connection.send_text(&frame) {
                warn!(session = %session, topic = %topic, "send failed, closing connection: {e}");
                interaction = interaction.with_error(e);
                failed.push(*session);
            }
            self.directory.tracking().record(interaction);
        }

        for session in failed {
            self.disconnect(session, true);
        }
    }

    fn on_heartbeat(&mut self, publisher: PublisherId) {
        let now = self.now();
        match self.subscriptions.get_mut(&publisher) {
            Some(subscription) => {
                subscription.heard_from(now);
                self.persist_subscription(&publisher);
            }
            None => self.reject(publisher, "heartbeat"),
        }
    }

    /// The publisher dropped us. Resubscribe if a session still wants the
    /// topic, otherwise forget the entry.
    fn on_unsubscribed(&mut self, publisher: PublisherId) {
        let Some(subscription) = self.subscriptions.get_mut(&publisher) else {
            return;
        };
        let topic = subscription.topic.clone();
        if self.session_topics.values().any(|t| t.contains(&topic)) {
            subscription.state = SubscriptionState::Stale;
            self.persist_subscription(&publisher);
            debug!(subscriber = %self.id, topic = %topic, "dropped by publisher, resubscribing");
            self.request_subscriptions(vec![publisher]);
            return;
        }

        self.subscriptions.remove(&publisher);
        if let Err(e) = self.store.remove(&subscription_key(&publisher)) {
            warn!(subscriber = %self.id, "failed to delete subscription row: {e}");
        }
        self.sync_timer();
        if self.subscriptions.is_empty() && self.connections.is_empty() {
            self.teardown();
        }
    }

    /// Resubscribes every subscription not heard from within the timeout.
    fn sweep(&mut self) {
        let now = self.now();
        let timeout = self.directory.settings().heartbeat_timeout_ms as i64;
        let mut stale = Vec::new();
        for (publisher, subscription) in self.subscriptions.iter_mut() {
            if now - subscription.last_heartbeat_at <= timeout {
                continue;
            }
            subscription.state = SubscriptionState::Subscribing;
            subscription.attempts += 1;
            if let Err(e) = self.store.put(&subscription_key(publisher), &*subscription) {
                warn!(subscriber = %self.id, "failed to persist subscription: {e}");
            }
            stale.push(*publisher);
        }
        if !stale.is_empty() {
            info!(subscriber = %self.id, stale = stale.len(), "resubscribing silent publishers");
        }
        self.request_subscriptions(stale);
        if !self.subscriptions.is_empty() {
            self.arm_sweep();
        }
    }

    fn snapshot(&self) -> SubscriberSnapshot {
        SubscriberSnapshot {
            id: self.id,
            connections: self.connections.len(),
            sessions: self
                .session_topics
                .iter()
                .map(|(session, topics)| (*session, topics.clone()))
                .collect(),
            subscriptions: self.subscriptions.clone(),
            timer_armed: self.directory.timers().is_armed(&self.name),
            store_empty: self.store.is_empty(),
        }
    }
}

#[async_trait]
impl Actor for Subscriber {
    type Message = SubscriberMessage;

    async fn started(&mut self) {
        if let Err(e) = self.discard_previous_run() {
            warn!(subscriber = %self.id, "failed to discard previous state: {e}");
        }
    }

    async fn handle(&mut self, msg: SubscriberMessage) {
        match msg {
            SubscriberMessage::Connect { sender, reply } => {
                let session = self.connect(sender);
                let _ = reply.send(session);
            }
            SubscriberMessage::Topics { session, text } => self.set_topics(session, &text),
            SubscriberMessage::Disconnect { session } => self.disconnect(session, false),
            SubscriberMessage::OnValue { message, reply } => {
                self.on_value(message);
                let _ = reply.send(());
            }
            SubscriberMessage::OnHeartbeat { publisher, reply } => {
                self.on_heartbeat(publisher);
                let _ = reply.send(());
            }
            SubscriberMessage::OnUnsubscribed { publisher } => self.on_unsubscribed(publisher),
            SubscriberMessage::SubscribeSettled { results } => self.subscribe_settled(results),
            SubscriberMessage::Alarm => self.sweep(),
            SubscriberMessage::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            #[cfg(test)]
            SubscriberMessage::ForgetTopics { session } => {
                if let Some(topics) = self.session_topics.get_mut(&session) {
                    topics.clear();
                }
            }
        }
    }
}
