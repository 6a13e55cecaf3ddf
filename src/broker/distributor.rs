//! Distributor actor
//!
//! Stateless fanout worker. Each `Distribute` call delivers one payload to a
//! batch of subscribers, each target on its own, and reports who got it.
//! A target that cannot be reached is unsubscribed from the payload's
//! publisher; nothing is retried here, the heartbeat protocol takes care of
//! that.

use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::actor::directory::Directory;
use crate::actor::{self, Actor, ActorRef, Pending};
use crate::broker::ids::{DistributorId, SubscriberId};
use crate::broker::message::Payload;
use crate::broker::subscriber::SubscriberHandle;
use crate::debug::{Endpoint, Interaction, Operation};
use crate::utils::Result;

pub enum DistributorMessage {
    Distribute {
        payload: Payload,
        targets: Vec<SubscriberId>,
        reply: oneshot::Sender<DistributionReport>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DistributionReport {
    pub delivered: usize,
    pub failed: Vec<SubscriberId>,
}

#[derive(Clone, Debug)]
pub struct DistributorHandle {
    pub id: DistributorId,
    actor: ActorRef<DistributorMessage>,
    timeout: Duration,
}

impl DistributorHandle {
    pub fn new(id: DistributorId, actor: ActorRef<DistributorMessage>, timeout: Duration) -> Self {
        Self { id, actor, timeout }
    }

    /// Enqueues the batch now; the report arrives through the returned
    /// [`Pending`].
    pub fn request(
        &self,
        payload: Payload,
        targets: Vec<SubscriberId>,
    ) -> Result<Pending<DistributionReport>> {
        self.actor.request(|reply| DistributorMessage::Distribute {
            payload,
            targets,
            reply,
        })
    }

    /// Waits twice the call timeout: the distributor may spend a full call
    /// timeout on one slow target, and that must surface as a failed target
    /// in the report, not as a failed batch.
    pub async fn distribute(
        &self,
        payload: Payload,
        targets: Vec<SubscriberId>,
    ) -> Result<DistributionReport> {
        self.request(payload, targets)?.wait(self.timeout * 2).await
    }

    /// A distributor that fails every call.
    #[cfg(test)]
    pub(crate) fn detached(id: DistributorId, timeout: Duration) -> Self {
        Self::new(id, ActorRef::detached(&id.actor_name()), timeout)
    }
}

pub struct Distributor {
    id: DistributorId,
    directory: Directory,
}

impl Distributor {
    pub fn spawn(id: DistributorId, directory: Directory) -> DistributorHandle {
        let timeout = directory.settings().call_timeout();
        let actor = actor::spawn(id.actor_name(), |_| Distributor { id, directory });
        DistributorHandle::new(id, actor, timeout)
    }

    async fn deliver(&self, payload: &Payload, target: SubscriberId) -> Result<()> {
        let operation = match payload {
            Payload::Value(_) => Operation::Message,
            Payload::Heartbeat(_) => Operation::Ping,
        };
        let interaction = Interaction::new(
            operation,
            Endpoint::distributor(&self.id),
            Endpoint::subscriber(&target),
        );
        let work = async {
            let subscriber: SubscriberHandle = self.directory.subscriber(target)?;
            subscriber.deliver(payload.clone()).await
        };
        self.directory.tracking().timed(interaction, work).await
    }

    async fn distribute(&self, payload: Payload, targets: Vec<SubscriberId>) -> DistributionReport {
        let deliveries = targets.iter().map(|target| self.deliver(&payload, *target));
        let outcomes = join_all(deliveries).await;

        let mut report = DistributionReport::default();
        for (target, outcome) in targets.into_iter().zip(outcomes) {
            match outcome {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(
                        distributor = %self.id,
                        subscriber = %target,
                        kind = payload.kind(),
                        "delivery failed, unsubscribing: {e}"
                    );
                    self.unsubscribe(&payload, target);
                    report.failed.push(target);
                }
            }
        }
        debug!(
            distributor = %self.id,
            kind = payload.kind(),
            delivered = report.delivered,
            failed = report.failed.len(),
            "batch distributed"
        );
        report
    }

    fn unsubscribe(&self, payload: &Payload, target: SubscriberId) {
        let publisher = payload.publisher();
        let told = self
            .directory
            .find_publisher(&publisher)
            .map(|handle| handle.notify_unsubscribe(target));
        if !matches!(told, Some(Ok(()))) {
            warn!(publisher = %publisher, subscriber = %target, "could not reach publisher to unsubscribe");
        }
    }
}

#[async_trait]
impl Actor for Distributor {
    type Message = DistributorMessage;

    async fn handle(&mut self, msg: DistributorMessage) {
        match msg {
            DistributorMessage::Distribute {
                payload,
                targets,
                reply,
            } => {
                let report = self.distribute(payload, targets).await;
                let _ = reply.send(report);
            }
        }
    }
}
