//! The `actor` module is the coordination substrate every broker component
//! runs on.
//!
//! An actor is a tokio task that owns its state and drains a single mailbox,
//! handling one message at a time. Nothing else can touch that state, so
//! multi-step reads and writes inside one handler need no extra locking.
//!
//! - [`ActorRef`]: cheap, cloneable address of a running actor with `tell`
//!   (fire-and-forget) and `ask` (request/response with a timeout).
//! - [`directory::Directory`]: resolves stable ids to singleton actors.
//! - [`timer::TimerService`]: one outstanding deadline per actor.
//! - [`clock::Clock`]: wall clock, swappable in tests.

pub mod clock;
pub mod directory;
pub mod timer;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::utils::{BrokerError, Result};

/// Behavior of an actor. `handle` is never called concurrently for the same
/// instance.
#[async_trait]
pub trait Actor: Send + Sized + 'static {
    type Message: Send + 'static;

    async fn handle(&mut self, msg: Self::Message);

    /// Called once before the first message, typically to load persisted
    /// state.
    async fn started(&mut self) {}
}

/// Address of a running actor.
pub struct ActorRef<M> {
    name: Arc<str>,
    tx: mpsc::UnboundedSender<M>,
}

impl<M> Clone for ActorRef<M> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            tx: self.tx.clone(),
        }
    }
}

impl<M> std::fmt::Debug for ActorRef<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorRef").field("name", &self.name).finish()
    }
}

impl<M: Send + 'static> ActorRef<M> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueue `msg` without waiting for it to be handled.
    pub fn tell(&self, msg: M) -> Result<()> {
        self.tx
            .send(msg)
            .map_err(|_| BrokerError::unreachable(self.name.as_ref()))
    }

    /// Enqueue a request now and hand back the pending reply.
    ///
    /// Enqueueing happens synchronously, so requests issued one after another
    /// from the same actor reach the target in that order even when their
    /// replies are awaited elsewhere.
    pub fn request<R>(&self, make: impl FnOnce(oneshot::Sender<R>) -> M) -> Result<Pending<R>> {
        let (reply, rx) = oneshot::channel();
        self.tell(make(reply))?;
        Ok(Pending {
            target: self.name.clone(),
            rx,
        })
    }

    pub async fn ask<R>(
        &self,
        make: impl FnOnce(oneshot::Sender<R>) -> M,
        timeout: Duration,
    ) -> Result<R> {
        self.request(make)?.wait(timeout).await
    }

    /// A reference whose mailbox fills up but is never drained. Requests
    /// time out instead of failing fast.
    #[cfg(test)]
    pub(crate) fn stalled(name: &str) -> (Self, mpsc::UnboundedReceiver<M>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let actor = Self {
            name: Arc::from(name),
            tx,
        };
        (actor, rx)
    }

    /// A reference whose actor is already gone. Every call fails as
    /// unreachable.
    #[cfg(test)]
    pub(crate) fn detached(name: &str) -> Self {
        let (tx, _) = mpsc::unbounded_channel();
        Self {
            name: Arc::from(name),
            tx,
        }
    }
}

/// Reply to a [`ActorRef::request`] that has not arrived yet.
pub struct Pending<R> {
    target: Arc<str>,
    rx: oneshot::Receiver<R>,
}

impl<R> Pending<R> {
    pub async fn wait(self, timeout: Duration) -> Result<R> {
        match tokio::time::timeout(timeout, self.rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(BrokerError::unreachable(self.target.as_ref())),
            Err(_) => Err(BrokerError::Timeout {
                target: self.target.to_string(),
                after: timeout,
            }),
        }
    }
}

/// Spawns an actor built by `build`, which receives the actor's own address
/// so it can re-arm timers and message itself.
pub fn spawn<A, F>(name: impl Into<Arc<str>>, build: F) -> ActorRef<A::Message>
where
    A: Actor,
    F: FnOnce(ActorRef<A::Message>) -> A,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let actor_ref = ActorRef {
        name: name.into(),
        tx,
    };
    let actor = build(actor_ref.clone());
    tokio::spawn(run(actor_ref.name.clone(), actor, rx));
    actor_ref
}

async fn run<A: Actor>(name: Arc<str>, mut actor: A, mut rx: mpsc::UnboundedReceiver<A::Message>) {
    actor.started().await;
    while let Some(msg) = rx.recv().await {
        actor.handle(msg).await;
    }
    debug!(actor = %name, "mailbox closed, actor stopped");
}

#[cfg(test)]
mod tests;
