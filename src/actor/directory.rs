//! Actor directory
//!
//! Resolves a stable identity to the one running actor for it, spawning it
//! on first use. Lookups and spawns happen under the map's lock, so two
//! concurrent callers asking for the same id always get the same instance.
//! Actors are never evicted: one whose state has been cleared just sits
//! idle on an empty mailbox until it is addressed again.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::actor::clock::SharedClock;
use crate::actor::timer::TimerService;
use crate::broker::distributor::{Distributor, DistributorHandle};
use crate::broker::ids::{DistributorId, PublisherId, SubscriberId};
use crate::broker::publisher::{Publisher, PublisherHandle};
use crate::broker::subscriber::{Subscriber, SubscriberHandle};
use crate::broker::topic::Topic;
use crate::config::BrokerSettings;
use crate::debug::{TrackerHandle, TrackingHandle};
use crate::persistence::Persistence;
use crate::utils::Result;

type Registry<K, H> = Mutex<HashMap<K, H>>;

struct Inner {
    settings: BrokerSettings,
    persistence: Persistence,
    clock: SharedClock,
    timers: TimerService,
    tracking: TrackingHandle,
    tracker: Option<TrackerHandle>,
    publishers: Registry<PublisherId, PublisherHandle>,
    subscribers: Registry<SubscriberId, SubscriberHandle>,
    distributors: Registry<DistributorId, DistributorHandle>,
}

/// Everything an actor needs to find its peers and its resources.
#[derive(Clone)]
pub struct Directory {
    inner: Arc<Inner>,
}

fn lock<K, H>(registry: &Registry<K, H>) -> MutexGuard<'_, HashMap<K, H>> {
    registry.lock().unwrap_or_else(|e| e.into_inner())
}

fn get_or_spawn<K, H>(
    registry: &Registry<K, H>,
    id: K,
    spawn: impl FnOnce() -> Result<H>,
) -> Result<H>
where
    K: Eq + Hash,
    H: Clone,
{
    let mut actors = lock(registry);
    if let Some(handle) = actors.get(&id) {
        return Ok(handle.clone());
    }
    let handle = spawn()?;
    actors.insert(id, handle.clone());
    Ok(handle)
}

impl Directory {
    pub fn new(
        settings: BrokerSettings,
        persistence: Persistence,
        clock: SharedClock,
        timers: TimerService,
        tracking: TrackingHandle,
        tracker: Option<TrackerHandle>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                settings,
                persistence,
                clock,
                timers,
                tracking,
                tracker,
                publishers: Mutex::new(HashMap::new()),
                subscribers: Mutex::new(HashMap::new()),
                distributors: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn publisher(&self, id: PublisherId) -> Result<PublisherHandle> {
        get_or_spawn(&self.inner.publishers, id, || {
            Publisher::spawn(id, None, self.clone())
        })
    }

    pub fn publisher_for_topic(&self, topic: &Topic) -> Result<PublisherHandle> {
        let id = PublisherId::for_topic(topic);
        get_or_spawn(&self.inner.publishers, id, || {
            Publisher::spawn(id, Some(topic.clone()), self.clone())
        })
    }

    /// The publisher for `id` if it has been spawned, without spawning it.
    pub fn find_publisher(&self, id: &PublisherId) -> Option<PublisherHandle> {
        lock(&self.inner.publishers).get(id).cloned()
    }

    pub fn subscriber(&self, id: SubscriberId) -> Result<SubscriberHandle> {
        get_or_spawn(&self.inner.subscribers, id, || {
            Subscriber::spawn(id, self.clone())
        })
    }

    pub fn find_subscriber(&self, id: &SubscriberId) -> Option<SubscriberHandle> {
        lock(&self.inner.subscribers).get(id).cloned()
    }

    pub fn distributor(&self, id: DistributorId) -> Result<DistributorHandle> {
        get_or_spawn(&self.inner.distributors, id, || {
            Ok(Distributor::spawn(id, self.clone()))
        })
    }

    pub fn tracker(&self) -> Option<&TrackerHandle> {
        self.inner.tracker.as_ref()
    }

    pub fn distributor_count(&self) -> usize {
        lock(&self.inner.distributors).len()
    }

    pub fn settings(&self) -> &BrokerSettings {
        &self.inner.settings
    }

    pub fn persistence(&self) -> &Persistence {
        &self.inner.persistence
    }

    pub fn clock(&self) -> &SharedClock {
        &self.inner.clock
    }

    pub fn timers(&self) -> &TimerService {
        &self.inner.timers
    }

    pub fn tracking(&self) -> &TrackingHandle {
        &self.inner.tracking
    }

    /// Pins `id` to a handle that was built elsewhere.
    #[cfg(test)]
    pub(crate) fn register_distributor(&self, id: DistributorId, handle: DistributorHandle) {
        lock(&self.inner.distributors).insert(id, handle);
    }

    #[cfg(test)]
    pub(crate) fn register_subscriber(&self, id: SubscriberId, handle: SubscriberHandle) {
        lock(&self.inner.subscribers).insert(id, handle);
    }
}

impl std::fmt::Debug for Directory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Directory")
            .field("publishers", &lock(&self.inner.publishers).len())
            .field("subscribers", &lock(&self.inner.subscribers).len())
            .field("distributors", &lock(&self.inner.distributors).len())
            .finish()
    }
}
