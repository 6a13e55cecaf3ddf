use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::info;

use crate::actor::clock::SharedClock;
use crate::actor::directory::Directory;
use crate::actor::timer::TimerService;
use crate::broker::ids::SubscriberId;
use crate::broker::message::{TickerUpdate, TopicValue};
use crate::broker::publisher::{FanoutReport, PublisherHandle};
use crate::broker::subscriber::SubscriberHandle;
use crate::broker::topic::Topic;
use crate::config::Settings;
use crate::debug::tracker::{self, DebugTracker, TRACKER_NAME};
use crate::debug::{TrackerHandle, TrackingHandle};
use crate::persistence::Persistence;
use crate::utils::{BrokerError, Result};

/// The subscriber actor behind gateway shard `index`.
pub fn shard_id(index: usize) -> SubscriberId {
    SubscriberId::for_name(&format!("subscriber-{index}"))
}

/// Entry point to a running broker.
///
/// Owns the actor directory and the debug tracker, and hands out the
/// subscriber shards the gateway attaches connections to. Cheap to share
/// behind an `Arc`.
pub struct Broker {
    settings: Settings,
    directory: Directory,
    next_shard: AtomicUsize,
}

impl Broker {
    /// Starts the timer scheduler and, when debug tracking is enabled, the
    /// tracker actor with its event forwarder. Must run inside a tokio
    /// runtime.
    pub fn start(settings: Settings, persistence: Persistence, clock: SharedClock) -> Result<Self> {
        let timers = TimerService::start();

        let (tracking, tracker) = if settings.debug.enabled {
            let tracking = TrackingHandle::new(settings.tracker.event_buffer, clock.clone());
            let tracker = DebugTracker::spawn(
                persistence.store(TRACKER_NAME)?,
                settings.tracker.clone(),
                clock.clone(),
                timers.clone(),
                settings.broker.call_timeout(),
            );
            tracker::forward(&tracking, tracker.clone());
            (tracking, Some(tracker))
        } else {
            (TrackingHandle::disabled(), None)
        };

        let directory = Directory::new(
            settings.broker.clone(),
            persistence,
            clock,
            timers,
            tracking,
            tracker,
        );
        info!(
            batch_size = settings.broker.batch_size,
            shards = settings.broker.subscriber_shards,
            debug = settings.debug.enabled,
            "broker started"
        );
        Ok(Self {
            settings,
            directory,
            next_shard: AtomicUsize::new(0),
        })
    }

    /// Publishes `update` to its topic's publisher, stamped with the current
    /// time. Safe to repeat: the publisher just overwrites its latest value.
    pub async fn publish(&self, update: TickerUpdate) -> Result<FanoutReport> {
        let ticker = Topic::parse(&update.ticker)
            .ok_or_else(|| BrokerError::InvalidRequest("empty ticker".to_string()))?;
        let value = TopicValue {
            ticker,
            value: update.value,
            timestamp: self.directory.clock().now_ms(),
        };
        self.publisher(&value.ticker)?.publish(value).await
    }

    pub fn publisher(&self, topic: &Topic) -> Result<PublisherHandle> {
        self.directory.publisher_for_topic(topic)
    }

    pub fn subscriber_for_shard(&self, index: usize) -> Result<SubscriberHandle> {
        self.directory.subscriber(shard_id(index))
    }

    /// Round-robins new connections over the configured shards.
    pub fn next_subscriber(&self) -> Result<SubscriberHandle> {
        let shards = self.settings.broker.subscriber_shards.max(1);
        let index = self.next_shard.fetch_add(1, Ordering::Relaxed) % shards;
        self.subscriber_for_shard(index)
    }

    pub fn tracker(&self) -> Option<&TrackerHandle> {
        self.directory.tracker()
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub async fn flush(&self) -> Result<()> {
        self.directory.persistence().flush().await
    }
}
