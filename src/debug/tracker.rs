//! The debug tracker actor.
//!
//! A singleton that stores interactions in a capped, time-ordered log and
//! keeps per-component stats alongside. Stats are mirrored in memory so the
//! hot path only writes; interactions are read back from sled on query.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::actor::clock::SharedClock;
use crate::actor::timer::TimerService;
use crate::actor::{self, Actor, ActorRef};
use crate::config::TrackerSettings;
use crate::debug::interaction::{ComponentKind, Interaction};
use crate::debug::query::{
    InteractionQuery, MessageFlow, Overview, RECENT_ERROR_SAMPLE, TIMELINE_LIMIT, TimelineBucket,
};
use crate::debug::stats::{ComponentStat, Role};
use crate::debug::tracking::TrackingHandle;
use crate::persistence::{ActorStore, key_sequence, timestamp_key};
use crate::utils::Result;

pub const TRACKER_NAME: &str = "debug/tracker";

const INTERACTION_PREFIX: &str = "interaction/";
const STAT_PREFIX: &str = "stat/";
const MINUTE_MS: i64 = 60_000;

pub enum TrackerMessage {
    Record {
        interaction: Interaction,
        reply: oneshot::Sender<()>,
    },
    Interactions {
        query: InteractionQuery,
        reply: oneshot::Sender<Vec<Interaction>>,
    },
    Stats {
        reply: oneshot::Sender<Vec<ComponentStat>>,
    },
    Overview {
        reply: oneshot::Sender<Overview>,
    },
    Timeline {
        minutes: u32,
        reply: oneshot::Sender<Vec<TimelineBucket>>,
    },
    Alarm,
}

/// Typed client for the tracker actor.
#[derive(Clone, Debug)]
pub struct TrackerHandle {
    actor: ActorRef<TrackerMessage>,
    timeout: Duration,
}

impl TrackerHandle {
    pub fn new(actor: ActorRef<TrackerMessage>, timeout: Duration) -> Self {
        Self { actor, timeout }
    }

    pub async fn record(&self, interaction: Interaction) -> Result<()> {
        self.actor
            .ask(|reply| TrackerMessage::Record { interaction, reply }, self.timeout)
            .await
    }

    pub async fn interactions(&self, query: InteractionQuery) -> Result<Vec<Interaction>> {
        self.actor
            .ask(|reply| TrackerMessage::Interactions { query, reply }, self.timeout)
            .await
    }

    pub async fn stats(&self) -> Result<Vec<ComponentStat>> {
        self.actor
            .ask(|reply| TrackerMessage::Stats { reply }, self.timeout)
            .await
    }

    pub async fn overview(&self) -> Result<Overview> {
        self.actor
            .ask(|reply| TrackerMessage::Overview { reply }, self.timeout)
            .await
    }

    pub async fn timeline(&self, minutes: u32) -> Result<Vec<TimelineBucket>> {
        self.actor
            .ask(|reply| TrackerMessage::Timeline { minutes, reply }, self.timeout)
            .await
    }

    /// Runs retention and liveness cleanup now.
    pub fn alarm(&self) -> Result<()> {
        self.actor.tell(TrackerMessage::Alarm)
    }
}

pub struct DebugTracker {
    me: ActorRef<TrackerMessage>,
    store: ActorStore,
    settings: TrackerSettings,
    clock: SharedClock,
    timers: TimerService,
    stats: HashMap<String, ComponentStat>,
    interaction_count: usize,
    /// Orders interactions recorded in the same millisecond.
    next_sequence: u64,
}

impl DebugTracker {
    pub fn spawn(
        store: ActorStore,
        settings: TrackerSettings,
        clock: SharedClock,
        timers: TimerService,
        call_timeout: Duration,
    ) -> TrackerHandle {
        let actor = actor::spawn(TRACKER_NAME, |me| DebugTracker {
            me,
            store,
            settings,
            clock,
            timers,
            stats: HashMap::new(),
            interaction_count: 0,
            next_sequence: 0,
        });
        TrackerHandle::new(actor, call_timeout)
    }

    fn record(&mut self, interaction: Interaction) -> Result<()> {
        let key = timestamp_key(
            INTERACTION_PREFIX,
            interaction.timestamp,
            self.next_sequence,
            &interaction.id.to_string(),
        );
        self.next_sequence += 1;
        self.store.put(&key, &interaction)?;
        self.interaction_count += 1;
        self.update_stats(&interaction)?;

        if self.interaction_count > self.settings.max_interactions {
            self.prune(self.interaction_count - self.settings.max_interactions)?;
        }
        if !self.timers.is_armed(TRACKER_NAME) {
            self.arm_cleanup();
        }
        Ok(())
    }

    fn update_stats(&mut self, interaction: &Interaction) -> Result<()> {
        let now = self.clock.now_ms();
        let ends = [
            (interaction.source_component, &interaction.source_id, Role::Source),
            (interaction.target_component, &interaction.target_id, Role::Target),
        ];
        for (kind, id, role) in ends {
            if !kind.has_stats() {
                continue;
            }
            let stat = self
                .stats
                .entry(id.clone())
                .or_insert_with(|| ComponentStat::new(id.clone(), kind, now));
            stat.record(role, interaction.success, interaction.duration, now);
            self.store.put(&format!("{STAT_PREFIX}{id}"), stat)?;
        }
        Ok(())
    }

    /// Deletes the `excess` oldest interactions.
    fn prune(&mut self, excess: usize) -> Result<()> {
        let mut removed = 0;
        for key in self.store.first_keys(INTERACTION_PREFIX, excess)? {
            if self.store.remove(&key)? {
                removed += 1;
            }
        }
        self.interaction_count = self.interaction_count.saturating_sub(removed);
        debug!(removed, "pruned oldest interactions");
        Ok(())
    }

    fn cleanup(&mut self) -> Result<()> {
        self.interaction_count = self.store.count_prefix(INTERACTION_PREFIX);
        if self.interaction_count > self.settings.max_interactions {
            self.prune(self.interaction_count - self.settings.max_interactions)?;
        }

        let threshold = self.clock.now_ms() - self.settings.liveness_window_ms as i64;
        for stat in self.stats.values_mut() {
            if stat.is_alive && stat.last_activity < threshold {
                stat.is_alive = false;
                self.store
                    .put(&format!("{STAT_PREFIX}{}", stat.component_id), stat)?;
            }
        }
        Ok(())
    }

    fn arm_cleanup(&self) {
        let me = self.me.clone();
        self.timers
            .arm(TRACKER_NAME, self.settings.cleanup_interval(), move || {
                let _ = me.tell(TrackerMessage::Alarm);
            });
    }

    fn query(&self, query: &InteractionQuery) -> Result<Vec<Interaction>> {
        let all = self.store.scan_prefix::<Interaction>(INTERACTION_PREFIX)?;
        Ok(all
            .into_iter()
            .rev()
            .map(|(_, interaction)| interaction)
            .filter(|interaction| query.matches(interaction))
            .take(query.limit())
            .collect())
    }

    fn sorted_stats(&self) -> Vec<ComponentStat> {
        let mut stats: Vec<_> = self.stats.values().cloned().collect();
        stats.sort_by(|a, b| {
            b.last_activity
                .cmp(&a.last_activity)
                .then_with(|| a.component_id.cmp(&b.component_id))
        });
        stats
    }

    fn overview(&self) -> Result<Overview> {
        let since = self.clock.now_ms() - self.settings.overview_window_ms as i64;
        let recent = self.query(&InteractionQuery {
            limit: Some(usize::MAX),
            since: Some(since),
            ..Default::default()
        })?;

        let recent_errors = recent
            .iter()
            .take(RECENT_ERROR_SAMPLE)
            .filter(|i| !i.success)
            .cloned()
            .collect();

        let mut flow: BTreeMap<_, (u64, u64)> = BTreeMap::new();
        for interaction in &recent {
            let entry = flow.entry(interaction.operation).or_default();
            entry.0 += 1;
            if interaction.success {
                entry.1 += 1;
            }
        }
        let message_flow = flow
            .into_iter()
            .map(|(operation, (count, ok))| MessageFlow {
                operation,
                count,
                success_rate: ok as f64 / count as f64 * 100.0,
            })
            .collect();

        let active = |kind: ComponentKind| {
            self.stats
                .values()
                .filter(|s| s.is_alive && s.component_type == kind)
                .count()
        };

        let mut top: Vec<_> = self.stats.values().filter(|s| s.is_alive).cloned().collect();
        top.sort_by(|a, b| {
            b.total_messages()
                .cmp(&a.total_messages())
                .then_with(|| a.component_id.cmp(&b.component_id))
        });
        top.truncate(self.settings.top_components);

        Ok(Overview {
            total_messages: recent.len() as u64,
            active_publishers: active(ComponentKind::Publisher),
            active_distributors: active(ComponentKind::Distributor),
            active_subscribers: active(ComponentKind::Subscriber),
            recent_errors,
            top_active_components: top,
            message_flow,
        })
    }

    fn timeline(&self, minutes: u32) -> Result<Vec<TimelineBucket>> {
        let since = self.clock.now_ms() - i64::from(minutes) * MINUTE_MS;
        let recent = self.query(&InteractionQuery {
            limit: Some(TIMELINE_LIMIT),
            since: Some(since),
            ..Default::default()
        })?;

        let mut buckets: BTreeMap<i64, Vec<Interaction>> = BTreeMap::new();
        for interaction in recent {
            let minute = interaction.timestamp - interaction.timestamp.rem_euclid(MINUTE_MS);
            buckets.entry(minute).or_default().push(interaction);
        }
        Ok(buckets
            .into_iter()
            .map(|(timestamp, interactions)| TimelineBucket {
                timestamp,
                interactions,
            })
            .collect())
    }
}

#[async_trait]
impl Actor for DebugTracker {
    type Message = TrackerMessage;

    async fn started(&mut self) {
        match self.store.scan_prefix::<ComponentStat>(STAT_PREFIX) {
            Ok(stats) => {
                self.stats = stats
                    .into_iter()
                    .map(|(_, stat)| (stat.component_id.clone(), stat))
                    .collect();
            }
            Err(e) => warn!("failed to load component stats: {e}"),
        }
        self.interaction_count = self.store.count_prefix(INTERACTION_PREFIX);
        match self.store.last_key(INTERACTION_PREFIX) {
            Ok(last) => {
                self.next_sequence = last
                    .and_then(|key| key_sequence(INTERACTION_PREFIX, &key))
                    .map_or(0, |sequence| sequence + 1);
            }
            Err(e) => warn!("failed to read the last interaction key: {e}"),
        }
        if self.interaction_count > 0 || !self.stats.is_empty() {
            info!(
                interactions = self.interaction_count,
                components = self.stats.len(),
                "debug tracker restored"
            );
            self.arm_cleanup();
        }
    }

    async fn handle(&mut self, msg: TrackerMessage) {
        match msg {
            TrackerMessage::Record { interaction, reply } => {
                if let Err(e) = self.record(interaction) {
                    warn!("failed to record interaction: {e}");
                }
                let _ = reply.send(());
            }
            TrackerMessage::Interactions { query, reply } => {
                let found = self.query(&query).unwrap_or_else(|e| {
                    warn!("interaction query failed: {e}");
                    Vec::new()
                });
                let _ = reply.send(found);
            }
            TrackerMessage::Stats { reply } => {
                let _ = reply.send(self.sorted_stats());
            }
            TrackerMessage::Overview { reply } => match self.overview() {
                Ok(overview) => {
                    let _ = reply.send(overview);
                }
                Err(e) => warn!("overview failed: {e}"),
            },
            TrackerMessage::Timeline { minutes, reply } => {
                let buckets = self.timeline(minutes).unwrap_or_else(|e| {
                    warn!("timeline query failed: {e}");
                    Vec::new()
                });
                let _ = reply.send(buckets);
            }
            TrackerMessage::Alarm => {
                if let Err(e) = self.cleanup() {
                    warn!("tracker cleanup failed: {e}");
                }
                self.arm_cleanup();
            }
        }
    }
}

/// Drains `tracking` into the tracker, one acknowledged record at a time.
///
/// Waiting for each acknowledgement keeps the tracker's mailbox short; any
/// backlog piles up in the bounded channel instead, which drops the oldest.
pub fn forward(tracking: &TrackingHandle, tracker: TrackerHandle) -> JoinHandle<()> {
    let mut events = tracking.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(interaction) => {
                    if let Err(e) = tracker.record(interaction).await {
                        warn!("dropping interaction: {e}");
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "debug tracker lagging, oldest interactions dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
