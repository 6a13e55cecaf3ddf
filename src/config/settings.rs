use std::time::Duration;

use serde::Deserialize;

/// Top-level configuration settings for the application.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub debug: DebugSettings,
    pub broker: BrokerSettings,
    pub tracker: TrackerSettings,
    pub ingest: IngestSettings,
    pub feed: FeedSettings,
}

/// Host and port for the WebSocket gateway.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

/// The read-only debug HTTP surface. Binds on `server.host`.
#[derive(Debug, Deserialize, Clone)]
pub struct DebugSettings {
    pub enabled: bool,
    pub port: u16,
}

/// Fanout and liveness parameters shared by every publisher and subscriber.
///
/// `heartbeat_timeout_ms` must exceed `heartbeat_interval_ms`, otherwise
/// every subscription would look stale between two heartbeats.
#[derive(Debug, Deserialize, Clone)]
pub struct BrokerSettings {
    pub heartbeat_interval_ms: u64,
    pub heartbeat_timeout_ms: u64,
    pub batch_size: usize,
    pub call_timeout_ms: u64,
    pub subscriber_shards: usize,
    pub data_dir: String,
}

impl BrokerSettings {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

/// Retention and aggregation for the debug tracker.
#[derive(Debug, Deserialize, Clone)]
pub struct TrackerSettings {
    pub max_interactions: usize,
    pub cleanup_interval_ms: u64,
    pub liveness_window_ms: u64,
    pub overview_window_ms: u64,
    pub event_buffer: usize,
    pub top_components: usize,
}

impl TrackerSettings {
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }
}

/// Redelivery policy of the value ingress queue.
#[derive(Debug, Deserialize, Clone)]
pub struct IngestSettings {
    pub buffer: usize,
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
}

impl IngestSettings {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// The synthetic ticker feed. Disabled unless asked for.
#[derive(Debug, Deserialize, Clone)]
pub struct FeedSettings {
    pub enabled: bool,
    pub interval_ms: u64,
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values are filled from
/// `Settings::default()`.
#[derive(Debug, Default, Deserialize)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub debug: Option<PartialDebugSettings>,
    pub broker: Option<PartialBrokerSettings>,
    pub tracker: Option<PartialTrackerSettings>,
    pub ingest: Option<PartialIngestSettings>,
    pub feed: Option<PartialFeedSettings>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PartialDebugSettings {
    pub enabled: Option<bool>,
    pub port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PartialBrokerSettings {
    pub heartbeat_interval_ms: Option<u64>,
    pub heartbeat_timeout_ms: Option<u64>,
    pub batch_size: Option<usize>,
    pub call_timeout_ms: Option<u64>,
    pub subscriber_shards: Option<usize>,
    pub data_dir: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PartialTrackerSettings {
    pub max_interactions: Option<usize>,
    pub cleanup_interval_ms: Option<u64>,
    pub liveness_window_ms: Option<u64>,
    pub overview_window_ms: Option<u64>,
    pub event_buffer: Option<usize>,
    pub top_components: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PartialIngestSettings {
    pub buffer: Option<usize>,
    pub max_attempts: Option<u32>,
    pub retry_delay_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PartialFeedSettings {
    pub enabled: Option<bool>,
    pub interval_ms: Option<u64>,
}

impl PartialSettings {
    /// Merge with defaults, section by section.
    pub fn resolve(self) -> Settings {
        let default = Settings::default();
        let server = self.server.unwrap_or_default();
        let debug = self.debug.unwrap_or_default();
        let broker = self.broker.unwrap_or_default();
        let tracker = self.tracker.unwrap_or_default();
        let ingest = self.ingest.unwrap_or_default();
        let feed = self.feed.unwrap_or_default();

        Settings {
            server: ServerSettings {
                host: server.host.unwrap_or(default.server.host),
                port: server.port.unwrap_or(default.server.port),
            },
            debug: DebugSettings {
                enabled: debug.enabled.unwrap_or(default.debug.enabled),
                port: debug.port.unwrap_or(default.debug.port),
            },
            broker: BrokerSettings {
                heartbeat_interval_ms: broker
                    .heartbeat_interval_ms
                    .unwrap_or(default.broker.heartbeat_interval_ms),
                heartbeat_timeout_ms: broker
                    .heartbeat_timeout_ms
                    .unwrap_or(default.broker.heartbeat_timeout_ms),
                batch_size: broker.batch_size.unwrap_or(default.broker.batch_size),
                call_timeout_ms: broker
                    .call_timeout_ms
                    .unwrap_or(default.broker.call_timeout_ms),
                subscriber_shards: broker
                    .subscriber_shards
                    .unwrap_or(default.broker.subscriber_shards),
                data_dir: broker.data_dir.unwrap_or(default.broker.data_dir),
            },
            tracker: TrackerSettings {
                max_interactions: tracker
                    .max_interactions
                    .unwrap_or(default.tracker.max_interactions),
                cleanup_interval_ms: tracker
                    .cleanup_interval_ms
                    .unwrap_or(default.tracker.cleanup_interval_ms),
                liveness_window_ms: tracker
                    .liveness_window_ms
                    .unwrap_or(default.tracker.liveness_window_ms),
                overview_window_ms: tracker
                    .overview_window_ms
                    .unwrap_or(default.tracker.overview_window_ms),
                event_buffer: tracker.event_buffer.unwrap_or(default.tracker.event_buffer),
                top_components: tracker
                    .top_components
                    .unwrap_or(default.tracker.top_components),
            },
            ingest: IngestSettings {
                buffer: ingest.buffer.unwrap_or(default.ingest.buffer),
                max_attempts: ingest.max_attempts.unwrap_or(default.ingest.max_attempts),
                retry_delay_ms: ingest
                    .retry_delay_ms
                    .unwrap_or(default.ingest.retry_delay_ms),
            },
            feed: FeedSettings {
                enabled: feed.enabled.unwrap_or(default.feed.enabled),
                interval_ms: feed.interval_ms.unwrap_or(default.feed.interval_ms),
            },
        }
    }
}

/// Provides default values for `Settings`.
impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            debug: DebugSettings {
                enabled: true,
                port: 8081,
            },
            broker: BrokerSettings {
                heartbeat_interval_ms: 10_000,
                heartbeat_timeout_ms: 30_000,
                batch_size: 10,
                call_timeout_ms: 5_000,
                subscriber_shards: 1,
                data_dir: "tickcast_db".to_string(),
            },
            tracker: TrackerSettings {
                max_interactions: 1000,
                cleanup_interval_ms: 60_000,
                liveness_window_ms: 5 * 60_000,
                overview_window_ms: 5 * 60_000,
                event_buffer: 4096,
                top_components: 10,
            },
            ingest: IngestSettings {
                buffer: 1024,
                max_attempts: 5,
                retry_delay_ms: 500,
            },
            feed: FeedSettings {
                enabled: false,
                interval_ms: 2_000,
            },
        }
    }
}
