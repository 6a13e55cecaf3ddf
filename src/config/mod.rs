mod settings;

use config::{Config, ConfigError, Environment, File};

pub use settings::{
    BrokerSettings, DebugSettings, FeedSettings, IngestSettings, PartialSettings,
    ServerSettings, Settings, TrackerSettings,
};

/// Loads the configuration from `config/default` and `TICKCAST__*`
/// environment variables, merges it with default values and validates it.
pub fn load_config() -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix("TICKCAST")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    let settings = partial.resolve();
    settings.validate()?;
    Ok(settings)
}

impl Settings {
    /// Rejects combinations the liveness protocol cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.heartbeat_timeout_ms <= self.broker.heartbeat_interval_ms {
            return Err(ConfigError::Message(format!(
                "broker.heartbeat_timeout_ms ({}) must exceed broker.heartbeat_interval_ms ({})",
                self.broker.heartbeat_timeout_ms, self.broker.heartbeat_interval_ms
            )));
        }
        if self.broker.batch_size == 0 {
            return Err(ConfigError::Message(
                "broker.batch_size must be at least 1".to_string(),
            ));
        }
        if self.broker.subscriber_shards == 0 {
            return Err(ConfigError::Message(
                "broker.subscriber_shards must be at least 1".to_string(),
            ));
        }
        if self.tracker.max_interactions == 0 {
            return Err(ConfigError::Message(
                "tracker.max_interactions must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests;
