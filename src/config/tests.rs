use super::load_config;
use super::settings::Settings;
use serial_test::serial;
use std::env;
use std::fs;
use tempfile::TempDir;

#[test]
fn test_default_settings() {
    let settings = Settings::default();
    assert_eq!(settings.server.host, "127.0.0.1");
    assert_eq!(settings.server.port, 8080);
    assert_eq!(settings.broker.heartbeat_interval_ms, 10_000);
    assert_eq!(settings.broker.heartbeat_timeout_ms, 30_000);
    assert_eq!(settings.broker.batch_size, 10);
    assert_eq!(settings.tracker.max_interactions, 1000);
    assert!(!settings.feed.enabled);
    assert!(settings.validate().is_ok());
}

#[test]
fn validate_rejects_timeout_not_above_interval() {
    let mut settings = Settings::default();
    settings.broker.heartbeat_timeout_ms = settings.broker.heartbeat_interval_ms;
    assert!(settings.validate().is_err());
}

#[test]
fn validate_rejects_zero_batch_size() {
    let mut settings = Settings::default();
    settings.broker.batch_size = 0;
    assert!(settings.validate().is_err());
}

#[test]
#[serial]
fn load_config_reads_environment_overrides() {
    temp_env::with_vars(
        [
            ("TICKCAST__BROKER__BATCH_SIZE", Some("25")),
            ("TICKCAST__SERVER__PORT", Some("9100")),
            ("TICKCAST__FEED__ENABLED", Some("true")),
        ],
        || {
            let cfg = load_config().expect("load_config failed");
            assert_eq!(cfg.broker.batch_size, 25);
            assert_eq!(cfg.server.port, 9100);
            assert!(cfg.feed.enabled);
            // untouched values keep their defaults
            assert_eq!(cfg.broker.heartbeat_timeout_ms, 30_000);
        },
    );
}

#[test]
#[serial]
fn load_config_from_file_overrides_defaults() {
    // Create a temporary directory and set it as current dir so load_config
    // will pick up config/default.toml from there.
    let tmp = TempDir::new().expect("create tempdir");
    let orig = env::current_dir().expect("current_dir");
    env::set_current_dir(tmp.path()).expect("set current dir");

    fs::create_dir_all("config").expect("create config dir");
    let toml = r#"
        [server]
        host = "0.0.0.0"
        port = 9000

        [broker]
        heartbeat_interval_ms = 1000
        heartbeat_timeout_ms = 3500

        [tracker]
        max_interactions = 50
    "#;
    fs::write("config/default.toml", toml).expect("write config file");

    let cfg = load_config();

    // restore cwd before asserting so a failure does not leak the tempdir cwd
    env::set_current_dir(orig).expect("restore cwd");

    let cfg = cfg.expect("load_config failed");
    assert_eq!(cfg.server.host, "0.0.0.0");
    assert_eq!(cfg.server.port, 9000);
    assert_eq!(cfg.broker.heartbeat_interval_ms, 1000);
    assert_eq!(cfg.broker.heartbeat_timeout_ms, 3500);
    assert_eq!(cfg.tracker.max_interactions, 50);
    assert_eq!(cfg.broker.batch_size, 10);
}

#[test]
#[serial]
fn load_config_rejects_invalid_file() {
    let tmp = TempDir::new().expect("create tempdir");
    let orig = env::current_dir().expect("current_dir");
    env::set_current_dir(tmp.path()).expect("set current dir");

    fs::create_dir_all("config").expect("create config dir");
    fs::write(
        "config/default.toml",
        "[broker]\nheartbeat_interval_ms = 5000\nheartbeat_timeout_ms = 4000\n",
    )
    .expect("write config file");

    let cfg = load_config();
    env::set_current_dir(orig).expect("restore cwd");

    assert!(cfg.is_err());
}
