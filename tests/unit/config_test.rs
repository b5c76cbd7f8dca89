//! Unit tests for configuration persistence.

use ridelink::sensors::SensorConfig;
use ridelink::storage::config::{load_config_from, save_config_to, AppConfig};
use std::time::Duration;

#[test]
fn test_missing_file_yields_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = load_config_from(&dir.path().join("config.toml")).unwrap();

    assert_eq!(config.sensors.max_connect_attempts, 3);
    assert!(!config.sensors.auto_reconnect);
}

#[test]
fn test_save_and_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    let mut config = AppConfig::default();
    config.sensors.retry_base_delay_ms = 250;
    config.sensors.auto_reconnect = true;
    save_config_to(&config, &path).unwrap();

    let loaded = load_config_from(&path).unwrap();
    assert_eq!(loaded.sensors, config.sensors);

    let runtime = SensorConfig::from(&loaded.sensors);
    assert_eq!(runtime.retry_base_delay, Duration::from_millis(250));
    assert_eq!(runtime.backoff_for(2), Duration::from_millis(500));
    assert!(runtime.auto_reconnect);
}

#[test]
fn test_invalid_file_is_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "sensors = 12").unwrap();

    assert!(load_config_from(&path).is_err());
}
