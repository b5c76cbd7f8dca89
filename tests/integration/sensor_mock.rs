//! Mock sensor payloads and a scripted BLE rig.
//!
//! `MockSensorData` produces notification payloads the way real devices
//! frame them; `mock_manager` wires a `SensorManager` to a `FakeTransport`.

use ridelink::sensors::decoders::{
    parse_cycling_power_measurement, parse_heart_rate_measurement, parse_indoor_bike_data,
};
use ridelink::sensors::fake::{FakePeripheral, FakeTransport};
use ridelink::sensors::{SensorConfig, SensorManager};
use std::sync::Arc;

/// Mock sensor data generator for testing.
#[derive(Debug, Clone)]
pub struct MockSensorData {
    /// Current power value
    pub power: i16,
    /// Current cadence (0.5 RPM resolution)
    pub cadence: u16,
    /// Current speed (in 0.01 km/h)
    pub speed: u16,
    /// Current heart rate
    pub heart_rate: u8,
    /// RR intervals in 1/1024 s ticks
    pub rr_ticks: Vec<u16>,
}

impl Default for MockSensorData {
    fn default() -> Self {
        Self {
            power: 200,
            cadence: 180, // 90 RPM (0.5 resolution)
            speed: 3000,  // 30.0 km/h
            heart_rate: 145,
            rr_ticks: Vec::new(),
        }
    }
}

impl MockSensorData {
    /// Generate Indoor Bike Data packet.
    pub fn generate_ftms_indoor_bike_data(&self) -> Vec<u8> {
        // Flags: 0x0045 (speed + instantaneous cadence + instantaneous power)
        let mut data = vec![0x45, 0x00];

        data.extend_from_slice(&self.speed.to_le_bytes());
        data.extend_from_slice(&self.cadence.to_le_bytes());
        data.extend_from_slice(&self.power.to_le_bytes());

        data
    }

    /// Generate Cycling Power Measurement packet.
    pub fn generate_cycling_power_measurement(&self) -> Vec<u8> {
        // Flags: 0x0000 (no optional fields)
        let mut data = vec![0x00, 0x00];

        data.extend_from_slice(&self.power.to_le_bytes());

        data
    }

    /// Generate Heart Rate Measurement packet.
    pub fn generate_heart_rate_measurement(&self) -> Vec<u8> {
        if self.rr_ticks.is_empty() {
            // Flags: 0x00 (8-bit HR)
            return vec![0x00, self.heart_rate];
        }

        // Flags: 0x16 (contact detected + RR intervals)
        let mut data = vec![0x16, self.heart_rate];
        for rr in &self.rr_ticks {
            data.extend_from_slice(&rr.to_le_bytes());
        }
        data
    }
}

/// Config with fast retries for tests that do not pause time.
pub fn quick_config() -> SensorConfig {
    SensorConfig {
        connection_timeout: std::time::Duration::from_millis(200),
        retry_base_delay: std::time::Duration::from_millis(1),
        ..Default::default()
    }
}

/// Manager over a fake transport populated with `peripherals`.
pub fn mock_manager(
    peripherals: Vec<FakePeripheral>,
    config: SensorConfig,
) -> SensorManager<FakeTransport> {
    let transport = FakeTransport::new();
    for peripheral in peripherals {
        transport.add_peripheral(peripheral);
    }
    SensorManager::new(Arc::new(transport), config)
}

#[test]
fn test_mock_ftms_data_generation() {
    let mock = MockSensorData::default();
    let data = mock.generate_ftms_indoor_bike_data();

    let parsed = parse_indoor_bike_data(&data).unwrap();

    assert_eq!(parsed.cadence_rpm, Some(90.0));
    assert_eq!(parsed.power_watts, Some(200));
    assert_eq!(parsed.consumed, data.len());
}

#[test]
fn test_mock_cycling_power_data_generation() {
    let mock = MockSensorData::default();
    let data = mock.generate_cycling_power_measurement();

    let parsed = parse_cycling_power_measurement(&data).unwrap();

    assert_eq!(parsed.power_watts, 200);
}

#[test]
fn test_mock_heart_rate_data_generation() {
    let mock = MockSensorData {
        rr_ticks: vec![820, 840],
        ..Default::default()
    };
    let data = mock.generate_heart_rate_measurement();

    let parsed = parse_heart_rate_measurement(&data).unwrap();

    assert_eq!(parsed.heart_rate_bpm, 145);
    assert_eq!(parsed.rr_intervals_ms.map(|rr| rr.len()), Some(2));
}

#[test]
fn test_varying_power_values() {
    for power in [0i16, 100, 200, 300, 500, 1000, 1500, 2000] {
        let mock = MockSensorData {
            power,
            ..Default::default()
        };
        let data = mock.generate_cycling_power_measurement();
        let parsed = parse_cycling_power_measurement(&data).unwrap();
        assert_eq!(parsed.power_watts, power);
    }
}

#[test]
fn test_varying_cadence_values() {
    // Cadence in 0.5 RPM resolution
    for cadence_rpm in [60u16, 80, 90, 100, 120] {
        let mock = MockSensorData {
            cadence: cadence_rpm * 2,
            ..Default::default()
        };
        let data = mock.generate_ftms_indoor_bike_data();
        let parsed = parse_indoor_bike_data(&data).unwrap();
        assert_eq!(parsed.cadence_rpm, Some(f32::from(cadence_rpm)));
    }
}

#[test]
fn test_varying_heart_rate_values() {
    for hr in [60u8, 100, 145, 180, 200] {
        let mock = MockSensorData {
            heart_rate: hr,
            ..Default::default()
        };
        let data = mock.generate_heart_rate_measurement();
        let parsed = parse_heart_rate_measurement(&data).unwrap();
        assert_eq!(parsed.heart_rate_bpm, u16::from(hr));
    }
}

#[test]
fn test_sensor_config_defaults() {
    let config = SensorConfig::default();

    assert_eq!(config.connection_timeout.as_secs(), 10);
    assert_eq!(config.max_connect_attempts, 3);
    assert_eq!(config.retry_base_delay.as_millis(), 1000);
    assert!(!config.auto_reconnect);
}
