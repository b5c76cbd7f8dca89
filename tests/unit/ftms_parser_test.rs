//! Unit tests for notification payload parsing.

use ridelink::sensors::decoders::ftms::{declared_length, parse_indoor_bike_data};
use ridelink::sensors::decoders::{
    decode, parse_csc_measurement, parse_cycling_power_measurement,
    parse_heart_rate_measurement, parse_shifter_data, Confidence, DecodeError, RoleDetail,
    SensorContact,
};
use ridelink::sensors::{CharacteristicKind, DeviceRole};

#[test]
fn test_parse_indoor_bike_data_flags_only() {
    let result = parse_indoor_bike_data(&[0x00, 0x00]).unwrap();

    assert!(result.power_watts.is_none());
    assert!(result.cadence_rpm.is_none());
    assert_eq!(result.consumed, 2);
}

#[test]
fn test_parse_indoor_bike_data_speed_then_power() {
    // Flags: 0x0041 (speed + instantaneous power)
    // Speed: 3000 (skipped)
    // Power: 250W
    let data = [0x41, 0x00, 0xB8, 0x0B, 0xFA, 0x00];
    let result = parse_indoor_bike_data(&data).unwrap();

    assert_eq!(result.power_watts, Some(250));
    assert_eq!(result.consumed, 6);
}

#[test]
fn test_parse_indoor_bike_data_full() {
    // Flags: 0x0245 (speed + cadence + power + heart rate)
    // Cadence: 190 = 95 RPM
    // Power: 300W
    // Heart rate: 150
    let data = [0x45, 0x02, 0xAC, 0x0D, 0xBE, 0x00, 0x2C, 0x01, 0x96];
    let result = parse_indoor_bike_data(&data).unwrap();

    assert_eq!(result.cadence_rpm, Some(95.0));
    assert_eq!(result.power_watts, Some(300));
    assert_eq!(result.heart_rate_bpm, Some(150));
}

#[test]
fn test_indoor_bike_walk_never_overruns() {
    // Every flag combination over every prefix length
    for flags in [0x0000u16, 0x0001, 0x0044, 0x0245, 0x1FFF, 0x0F0F] {
        let mut full = flags.to_le_bytes().to_vec();
        full.extend((0..declared_length(flags) - 2).map(|i| i as u8));

        for len in 2..=full.len() {
            let result = parse_indoor_bike_data(&full[..len]).unwrap();
            assert!(result.consumed <= len);
        }
        assert_eq!(
            parse_indoor_bike_data(&full).unwrap().consumed,
            declared_length(flags)
        );
    }
}

#[test]
fn test_parse_indoor_bike_data_invalid_too_short() {
    assert_eq!(
        parse_indoor_bike_data(&[0x44]).unwrap_err(),
        DecodeError::Truncated {
            needed: 2,
            actual: 1
        }
    );
}

#[test]
fn test_parse_cycling_power_measurement() {
    // Flags: 0x0000, Power: 250W
    let data = [0x00, 0x00, 0xFA, 0x00];
    let result = parse_cycling_power_measurement(&data).unwrap();

    assert_eq!(result.power_watts, 250);
}

#[test]
fn test_cycling_power_is_deterministic() {
    let data = [0x15, 0x00, 0x2C, 0x01, 0x64, 0x5C, 0x00, 0x80, 0x02];
    let first = parse_cycling_power_measurement(&data).unwrap();
    let second = parse_cycling_power_measurement(&data).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_cycling_power_torque_resolution() {
    for raw in [0u16, 1, 32, 100, 65535] {
        let mut data = vec![0x10, 0x00, 0x00, 0x00];
        data.extend_from_slice(&raw.to_le_bytes());
        let result = parse_cycling_power_measurement(&data).unwrap();
        assert_eq!(result.torque_nm, Some(f32::from(raw) / 32.0));
    }
}

#[test]
fn test_parse_heart_rate_8bit() {
    // Flags: 0x00 (8-bit HR), HR: 145 bpm
    let data = [0x00, 145];
    let result = parse_heart_rate_measurement(&data).unwrap();

    assert_eq!(result.heart_rate_bpm, 145);
}

#[test]
fn test_parse_heart_rate_16bit() {
    // Flags: 0x01 (16-bit HR), HR: 180 bpm
    let data = [0x01, 180, 0x00];
    let result = parse_heart_rate_measurement(&data).unwrap();

    assert_eq!(result.heart_rate_bpm, 180);
}

#[test]
fn test_rr_interval_count_and_range() {
    for count in 0..8usize {
        let mut data = vec![0x16, 60];
        for i in 0..count {
            // 0.25 s .. 1.9 s in 1/1024 s ticks
            let ticks = 256 + (i as u16) * 230;
            data.extend_from_slice(&ticks.to_le_bytes());
        }

        let result = parse_heart_rate_measurement(&data).unwrap();
        let rr = result.rr_intervals_ms.unwrap();
        assert_eq!(rr.len(), (data.len() - 2) / 2);
        assert!(rr.iter().all(|ms| (0.0..=2000.0).contains(ms)));
        assert_eq!(result.sensor_contact, SensorContact::Contact);
    }
}

#[test]
fn test_parse_csc_crank_data() {
    let data = [0x02, 0x10, 0x00, 0x00, 0x04];
    let result = parse_csc_measurement(&data).unwrap();

    assert_eq!(result.crank_revolutions, Some(16));
    assert_eq!(result.crank_event_time_s, Some(1.0));
}

#[test]
fn test_parse_shifter_data() {
    let result = parse_shifter_data(&[1, 5]).unwrap();

    assert_eq!(result.front_gear, Some(1));
    assert_eq!(result.rear_gear, Some(5));
    assert!(result.battery_level.is_none());
}

#[test]
fn test_decode_shifting_is_advisory() {
    let sample = decode(
        DeviceRole::ElectronicShifting,
        CharacteristicKind::GearPosition,
        &[2, 11, 90],
    )
    .unwrap();

    assert_eq!(sample.battery_level, Some(90));
    match sample.detail {
        Some(RoleDetail::ElectronicShifting(detail)) => {
            assert_eq!(detail.confidence, Confidence::Advisory);
            assert_eq!(detail.rear_gear, Some(11));
        }
        other => panic!("unexpected detail: {:?}", other),
    }
}

#[test]
fn test_decode_trainer_power_from_cps() {
    let sample = decode(
        DeviceRole::Trainer,
        CharacteristicKind::CyclingPowerMeasurement,
        &[0x00, 0x00, 0x2C, 0x01],
    )
    .unwrap();

    assert_eq!(sample.power, Some(300));
    assert!(matches!(sample.detail, Some(RoleDetail::Trainer(_))));
}

#[test]
fn test_decode_csc_without_crank_is_empty() {
    let sample = decode(
        DeviceRole::PowerMeter,
        CharacteristicKind::CscMeasurement,
        &[0x01, 1, 2, 3, 4, 5, 6],
    )
    .unwrap();

    assert!(sample.is_empty());
}
