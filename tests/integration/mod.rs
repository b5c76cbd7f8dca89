//! Integration test modules.

mod discovery_test;
mod sensor_mock;
mod streaming_test;
