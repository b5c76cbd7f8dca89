//! Unit test modules.

mod config_test;
mod ftms_parser_test;
mod sensor_discovery_test;
