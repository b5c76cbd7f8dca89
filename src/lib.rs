//! RideLink - BLE fitness sensor communication layer
//!
//! Discovers and connects smart trainers, power meters, heart-rate straps and
//! electronic shifting units, decodes their notifications, and merges them
//! into one canonical sample stream.

pub mod sensors;
pub mod storage;

// Re-export commonly used types
pub use sensors::manager::SensorManager;
pub use sensors::types::{DeviceRole, SensorEvent};
pub use storage::config::AppConfig;
