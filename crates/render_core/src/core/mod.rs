//! Core configuration types shared by every device.

pub mod config;

pub use config::{DeviceConfig, RenderCoreConfig};
