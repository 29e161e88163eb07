//! # Render Core Configuration
//!
//! Settings are supplied once, when an instance and its devices are
//! created, and are never renegotiated afterwards. [`RenderCoreConfig`]
//! covers instance bring-up (application name, validation, adapter choice)
//! and carries the [`DeviceConfig`] every logical device is built with.
//!
//! Both types implement [`Config`], so they load from and save to `.toml`
//! or `.ron` files. Missing fields fall back to their defaults.

use serde::{Deserialize, Serialize};

pub use crate::config::{Config, ConfigError};

/// Upper bound accepted for `max_frames_in_flight`
pub const MAX_FRAMES_IN_FLIGHT_LIMIT: usize = 8;

/// Per-device settings fixed at device construction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Name used in logs and debug labels
    pub name: String,
    /// Number of frames the CPU may prepare while the GPU still consumes earlier ones
    pub max_frames_in_flight: usize,
    /// Hard cap on live descriptor sets in the device's shared pool
    pub max_descriptor_sets: u32,
    /// Size of each device memory block the allocator sub-allocates from
    pub memory_block_size: u64,
    /// Attach debug names to created GPU objects
    pub debug_names: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: "device".to_string(),
            max_frames_in_flight: 3,
            max_descriptor_sets: 1024,
            memory_block_size: 64 * 1024 * 1024,
            debug_names: true,
        }
    }
}

impl DeviceConfig {
    /// Check that every value is usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_frames_in_flight == 0 || self.max_frames_in_flight > MAX_FRAMES_IN_FLIGHT_LIMIT {
            return Err(ConfigError::Invalid(format!(
                "max_frames_in_flight must be in 1..={MAX_FRAMES_IN_FLIGHT_LIMIT}, got {}",
                self.max_frames_in_flight
            )));
        }
        if self.max_descriptor_sets == 0 {
            return Err(ConfigError::Invalid("max_descriptor_sets must be greater than zero".to_string()));
        }
        if !self.memory_block_size.is_power_of_two() {
            return Err(ConfigError::Invalid(format!(
                "memory_block_size must be a non-zero power of two, got {}",
                self.memory_block_size
            )));
        }
        Ok(())
    }

    /// Builder-style setter for the frames-in-flight count
    #[must_use]
    pub fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.max_frames_in_flight = frames;
        self
    }

    /// Builder-style setter for the descriptor set cap
    #[must_use]
    pub fn with_max_descriptor_sets(mut self, max_sets: u32) -> Self {
        self.max_descriptor_sets = max_sets;
        self
    }

    /// Builder-style setter for the allocator block size
    #[must_use]
    pub fn with_memory_block_size(mut self, size: u64) -> Self {
        self.memory_block_size = size;
        self
    }

    /// Builder-style setter for the device name
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl Config for DeviceConfig {}

/// Instance-level settings plus the device defaults
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderCoreConfig {
    /// Application name reported to the driver
    pub application_name: String,
    /// Enable the Khronos validation layer and debug messenger
    pub enable_validation: bool,
    /// Use this adapter index instead of automatic selection
    pub physical_device_index: Option<usize>,
    /// Settings applied to each created device
    pub device: DeviceConfig,
}

impl Default for RenderCoreConfig {
    fn default() -> Self {
        Self {
            application_name: "render_core".to_string(),
            enable_validation: cfg!(debug_assertions),
            physical_device_index: None,
            device: DeviceConfig::default(),
        }
    }
}

impl RenderCoreConfig {
    /// Validate the nested device settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.application_name.contains('\0') {
            return Err(ConfigError::Invalid("application_name contains a NUL byte".to_string()));
        }
        self.device.validate()
    }
}

impl Config for RenderCoreConfig {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_device_config_is_valid() {
        let config = DeviceConfig::default();
        assert_eq!(config.max_frames_in_flight, 3);
        assert_eq!(config.max_descriptor_sets, 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        assert!(DeviceConfig::default().with_frames_in_flight(0).validate().is_err());
        assert!(DeviceConfig::default().with_frames_in_flight(9).validate().is_err());
        assert!(DeviceConfig::default().with_max_descriptor_sets(0).validate().is_err());
        assert!(DeviceConfig::default().with_memory_block_size(3000).validate().is_err());
        assert!(DeviceConfig::default().with_memory_block_size(0).validate().is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        let mut config = RenderCoreConfig::default();
        config.application_name = "roundtrip".to_string();
        config.physical_device_index = Some(1);
        config.device = config.device.with_frames_in_flight(2).with_name("gpu0");

        config.save_to_file(file.path()).unwrap();
        let loaded = RenderCoreConfig::load_from_file(file.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_ron_round_trip() {
        let file = tempfile::Builder::new().suffix(".ron").tempfile().unwrap();
        let config = DeviceConfig::default().with_max_descriptor_sets(64);

        config.save_to_file(file.path()).unwrap();
        let loaded = DeviceConfig::load_from_file(file.path()).unwrap();
        assert_eq!(loaded.max_descriptor_sets, 64);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        std::fs::write(file.path(), "application_name = \"partial\"\n[device]\nmax_frames_in_flight = 2\n").unwrap();

        let loaded = RenderCoreConfig::load_from_file(file.path()).unwrap();
        assert_eq!(loaded.application_name, "partial");
        assert_eq!(loaded.device.max_frames_in_flight, 2);
        assert_eq!(loaded.device.max_descriptor_sets, 1024);
    }

    #[test]
    fn test_unsupported_extension() {
        let file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        let result = RenderCoreConfig::default().save_to_file(file.path());
        assert!(matches!(result, Err(ConfigError::UnsupportedFormat(_))));
    }
}
