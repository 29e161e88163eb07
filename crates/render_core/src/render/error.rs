//! Error types for GPU operations

use ash::vk;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the render core.
///
/// Every failure propagates synchronously to the immediate caller; nothing
/// in this crate retries.
#[derive(Error, Debug)]
pub enum VulkanError {
    /// A Vulkan call that does not create an object failed
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// Creating a GPU object failed
    #[error("Failed to create {resource}: {result:?}")]
    ResourceCreation {
        /// Kind of object being created
        resource: &'static str,
        /// Result code returned by the driver
        result: vk::Result,
    },

    /// Upload payload does not fit the destination
    #[error("Upload of {requested} bytes exceeds capacity of {capacity} bytes")]
    SizeMismatch {
        /// Bytes the caller tried to write
        requested: u64,
        /// Bytes the destination can hold
        capacity: u64,
    },

    /// The device's descriptor pool hit its fixed set cap
    #[error("Descriptor pool exhausted ({allocated}/{max_sets} sets in use)")]
    DescriptorPoolExhausted {
        /// Sets currently allocated
        allocated: u32,
        /// Hard cap configured at device creation
        max_sets: u32,
    },

    /// No memory type with the requested properties has room left
    #[error("Out of device memory: {requested} bytes with {properties:?}")]
    OutOfDeviceMemory {
        /// Bytes requested
        requested: u64,
        /// Required memory property flags
        properties: vk::MemoryPropertyFlags,
    },

    /// The call is not valid in the object's current state
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// What went wrong
        reason: String,
    },

    /// Instance or device bring-up failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// A bounded fence wait expired
    #[error("Fence wait timed out after {0:?}")]
    Timeout(Duration),
}

impl VulkanError {
    /// Build an [`VulkanError::InvalidOperation`]
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidOperation { reason: reason.into() }
    }

    /// Adapter for `map_err` on object-creating calls
    pub fn creation(resource: &'static str) -> impl FnOnce(vk::Result) -> Self {
        move |result| Self::ResourceCreation { resource, result }
    }

    /// True for the out-of-memory result codes a creation call can report
    pub fn is_out_of_memory(&self) -> bool {
        let result = match self {
            Self::Api(result) | Self::ResourceCreation { result, .. } => *result,
            Self::OutOfDeviceMemory { .. } => return true,
            _ => return false,
        };
        result == vk::Result::ERROR_OUT_OF_DEVICE_MEMORY || result == vk::Result::ERROR_OUT_OF_HOST_MEMORY
    }
}

/// Result alias used throughout the crate
pub type VulkanResult<T> = Result<T, VulkanError>;
