//! Vulkan instance and physical device discovery
//!
//! One [`VulkanContext`] per process: it loads the loader, creates the
//! instance (optionally with the Khronos validation layer and a debug
//! messenger routed into `log`) and enumerates the adapters. Logical
//! devices are created per adapter by
//! [`VulkanBackend`](super::VulkanBackend).

use ash::extensions::ext::DebugUtils;
use ash::{vk, Entry, Instance};
use std::ffi::{c_char, c_void, CStr, CString};
use std::sync::Arc;

use crate::core::config::RenderCoreConfig;
use crate::render::backend::{DeviceLimits, MemoryHeapInfo, MemoryProperties, MemoryTypeInfo};
use crate::render::{VulkanError, VulkanResult};

const VALIDATION_LAYER: &[u8] = b"VK_LAYER_KHRONOS_validation\0";

/// What the core needs to know about one adapter
#[derive(Debug, Clone)]
pub struct PhysicalDeviceInfo {
    /// Enumeration index
    pub index: usize,
    /// Vulkan handle
    pub handle: vk::PhysicalDevice,
    /// Adapter name reported by the driver
    pub name: String,
    /// Discrete, integrated, virtual, CPU
    pub device_type: vk::PhysicalDeviceType,
    /// First queue family with graphics support
    pub graphics_family: Option<u32>,
    /// Limits relevant to the core
    pub limits: DeviceLimits,
    /// Memory types and heaps
    pub memory: MemoryProperties,
}

impl PhysicalDeviceInfo {
    fn query(instance: &Instance, index: usize, handle: vk::PhysicalDevice) -> Self {
        // SAFETY: `handle` was enumerated from this instance
        let (properties, memory, families) = unsafe {
            (
                instance.get_physical_device_properties(handle),
                instance.get_physical_device_memory_properties(handle),
                instance.get_physical_device_queue_family_properties(handle),
            )
        };
        // SAFETY: the driver NUL-terminates device_name
        let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy().into_owned();
        let graphics_family = families
            .iter()
            .position(|family| family.queue_count > 0 && family.queue_flags.contains(vk::QueueFlags::GRAPHICS))
            .map(|i| i as u32);

        Self {
            index,
            handle,
            name,
            device_type: properties.device_type,
            graphics_family,
            limits: convert_limits(&properties.limits),
            memory: convert_memory(&memory),
        }
    }

    /// Whether the adapter can run the core
    pub fn is_suitable(&self) -> bool {
        self.graphics_family.is_some()
    }
}

fn convert_limits(limits: &vk::PhysicalDeviceLimits) -> DeviceLimits {
    DeviceLimits {
        max_descriptor_set_uniform_buffers: limits.max_descriptor_set_uniform_buffers,
        max_descriptor_set_storage_buffers: limits.max_descriptor_set_storage_buffers,
        max_descriptor_set_sampled_images: limits.max_descriptor_set_sampled_images,
        max_descriptor_set_storage_images: limits.max_descriptor_set_storage_images,
        max_descriptor_set_samplers: limits.max_descriptor_set_samplers,
        min_uniform_buffer_offset_alignment: limits.min_uniform_buffer_offset_alignment,
        non_coherent_atom_size: limits.non_coherent_atom_size,
        buffer_image_granularity: limits.buffer_image_granularity,
        max_memory_allocation_count: limits.max_memory_allocation_count,
    }
}

fn convert_memory(memory: &vk::PhysicalDeviceMemoryProperties) -> MemoryProperties {
    let types = memory.memory_types[..memory.memory_type_count as usize]
        .iter()
        .map(|ty| MemoryTypeInfo { property_flags: ty.property_flags, heap_index: ty.heap_index })
        .collect();
    let heaps = memory.memory_heaps[..memory.memory_heap_count as usize]
        .iter()
        .map(|heap| MemoryHeapInfo { size: heap.size, flags: heap.flags })
        .collect();
    MemoryProperties { types, heaps }
}

/// Loaded Vulkan instance with RAII cleanup
pub struct VulkanContext {
    _entry: Entry,
    instance: Instance,
    debug_utils: Option<DebugUtils>,
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
    physical_devices: Vec<PhysicalDeviceInfo>,
}

impl VulkanContext {
    /// Load Vulkan, create the instance and enumerate adapters
    pub fn new(config: &RenderCoreConfig) -> VulkanResult<Arc<Self>> {
        // SAFETY: loading the system Vulkan loader has no preconditions beyond its presence
        let entry = unsafe { Entry::load() }
            .map_err(|e| VulkanError::InitializationFailed(format!("failed to load Vulkan: {e}")))?;

        let app_name = CString::new(config.application_name.as_str())
            .map_err(|_| VulkanError::InitializationFailed("application name contains NUL".to_string()))?;
        let engine_name = CString::new("render_core")
            .map_err(|_| VulkanError::InitializationFailed("engine name contains NUL".to_string()))?;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_1);

        let validation = config.enable_validation && Self::validation_available(&entry);
        if config.enable_validation && !validation {
            log::warn!("[VULKAN] validation requested but VK_LAYER_KHRONOS_validation is not installed");
        }

        let layer = CStr::from_bytes_with_nul(VALIDATION_LAYER)
            .map_err(|e| VulkanError::InitializationFailed(format!("bad layer name: {e}")))?;
        let layers: Vec<*const c_char> = if validation { vec![layer.as_ptr()] } else { Vec::new() };
        let extensions: Vec<*const c_char> = if validation { vec![DebugUtils::name().as_ptr()] } else { Vec::new() };

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_layer_names(&layers)
            .enabled_extension_names(&extensions);
        // SAFETY: every pointer in create_info outlives the call
        let instance = unsafe { entry.create_instance(&create_info, None) }.map_err(VulkanError::creation("instance"))?;

        let (debug_utils, debug_messenger) = if validation {
            let debug_utils = DebugUtils::new(&entry, &instance);
            match Self::create_messenger(&debug_utils) {
                Ok(messenger) => (Some(debug_utils), Some(messenger)),
                Err(err) => {
                    log::warn!("[VULKAN] debug messenger unavailable: {err}");
                    (Some(debug_utils), None)
                }
            }
        } else {
            (None, None)
        };

        // SAFETY: the instance is valid
        let handles = match unsafe { instance.enumerate_physical_devices() } {
            Ok(handles) => handles,
            Err(result) => {
                // SAFETY: nothing was created from the instance yet except the messenger
                unsafe {
                    if let (Some(utils), Some(messenger)) = (&debug_utils, debug_messenger) {
                        utils.destroy_debug_utils_messenger(messenger, None);
                    }
                    instance.destroy_instance(None);
                }
                return Err(VulkanError::Api(result));
            }
        };
        let physical_devices: Vec<PhysicalDeviceInfo> = handles
            .into_iter()
            .enumerate()
            .map(|(index, handle)| PhysicalDeviceInfo::query(&instance, index, handle))
            .collect();

        for device in &physical_devices {
            log::info!(
                "[VULKAN] adapter {}: {} ({:?}){}",
                device.index,
                device.name,
                device.device_type,
                if device.is_suitable() { "" } else { ", no graphics queue" }
            );
        }

        Ok(Arc::new(Self { _entry: entry, instance, debug_utils, debug_messenger, physical_devices }))
    }

    fn validation_available(entry: &Entry) -> bool {
        match entry.enumerate_instance_layer_properties() {
            Ok(layers) => layers.iter().any(|layer| {
                // SAFETY: the loader NUL-terminates layer_name
                let name = unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) };
                name.to_bytes_with_nul() == VALIDATION_LAYER
            }),
            Err(_) => false,
        }
    }

    fn create_messenger(debug_utils: &DebugUtils) -> VulkanResult<vk::DebugUtilsMessengerEXT> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                    | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));
        // SAFETY: the callback is a plain function valid for the program's lifetime
        unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }.map_err(VulkanError::creation("debug messenger"))
    }

    /// The instance
    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    /// Debug utils loader, present when validation is enabled
    pub fn debug_utils(&self) -> Option<&DebugUtils> {
        self.debug_utils.as_ref()
    }

    /// Every enumerated adapter
    pub fn physical_devices(&self) -> &[PhysicalDeviceInfo] {
        &self.physical_devices
    }

    /// Adapter at `index`, or the best suitable one: discrete GPUs first, then enumeration order
    pub fn select_physical_device(&self, index: Option<usize>) -> VulkanResult<&PhysicalDeviceInfo> {
        if let Some(index) = index {
            let device = self
                .physical_devices
                .get(index)
                .ok_or_else(|| VulkanError::InitializationFailed(format!("no adapter with index {index}")))?;
            if !device.is_suitable() {
                return Err(VulkanError::InitializationFailed(format!("adapter '{}' has no graphics queue", device.name)));
            }
            return Ok(device);
        }

        let suitable = || self.physical_devices.iter().filter(|device| device.is_suitable());
        suitable()
            .find(|device| device.device_type == vk::PhysicalDeviceType::DISCRETE_GPU)
            .or_else(|| suitable().next())
            .ok_or_else(|| VulkanError::InitializationFailed("no adapter with a graphics queue".to_string()))
    }
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        // SAFETY: every logical device holds an Arc to the context, so none is alive here
        unsafe {
            if let (Some(utils), Some(messenger)) = (&self.debug_utils, self.debug_messenger) {
                utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        log::debug!("[VULKAN] instance destroyed");
    }
}

impl std::fmt::Debug for VulkanContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanContext")
            .field("physical_devices", &self.physical_devices.len())
            .field("validation", &self.debug_utils.is_some())
            .finish_non_exhaustive()
    }
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut c_void,
) -> vk::Bool32 {
    if callback_data.is_null() || (*callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*callback_data).p_message).to_string_lossy();

    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::error!("[VULKAN] {:?} - {}", message_type, message);
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        log::warn!("[VULKAN] {:?} - {}", message_type, message);
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        log::debug!("[VULKAN] {:?} - {}", message_type, message);
    } else {
        log::trace!("[VULKAN] {:?} - {}", message_type, message);
    }
    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_conversion_respects_counts() {
        let mut raw = vk::PhysicalDeviceMemoryProperties { memory_type_count: 2, memory_heap_count: 1, ..Default::default() };
        raw.memory_types[0].property_flags = vk::MemoryPropertyFlags::DEVICE_LOCAL;
        raw.memory_types[1] = vk::MemoryType { property_flags: vk::MemoryPropertyFlags::HOST_VISIBLE, heap_index: 0 };
        raw.memory_heaps[0].size = 1 << 30;

        let memory = convert_memory(&raw);
        assert_eq!(memory.types.len(), 2);
        assert_eq!(memory.heaps.len(), 1);
        assert_eq!(memory.types[1].property_flags, vk::MemoryPropertyFlags::HOST_VISIBLE);
        assert_eq!(memory.heaps[0].size, 1 << 30);
    }
}
