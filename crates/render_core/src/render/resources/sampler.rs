//! Texture samplers

use ash::vk;
use std::sync::Arc;

use crate::render::backend::SamplerDesc;
use crate::render::device::Device;
use crate::render::VulkanResult;

/// Sampler with automatic cleanup
pub struct Sampler {
    device: Arc<Device>,
    sampler: vk::Sampler,
    desc: SamplerDesc,
}

impl Sampler {
    /// Create a sampler from `desc`
    pub fn new(device: &Arc<Device>, desc: SamplerDesc, name: &str) -> VulkanResult<Self> {
        let sampler = device.backend().create_sampler(&desc)?;
        device.set_debug_name(sampler, name);
        Ok(Self { device: device.clone(), sampler, desc })
    }

    /// Get the sampler handle
    pub fn handle(&self) -> vk::Sampler {
        self.sampler
    }

    /// Parameters the sampler was created with
    pub fn desc(&self) -> &SamplerDesc {
        &self.desc
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        self.device.backend().destroy_sampler(self.sampler);
    }
}

impl std::fmt::Debug for Sampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sampler").field("sampler", &self.sampler).field("desc", &self.desc).finish()
    }
}
