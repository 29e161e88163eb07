//! Materials: descriptor bindings plus a graphics pipeline description
//!
//! A [`Material`] is device independent. The first time it is used on a
//! device it creates a [`MaterialDeviceState`] there: the descriptor set
//! layout, the pipeline layout and, lazily, one pipeline per render pass
//! it is drawn in.
//!
//! Materials also remember which command buffers currently have them
//! bound, so a material can tell whether it is safe to drop per-device
//! state.

use ash::vk;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::render::backend::{DescriptorBinding, GraphicsPipelineDesc};
use crate::render::cache::PerDevice;
use crate::render::device::{Device, DeviceId};
use crate::render::resources::DescriptorSetLayout;
use crate::render::VulkanResult;

/// Everything needed to build a material on a device
#[derive(Debug, Clone)]
pub struct MaterialDesc {
    /// Material name, used for debug names
    pub name: String,
    /// Bindings of descriptor set 0
    pub bindings: Vec<DescriptorBinding>,
    /// Push constant ranges of the pipeline layout
    pub push_constants: Vec<vk::PushConstantRange>,
    /// Shaders and fixed-function state
    pub pipeline: GraphicsPipelineDesc,
}

/// GPU objects of one material on one device
pub struct MaterialDeviceState {
    device: Arc<Device>,
    name: String,
    set_layout: DescriptorSetLayout,
    pipeline_layout: vk::PipelineLayout,
    pipeline_desc: GraphicsPipelineDesc,
    pipelines: Mutex<HashMap<vk::RenderPass, vk::Pipeline>>,
}

impl MaterialDeviceState {
    fn new(device: &Arc<Device>, desc: &MaterialDesc) -> VulkanResult<Self> {
        let set_layout = DescriptorSetLayout::new(device, desc.bindings.clone())?;
        let pipeline_layout = device
            .backend()
            .create_pipeline_layout(&[set_layout.handle()], &desc.push_constants)?;
        device.set_debug_name(pipeline_layout, &format!("{} layout", desc.name));
        log::debug!("[MATERIAL] '{}' initialised on '{}'", desc.name, device.name());
        Ok(Self {
            device: device.clone(),
            name: desc.name.clone(),
            set_layout,
            pipeline_layout,
            pipeline_desc: desc.pipeline.clone(),
            pipelines: Mutex::new(HashMap::new()),
        })
    }

    fn pipelines(&self) -> MutexGuard<'_, HashMap<vk::RenderPass, vk::Pipeline>> {
        self.pipelines.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Layout of the material's descriptor set 0
    pub fn set_layout(&self) -> &DescriptorSetLayout {
        &self.set_layout
    }

    /// Pipeline layout shared by every variant
    pub fn pipeline_layout(&self) -> vk::PipelineLayout {
        self.pipeline_layout
    }

    /// Pipeline variant for `render_pass`, compiled on first request
    pub fn pipeline_for(&self, render_pass: vk::RenderPass) -> VulkanResult<vk::Pipeline> {
        let mut pipelines = self.pipelines();
        if let Some(&pipeline) = pipelines.get(&render_pass) {
            return Ok(pipeline);
        }
        let pipeline = self.device.backend().create_graphics_pipeline(
            self.device.pipeline_cache(),
            self.pipeline_layout,
            render_pass,
            &self.pipeline_desc,
        )?;
        self.device.set_debug_name(pipeline, &self.name);
        log::debug!("[MATERIAL] '{}' compiled pipeline for {:?}", self.name, render_pass);
        pipelines.insert(render_pass, pipeline);
        Ok(pipeline)
    }

    /// Number of compiled pipeline variants
    pub fn variant_count(&self) -> usize {
        self.pipelines().len()
    }
}

impl Drop for MaterialDeviceState {
    fn drop(&mut self) {
        let backend = self.device.backend();
        for (_, pipeline) in self.pipelines().drain() {
            backend.destroy_pipeline(pipeline);
        }
        backend.destroy_pipeline_layout(self.pipeline_layout);
    }
}

/// Device-independent material
pub struct Material {
    desc: MaterialDesc,
    states: PerDevice<MaterialDeviceState>,
    bound_on: Mutex<HashSet<u64>>,
}

impl Material {
    /// Create a shareable material
    pub fn new(desc: MaterialDesc) -> Arc<Self> {
        Arc::new(Self { desc, states: PerDevice::new(), bound_on: Mutex::new(HashSet::new()) })
    }

    /// Material name
    pub fn name(&self) -> &str {
        &self.desc.name
    }

    /// Creation parameters
    pub fn desc(&self) -> &MaterialDesc {
        &self.desc
    }

    /// State on `device`, created on first use
    pub fn device_state(&self, device: &Arc<Device>) -> VulkanResult<Arc<MaterialDeviceState>> {
        self.states.get_or_try_init(device.id(), || MaterialDeviceState::new(device, &self.desc))
    }

    /// Drop the state held for a device
    pub fn release_device(&self, device: DeviceId) {
        self.states.remove(device);
    }

    fn bound_on(&self) -> MutexGuard<'_, HashSet<u64>> {
        self.bound_on.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn mark_bound(&self, command_buffer: u64) {
        self.bound_on().insert(command_buffer);
    }

    pub(crate) fn mark_unbound(&self, command_buffer: u64) {
        self.bound_on().remove(&command_buffer);
    }

    /// Whether the command buffer with id `command_buffer` has this material bound
    pub fn is_bound_on(&self, command_buffer: u64) -> bool {
        self.bound_on().contains(&command_buffer)
    }

    /// Number of command buffers with this material bound
    pub fn bound_count(&self) -> usize {
        self.bound_on().len()
    }
}

impl std::fmt::Debug for Material {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Material")
            .field("name", &self.desc.name)
            .field("devices", &self.states.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::DeviceConfig;
    use crate::render::testing::{color_target, headless_device, test_material};

    #[test]
    fn test_rebinding_same_material_records_nothing() {
        let (_backend, device) = headless_device(DeviceConfig::default());
        let material = test_material("flat");
        let target = color_target(&device);

        let mut cmd = device.get_command_buffer("draw").unwrap();
        cmd.begin_render_pass(&target.pass, &target.framebuffer, &[]).unwrap();
        let recorded = cmd.commands_recorded();

        let layout = cmd.bind_material(&material).unwrap();
        assert_eq!(cmd.commands_recorded(), recorded + 1);
        assert!(material.is_bound_on(cmd.id()));

        assert_eq!(cmd.bind_material(&material).unwrap(), layout);
        assert_eq!(cmd.commands_recorded(), recorded + 1);
        assert_eq!(material.device_state(&device).unwrap().variant_count(), 1);

        cmd.end_render_pass().unwrap();
        assert!(!material.is_bound_on(cmd.id()));
        device.execute_and_wait(cmd).unwrap();
    }

    #[test]
    fn test_binding_other_material_unbinds_previous() {
        let (_backend, device) = headless_device(DeviceConfig::default());
        let first = test_material("first");
        let second = test_material("second");
        let target = color_target(&device);

        let mut cmd = device.get_command_buffer("draw").unwrap();
        cmd.begin_render_pass(&target.pass, &target.framebuffer, &[]).unwrap();
        cmd.bind_material(&first).unwrap();
        cmd.bind_material(&second).unwrap();
        assert!(!first.is_bound_on(cmd.id()));
        assert!(second.is_bound_on(cmd.id()));
        assert!(Arc::ptr_eq(cmd.current_material().unwrap(), &second));

        drop(cmd);
        assert_eq!(second.bound_count(), 0);
    }

    #[test]
    fn test_bind_outside_render_pass_fails() {
        let (_backend, device) = headless_device(DeviceConfig::default());
        let material = test_material("loose");
        let mut cmd = device.get_command_buffer("no pass").unwrap();
        assert!(cmd.bind_material(&material).is_err());
        assert!(cmd.current_material().is_none());
    }

    #[test]
    fn test_release_device_destroys_pipelines() {
        let (backend, device) = headless_device(DeviceConfig::default());
        let material = test_material("cached");
        let target = color_target(&device);
        material.device_state(&device).unwrap().pipeline_for(target.pass.handle()).unwrap();
        assert_eq!(backend.stats().pipelines_created, 1);

        material.release_device(device.id());
        assert!(material.states.is_empty());
        material.device_state(&device).unwrap().pipeline_for(target.pass.handle()).unwrap();
        assert_eq!(backend.stats().pipelines_created, 2);
    }
}
