//! Lit mesh drawing with a per-object transform and colour

use ash::vk;
use bytemuck::{Pod, Zeroable};
use std::sync::Arc;

use super::Renderable;
use crate::foundation::math::{mat4_to_cols, normal_matrix, Mat4, Vec4};
use crate::render::assets::{Mesh, Vertex};
use crate::render::backend::{DescriptorBinding, GraphicsPipelineDesc};
use crate::render::cache::{AssetRef, DeviceDataCache};
use crate::render::commands::CommandBuffer;
use crate::render::device::DeviceId;
use crate::render::material::{Material, MaterialDesc};
use crate::render::{VulkanError, VulkanResult};

/// Per-object uniform block, std140 compatible
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct ObjectUniform {
    /// Model matrix, column major
    pub model: [[f32; 4]; 4],
    /// Normal matrix padded to 4x4
    pub normal: [[f32; 4]; 4],
    /// Base colour
    pub color: [f32; 4],
}

/// Draws one mesh with one material
pub struct MeshRenderer {
    name: String,
    mesh: AssetRef<Mesh>,
    material: Arc<Material>,
    transform: Mat4,
    color: Vec4,
    cache: DeviceDataCache<()>,
    rebuilds: u64,
}

impl MeshRenderer {
    /// Renderer with identity transform and white colour
    pub fn new(name: impl Into<String>, mesh: AssetRef<Mesh>, material: Arc<Material>) -> Self {
        let name = name.into();
        Self {
            cache: DeviceDataCache::new(name.clone()),
            name,
            mesh,
            material,
            transform: Mat4::identity(),
            color: Vec4::new(1.0, 1.0, 1.0, 1.0),
            rebuilds: 0,
        }
    }

    /// Material description matching this renderer's uniform and vertex layout
    pub fn material_desc(name: &str, vertex_spirv: Vec<u32>, fragment_spirv: Vec<u32>) -> MaterialDesc {
        let mut pipeline = GraphicsPipelineDesc::opaque(vertex_spirv, fragment_spirv);
        pipeline.vertex_bindings = vec![Vertex::binding_description()];
        pipeline.vertex_attributes = Vertex::attribute_descriptions().to_vec();
        MaterialDesc {
            name: name.to_string(),
            bindings: vec![DescriptorBinding {
                binding: 0,
                descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                count: 1,
                stage_flags: vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
            }],
            push_constants: Vec::new(),
            pipeline,
        }
    }

    /// Model transform
    pub fn transform(&self) -> &Mat4 {
        &self.transform
    }

    /// Replace the model transform
    pub fn set_transform(&mut self, transform: Mat4) {
        self.transform = transform;
        self.cache.mark_dirty();
    }

    /// Replace the base colour
    pub fn set_color(&mut self, color: Vec4) {
        self.color = color;
        self.cache.mark_dirty();
    }

    /// Replace the mesh
    pub fn set_mesh(&mut self, mesh: AssetRef<Mesh>) {
        self.mesh = mesh;
    }

    /// Number of slot rebuilds so far
    pub fn rebuild_count(&self) -> u64 {
        self.rebuilds
    }

    /// Per-frame GPU state
    pub fn cache(&self) -> &DeviceDataCache<()> {
        &self.cache
    }

    fn uniform(&self) -> ObjectUniform {
        ObjectUniform {
            model: mat4_to_cols(&self.transform),
            normal: mat4_to_cols(&normal_matrix(&self.transform)),
            color: self.color.into(),
        }
    }
}

impl Renderable for MeshRenderer {
    fn name(&self) -> &str {
        &self.name
    }

    fn draw(&mut self, cmd: &mut CommandBuffer, frame_index: usize) -> VulkanResult<()> {
        let device = cmd.device().clone();
        let mesh = self
            .mesh
            .get()
            .ok_or_else(|| VulkanError::invalid(format!("mesh of '{}' was dropped", self.name)))?;
        let buffers = mesh.device_buffers(&device)?;
        let state = self.material.device_state(&device)?;
        let uniform = self.uniform();

        let slot = self.cache.prepare(&device, frame_index, |device, slot| {
            let (buffer, set) = slot.ensure_resources(device, std::mem::size_of::<ObjectUniform>() as u64, state.set_layout(), &self.name)?;
            buffer.upload_pod(&uniform)?;
            set.write_uniform_buffer(0, buffer);
            self.rebuilds += 1;
            Ok(())
        })?;
        let set = slot
            .descriptor_set
            .as_ref()
            .ok_or_else(|| VulkanError::invalid(format!("'{}' slot {frame_index} has no descriptor set", self.name)))?;

        let layout = cmd.bind_material(&self.material)?;
        cmd.bind_descriptor_set(layout, 0, set);
        cmd.bind_vertex_buffer(0, &buffers.vertex_buffer);
        cmd.bind_index_buffer(&buffers.index_buffer, vk::IndexType::UINT32);
        cmd.draw_indexed(buffers.index_count, 1)
    }

    fn release_device(&mut self, device: DeviceId) {
        self.cache.release_device(device);
    }
}

impl std::fmt::Debug for MeshRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeshRenderer")
            .field("name", &self.name)
            .field("material", &self.material.name())
            .field("rebuilds", &self.rebuilds)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::DeviceConfig;
    use crate::foundation::math::Vec3;
    use crate::render::testing::{color_target, headless_device, FAKE_SPIRV};

    #[test]
    fn test_uniform_carries_transform_and_color() {
        let mesh = Mesh::quad("quad").unwrap();
        let material = Material::new(MeshRenderer::material_desc("lit", FAKE_SPIRV.to_vec(), FAKE_SPIRV.to_vec()));
        let mut renderer = MeshRenderer::new("ship", AssetRef::shared(mesh), material);
        renderer.set_transform(Mat4::new_translation(&Vec3::new(1.0, 2.0, 3.0)));
        renderer.set_color(Vec4::new(0.5, 0.25, 1.0, 1.0));

        let uniform = renderer.uniform();
        assert_eq!(uniform.model[3], [1.0, 2.0, 3.0, 1.0]);
        assert_eq!(uniform.normal[3], [0.0, 0.0, 0.0, 1.0]);
        assert_eq!(uniform.color, [0.5, 0.25, 1.0, 1.0]);
    }

    #[test]
    fn test_draw_records_indexed_draw() {
        let (backend, device) = headless_device(DeviceConfig::default().with_frames_in_flight(2));
        let target = color_target(&device);
        let material = Material::new(MeshRenderer::material_desc("lit", FAKE_SPIRV.to_vec(), FAKE_SPIRV.to_vec()));
        let mut renderer = MeshRenderer::new("ship", AssetRef::shared(Mesh::quad("quad").unwrap()), material);

        let mut cmd = device.get_command_buffer("frame").unwrap();
        cmd.begin_render_pass(&target.pass, &target.framebuffer, &[]).unwrap();
        renderer.draw(&mut cmd, 0).unwrap();
        cmd.end_render_pass().unwrap();
        device.execute_and_wait(cmd).unwrap();

        assert_eq!(backend.stats().draws, 1);
        assert_eq!(renderer.rebuild_count(), 1);
        assert!(!renderer.cache().is_dirty(device.id(), 0));
        assert!(renderer.cache().is_dirty(device.id(), 1));
    }

    #[test]
    fn test_dropped_external_mesh_is_an_error() {
        let (_backend, device) = headless_device(DeviceConfig::default());
        let target = color_target(&device);
        let mesh = Mesh::quad("temporary").unwrap();
        let material = Material::new(MeshRenderer::material_desc("lit", FAKE_SPIRV.to_vec(), FAKE_SPIRV.to_vec()));
        let mut renderer = MeshRenderer::new("ghost", AssetRef::external(&mesh), material);
        drop(mesh);

        let mut cmd = device.get_command_buffer("frame").unwrap();
        cmd.begin_render_pass(&target.pass, &target.framebuffer, &[]).unwrap();
        assert!(matches!(renderer.draw(&mut cmd, 0), Err(VulkanError::InvalidOperation { .. })));
    }
}
