//! Indexed triangle meshes
//!
//! Vertex and index data live on the CPU in a [`Mesh`]; each device gets
//! its own device-local copy ([`MeshBuffers`]) the first time the mesh is
//! drawn there.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use std::sync::Arc;

use crate::render::cache::PerDevice;
use crate::render::device::{Device, DeviceId};
use crate::render::resources::Buffer;
use crate::render::{VulkanError, VulkanResult};

/// Vertex with position, normal and texture coordinates
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct Vertex {
    /// Position in 3D space
    pub position: [f32; 3],
    /// Normal vector
    pub normal: [f32; 3],
    /// Texture coordinates
    pub tex_coord: [f32; 2],
}

impl Vertex {
    /// Create a new vertex
    pub fn new(position: [f32; 3], normal: [f32; 3], tex_coord: [f32; 2]) -> Self {
        Self { position, normal, tex_coord }
    }

    /// Vertex buffer binding 0, per-vertex rate
    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: std::mem::size_of::<Vertex>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    /// Position, normal and texture coordinates at locations 0, 1 and 2
    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 3] {
        [
            vk::VertexInputAttributeDescription { binding: 0, location: 0, format: vk::Format::R32G32B32_SFLOAT, offset: 0 },
            vk::VertexInputAttributeDescription { binding: 0, location: 1, format: vk::Format::R32G32B32_SFLOAT, offset: 12 },
            vk::VertexInputAttributeDescription { binding: 0, location: 2, format: vk::Format::R32G32_SFLOAT, offset: 24 },
        ]
    }
}

/// Device-local vertex and index buffers of a mesh
#[derive(Debug)]
pub struct MeshBuffers {
    /// Vertex buffer, bound at binding 0
    pub vertex_buffer: Buffer,
    /// 32-bit index buffer
    pub index_buffer: Buffer,
    /// Indices to draw
    pub index_count: u32,
}

/// CPU-side mesh with lazily uploaded per-device buffers
pub struct Mesh {
    name: String,
    vertices: Vec<Vertex>,
    indices: Vec<u32>,
    gpu: PerDevice<MeshBuffers>,
}

impl Mesh {
    /// Create a mesh; every index must address an existing vertex
    pub fn new(name: impl Into<String>, vertices: Vec<Vertex>, indices: Vec<u32>) -> VulkanResult<Arc<Self>> {
        let name = name.into();
        if vertices.is_empty() || indices.is_empty() {
            return Err(VulkanError::invalid(format!("mesh '{name}' has no geometry")));
        }
        if let Some(&bad) = indices.iter().find(|&&i| i as usize >= vertices.len()) {
            return Err(VulkanError::invalid(format!(
                "mesh '{name}' index {bad} out of range for {} vertices",
                vertices.len()
            )));
        }
        Ok(Arc::new(Self { name, vertices, indices, gpu: PerDevice::new() }))
    }

    /// Unit quad in the XY plane facing +Z
    pub fn quad(name: impl Into<String>) -> VulkanResult<Arc<Self>> {
        let normal = [0.0, 0.0, 1.0];
        let vertices = vec![
            Vertex::new([-0.5, -0.5, 0.0], normal, [0.0, 1.0]),
            Vertex::new([0.5, -0.5, 0.0], normal, [1.0, 1.0]),
            Vertex::new([0.5, 0.5, 0.0], normal, [1.0, 0.0]),
            Vertex::new([-0.5, 0.5, 0.0], normal, [0.0, 0.0]),
        ];
        Self::new(name, vertices, vec![0, 1, 2, 0, 2, 3])
    }

    /// Mesh name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Vertex data
    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    /// Index data
    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    /// Buffers on `device`, uploaded on first request
    pub fn device_buffers(&self, device: &Arc<Device>) -> VulkanResult<Arc<MeshBuffers>> {
        self.gpu.get_or_try_init(device.id(), || {
            let vertex_bytes: &[u8] = bytemuck::cast_slice(&self.vertices);
            let index_bytes: &[u8] = bytemuck::cast_slice(&self.indices);

            let mut vertex_buffer = Buffer::new(
                device,
                vertex_bytes.len() as u64,
                vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
                &format!("{} vertices", self.name),
            )?;
            vertex_buffer.upload(vertex_bytes)?;

            let mut index_buffer = Buffer::new(
                device,
                index_bytes.len() as u64,
                vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
                &format!("{} indices", self.name),
            )?;
            index_buffer.upload(index_bytes)?;

            log::debug!("[MESH] '{}' uploaded to '{}'", self.name, device.name());
            Ok(MeshBuffers { vertex_buffer, index_buffer, index_count: self.indices.len() as u32 })
        })
    }

    /// Drop the buffers held for a device
    pub fn release_device(&self, device: DeviceId) {
        self.gpu.remove(device);
    }
}

impl std::fmt::Debug for Mesh {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mesh")
            .field("name", &self.name)
            .field("vertices", &self.vertices.len())
            .field("indices", &self.indices.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::DeviceConfig;
    use crate::render::testing::headless_device;

    #[test]
    fn test_vertex_layout_matches_struct() {
        assert_eq!(Vertex::binding_description().stride, 32);
        let attributes = Vertex::attribute_descriptions();
        assert_eq!(attributes[2].offset, 24);
    }

    #[test]
    fn test_rejects_out_of_range_index() {
        let result = Mesh::new("broken", vec![Vertex::default()], vec![0, 1, 0]);
        assert!(result.is_err());
    }

    #[test]
    fn test_buffers_uploaded_once_per_device() {
        let (backend, device) = headless_device(DeviceConfig::default());
        let mesh = Mesh::quad("quad").unwrap();

        let first = mesh.device_buffers(&device).unwrap();
        let second = mesh.device_buffers(&device).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.index_count, 6);
        assert_eq!(backend.stats().buffers, 2);

        drop((first, second));
        mesh.release_device(device.id());
        assert_eq!(backend.stats().buffers, 0);
    }
}
