//! CPU-side assets with per-device GPU copies

pub mod font;
pub mod image;
pub mod mesh;

pub use font::{Font, GlyphMetrics};
pub use image::{GpuImage, ImageAsset};
pub use mesh::{Mesh, MeshBuffers, Vertex};
