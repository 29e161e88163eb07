//! Device backend implementations
//!
//! - [`headless`]: CPU-only backend with deterministic, observable execution
//! - [`vulkan`]: real devices through `ash`

pub mod headless;
pub mod vulkan;
