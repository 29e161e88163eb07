//! Command recording, submission bookkeeping and fences
//!
//! States of a submission map onto types: a [`CommandBuffer`] is
//! *Recording*; [`Device::execute`](crate::render::Device::execute)
//! consumes it and returns its [`Fence`], which is *Submitted* until
//! signaled and *Complete* afterwards; the pool resets the buffer when it
//! hands it out again.

pub mod barriers;
pub mod command_buffer;
pub mod fence;
pub mod pool_registry;

pub use barriers::MemoryBarrierBuilder;
pub use command_buffer::CommandBuffer;
pub use fence::Fence;
pub use pool_registry::{CommandPoolRegistry, CommandPoolStats};
