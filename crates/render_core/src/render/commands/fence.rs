//! CPU-observable completion signal of a submission
//!
//! A fence is created unsignaled together with its command buffer and is
//! shared (`Arc<Fence>`) with whoever wants to wait on the submission.
//!
//! [`Fence::wait`] blocks without a timeout. Callers that need to bound the
//! wait use [`Fence::wait_timeout`], which reports
//! [`VulkanError::Timeout`] and leaves the decision to abort or retry to
//! them. Waiting forever on a fence that was never submitted and is not
//! signaled is rejected instead of hanging.

use ash::vk;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::render::backend::DeviceBackend;
use crate::render::{VulkanError, VulkanResult};

/// Binary GPU → CPU completion token
pub struct Fence {
    backend: Arc<dyn DeviceBackend>,
    handle: vk::Fence,
    submitted: AtomicBool,
}

impl Fence {
    /// Create an unsignaled fence
    pub fn new(backend: Arc<dyn DeviceBackend>) -> VulkanResult<Self> {
        let handle = backend.create_fence(false)?;
        Ok(Self { backend, handle, submitted: AtomicBool::new(false) })
    }

    /// Get the fence handle
    pub fn handle(&self) -> vk::Fence {
        self.handle
    }

    /// Non-blocking poll
    pub fn is_signaled(&self) -> VulkanResult<bool> {
        self.backend.fence_status(self.handle)
    }

    /// True between submission and the next reset
    pub fn is_submitted(&self) -> bool {
        self.submitted.load(Ordering::Acquire)
    }

    pub(crate) fn mark_submitted(&self) {
        self.submitted.store(true, Ordering::Release);
    }

    /// Block until the GPU signals the fence. Returns at once when already signaled.
    pub fn wait(&self) -> VulkanResult<()> {
        if self.is_signaled()? {
            return Ok(());
        }
        if !self.is_submitted() {
            return Err(VulkanError::invalid("waiting on a fence that was never submitted"));
        }
        if self.backend.wait_for_fence(self.handle, None)? {
            Ok(())
        } else {
            Err(VulkanError::invalid("unbounded fence wait returned unsignaled"))
        }
    }

    /// Block for at most `timeout`
    pub fn wait_timeout(&self, timeout: Duration) -> VulkanResult<()> {
        if self.is_signaled()? {
            return Ok(());
        }
        if self.backend.wait_for_fence(self.handle, Some(timeout))? {
            Ok(())
        } else {
            Err(VulkanError::Timeout(timeout))
        }
    }

    /// Return to unsignaled. Only valid before first use or once signaled.
    pub fn reset(&self) -> VulkanResult<()> {
        if self.is_submitted() && !self.is_signaled()? {
            return Err(VulkanError::invalid("fence reset while its submission is in flight"));
        }
        self.backend.reset_fence(self.handle)?;
        self.submitted.store(false, Ordering::Release);
        Ok(())
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        self.backend.destroy_fence(self.handle);
    }
}

impl std::fmt::Debug for Fence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fence")
            .field("handle", &self.handle)
            .field("submitted", &self.is_submitted())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backends::headless::{HeadlessBackend, HeadlessConfig};

    fn submitted_fence(backend: &Arc<HeadlessBackend>) -> Fence {
        let fence = Fence::new(backend.clone()).unwrap();
        let pool = backend.create_command_pool().unwrap();
        let cb = backend.allocate_command_buffer(pool).unwrap();
        backend.begin_command_buffer(cb).unwrap();
        backend.end_command_buffer(cb).unwrap();
        backend.submit(cb, fence.handle()).unwrap();
        fence.mark_submitted();
        fence
    }

    #[test]
    fn test_fresh_fence_is_unsignaled() {
        let backend = Arc::new(HeadlessBackend::new(HeadlessConfig::default()));
        let fence = Fence::new(backend).unwrap();
        assert!(!fence.is_signaled().unwrap());
        assert!(!fence.is_submitted());
    }

    #[test]
    fn test_wait_on_unsubmitted_fence_is_rejected() {
        let backend = Arc::new(HeadlessBackend::new(HeadlessConfig::default()));
        let fence = Fence::new(backend).unwrap();
        assert!(matches!(fence.wait(), Err(VulkanError::InvalidOperation { .. })));
        assert!(matches!(fence.wait_timeout(Duration::from_millis(5)), Err(VulkanError::Timeout(_))));
    }

    #[test]
    fn test_reset_rejected_while_in_flight() {
        let backend = Arc::new(HeadlessBackend::new(HeadlessConfig::default()));
        let fence = submitted_fence(&backend);
        assert!(fence.reset().is_err());

        fence.wait().unwrap();
        assert!(fence.is_signaled().unwrap());
        fence.reset().unwrap();
        assert!(!fence.is_signaled().unwrap());
        assert!(!fence.is_submitted());
    }

    #[test]
    fn test_wait_returns_immediately_once_signaled() {
        let backend = Arc::new(HeadlessBackend::new(HeadlessConfig::default()));
        let fence = submitted_fence(&backend);
        backend.complete_all();
        assert!(fence.is_signaled().unwrap());

        let submissions_before = backend.stats().completed;
        fence.wait().unwrap();
        fence.wait_timeout(Duration::ZERO).unwrap();
        assert_eq!(backend.stats().completed, submissions_before);
    }
}
