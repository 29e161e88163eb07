//! Per-thread command pools
//!
//! Command pools are externally synchronised, so every recording thread
//! gets its own, created on first use and looked up by [`ThreadId`]. The
//! registry map itself sits behind a mutex; each pool sits behind its own
//! mutex, which is only contended by flushes from other threads.
//!
//! Inside a pool, command buffers are recycled through a FIFO: the oldest
//! entry is reused once its fence has signaled (or it was never
//! submitted), otherwise a new buffer is allocated. Fences are recycled
//! with their buffer unless someone outside the pool still holds them, in
//! which case the holder keeps the old fence and the buffer gets a new one.
//! A buffer whose recycling fails goes back to the front of the queue.

use ash::vk;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use super::fence::Fence;
use crate::render::backend::DeviceBackend;
use crate::render::VulkanResult;

/// A command buffer waiting in its pool's FIFO
pub(crate) struct PooledCommandBuffer {
    pub handle: vk::CommandBuffer,
    pub fence: Arc<Fence>,
    pub submitted: bool,
}

impl PooledCommandBuffer {
    fn is_ready(&self) -> VulkanResult<bool> {
        Ok(!self.submitted || self.fence.is_signaled()?)
    }

    fn in_flight(&self) -> bool {
        self.submitted && !self.fence.is_signaled().unwrap_or(false)
    }
}

/// One thread's command pool and its recycle queue
pub(crate) struct CommandPool {
    backend: Arc<dyn DeviceBackend>,
    handle: vk::CommandPool,
    thread: ThreadId,
    queue: VecDeque<PooledCommandBuffer>,
    allocated: usize,
}

pub(crate) type SharedCommandPool = Arc<Mutex<CommandPool>>;

pub(crate) fn lock_pool(pool: &SharedCommandPool) -> MutexGuard<'_, CommandPool> {
    pool.lock().unwrap_or_else(PoisonError::into_inner)
}

impl CommandPool {
    fn new(backend: Arc<dyn DeviceBackend>, thread: ThreadId) -> VulkanResult<Self> {
        let handle = backend.create_command_pool()?;
        log::debug!("[COMMANDS] created command pool for thread {:?}", thread);
        Ok(Self { backend, handle, thread, queue: VecDeque::new(), allocated: 0 })
    }

    /// Reuse the oldest finished buffer or allocate a new one.
    ///
    /// The returned buffer is in the initial state and its fence unsignaled.
    pub(crate) fn acquire(&mut self) -> VulkanResult<(vk::CommandBuffer, Arc<Fence>)> {
        let front_ready = match self.queue.front() {
            Some(entry) => entry.is_ready()?,
            None => false,
        };
        if front_ready {
            if let Some(entry) = self.queue.pop_front() {
                return self.recycle_entry(entry);
            }
        }

        let handle = self.backend.allocate_command_buffer(self.handle)?;
        let fence = match Fence::new(self.backend.clone()) {
            Ok(fence) => Arc::new(fence),
            Err(err) => {
                self.backend.free_command_buffer(self.handle, handle);
                return Err(err);
            }
        };
        self.allocated += 1;
        log::trace!("[COMMANDS] allocated command buffer #{} on {:?}", self.allocated, self.thread);
        Ok((handle, fence))
    }

    fn recycle_entry(&mut self, entry: PooledCommandBuffer) -> VulkanResult<(vk::CommandBuffer, Arc<Fence>)> {
        if let Err(err) = self.backend.reset_command_buffer(entry.handle) {
            self.queue.push_front(entry);
            return Err(err);
        }
        let fence = if Arc::strong_count(&entry.fence) > 1 {
            Fence::new(self.backend.clone()).map(Arc::new)
        } else if entry.submitted {
            entry.fence.reset().map(|()| entry.fence.clone())
        } else {
            Ok(entry.fence.clone())
        };
        match fence {
            Ok(fence) => Ok((entry.handle, fence)),
            Err(err) => {
                self.queue.push_front(entry);
                Err(err)
            }
        }
    }

    /// Put a buffer back at the end of the FIFO
    pub(crate) fn recycle(&mut self, entry: PooledCommandBuffer) {
        self.queue.push_back(entry);
    }

    fn outstanding_fences(&self) -> Vec<Arc<Fence>> {
        self.queue.iter().filter(|entry| entry.submitted).map(|entry| entry.fence.clone()).collect()
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        for entry in self.queue.drain(..) {
            if entry.submitted {
                if let Err(err) = entry.fence.wait() {
                    log::error!("[COMMANDS] waiting on command buffer before pool destruction failed: {}", err);
                }
            }
        }
        self.backend.destroy_command_pool(self.handle);
        log::debug!("[COMMANDS] destroyed command pool of thread {:?} ({} buffers)", self.thread, self.allocated);
    }
}

/// Snapshot of command pool usage across threads
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandPoolStats {
    /// Threads that have a pool
    pub pools: usize,
    /// Command buffers allocated across all pools
    pub allocated: usize,
    /// Buffers waiting in recycle queues
    pub queued: usize,
    /// Queued buffers whose submission has not completed
    pub in_flight: usize,
}

/// Thread-keyed set of command pools of one device
pub struct CommandPoolRegistry {
    backend: Arc<dyn DeviceBackend>,
    pools: Mutex<HashMap<ThreadId, SharedCommandPool>>,
}

impl CommandPoolRegistry {
    pub(crate) fn new(backend: Arc<dyn DeviceBackend>) -> Self {
        Self { backend, pools: Mutex::new(HashMap::new()) }
    }

    fn pools(&self) -> MutexGuard<'_, HashMap<ThreadId, SharedCommandPool>> {
        self.pools.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pool of the calling thread, created on first use
    pub(crate) fn pool_for_current_thread(&self) -> VulkanResult<SharedCommandPool> {
        let thread = thread::current().id();
        let mut pools = self.pools();
        if let Some(pool) = pools.get(&thread) {
            return Ok(pool.clone());
        }
        let pool = Arc::new(Mutex::new(CommandPool::new(self.backend.clone(), thread)?));
        pools.insert(thread, pool.clone());
        Ok(pool)
    }

    /// Wait on every outstanding fence of every pool
    pub(crate) fn flush(&self) -> VulkanResult<()> {
        let pools: Vec<SharedCommandPool> = self.pools().values().cloned().collect();
        let mut waited = 0;
        for pool in pools {
            let fences = lock_pool(&pool).outstanding_fences();
            for fence in fences {
                fence.wait()?;
                waited += 1;
            }
        }
        log::debug!("[COMMANDS] flushed {} outstanding command buffers", waited);
        Ok(())
    }

    /// Drop every pool; each waits for its own outstanding work first
    pub(crate) fn destroy_all(&self) {
        let pools: Vec<SharedCommandPool> = self.pools().drain().map(|(_, pool)| pool).collect();
        drop(pools);
    }

    /// Usage counters
    pub fn stats(&self) -> CommandPoolStats {
        let pools: Vec<SharedCommandPool> = self.pools().values().cloned().collect();
        let mut stats = CommandPoolStats { pools: pools.len(), ..CommandPoolStats::default() };
        for pool in &pools {
            let pool = lock_pool(pool);
            stats.allocated += pool.allocated;
            stats.queued += pool.queue.len();
            stats.in_flight += pool.queue.iter().filter(|entry| entry.in_flight()).count();
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use crate::core::config::DeviceConfig;
    use crate::render::testing::headless_device;
    use crate::render::VulkanError;
    use ash::vk;

    #[test]
    fn test_failed_fence_reset_keeps_buffer_in_pool() {
        let (backend, device) = headless_device(DeviceConfig::default());
        let cmd = device.get_command_buffer("first").unwrap();
        let handle = cmd.handle();
        device.execute_and_wait(cmd).unwrap();

        backend.fail_next_fence_resets(1);
        let result = device.get_command_buffer("second");
        assert!(matches!(result, Err(VulkanError::Api(vk::Result::ERROR_DEVICE_LOST))));
        let stats = device.command_pool_stats();
        assert_eq!(stats.allocated, 1);
        assert_eq!(stats.queued, 1);

        let cmd = device.get_command_buffer("third").unwrap();
        assert_eq!(cmd.handle(), handle);
        assert_eq!(device.command_pool_stats().allocated, 1);
        device.execute_and_wait(cmd).unwrap();
    }

    #[test]
    fn test_unsubmitted_buffer_gets_new_fence_when_old_one_is_held() {
        let (backend, device) = headless_device(DeviceConfig::default());
        let cmd = device.get_command_buffer("abandoned").unwrap();
        let handle = cmd.handle();
        let watched = cmd.fence().clone();
        drop(cmd);

        let cmd = device.get_command_buffer("reused").unwrap();
        assert_eq!(cmd.handle(), handle);
        assert_ne!(cmd.fence().handle(), watched.handle());
        device.execute_and_wait(cmd).unwrap();

        assert!(!watched.is_submitted());
        assert!(!watched.is_signaled().unwrap());
        assert_eq!(backend.stats().validation_errors, 0);
    }

    #[test]
    fn test_unsubmitted_buffer_keeps_its_own_fence() {
        let (_backend, device) = headless_device(DeviceConfig::default());
        let cmd = device.get_command_buffer("abandoned").unwrap();
        let fence = cmd.fence().handle();
        drop(cmd);

        let cmd = device.get_command_buffer("reused").unwrap();
        assert_eq!(cmd.fence().handle(), fence);
        assert_eq!(device.command_pool_stats().allocated, 1);
    }
}
