//! Transient command buffers and deferred resource reclamation.
//!
//! Any thread may record GPU work: [`CommandBufferManager::acquire`] hands
//! out a begun one-time-submit command buffer from that thread's own pool,
//! created on first use and registered centrally for teardown. Finished
//! recordings are released together with the transient resources (staging
//! and scratch buffers) they exclusively use, then submitted as a batch
//! under a single fence.
//!
//! # Lifetime
//!
//! ```text
//! acquire ─► record ─► release ─► [executable] ─► submit ─► [pending batch]
//!                                                               │ fence signaled
//!                                                               ▼
//!                     destroy_expired_resources ◄─ [retired] ◄─ proceed_to_next_frame
//! ```
//!
//! A transient resource belongs to exactly one batch and is only destroyed
//! after that batch's fence has been observed signaled.

use std::collections::HashMap;
use std::thread::{self, ThreadId};

use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};

use tracer_rhi::command::{CommandEncoder, CommandPoolKind};
use tracer_rhi::sync::{DEFAULT_FENCE_TIMEOUT, Submission};
use tracer_rhi::{
    BufferHandle, CommandBufferHandle, CommandPoolHandle, DeviceRef, FenceHandle, GpuDevice,
    ImageHandle, RhiResult,
};

/// A recording command buffer and the pool it must be freed to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransientCommandBuffer {
    buffer: CommandBufferHandle,
    pool: CommandPoolHandle,
}

impl TransientCommandBuffer {
    #[inline]
    pub fn handle(&self) -> CommandBufferHandle {
        self.buffer
    }

    #[inline]
    pub fn pool(&self) -> CommandPoolHandle {
        self.pool
    }

    /// Encoder recording into this buffer.
    pub fn encoder<'a>(&self, device: &'a dyn GpuDevice) -> CommandEncoder<'a> {
        CommandEncoder::new(device, self.buffer)
    }
}

/// A resource used only by the command buffer it is released with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransientResource {
    Buffer(BufferHandle),
    Image(ImageHandle),
}

struct ExecutableCommandBuffer {
    command_buffer: TransientCommandBuffer,
    resources: Vec<TransientResource>,
}

struct PendingBatch {
    fence: FenceHandle,
    command_buffers: Vec<TransientCommandBuffer>,
    resources: Vec<TransientResource>,
}

/// Per-thread command pools, batched submission and fence-gated reclamation.
pub struct CommandBufferManager {
    device: DeviceRef,
    pools: Mutex<HashMap<ThreadId, CommandPoolHandle>>,
    executable: Mutex<Vec<ExecutableCommandBuffer>>,
    pending: Mutex<Vec<PendingBatch>>,
    deferred: Mutex<Vec<TransientResource>>,
    retired: Mutex<Vec<TransientResource>>,
}

impl CommandBufferManager {
    pub fn new(device: DeviceRef) -> Self {
        Self {
            device,
            pools: Mutex::new(HashMap::new()),
            executable: Mutex::new(Vec::new()),
            pending: Mutex::new(Vec::new()),
            deferred: Mutex::new(Vec::new()),
            retired: Mutex::new(Vec::new()),
        }
    }

    /// The calling thread's command pool, created on first use.
    fn thread_pool(&self) -> RhiResult<CommandPoolHandle> {
        let id = thread::current().id();
        let mut pools = self.pools.lock();
        if let Some(&pool) = pools.get(&id) {
            return Ok(pool);
        }
        let pool = self.device.create_command_pool(CommandPoolKind::Transient)?;
        debug!("Created transient command pool for thread {:?}", id);
        pools.insert(id, pool);
        Ok(pool)
    }

    /// Returns a begun transient command buffer from the calling thread's pool.
    pub fn acquire(&self) -> RhiResult<TransientCommandBuffer> {
        let pool = self.thread_pool().inspect_err(|e| {
            error!("CommandBufferManager: cannot create command pool: {}", e);
        })?;
        let buffer = self.device.allocate_command_buffer(pool).inspect_err(|e| {
            error!("CommandBufferManager: cannot allocate transient command buffer: {}", e);
        })?;
        if let Err(e) = self.device.begin_command_buffer(buffer) {
            error!(
                "CommandBufferManager: cannot begin recording transient command buffer: {}",
                e
            );
            self.device.free_command_buffers(pool, &[buffer]);
            return Err(e);
        }
        Ok(TransientCommandBuffer { buffer, pool })
    }

    /// Ends recording and queues the buffer for the next batch submission.
    ///
    /// `resources` are destroyed once the batch has executed. If recording
    /// cannot be ended the buffer is freed and the resources are destroyed
    /// immediately, since nothing referencing them was submitted.
    pub fn release(
        &self,
        command_buffer: TransientCommandBuffer,
        resources: Vec<TransientResource>,
    ) -> RhiResult<()> {
        if let Err(e) = self.device.end_command_buffer(command_buffer.buffer) {
            warn!(
                "CommandBufferManager: unable to end recording transient command buffer: {}",
                e
            );
            self.device
                .free_command_buffers(command_buffer.pool, &[command_buffer.buffer]);
            self.destroy_resources(&resources);
            return Err(e);
        }

        self.executable.lock().push(ExecutableCommandBuffer {
            command_buffer,
            resources,
        });
        Ok(())
    }

    /// Drops a recording that failed midway, destroying its resources.
    pub fn discard(
        &self,
        command_buffer: TransientCommandBuffer,
        resources: &[TransientResource],
    ) {
        self.device
            .free_command_buffers(command_buffer.pool, &[command_buffer.buffer]);
        self.destroy_resources(resources);
    }

    /// Destroys `resource` once the next submitted batch has executed.
    ///
    /// Work already submitted precedes that batch on the queue, so this is
    /// how replaced resources that earlier frames still read are released.
    pub fn retire_after_next_batch(&self, resource: TransientResource) {
        self.deferred.lock().push(resource);
    }

    /// Ends, submits and waits for a single buffer outside the batch cadence.
    pub fn execute_immediately(&self, command_buffer: TransientCommandBuffer) -> RhiResult<()> {
        let result = self
            .device
            .end_command_buffer(command_buffer.buffer)
            .inspect_err(|e| {
                warn!(
                    "CommandBufferManager: unable to end recording transient command buffer: {}",
                    e
                );
            })
            .and_then(|()| {
                let buffers = [command_buffer.buffer];
                self.device.submit(&Submission::new(&buffers, None))
            })
            .and_then(|()| self.device.wait_idle())
            .inspect_err(|e| {
                error!(
                    "CommandBufferManager: immediate command buffer execution failed: {}",
                    e
                );
            });

        self.device
            .free_command_buffers(command_buffer.pool, &[command_buffer.buffer]);
        result
    }

    /// Submits every released command buffer as one batch with one fence.
    ///
    /// Returns the number of command buffers submitted. On failure the
    /// buffers stay queued and the fence is destroyed; the caller must not
    /// assume the work executed.
    pub fn submit_command_buffers(&self) -> RhiResult<usize> {
        let mut executable = self.executable.lock();
        if executable.is_empty() {
            return Ok(0);
        }

        let fence = self.device.create_fence(false).inspect_err(|e| {
            error!("CommandBufferManager: failed to submit pending command buffers: {}", e);
        })?;

        let handles: Vec<CommandBufferHandle> = executable
            .iter()
            .map(|e| e.command_buffer.buffer)
            .collect();
        if let Err(e) = self.device.submit(&Submission::new(&handles, Some(fence))) {
            error!("CommandBufferManager: failed to submit pending command buffers: {}", e);
            self.device.destroy_fence(fence);
            return Err(e);
        }

        let mut batch = PendingBatch {
            fence,
            command_buffers: Vec::with_capacity(executable.len()),
            resources: Vec::new(),
        };
        for entry in executable.drain(..) {
            batch.command_buffers.push(entry.command_buffer);
            batch.resources.extend(entry.resources);
        }
        batch.resources.append(&mut self.deferred.lock());
        trace!(
            "Submitted batch of {} command buffer(s) holding {} transient resource(s)",
            batch.command_buffers.len(),
            batch.resources.len()
        );

        let count = batch.command_buffers.len();
        self.pending.lock().push(batch);
        Ok(count)
    }

    /// Retires every pending batch whose fence has signaled.
    ///
    /// Command buffers go back to their pools and fences are destroyed; the
    /// transient resources move to the list drained by
    /// [`destroy_expired_resources`](Self::destroy_expired_resources).
    pub fn proceed_to_next_frame(&self) {
        let mut retired = Vec::new();
        {
            let mut pending = self.pending.lock();
            let mut index = 0;
            while index < pending.len() {
                let fence = pending[index].fence;
                let signaled = match self.device.is_fence_signaled(fence) {
                    Ok(signaled) => signaled,
                    Err(e) => {
                        // A batch whose fence cannot be queried would never retire
                        error!("CommandBufferManager: cannot query batch fence: {}", e);
                        match self.device.wait_for_fence(fence, DEFAULT_FENCE_TIMEOUT) {
                            Ok(()) => true,
                            Err(e) => {
                                error!("CommandBufferManager: cannot wait for batch fence: {}", e);
                                false
                            }
                        }
                    }
                };
                if !signaled {
                    index += 1;
                    continue;
                }

                let batch = pending.swap_remove(index);
                let mut by_pool: HashMap<CommandPoolHandle, Vec<CommandBufferHandle>> =
                    HashMap::new();
                for cb in &batch.command_buffers {
                    by_pool.entry(cb.pool).or_default().push(cb.buffer);
                }
                for (pool, buffers) in by_pool {
                    self.device.free_command_buffers(pool, &buffers);
                }
                self.device.destroy_fence(batch.fence);
                retired.extend(batch.resources);
            }
        }

        if !retired.is_empty() {
            self.retired.lock().extend(retired);
        }
    }

    /// Destroys transient resources whose batches have executed.
    pub fn destroy_expired_resources(&self) {
        let expired = std::mem::take(&mut *self.retired.lock());
        if !expired.is_empty() {
            trace!("Destroying {} expired transient resource(s)", expired.len());
        }
        self.destroy_resources(&expired);
    }

    pub fn executable_count(&self) -> usize {
        self.executable.lock().len()
    }

    pub fn pending_batch_count(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn command_pool_count(&self) -> usize {
        self.pools.lock().len()
    }

    fn destroy_resources(&self, resources: &[TransientResource]) {
        for resource in resources {
            match *resource {
                TransientResource::Buffer(buffer) => self.device.destroy_buffer(buffer),
                TransientResource::Image(image) => self.device.destroy_image(image),
            }
        }
    }

    /// Waits for all pending batches, reclaims them and destroys every pool.
    ///
    /// Calling it again is a no-op.
    pub fn shutdown(&self) {
        let fences: Vec<FenceHandle> = self.pending.lock().iter().map(|b| b.fence).collect();
        for fence in fences {
            if let Err(e) = self.device.wait_for_fence(fence, DEFAULT_FENCE_TIMEOUT) {
                warn!("CommandBufferManager: waiting for pending batch failed: {}", e);
            }
        }
        self.proceed_to_next_frame();
        self.destroy_expired_resources();

        let orphaned = self.pending.lock().len();
        if orphaned > 0 {
            warn!("CommandBufferManager: {} orphaned pending batches", orphaned);
        }

        // Never submitted; freed with their pools below.
        let unsubmitted: Vec<ExecutableCommandBuffer> = self.executable.lock().drain(..).collect();
        for entry in &unsubmitted {
            self.destroy_resources(&entry.resources);
        }
        let deferred = std::mem::take(&mut *self.deferred.lock());
        self.destroy_resources(&deferred);

        for (_, pool) in self.pools.lock().drain() {
            self.device.destroy_command_pool(pool);
        }
    }
}

impl Drop for CommandBufferManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tracer_rhi::buffer::BufferDesc;
    use tracer_rhi::headless::{DeviceEvent, FailPoint, HeadlessDevice};

    use super::*;

    fn setup() -> (Arc<HeadlessDevice>, CommandBufferManager) {
        let device = Arc::new(HeadlessDevice::new());
        let manager = CommandBufferManager::new(device.clone());
        (device, manager)
    }

    #[test]
    fn test_acquire_reuses_thread_pool() {
        let (_device, manager) = setup();
        let a = manager.acquire().unwrap();
        let b = manager.acquire().unwrap();
        assert_eq!(a.pool(), b.pool());
        assert_ne!(a.handle(), b.handle());
        assert_eq!(manager.command_pool_count(), 1);
    }

    #[test]
    fn test_each_thread_gets_its_own_pool() {
        let (_device, manager) = setup();
        let main = manager.acquire().unwrap();
        let worker = std::thread::scope(|s| s.spawn(|| manager.acquire().unwrap()).join().unwrap());
        assert_ne!(main.pool(), worker.pool());
        assert_eq!(manager.command_pool_count(), 2);
    }

    #[test]
    fn test_empty_submit_is_noop() {
        let (device, manager) = setup();
        assert_eq!(manager.submit_command_buffers().unwrap(), 0);
        assert_eq!(device.pending_submissions(), 0);
    }

    #[test]
    fn test_failed_release_destroys_resources() {
        let (device, manager) = setup();
        let staging = device.create_buffer(&BufferDesc::staging(16)).unwrap();
        let cb = manager.acquire().unwrap();

        device.fail_next(FailPoint::EndCommandBuffer);
        assert!(
            manager
                .release(cb, vec![TransientResource::Buffer(staging)])
                .is_err()
        );
        assert!(!device.is_buffer_live(staging));
        assert_eq!(manager.executable_count(), 0);
    }

    #[test]
    fn test_failed_submit_keeps_buffers_queued() {
        let (device, manager) = setup();
        let cb = manager.acquire().unwrap();
        manager.release(cb, Vec::new()).unwrap();

        device.fail_next(FailPoint::Submit);
        assert!(manager.submit_command_buffers().is_err());
        assert_eq!(manager.executable_count(), 1);
        assert_eq!(manager.pending_batch_count(), 0);
        // The batch fence was released
        assert_eq!(device.live_fence_count(), 0);

        assert_eq!(manager.submit_command_buffers().unwrap(), 1);
        assert_eq!(manager.pending_batch_count(), 1);
    }

    #[test]
    fn test_execute_immediately_waits_and_frees() {
        let (device, manager) = setup();
        let cb = manager.acquire().unwrap();
        manager.execute_immediately(cb).unwrap();

        assert_eq!(device.pending_submissions(), 0);
        let events = device.events();
        let submitted = events
            .iter()
            .position(|e| matches!(e, DeviceEvent::Submitted { fence: None, .. }))
            .unwrap();
        let idle = events
            .iter()
            .position(|e| *e == DeviceEvent::WaitIdle)
            .unwrap();
        let freed = events
            .iter()
            .position(|e| *e == DeviceEvent::CommandBuffersFreed(vec![cb.handle()]))
            .unwrap();
        assert!(submitted < idle && idle < freed);
    }

    #[test]
    fn test_deferred_resource_waits_for_next_batch() {
        let (device, manager) = setup();
        let old = device.create_buffer(&BufferDesc::staging(16)).unwrap();
        manager.retire_after_next_batch(TransientResource::Buffer(old));

        let cb = manager.acquire().unwrap();
        manager.release(cb, Vec::new()).unwrap();
        manager.submit_command_buffers().unwrap();
        manager.proceed_to_next_frame();
        manager.destroy_expired_resources();
        assert!(device.is_buffer_live(old));

        device.complete_all();
        manager.proceed_to_next_frame();
        manager.destroy_expired_resources();
        assert!(!device.is_buffer_live(old));
        assert!(device.violations().is_empty(), "{:?}", device.violations());
    }

    #[test]
    fn test_unreadable_fence_waits_then_retires_batch() {
        let (device, manager) = setup();
        let staging = device.create_buffer(&BufferDesc::staging(16)).unwrap();
        let cb = manager.acquire().unwrap();
        manager
            .release(cb, vec![TransientResource::Buffer(staging)])
            .unwrap();
        manager.submit_command_buffers().unwrap();

        device.fail_next(FailPoint::FenceStatus);
        manager.proceed_to_next_frame();
        assert_eq!(manager.pending_batch_count(), 0);
        assert_eq!(device.pending_submissions(), 0);
        assert_eq!(device.live_fence_count(), 0);

        manager.destroy_expired_resources();
        assert!(!device.is_buffer_live(staging));
        assert!(device.violations().is_empty(), "{:?}", device.violations());
    }

    #[test]
    fn test_shutdown_destroys_pools_and_waits() {
        let (device, manager) = setup();
        let staging = device.create_buffer(&BufferDesc::staging(16)).unwrap();
        let cb = manager.acquire().unwrap();
        manager
            .release(cb, vec![TransientResource::Buffer(staging)])
            .unwrap();
        manager.submit_command_buffers().unwrap();

        manager.shutdown();
        assert_eq!(manager.pending_batch_count(), 0);
        assert!(!device.is_buffer_live(staging));
        assert_eq!(device.live_command_pool_count(), 0);
        assert_eq!(device.live_fence_count(), 0);
        assert!(device.violations().is_empty(), "{:?}", device.violations());
    }
}
