//! Simulated GPU device.
//!
//! [`HeadlessDevice`] implements [`GpuDevice`] without a GPU. It keeps real
//! resource tables, executes buffer copies, and models a single in-order
//! queue: submissions stay pending until something waits on their fence
//! (or on the device), at which point they complete in submission order and
//! their fences signal.
//!
//! Every observable step is appended to an event log, and lifetime mistakes
//! (destroying or freeing something a pending submission still references,
//! submitting with a signaled fence) are recorded as violations instead of
//! silently succeeding. Tests assert on both.

use std::collections::{HashSet, VecDeque};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::acceleration::{AccelerationStructureDesc, AccelerationStructureInfo};
use crate::buffer::BufferDesc;
use crate::command::{CommandPoolKind, GpuCommand};
use crate::descriptor::{DescriptorBinding, DescriptorPoolDesc, DescriptorResource, DescriptorWrite};
use crate::device::GpuDevice;
use crate::error::{RhiError, RhiResult};
use crate::image::ImageDesc;
use crate::pipeline::PipelineDesc;
use crate::resource::*;
use crate::swapchain::{AcquiredImage, Extent2D, PresentStatus, SurfaceInfo, SwapchainInfo};
use crate::sync::Submission;

/// Observable device activity, in order.
#[derive(Clone, Debug, PartialEq)]
pub enum DeviceEvent {
    BufferCreated(BufferHandle),
    BufferDestroyed(BufferHandle),
    ImageCreated(ImageHandle),
    ImageDestroyed(ImageHandle),
    AccelerationStructureCreated(AccelerationStructureHandle),
    AccelerationStructureDestroyed(AccelerationStructureHandle),
    FenceCreated(FenceHandle),
    FenceDestroyed(FenceHandle),
    FenceSignaled(FenceHandle),
    FenceReset(FenceHandle),
    CommandBuffersFreed(Vec<CommandBufferHandle>),
    CommandPoolDestroyed(CommandPoolHandle),
    Submitted {
        command_buffers: Vec<CommandBufferHandle>,
        fence: Option<FenceHandle>,
    },
    WaitIdle,
    SwapchainCreated(Extent2D),
    SwapchainDestroyed,
    Acquired(u32),
    Presented(u32),
}

/// Operations whose next invocation can be forced to fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FailPoint {
    CreateBuffer,
    CreateFence,
    EndCommandBuffer,
    Submit,
    Present,
    /// Querying a fence's status.
    FenceStatus,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RecordingState {
    Initial,
    Recording,
    Executable,
}

struct CommandBufferState {
    pool: CommandPoolHandle,
    state: RecordingState,
    commands: Vec<GpuCommand>,
}

struct PendingSubmission {
    command_buffers: Vec<CommandBufferHandle>,
    commands: Vec<GpuCommand>,
    fence: Option<FenceHandle>,
}

struct State {
    buffers: ResourceTable<BufferResource, Vec<u8>>,
    images: ResourceTable<ImageResource, ImageDesc>,
    acceleration_structures: ResourceTable<AccelerationStructureResource, AccelerationStructureDesc>,
    fences: ResourceTable<FenceResource, bool>,
    semaphores: ResourceTable<SemaphoreResource, ()>,
    command_pools: ResourceTable<CommandPoolResource, CommandPoolKind>,
    command_buffers: ResourceTable<CommandBufferResource, CommandBufferState>,
    set_layouts: ResourceTable<DescriptorSetLayoutResource, Vec<DescriptorBinding>>,
    descriptor_pools: ResourceTable<DescriptorPoolResource, DescriptorPoolDesc>,
    descriptor_sets: ResourceTable<DescriptorSetResource, (DescriptorPoolHandle, Vec<DescriptorWrite>)>,
    pipelines: ResourceTable<PipelineResource, PipelineDesc>,

    queue: VecDeque<PendingSubmission>,
    executed: Vec<Vec<GpuCommand>>,

    surface: SurfaceInfo,
    swapchain: Option<SwapchainInfo>,
    next_image: u32,
    acquire_script: VecDeque<bool>,
    present_script: VecDeque<PresentStatus>,

    fail_points: HashSet<FailPoint>,
    events: Vec<DeviceEvent>,
    violations: Vec<String>,
    next_reference: u64,
}

/// A [`GpuDevice`] that simulates an in-order queue on the CPU.
pub struct HeadlessDevice {
    state: Mutex<State>,
}

impl HeadlessDevice {
    /// Device whose surface asks for two swapchain images.
    pub fn new() -> Self {
        Self::with_surface_image_count(2)
    }

    pub fn with_surface_image_count(min_image_count: u32) -> Self {
        Self {
            state: Mutex::new(State {
                buffers: ResourceTable::new("buffer"),
                images: ResourceTable::new("image"),
                acceleration_structures: ResourceTable::new("acceleration structure"),
                fences: ResourceTable::new("fence"),
                semaphores: ResourceTable::new("semaphore"),
                command_pools: ResourceTable::new("command pool"),
                command_buffers: ResourceTable::new("command buffer"),
                set_layouts: ResourceTable::new("descriptor set layout"),
                descriptor_pools: ResourceTable::new("descriptor pool"),
                descriptor_sets: ResourceTable::new("descriptor set"),
                pipelines: ResourceTable::new("pipeline"),
                queue: VecDeque::new(),
                executed: Vec::new(),
                surface: SurfaceInfo {
                    min_image_count,
                    max_image_count: None,
                },
                swapchain: None,
                next_image: 0,
                acquire_script: VecDeque::new(),
                present_script: VecDeque::new(),
                fail_points: HashSet::new(),
                events: Vec::new(),
                violations: Vec::new(),
                next_reference: 0x1000,
            }),
        }
    }

    // ========================================================================
    // Test controls
    // ========================================================================

    /// Completes every pending submission, in order.
    pub fn complete_all(&self) {
        let mut state = self.state.lock();
        while state.complete_next() {}
    }

    /// Completes the oldest pending submission. Returns false if none was pending.
    pub fn complete_next(&self) -> bool {
        self.state.lock().complete_next()
    }

    /// Number of submissions not yet completed.
    pub fn pending_submissions(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Makes the next call of `point` fail once.
    pub fn fail_next(&self, point: FailPoint) {
        self.state.lock().fail_points.insert(point);
    }

    /// The next acquire reports an out-of-date swapchain.
    pub fn script_acquire_out_of_date(&self) {
        self.state.lock().acquire_script.push_back(true);
    }

    /// The next present returns `status`.
    pub fn script_present(&self, status: PresentStatus) {
        self.state.lock().present_script.push_back(status);
    }

    pub fn events(&self) -> Vec<DeviceEvent> {
        self.state.lock().events.clone()
    }

    pub fn clear_events(&self) {
        self.state.lock().events.clear();
    }

    /// Lifetime violations observed so far.
    pub fn violations(&self) -> Vec<String> {
        self.state.lock().violations.clone()
    }

    /// Commands of every completed submission, one entry per submission.
    pub fn executed_commands(&self) -> Vec<Vec<GpuCommand>> {
        self.state.lock().executed.clone()
    }

    /// Contents of a buffer, including data copied into it by completed submissions.
    pub fn read_buffer(&self, buffer: BufferHandle) -> Option<Vec<u8>> {
        self.state.lock().buffers.get(buffer).ok().cloned()
    }

    /// Every write applied to a descriptor set, in order.
    pub fn descriptor_writes(&self, set: DescriptorSetHandle) -> Vec<DescriptorWrite> {
        self.state
            .lock()
            .descriptor_sets
            .get(set)
            .map(|(_, writes)| writes.clone())
            .unwrap_or_default()
    }

    pub fn swapchain(&self) -> Option<SwapchainInfo> {
        self.state.lock().swapchain
    }

    pub fn live_buffer_count(&self) -> usize {
        self.state.lock().buffers.len()
    }

    pub fn live_image_count(&self) -> usize {
        self.state.lock().images.len()
    }

    pub fn live_acceleration_structure_count(&self) -> usize {
        self.state.lock().acceleration_structures.len()
    }

    pub fn live_command_pool_count(&self) -> usize {
        self.state.lock().command_pools.len()
    }

    pub fn live_fence_count(&self) -> usize {
        self.state.lock().fences.len()
    }

    pub fn is_acceleration_structure_live(&self, handle: AccelerationStructureHandle) -> bool {
        self.state.lock().acceleration_structures.contains(handle)
    }

    pub fn is_buffer_live(&self, handle: BufferHandle) -> bool {
        self.state.lock().buffers.contains(handle)
    }
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl State {
    fn take_failure(&mut self, point: FailPoint) -> bool {
        self.fail_points.remove(&point)
    }

    fn complete_next(&mut self) -> bool {
        let Some(submission) = self.queue.pop_front() else {
            return false;
        };

        for command in &submission.commands {
            if let GpuCommand::CopyBuffer { src, dst, size } = *command {
                self.copy(src, dst, size);
            }
        }

        if let Some(fence) = submission.fence
            && let Ok(signaled) = self.fences.get_mut(fence)
        {
            *signaled = true;
            self.events.push(DeviceEvent::FenceSignaled(fence));
        }

        self.executed.push(submission.commands);
        true
    }

    fn copy(&mut self, src: BufferHandle, dst: BufferHandle, size: u64) {
        let Ok(source) = self.buffers.get(src).cloned() else {
            self.violations.push(format!("copy from destroyed buffer {src:?}"));
            return;
        };
        match self.buffers.get_mut(dst) {
            Ok(target) => {
                let len = (size as usize).min(source.len()).min(target.len());
                target[..len].copy_from_slice(&source[..len]);
            }
            Err(_) => self.violations.push(format!("copy into destroyed buffer {dst:?}")),
        }
    }

    fn is_referenced_by_pending(&self, predicate: impl Fn(&GpuCommand) -> bool) -> bool {
        self.queue
            .iter()
            .any(|submission| submission.commands.iter().any(&predicate))
    }

    fn check_handles(&self, command: &GpuCommand) -> RhiResult<()> {
        match command {
            GpuCommand::CopyBuffer { src, dst, .. } => {
                self.buffers.get(*src)?;
                self.buffers.get(*dst)?;
            }
            GpuCommand::CopyBufferToImage { src, dst } => {
                self.buffers.get(*src)?;
                self.images.get(*dst)?;
            }
            GpuCommand::MemoryBarrier { .. } => {}
            GpuCommand::ImageBarrier { image, .. } | GpuCommand::ClearImage { image } => {
                self.images.get(*image)?;
            }
            GpuCommand::BuildAccelerationStructure {
                target,
                desc,
                scratch,
            } => {
                self.acceleration_structures.get(*target)?;
                self.buffers.get(*scratch)?;
                match *desc {
                    AccelerationStructureDesc::BottomLevel {
                        vertices, indices, ..
                    } => {
                        self.buffers.get(vertices)?;
                        self.buffers.get(indices)?;
                    }
                    AccelerationStructureDesc::TopLevel { instances, .. } => {
                        self.buffers.get(instances)?;
                    }
                }
            }
            GpuCommand::TraceRays {
                pipeline,
                descriptor_sets,
                ..
            } => {
                self.pipelines.get(*pipeline)?;
                for set in descriptor_sets {
                    self.descriptor_sets.get(*set)?;
                }
            }
            GpuCommand::Display {
                pipeline,
                descriptor_set,
                image_index,
                ..
            } => {
                self.pipelines.get(*pipeline)?;
                self.descriptor_sets.get(*descriptor_set)?;
                let count = self.swapchain.map_or(0, |s| s.image_count);
                if *image_index >= count {
                    return Err(RhiError::SwapchainError(format!(
                        "image index {image_index} out of range ({count} images)"
                    )));
                }
            }
        }
        Ok(())
    }
}

fn references_buffer(command: &GpuCommand, buffer: BufferHandle) -> bool {
    match command {
        GpuCommand::CopyBuffer { src, dst, .. } => *src == buffer || *dst == buffer,
        GpuCommand::CopyBufferToImage { src, .. } => *src == buffer,
        GpuCommand::BuildAccelerationStructure { desc, scratch, .. } => {
            *scratch == buffer
                || match *desc {
                    AccelerationStructureDesc::BottomLevel {
                        vertices, indices, ..
                    } => vertices == buffer || indices == buffer,
                    AccelerationStructureDesc::TopLevel { instances, .. } => instances == buffer,
                }
        }
        _ => false,
    }
}

fn references_image(command: &GpuCommand, image: ImageHandle) -> bool {
    match command {
        GpuCommand::CopyBufferToImage { dst, .. } => *dst == image,
        GpuCommand::ImageBarrier { image: i, .. } | GpuCommand::ClearImage { image: i } => {
            *i == image
        }
        _ => false,
    }
}

impl GpuDevice for HeadlessDevice {
    fn name(&self) -> &str {
        "headless"
    }

    fn create_buffer(&self, desc: &BufferDesc) -> RhiResult<BufferHandle> {
        let mut state = self.state.lock();
        if desc.size == 0 {
            return Err(RhiError::InvalidHandle(
                "Buffer size cannot be zero".to_string(),
            ));
        }
        if state.take_failure(FailPoint::CreateBuffer) {
            return Err(RhiError::VulkanError(
                ash::vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
            ));
        }
        let handle = state.buffers.insert(vec![0; desc.size as usize]);
        state.events.push(DeviceEvent::BufferCreated(handle));
        Ok(handle)
    }

    fn write_buffer(&self, buffer: BufferHandle, offset: u64, data: &[u8]) -> RhiResult<()> {
        let mut state = self.state.lock();
        let contents = state.buffers.get_mut(buffer)?;
        let start = offset as usize;
        let end = start + data.len();
        if end > contents.len() {
            return Err(RhiError::InvalidHandle(format!(
                "write of {} bytes at {} exceeds buffer size {}",
                data.len(),
                offset,
                contents.len()
            )));
        }
        contents[start..end].copy_from_slice(data);
        Ok(())
    }

    fn destroy_buffer(&self, buffer: BufferHandle) {
        let mut state = self.state.lock();
        if state.is_referenced_by_pending(|c| references_buffer(c, buffer)) {
            state
                .violations
                .push(format!("buffer {buffer:?} destroyed while in use by a pending submission"));
        }
        if state.buffers.remove(buffer).is_some() {
            state.events.push(DeviceEvent::BufferDestroyed(buffer));
        }
    }

    fn create_image(&self, desc: &ImageDesc) -> RhiResult<ImageHandle> {
        let mut state = self.state.lock();
        if desc.extent.is_empty() {
            return Err(RhiError::InvalidHandle(format!(
                "image extent {} is empty",
                desc.extent
            )));
        }
        let handle = state.images.insert(*desc);
        state.events.push(DeviceEvent::ImageCreated(handle));
        Ok(handle)
    }

    fn destroy_image(&self, image: ImageHandle) {
        let mut state = self.state.lock();
        if state.is_referenced_by_pending(|c| references_image(c, image)) {
            state
                .violations
                .push(format!("image {image:?} destroyed while in use by a pending submission"));
        }
        if state.images.remove(image).is_some() {
            state.events.push(DeviceEvent::ImageDestroyed(image));
        }
    }

    fn create_acceleration_structure(
        &self,
        desc: &AccelerationStructureDesc,
    ) -> RhiResult<AccelerationStructureInfo> {
        let mut state = self.state.lock();
        match *desc {
            AccelerationStructureDesc::BottomLevel {
                vertices, indices, ..
            } => {
                state.buffers.get(vertices)?;
                state.buffers.get(indices)?;
            }
            AccelerationStructureDesc::TopLevel { instances, .. } => {
                state.buffers.get(instances)?;
            }
        }
        let handle = state.acceleration_structures.insert(*desc);
        let reference = state.next_reference;
        state.next_reference += 0x100;
        state
            .events
            .push(DeviceEvent::AccelerationStructureCreated(handle));
        Ok(AccelerationStructureInfo {
            handle,
            reference,
            scratch_size: 256 * u64::from(desc.primitive_count().max(1)),
        })
    }

    fn destroy_acceleration_structure(&self, handle: AccelerationStructureHandle) {
        let mut state = self.state.lock();
        let in_use = state.is_referenced_by_pending(|c| {
            matches!(c, GpuCommand::BuildAccelerationStructure { target, .. } if *target == handle)
        });
        if in_use {
            state.violations.push(format!(
                "acceleration structure {handle:?} destroyed while in use by a pending submission"
            ));
        }
        if state.acceleration_structures.remove(handle).is_some() {
            state
                .events
                .push(DeviceEvent::AccelerationStructureDestroyed(handle));
        }
    }

    fn create_fence(&self, signaled: bool) -> RhiResult<FenceHandle> {
        let mut state = self.state.lock();
        if state.take_failure(FailPoint::CreateFence) {
            return Err(RhiError::VulkanError(
                ash::vk::Result::ERROR_OUT_OF_HOST_MEMORY,
            ));
        }
        let handle = state.fences.insert(signaled);
        state.events.push(DeviceEvent::FenceCreated(handle));
        Ok(handle)
    }

    fn destroy_fence(&self, fence: FenceHandle) {
        let mut state = self.state.lock();
        if state.queue.iter().any(|s| s.fence == Some(fence)) {
            state
                .violations
                .push(format!("fence {fence:?} destroyed while its submission is pending"));
        }
        if state.fences.remove(fence).is_some() {
            state.events.push(DeviceEvent::FenceDestroyed(fence));
        }
    }

    fn wait_for_fence(&self, fence: FenceHandle, _timeout_ns: u64) -> RhiResult<()> {
        let mut state = self.state.lock();
        if *state.fences.get(fence)? {
            return Ok(());
        }
        if !state.queue.iter().any(|s| s.fence == Some(fence)) {
            return Err(RhiError::Timeout(format!(
                "fence {fence:?} (not signaled and never submitted)"
            )));
        }
        while !*state.fences.get(fence)? {
            if !state.complete_next() {
                break;
            }
        }
        Ok(())
    }

    fn reset_fence(&self, fence: FenceHandle) -> RhiResult<()> {
        let mut state = self.state.lock();
        *state.fences.get_mut(fence)? = false;
        state.events.push(DeviceEvent::FenceReset(fence));
        Ok(())
    }

    fn is_fence_signaled(&self, fence: FenceHandle) -> RhiResult<bool> {
        let mut state = self.state.lock();
        if state.take_failure(FailPoint::FenceStatus) {
            return Err(RhiError::VulkanError(ash::vk::Result::ERROR_DEVICE_LOST));
        }
        Ok(*state.fences.get(fence)?)
    }

    fn create_semaphore(&self) -> RhiResult<SemaphoreHandle> {
        Ok(self.state.lock().semaphores.insert(()))
    }

    fn destroy_semaphore(&self, semaphore: SemaphoreHandle) {
        self.state.lock().semaphores.remove(semaphore);
    }

    fn create_command_pool(&self, kind: CommandPoolKind) -> RhiResult<CommandPoolHandle> {
        Ok(self.state.lock().command_pools.insert(kind))
    }

    fn destroy_command_pool(&self, pool: CommandPoolHandle) {
        let mut state = self.state.lock();
        let owned: Vec<CommandBufferHandle> = state
            .command_buffers
            .iter()
            .filter(|(_, cb)| cb.pool == pool)
            .map(|(handle, _)| handle)
            .collect();
        for buffer in owned {
            if state.queue.iter().any(|s| s.command_buffers.contains(&buffer)) {
                state.violations.push(format!(
                    "command pool {pool:?} destroyed while buffer {buffer:?} is pending"
                ));
            }
            state.command_buffers.remove(buffer);
        }
        if state.command_pools.remove(pool).is_some() {
            state.events.push(DeviceEvent::CommandPoolDestroyed(pool));
        }
    }

    fn allocate_command_buffer(&self, pool: CommandPoolHandle) -> RhiResult<CommandBufferHandle> {
        let mut state = self.state.lock();
        state.command_pools.get(pool)?;
        Ok(state.command_buffers.insert(CommandBufferState {
            pool,
            state: RecordingState::Initial,
            commands: Vec::new(),
        }))
    }

    fn free_command_buffers(&self, pool: CommandPoolHandle, buffers: &[CommandBufferHandle]) {
        let mut state = self.state.lock();
        for &buffer in buffers {
            if state.queue.iter().any(|s| s.command_buffers.contains(&buffer)) {
                state
                    .violations
                    .push(format!("command buffer {buffer:?} freed while pending"));
            }
            let wrong_pool = state
                .command_buffers
                .get(buffer)
                .is_ok_and(|cb| cb.pool != pool);
            if wrong_pool {
                state
                    .violations
                    .push(format!("command buffer {buffer:?} freed to the wrong pool"));
            }
            state.command_buffers.remove(buffer);
        }
        state
            .events
            .push(DeviceEvent::CommandBuffersFreed(buffers.to_vec()));
    }

    fn begin_command_buffer(&self, buffer: CommandBufferHandle) -> RhiResult<()> {
        let mut state = self.state.lock();
        if state.queue.iter().any(|s| s.command_buffers.contains(&buffer)) {
            state
                .violations
                .push(format!("command buffer {buffer:?} re-recorded while pending"));
        }
        let cb = state.command_buffers.get_mut(buffer)?;
        cb.state = RecordingState::Recording;
        cb.commands.clear();
        Ok(())
    }

    fn end_command_buffer(&self, buffer: CommandBufferHandle) -> RhiResult<()> {
        let mut state = self.state.lock();
        let fail = state.take_failure(FailPoint::EndCommandBuffer);
        let cb = state.command_buffers.get_mut(buffer)?;
        if cb.state != RecordingState::Recording {
            return Err(RhiError::InvalidHandle(format!(
                "command buffer {buffer:?} is not recording"
            )));
        }
        if fail {
            cb.state = RecordingState::Initial;
            return Err(RhiError::VulkanError(
                ash::vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
            ));
        }
        cb.state = RecordingState::Executable;
        Ok(())
    }

    fn encode(&self, buffer: CommandBufferHandle, command: GpuCommand) -> RhiResult<()> {
        let mut state = self.state.lock();
        state.check_handles(&command)?;
        let cb = state.command_buffers.get_mut(buffer)?;
        if cb.state != RecordingState::Recording {
            return Err(RhiError::InvalidHandle(format!(
                "command buffer {buffer:?} is not recording"
            )));
        }
        cb.commands.push(command);
        Ok(())
    }

    fn create_descriptor_set_layout(
        &self,
        bindings: &[DescriptorBinding],
    ) -> RhiResult<DescriptorSetLayoutHandle> {
        Ok(self.state.lock().set_layouts.insert(bindings.to_vec()))
    }

    fn destroy_descriptor_set_layout(&self, layout: DescriptorSetLayoutHandle) {
        self.state.lock().set_layouts.remove(layout);
    }

    fn create_descriptor_pool(&self, desc: &DescriptorPoolDesc) -> RhiResult<DescriptorPoolHandle> {
        Ok(self.state.lock().descriptor_pools.insert(desc.clone()))
    }

    fn destroy_descriptor_pool(&self, pool: DescriptorPoolHandle) {
        let mut state = self.state.lock();
        let sets: Vec<DescriptorSetHandle> = state
            .descriptor_sets
            .iter()
            .filter(|(_, (owner, _))| *owner == pool)
            .map(|(handle, _)| handle)
            .collect();
        for set in sets {
            state.descriptor_sets.remove(set);
        }
        state.descriptor_pools.remove(pool);
    }

    fn allocate_descriptor_set(
        &self,
        pool: DescriptorPoolHandle,
        layout: DescriptorSetLayoutHandle,
        _variable_count: Option<u32>,
    ) -> RhiResult<DescriptorSetHandle> {
        let mut state = self.state.lock();
        let max_sets = state.descriptor_pools.get(pool)?.max_sets as usize;
        state.set_layouts.get(layout)?;
        let allocated = state
            .descriptor_sets
            .iter()
            .filter(|(_, (owner, _))| *owner == pool)
            .count();
        if allocated >= max_sets {
            return Err(RhiError::VulkanError(
                ash::vk::Result::ERROR_OUT_OF_POOL_MEMORY,
            ));
        }
        Ok(state.descriptor_sets.insert((pool, Vec::new())))
    }

    fn write_descriptors(&self, set: DescriptorSetHandle, writes: &[DescriptorWrite]) -> RhiResult<()> {
        let mut state = self.state.lock();
        for write in writes {
            match write.resource {
                DescriptorResource::AccelerationStructure(h) => {
                    state.acceleration_structures.get(h)?;
                }
                DescriptorResource::StorageImage(h) | DescriptorResource::SampledImage(h) => {
                    state.images.get(h)?;
                }
                DescriptorResource::StorageBuffer(h) => {
                    state.buffers.get(h)?;
                }
            }
        }
        state.descriptor_sets.get_mut(set)?.1.extend_from_slice(writes);
        Ok(())
    }

    fn create_pipeline(&self, desc: &PipelineDesc) -> RhiResult<PipelineHandle> {
        let mut state = self.state.lock();
        for layout in desc.set_layouts() {
            state.set_layouts.get(*layout)?;
        }
        Ok(state.pipelines.insert(desc.clone()))
    }

    fn destroy_pipeline(&self, pipeline: PipelineHandle) {
        self.state.lock().pipelines.remove(pipeline);
    }

    fn submit(&self, submission: &Submission<'_>) -> RhiResult<()> {
        let mut state = self.state.lock();
        if state.take_failure(FailPoint::Submit) {
            return Err(RhiError::VulkanError(ash::vk::Result::ERROR_DEVICE_LOST));
        }

        let mut commands = Vec::new();
        for &buffer in submission.command_buffers {
            let cb = state.command_buffers.get(buffer)?;
            if cb.state != RecordingState::Executable {
                return Err(RhiError::InvalidHandle(format!(
                    "command buffer {buffer:?} submitted without ending recording"
                )));
            }
            commands.extend(cb.commands.iter().cloned());
        }
        for &semaphore in submission
            .wait_semaphores
            .iter()
            .chain(submission.signal_semaphores)
        {
            state.semaphores.get(semaphore)?;
        }
        if let Some(fence) = submission.fence {
            if *state.fences.get(fence)? {
                state
                    .violations
                    .push(format!("fence {fence:?} submitted while signaled"));
            }
        }

        debug!(
            "Headless submit: {} command buffer(s), {} command(s)",
            submission.command_buffers.len(),
            commands.len()
        );
        state.events.push(DeviceEvent::Submitted {
            command_buffers: submission.command_buffers.to_vec(),
            fence: submission.fence,
        });
        state.queue.push_back(PendingSubmission {
            command_buffers: submission.command_buffers.to_vec(),
            commands,
            fence: submission.fence,
        });
        Ok(())
    }

    fn wait_idle(&self) -> RhiResult<()> {
        let mut state = self.state.lock();
        while state.complete_next() {}
        state.events.push(DeviceEvent::WaitIdle);
        Ok(())
    }

    fn surface_info(&self) -> RhiResult<SurfaceInfo> {
        Ok(self.state.lock().surface)
    }

    fn create_swapchain(&self, extent: Extent2D) -> RhiResult<SwapchainInfo> {
        let mut state = self.state.lock();
        if extent.is_empty() {
            return Err(RhiError::SwapchainError(format!(
                "cannot create a swapchain of size {extent}"
            )));
        }
        if state.swapchain.take().is_some() {
            state.events.push(DeviceEvent::SwapchainDestroyed);
        }
        let info = SwapchainInfo {
            extent,
            image_count: state.surface.min_image_count.max(2),
        };
        state.swapchain = Some(info);
        state.next_image = 0;
        state.events.push(DeviceEvent::SwapchainCreated(extent));
        Ok(info)
    }

    fn destroy_swapchain(&self) {
        let mut state = self.state.lock();
        if state.swapchain.take().is_some() {
            state.events.push(DeviceEvent::SwapchainDestroyed);
        }
    }

    fn acquire_next_image(&self, signal: SemaphoreHandle) -> RhiResult<AcquiredImage> {
        let mut state = self.state.lock();
        state.semaphores.get(signal)?;
        let Some(swapchain) = state.swapchain else {
            return Err(RhiError::SwapchainError("no swapchain".to_string()));
        };
        if state.acquire_script.pop_front().unwrap_or(false) {
            return Err(RhiError::SwapchainOutOfDate);
        }
        let index = state.next_image % swapchain.image_count;
        state.next_image = state.next_image.wrapping_add(1);
        state.events.push(DeviceEvent::Acquired(index));
        Ok(AcquiredImage {
            index,
            suboptimal: false,
        })
    }

    fn present(&self, image_index: u32, wait: SemaphoreHandle) -> RhiResult<PresentStatus> {
        let mut state = self.state.lock();
        state.semaphores.get(wait)?;
        if state.take_failure(FailPoint::Present) {
            return Err(RhiError::VulkanError(ash::vk::Result::ERROR_SURFACE_LOST_KHR));
        }
        let status = state
            .present_script
            .pop_front()
            .unwrap_or(PresentStatus::Optimal);
        if status == PresentStatus::OutOfDate {
            warn!("Headless present: swapchain out of date");
        } else {
            state.events.push(DeviceEvent::Presented(image_index));
        }
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferUsage;
    use crate::command::CommandEncoder;

    fn recorded_copy(device: &HeadlessDevice) -> (CommandPoolHandle, CommandBufferHandle, BufferHandle, BufferHandle) {
        let pool = device.create_command_pool(CommandPoolKind::Transient).unwrap();
        let cmd = device.allocate_command_buffer(pool).unwrap();
        let src = device.create_buffer(&BufferDesc::staging(4)).unwrap();
        let dst = device
            .create_buffer(&BufferDesc::new(BufferUsage::Storage, 4))
            .unwrap();
        device.write_buffer(src, 0, &[1, 2, 3, 4]).unwrap();
        device.begin_command_buffer(cmd).unwrap();
        CommandEncoder::new(device, cmd).copy_buffer(src, dst, 4).unwrap();
        device.end_command_buffer(cmd).unwrap();
        (pool, cmd, src, dst)
    }

    #[test]
    fn test_waiting_on_fence_completes_submission_and_copies() {
        let device = HeadlessDevice::new();
        let (_, cmd, _, dst) = recorded_copy(&device);
        let fence = device.create_fence(false).unwrap();

        device.submit(&Submission::new(&[cmd], Some(fence))).unwrap();
        assert!(!device.is_fence_signaled(fence).unwrap());
        assert_eq!(device.read_buffer(dst).unwrap(), vec![0; 4]);

        device.wait_for_fence(fence, u64::MAX).unwrap();
        assert!(device.is_fence_signaled(fence).unwrap());
        assert_eq!(device.read_buffer(dst).unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(device.pending_submissions(), 0);
    }

    #[test]
    fn test_waiting_on_unsubmitted_fence_times_out() {
        let device = HeadlessDevice::new();
        let fence = device.create_fence(false).unwrap();
        assert!(matches!(
            device.wait_for_fence(fence, 0),
            Err(RhiError::Timeout(_))
        ));
    }

    #[test]
    fn test_destroying_pending_resources_is_a_violation() {
        let device = HeadlessDevice::new();
        let (_, cmd, src, _) = recorded_copy(&device);
        device.submit(&Submission::new(&[cmd], None)).unwrap();
        device.destroy_buffer(src);
        assert_eq!(device.violations().len(), 1);
    }

    #[test]
    fn test_submitting_unended_buffer_fails() {
        let device = HeadlessDevice::new();
        let pool = device.create_command_pool(CommandPoolKind::Transient).unwrap();
        let cmd = device.allocate_command_buffer(pool).unwrap();
        device.begin_command_buffer(cmd).unwrap();
        assert!(device.submit(&Submission::new(&[cmd], None)).is_err());
    }

    #[test]
    fn test_scripted_swapchain_results() {
        let device = HeadlessDevice::with_surface_image_count(3);
        let semaphore = device.create_semaphore().unwrap();
        let info = device.create_swapchain(Extent2D::new(64, 32)).unwrap();
        assert_eq!(info.image_count, 3);

        device.script_acquire_out_of_date();
        assert!(matches!(
            device.acquire_next_image(semaphore),
            Err(RhiError::SwapchainOutOfDate)
        ));
        assert_eq!(device.acquire_next_image(semaphore).unwrap().index, 0);

        device.script_present(PresentStatus::OutOfDate);
        assert_eq!(device.present(0, semaphore).unwrap(), PresentStatus::OutOfDate);
        assert_eq!(device.present(0, semaphore).unwrap(), PresentStatus::Optimal);
    }
}
