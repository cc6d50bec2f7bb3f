//! Vulkan implementation of [`GpuDevice`].
//!
//! [`VulkanDevice`] owns the instance, surface, logical device and swapchain,
//! and keeps every object the renderer creates in generation-checked
//! [`ResourceTable`]s keyed by the typed handles of [`crate::resource`].
//!
//! Locking:
//! - `tables` guards all resource tables; command recording happens under it.
//! - `swapchain` is only ever taken after `tables`, never before.
//! - `queue` serializes submission, presentation and idle waits.

pub mod acceleration;
pub mod buffer;
pub mod command;
pub mod descriptor;
pub mod device;
pub mod image;
pub mod instance;
pub mod physical_device;
pub mod pipeline;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;

use std::mem::ManuallyDrop;

use ash::vk;
use parking_lot::Mutex;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, info, warn};

use crate::acceleration::{AccelerationStructureDesc, AccelerationStructureInfo};
use crate::buffer::BufferDesc;
use crate::command::{CommandPoolKind, GpuCommand};
use crate::descriptor::{DescriptorBinding, DescriptorPoolDesc, DescriptorResource, DescriptorWrite};
use crate::device::GpuDevice;
use crate::error::{RhiError, RhiResult};
use crate::image::{ImageDesc, ImageUsage};
use crate::pipeline::PipelineDesc;
use crate::resource::{
    AccelerationStructureHandle, AccelerationStructureResource, BufferHandle, BufferResource,
    CommandBufferHandle, CommandBufferResource, CommandPoolHandle, CommandPoolResource,
    DescriptorPoolHandle, DescriptorPoolResource, DescriptorSetHandle, DescriptorSetLayoutHandle,
    DescriptorSetLayoutResource, DescriptorSetResource, FenceHandle, FenceResource, ImageHandle,
    ImageResource, PipelineHandle, PipelineResource, ResourceTable, SemaphoreHandle,
    SemaphoreResource,
};
use crate::swapchain::{AcquiredImage, Extent2D, PresentStatus, SurfaceInfo, SwapchainInfo};
use crate::sync::Submission;

use self::acceleration::{AccelerationStructureEntry, BuildInputs};
use self::buffer::BufferEntry;
use self::descriptor::{ResolvedResource, ResolvedWrite};
use self::device::Device;
use self::image::ImageEntry;
use self::instance::Instance;
use self::pipeline::PipelineEntry;
use self::surface::Surface;
use self::swapchain::Swapchain;

/// Format the display pipeline targets before a swapchain exists.
const DEFAULT_SURFACE_FORMAT: vk::Format = vk::Format::B8G8R8A8_SRGB;

struct CommandBufferEntry {
    buffer: vk::CommandBuffer,
    pool: CommandPoolHandle,
}

struct DescriptorSetEntry {
    set: vk::DescriptorSet,
    pool: DescriptorPoolHandle,
}

struct Tables {
    buffers: ResourceTable<BufferResource, BufferEntry>,
    images: ResourceTable<ImageResource, ImageEntry>,
    acceleration_structures: ResourceTable<AccelerationStructureResource, AccelerationStructureEntry>,
    fences: ResourceTable<FenceResource, vk::Fence>,
    semaphores: ResourceTable<SemaphoreResource, vk::Semaphore>,
    command_pools: ResourceTable<CommandPoolResource, vk::CommandPool>,
    command_buffers: ResourceTable<CommandBufferResource, CommandBufferEntry>,
    set_layouts: ResourceTable<DescriptorSetLayoutResource, vk::DescriptorSetLayout>,
    descriptor_pools: ResourceTable<DescriptorPoolResource, vk::DescriptorPool>,
    descriptor_sets: ResourceTable<DescriptorSetResource, DescriptorSetEntry>,
    pipelines: ResourceTable<PipelineResource, PipelineEntry>,
}

impl Tables {
    const fn new() -> Self {
        Self {
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
        }
    }

    fn command_buffer(&self, handle: CommandBufferHandle) -> RhiResult<vk::CommandBuffer> {
        Ok(self.command_buffers.get(handle)?.buffer)
    }

    fn address(&self, handle: BufferHandle) -> RhiResult<vk::DeviceAddress> {
        Ok(self.buffers.get(handle)?.address)
    }

    fn resolve_write(&self, write: &DescriptorWrite) -> RhiResult<ResolvedWrite> {
        let resource = match write.resource {
            DescriptorResource::AccelerationStructure(handle) => ResolvedResource::AccelerationStructure(
                self.acceleration_structures.get(handle)?.handle,
            ),
            DescriptorResource::StorageImage(handle) => {
                ResolvedResource::StorageImage(self.images.get(handle)?.view)
            }
            DescriptorResource::SampledImage(handle) => {
                ResolvedResource::SampledImage(self.images.get(handle)?.view)
            }
            DescriptorResource::StorageBuffer(handle) => {
                ResolvedResource::StorageBuffer(self.buffers.get(handle)?.buffer)
            }
        };
        Ok(ResolvedWrite {
            binding: write.binding,
            array_element: write.array_element,
            resource,
        })
    }
}

/// The Vulkan ray-tracing device.
///
/// Field order matters for teardown, which [`Drop`] performs explicitly:
/// resources, swapchain, logical device, surface, then instance.
pub struct VulkanDevice {
    tables: Mutex<Tables>,
    swapchain: Mutex<Option<Swapchain>>,
    queue: Mutex<()>,
    sampler: vk::Sampler,
    name: String,
    device: ManuallyDrop<Device>,
    surface: Surface,
    instance: ManuallyDrop<Instance>,
}

impl VulkanDevice {
    /// Creates the device for a window.
    ///
    /// Selects a ray-tracing capable GPU with one queue family for graphics,
    /// compute and presentation.
    ///
    /// The window must outlive the device.
    ///
    /// # Arguments
    ///
    /// * `window` - Window providing the display and surface handles
    /// * `enable_validation` - Enables validation layers and the debug messenger
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::NoSuitableGpu`] when no device qualifies, or the
    /// Vulkan error that stopped initialization.
    pub fn new<W>(window: &W, enable_validation: bool) -> RhiResult<Self>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let display = window
            .display_handle()
            .map_err(|e| RhiError::SurfaceError(format!("no display handle: {e}")))?
            .as_raw();
        let window_handle = window
            .window_handle()
            .map_err(|e| RhiError::SurfaceError(format!("no window handle: {e}")))?
            .as_raw();

        let extensions = Surface::required_extensions(display)?;
        let instance = Instance::new(enable_validation, &extensions)?;

        // SAFETY: the caller keeps the window alive for the device's lifetime.
        let mut surface = unsafe { Surface::new(&instance, display, window_handle)? };

        let physical = match physical_device::select_physical_device(
            instance.handle(),
            surface.handle(),
            surface.loader(),
        ) {
            Ok(physical) => physical,
            Err(e) => {
                surface.destroy();
                return Err(e);
            }
        };

        let device = match Device::new(&instance, physical) {
            Ok(device) => device,
            Err(e) => {
                surface.destroy();
                return Err(e);
            }
        };

        let sampler = match descriptor::create_default_sampler(&device) {
            Ok(sampler) => sampler,
            Err(e) => {
                drop(device);
                surface.destroy();
                return Err(e);
            }
        };

        let name = device.device_name().to_string();
        info!("Vulkan device ready: {}", name);

        Ok(Self {
            tables: Mutex::new(Tables::new()),
            swapchain: Mutex::new(None),
            queue: Mutex::new(()),
            sampler,
            name,
            device: ManuallyDrop::new(device),
            surface,
            instance: ManuallyDrop::new(instance),
        })
    }

    fn record(&self, tables: &Tables, cb: vk::CommandBuffer, command: &GpuCommand) -> RhiResult<()> {
        let device = &*self.device;
        match command {
            GpuCommand::CopyBuffer { src, dst, size } => {
                let src = tables.buffers.get(*src)?.buffer;
                let dst = tables.buffers.get(*dst)?.buffer;
                command::copy_buffer(device, cb, src, dst, *size);
            }
            GpuCommand::CopyBufferToImage { src, dst } => {
                let src = tables.buffers.get(*src)?.buffer;
                let image = tables.images.get(*dst)?;
                command::copy_buffer_to_image(device, cb, src, image.image, image.extent);
            }
            GpuCommand::MemoryBarrier { src, dst } => {
                command::memory_barrier(device, cb, *src, *dst);
            }
            GpuCommand::ImageBarrier { image, from, to } => {
                let image = tables.images.get(*image)?.image;
                command::image_barrier(device, cb, image, *from, *to);
            }
            GpuCommand::ClearImage { image } => {
                let image = tables.images.get(*image)?.image;
                command::clear_image(device, cb, image);
            }
            GpuCommand::BuildAccelerationStructure {
                target,
                desc,
                scratch,
            } => {
                let target = tables.acceleration_structures.get(*target)?.handle;
                let inputs = match *desc {
                    AccelerationStructureDesc::BottomLevel {
                        vertices, indices, ..
                    } => BuildInputs {
                        vertices: tables.address(vertices)?,
                        indices: tables.address(indices)?,
                        instances: 0,
                    },
                    AccelerationStructureDesc::TopLevel { instances, .. } => BuildInputs {
                        instances: tables.address(instances)?,
                        ..BuildInputs::default()
                    },
                };
                let scratch = tables.address(*scratch)?;
                acceleration::record_build(device, cb, target, desc, inputs, scratch);
            }
            GpuCommand::TraceRays {
                pipeline,
                descriptor_sets,
                push_constants,
                extent,
            } => {
                let pipeline = tables.pipelines.get(*pipeline)?;
                let sets = descriptor_sets
                    .iter()
                    .map(|&set| Ok(tables.descriptor_sets.get(set)?.set))
                    .collect::<RhiResult<Vec<_>>>()?;
                command::trace_rays(device, cb, pipeline, &sets, push_constants, *extent);
            }
            GpuCommand::Display {
                pipeline,
                descriptor_set,
                image_index,
                push_constants,
            } => {
                let pipeline = tables.pipelines.get(*pipeline)?;
                let set = tables.descriptor_sets.get(*descriptor_set)?.set;
                let swapchain = self.swapchain.lock();
                let swapchain = swapchain
                    .as_ref()
                    .ok_or_else(|| RhiError::SwapchainError("no swapchain".to_string()))?;
                let (image, view) = swapchain.image(*image_index).ok_or_else(|| {
                    RhiError::InvalidHandle(format!("swapchain image {image_index}"))
                })?;
                command::display(
                    device,
                    cb,
                    pipeline,
                    set,
                    push_constants,
                    image,
                    view,
                    swapchain.extent(),
                );
            }
        }
        Ok(())
    }
}

impl GpuDevice for VulkanDevice {
    fn name(&self) -> &str {
        &self.name
    }

    // ========================================================================
    // Buffers and images
    // ========================================================================

    fn create_buffer(&self, desc: &BufferDesc) -> RhiResult<BufferHandle> {
        let entry = BufferEntry::new(&self.device, desc)?;
        let mut tables = self.tables.lock();
        let handle = tables.buffers.insert(entry);
        tables.buffers.mark_ready(handle)?;
        Ok(handle)
    }

    fn write_buffer(&self, buffer: BufferHandle, offset: u64, data: &[u8]) -> RhiResult<()> {
        self.tables.lock().buffers.get(buffer)?.write(offset, data)
    }

    fn destroy_buffer(&self, buffer: BufferHandle) {
        let entry = self.tables.lock().buffers.remove(buffer);
        match entry {
            Some(entry) => entry.destroy(&self.device),
            None => warn!("destroy_buffer: stale handle {:?}", buffer),
        }
    }

    fn create_image(&self, desc: &ImageDesc) -> RhiResult<ImageHandle> {
        let entry = ImageEntry::new(&self.device, desc)?;
        let mut tables = self.tables.lock();
        let handle = tables.images.insert(entry);
        tables.images.mark_ready(handle)?;
        Ok(handle)
    }

    fn destroy_image(&self, image: ImageHandle) {
        let entry = self.tables.lock().images.remove(image);
        match entry {
            Some(entry) => entry.destroy(&self.device),
            None => warn!("destroy_image: stale handle {:?}", image),
        }
    }

    // ========================================================================
    // Acceleration structures
    // ========================================================================

    fn create_acceleration_structure(
        &self,
        desc: &AccelerationStructureDesc,
    ) -> RhiResult<AccelerationStructureInfo> {
        {
            let tables = self.tables.lock();
            match *desc {
                AccelerationStructureDesc::BottomLevel {
                    vertices, indices, ..
                } => {
                    tables.buffers.get(vertices)?;
                    tables.buffers.get(indices)?;
                }
                AccelerationStructureDesc::TopLevel { instances, .. } => {
                    tables.buffers.get(instances)?;
                }
            }
        }

        let entry = AccelerationStructureEntry::new(&self.device, desc)?;
        let reference = entry.reference;
        let scratch_size = entry.scratch_size;
        let handle = self.tables.lock().acceleration_structures.insert(entry);
        Ok(AccelerationStructureInfo {
            handle,
            reference,
            scratch_size,
        })
    }

    fn destroy_acceleration_structure(&self, handle: AccelerationStructureHandle) {
        let entry = self.tables.lock().acceleration_structures.remove(handle);
        match entry {
            Some(entry) => entry.destroy(&self.device),
            None => warn!("destroy_acceleration_structure: stale handle {:?}", handle),
        }
    }

    // ========================================================================
    // Synchronization
    // ========================================================================

    fn create_fence(&self, signaled: bool) -> RhiResult<FenceHandle> {
        let fence = sync::create_fence(&self.device, signaled)?;
        Ok(self.tables.lock().fences.insert(fence))
    }

    fn destroy_fence(&self, fence: FenceHandle) {
        if let Some(fence) = self.tables.lock().fences.remove(fence) {
            unsafe { self.device.handle().destroy_fence(fence, None) };
        }
    }

    fn wait_for_fence(&self, fence: FenceHandle, timeout_ns: u64) -> RhiResult<()> {
        let fence = *self.tables.lock().fences.get(fence)?;
        sync::wait_for_fence(&self.device, fence, timeout_ns)
    }

    fn reset_fence(&self, fence: FenceHandle) -> RhiResult<()> {
        let fence = *self.tables.lock().fences.get(fence)?;
        sync::reset_fence(&self.device, fence)
    }

    fn is_fence_signaled(&self, fence: FenceHandle) -> RhiResult<bool> {
        let fence = *self.tables.lock().fences.get(fence)?;
        sync::is_fence_signaled(&self.device, fence)
    }

    fn create_semaphore(&self) -> RhiResult<SemaphoreHandle> {
        let semaphore = sync::create_semaphore(&self.device)?;
        Ok(self.tables.lock().semaphores.insert(semaphore))
    }

    fn destroy_semaphore(&self, semaphore: SemaphoreHandle) {
        if let Some(semaphore) = self.tables.lock().semaphores.remove(semaphore) {
            unsafe { self.device.handle().destroy_semaphore(semaphore, None) };
        }
    }

    // ========================================================================
    // Command pools and buffers
    // ========================================================================

    fn create_command_pool(&self, kind: CommandPoolKind) -> RhiResult<CommandPoolHandle> {
        let pool = command::create_pool(&self.device, kind)?;
        Ok(self.tables.lock().command_pools.insert(pool))
    }

    fn destroy_command_pool(&self, pool: CommandPoolHandle) {
        let mut tables = self.tables.lock();
        let Some(vk_pool) = tables.command_pools.remove(pool) else {
            warn!("destroy_command_pool: stale handle {:?}", pool);
            return;
        };

        let owned: Vec<CommandBufferHandle> = tables
            .command_buffers
            .iter()
            .filter(|(_, entry)| entry.pool == pool)
            .map(|(handle, _)| handle)
            .collect();
        for handle in owned {
            tables.command_buffers.remove(handle);
        }

        unsafe { self.device.handle().destroy_command_pool(vk_pool, None) };
    }

    fn allocate_command_buffer(&self, pool: CommandPoolHandle) -> RhiResult<CommandBufferHandle> {
        let mut tables = self.tables.lock();
        let vk_pool = *tables.command_pools.get(pool)?;
        let buffer = command::allocate(&self.device, vk_pool)?;
        Ok(tables
            .command_buffers
            .insert(CommandBufferEntry { buffer, pool }))
    }

    fn free_command_buffers(&self, pool: CommandPoolHandle, buffers: &[CommandBufferHandle]) {
        let mut tables = self.tables.lock();
        let Ok(&vk_pool) = tables.command_pools.get(pool) else {
            warn!("free_command_buffers: stale pool {:?}", pool);
            return;
        };

        let mut freed = Vec::with_capacity(buffers.len());
        for &handle in buffers {
            match tables.command_buffers.get(handle) {
                Ok(entry) if entry.pool == pool => {
                    freed.push(entry.buffer);
                    tables.command_buffers.remove(handle);
                }
                Ok(_) => warn!("command buffer {:?} does not belong to {:?}", handle, pool),
                Err(e) => warn!("free_command_buffers: {}", e),
            }
        }

        if !freed.is_empty() {
            unsafe { self.device.handle().free_command_buffers(vk_pool, &freed) };
        }
    }

    fn begin_command_buffer(&self, buffer: CommandBufferHandle) -> RhiResult<()> {
        let tables = self.tables.lock();
        command::begin(&self.device, tables.command_buffer(buffer)?)
    }

    fn end_command_buffer(&self, buffer: CommandBufferHandle) -> RhiResult<()> {
        let tables = self.tables.lock();
        command::end(&self.device, tables.command_buffer(buffer)?)
    }

    fn encode(&self, buffer: CommandBufferHandle, command: GpuCommand) -> RhiResult<()> {
        let tables = self.tables.lock();
        let cb = tables.command_buffer(buffer)?;
        self.record(&tables, cb, &command)
    }

    // ========================================================================
    // Descriptors and pipelines
    // ========================================================================

    fn create_descriptor_set_layout(
        &self,
        bindings: &[DescriptorBinding],
    ) -> RhiResult<DescriptorSetLayoutHandle> {
        let layout = descriptor::create_set_layout(&self.device, bindings)?;
        Ok(self.tables.lock().set_layouts.insert(layout))
    }

    fn destroy_descriptor_set_layout(&self, layout: DescriptorSetLayoutHandle) {
        if let Some(layout) = self.tables.lock().set_layouts.remove(layout) {
            unsafe {
                self.device
                    .handle()
                    .destroy_descriptor_set_layout(layout, None)
            };
        }
    }

    fn create_descriptor_pool(&self, desc: &DescriptorPoolDesc) -> RhiResult<DescriptorPoolHandle> {
        let pool = descriptor::create_pool(&self.device, desc)?;
        Ok(self.tables.lock().descriptor_pools.insert(pool))
    }

    fn destroy_descriptor_pool(&self, pool: DescriptorPoolHandle) {
        let mut tables = self.tables.lock();
        let Some(vk_pool) = tables.descriptor_pools.remove(pool) else {
            return;
        };

        let owned: Vec<DescriptorSetHandle> = tables
            .descriptor_sets
            .iter()
            .filter(|(_, entry)| entry.pool == pool)
            .map(|(handle, _)| handle)
            .collect();
        for handle in owned {
            tables.descriptor_sets.remove(handle);
        }

        unsafe { self.device.handle().destroy_descriptor_pool(vk_pool, None) };
    }

    fn allocate_descriptor_set(
        &self,
        pool: DescriptorPoolHandle,
        layout: DescriptorSetLayoutHandle,
        variable_count: Option<u32>,
    ) -> RhiResult<DescriptorSetHandle> {
        let mut tables = self.tables.lock();
        let vk_pool = *tables.descriptor_pools.get(pool)?;
        let vk_layout = *tables.set_layouts.get(layout)?;
        let set = descriptor::allocate_set(&self.device, vk_pool, vk_layout, variable_count)?;
        Ok(tables
            .descriptor_sets
            .insert(DescriptorSetEntry { set, pool }))
    }

    fn write_descriptors(&self, set: DescriptorSetHandle, writes: &[DescriptorWrite]) -> RhiResult<()> {
        let tables = self.tables.lock();
        let vk_set = tables.descriptor_sets.get(set)?.set;
        let resolved = writes
            .iter()
            .map(|write| tables.resolve_write(write))
            .collect::<RhiResult<Vec<_>>>()?;
        let general_views: Vec<vk::ImageView> = tables
            .images
            .iter()
            .filter(|(_, image)| image.usage == ImageUsage::RenderTarget)
            .map(|(_, image)| image.view)
            .collect();
        descriptor::update_set(&self.device, vk_set, self.sampler, &resolved, &general_views);
        Ok(())
    }

    fn create_pipeline(&self, desc: &PipelineDesc) -> RhiResult<PipelineHandle> {
        let set_layouts = {
            let tables = self.tables.lock();
            desc.set_layouts()
                .iter()
                .map(|&layout| Ok(*tables.set_layouts.get(layout)?))
                .collect::<RhiResult<Vec<_>>>()?
        };
        let color_format = self
            .swapchain
            .lock()
            .as_ref()
            .map_or(DEFAULT_SURFACE_FORMAT, Swapchain::format);

        let entry = PipelineEntry::new(&self.device, desc, &set_layouts, color_format)?;
        let mut tables = self.tables.lock();
        let handle = tables.pipelines.insert(entry);
        tables.pipelines.mark_ready(handle)?;
        Ok(handle)
    }

    fn destroy_pipeline(&self, pipeline: PipelineHandle) {
        if let Some(entry) = self.tables.lock().pipelines.remove(pipeline) {
            entry.destroy(&self.device);
        }
    }

    // ========================================================================
    // Queue
    // ========================================================================

    fn submit(&self, submission: &Submission<'_>) -> RhiResult<()> {
        let (command_buffers, wait, signal, fence) = {
            let tables = self.tables.lock();
            let command_buffers = submission
                .command_buffers
                .iter()
                .map(|&cb| tables.command_buffer(cb))
                .collect::<RhiResult<Vec<_>>>()?;
            let wait = submission
                .wait_semaphores
                .iter()
                .map(|&s| Ok(*tables.semaphores.get(s)?))
                .collect::<RhiResult<Vec<_>>>()?;
            let signal = submission
                .signal_semaphores
                .iter()
                .map(|&s| Ok(*tables.semaphores.get(s)?))
                .collect::<RhiResult<Vec<_>>>()?;
            let fence = match submission.fence {
                Some(fence) => *tables.fences.get(fence)?,
                None => vk::Fence::null(),
            };
            (command_buffers, wait, signal, fence)
        };

        let _queue = self.queue.lock();
        sync::submit(&self.device, &command_buffers, &wait, &signal, fence)
    }

    fn wait_idle(&self) -> RhiResult<()> {
        let _queue = self.queue.lock();
        self.device.wait_idle()
    }

    // ========================================================================
    // Presentation
    // ========================================================================

    fn surface_info(&self) -> RhiResult<SurfaceInfo> {
        let capabilities = self.surface.capabilities(self.device.physical().device)?;
        Ok(SurfaceInfo {
            min_image_count: capabilities.min_image_count,
            max_image_count: (capabilities.max_image_count > 0)
                .then_some(capabilities.max_image_count),
        })
    }

    fn create_swapchain(&self, extent: Extent2D) -> RhiResult<SwapchainInfo> {
        let mut slot = self.swapchain.lock();
        let created = Swapchain::new(&self.device, &self.surface, extent, slot.as_ref())?;
        let info = SwapchainInfo {
            extent: created.extent(),
            image_count: created.image_count(),
        };
        if let Some(mut old) = slot.replace(created) {
            old.destroy(&self.device);
        }
        Ok(info)
    }

    fn destroy_swapchain(&self) {
        if let Some(mut swapchain) = self.swapchain.lock().take() {
            swapchain.destroy(&self.device);
        }
    }

    fn acquire_next_image(&self, signal: SemaphoreHandle) -> RhiResult<AcquiredImage> {
        let semaphore = *self.tables.lock().semaphores.get(signal)?;
        let slot = self.swapchain.lock();
        let swapchain = slot.as_ref().ok_or(RhiError::SwapchainOutOfDate)?;
        swapchain.acquire_next_image(&self.device, semaphore)
    }

    fn present(&self, image_index: u32, wait: SemaphoreHandle) -> RhiResult<PresentStatus> {
        let semaphore = *self.tables.lock().semaphores.get(wait)?;
        let _queue = self.queue.lock();
        let slot = self.swapchain.lock();
        let swapchain = slot.as_ref().ok_or(RhiError::SwapchainOutOfDate)?;
        swapchain.present(&self.device, image_index, semaphore)
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            tracing::error!("Failed to wait for device idle during drop: {:?}", e);
        }

        let device = &*self.device;
        let tables = self.tables.get_mut();
        let leaked = tables.buffers.len()
            + tables.images.len()
            + tables.acceleration_structures.len()
            + tables.pipelines.len();
        if leaked > 0 {
            debug!("Releasing {} resource(s) still alive at device drop", leaked);
        }

        for (_, pipeline) in tables.pipelines.drain() {
            pipeline.destroy(device);
        }
        for (_, structure) in tables.acceleration_structures.drain() {
            structure.destroy(device);
        }
        for (_, buffer) in tables.buffers.drain() {
            buffer.destroy(device);
        }
        for (_, image) in tables.images.drain() {
            image.destroy(device);
        }
        unsafe {
            tables.descriptor_sets.drain();
            for (_, pool) in tables.descriptor_pools.drain() {
                device.handle().destroy_descriptor_pool(pool, None);
            }
            for (_, layout) in tables.set_layouts.drain() {
                device.handle().destroy_descriptor_set_layout(layout, None);
            }
            tables.command_buffers.drain();
            for (_, pool) in tables.command_pools.drain() {
                device.handle().destroy_command_pool(pool, None);
            }
            for (_, fence) in tables.fences.drain() {
                device.handle().destroy_fence(fence, None);
            }
            for (_, semaphore) in tables.semaphores.drain() {
                device.handle().destroy_semaphore(semaphore, None);
            }
            device.handle().destroy_sampler(self.sampler, None);
        }

        if let Some(mut swapchain) = self.swapchain.get_mut().take() {
            swapchain.destroy(device);
        }

        // SAFETY: nothing references the device, surface or instance past this point.
        unsafe {
            ManuallyDrop::drop(&mut self.device);
        }
        self.surface.destroy();
        unsafe {
            ManuallyDrop::drop(&mut self.instance);
        }
        info!("Vulkan device destroyed");
    }
}
