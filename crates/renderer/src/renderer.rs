//! Frame scheduler.
//!
//! [`Renderer`] owns the per-frame resources and drives one frame per tick:
//!
//! ```text
//! WaitFence ─► ReclaimRetired ─► UpdateDescriptor ─► FlushDeferred
//!     ─► Acquire ─► Record ─► Submit ─► Present
//! ```
//!
//! - **WaitFence**: block until the slot's previous submission has executed
//! - **ReclaimRetired**: age retired structures, reclaim executed batches
//! - **UpdateDescriptor**: bind the current top-level structure into the
//!   slot's render set
//! - **FlushDeferred**: submit work released by jobs since the last tick
//! - **Record**: trace into the slot's render target, then resolve it into
//!   the acquired swapchain image
//! - **Submit** / **Present**: semaphore-chained; an out-of-date or
//!   suboptimal present marks the swapchain stale instead of failing
//!
//! # Resize
//!
//! Every frame compares the drawable size with the swapchain extent. On a
//! mismatch (or after a stale present) the device is drained, render
//! targets are recreated and accumulation restarts from a cleared target.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, error, info, trace, warn};

use tracer_rhi::command::CommandEncoder;
use tracer_rhi::descriptor::{DescriptorResource, DescriptorWrite};
use tracer_rhi::image::ImageState;
use tracer_rhi::pipeline::PipelineDesc;
use tracer_rhi::sync::{DEFAULT_FENCE_TIMEOUT, Submission};
use tracer_rhi::{DeviceRef, DrawableSurface, Extent2D, RhiError, RhiResult};
use tracer_scene::{CameraView, DirtyTracker, Scene};

use crate::MAX_FRAMES_IN_FLIGHT;
use crate::command_buffer_manager::CommandBufferManager;
use crate::config::RendererConfig;
use crate::descriptor_manager::{DescriptorManager, ResourceClass};
use crate::error::{RendererError, RendererResult};
use crate::frame::{
    FrameContext, FrameResources, FrameStatus, GpuObject, INSTANCE_BINDING, MATERIAL_BINDING,
    RenderTargets, TLAS_BINDING, create_frame_command_pool, display_set_bindings,
    frame_descriptor_pool_desc, previous_frame, render_set_bindings, track,
};
use crate::gpu_types::{DisplayPushConstants, TracePushConstants};
use crate::jobs::{JobContext, JobGraph, JobReport};
use crate::scene_resources::{SceneResources, SceneTlas};

/// Ray-tracing renderer for one surface.
///
/// # Resource Destruction Order
///
/// [`shutdown`](Self::shutdown) drains the device and destroys everything in
/// reverse creation order: render targets, swapchain, frame objects, scene
/// resources, command pools, descriptor arrays. It runs on drop if it was
/// not called explicitly.
pub struct Renderer {
    device: DeviceRef,
    config: RendererConfig,
    scene: Arc<RwLock<Scene>>,
    dirty: Arc<DirtyTracker>,

    commands: Arc<CommandBufferManager>,
    descriptors: Arc<DescriptorManager>,
    resources: Arc<SceneResources>,

    /// `None` once shut down.
    context: Option<FrameContext>,
    targets: Option<RenderTargets>,

    frame_index: usize,
    /// Frames accumulated into the render targets since the last reset.
    accumulated_frames: u32,
    /// Clear the previous render target before the next trace.
    clear_previous: bool,
    /// The last acquire or present reported a mismatched swapchain.
    swapchain_stale: bool,
}

impl Renderer {
    /// Creates the renderer and, unless the surface is zero-sized, its
    /// swapchain.
    ///
    /// # Errors
    ///
    /// Returns an error if any GPU object cannot be created. Objects created
    /// before the failure are destroyed.
    pub fn new(
        device: DeviceRef,
        scene: Arc<RwLock<Scene>>,
        dirty: Arc<DirtyTracker>,
        config: RendererConfig,
        surface: &dyn DrawableSurface,
    ) -> RendererResult<Self> {
        let surface_info = device.surface_info()?;
        let frames_in_flight = config.frames_in_flight.map_or_else(
            || (surface_info.min_image_count as usize).clamp(1, MAX_FRAMES_IN_FLIGHT),
            |frames| frames.max(1),
        );
        info!(
            "Initializing renderer on {} ({} frames in flight)",
            device.name(),
            frames_in_flight
        );

        let descriptors = Arc::new(DescriptorManager::new(device.clone()));
        for class in ResourceClass::ALL {
            if let Err(e) = descriptors.create_descriptor_pool(class, config.descriptor_capacity) {
                error!("Failed to create {} descriptor pool: {}", class, e);
                descriptors.destroy_all_descriptor_pools();
                return Err(e.into());
            }
        }

        let commands = Arc::new(CommandBufferManager::new(device.clone()));
        let resources = Arc::new(SceneResources::new(
            device.clone(),
            commands.clone(),
            descriptors.clone(),
            frames_in_flight as u32,
        ));

        let mut created = Vec::new();
        let context = match Self::create_frame_context(
            &device,
            &config,
            &descriptors,
            frames_in_flight,
            &mut created,
        ) {
            Ok(context) => context,
            Err(e) => {
                error!("Failed to create frame resources: {}", e);
                for object in created.into_iter().rev() {
                    object.destroy(device.as_ref());
                }
                descriptors.destroy_all_descriptor_pools();
                return Err(e.into());
            }
        };

        let mut renderer = Self {
            device,
            config,
            scene,
            dirty,
            commands,
            descriptors,
            resources,
            context: Some(context),
            targets: None,
            frame_index: 0,
            accumulated_frames: 0,
            clear_previous: true,
            swapchain_stale: false,
        };

        let extent = surface.drawable_size();
        if !extent.is_empty() {
            // On failure, drop shuts down what was created.
            renderer.recreate_swapchain(extent)?;
        }
        Ok(renderer)
    }

    fn create_frame_context(
        device: &DeviceRef,
        config: &RendererConfig,
        descriptors: &DescriptorManager,
        frames_in_flight: usize,
        created: &mut Vec<GpuObject>,
    ) -> RhiResult<FrameContext> {
        let device = device.as_ref();
        let command_pool = create_frame_command_pool(device, created)?;
        let render_layout = track(
            created,
            GpuObject::SetLayout,
            device.create_descriptor_set_layout(&render_set_bindings()),
        )?;
        let display_layout = track(
            created,
            GpuObject::SetLayout,
            device.create_descriptor_set_layout(&display_set_bindings()),
        )?;
        let descriptor_pool = track(
            created,
            GpuObject::DescriptorPool,
            device.create_descriptor_pool(&frame_descriptor_pool_desc(frames_in_flight as u32)),
        )?;

        // Set 0 is per frame; sets 1.. are the bindless arrays.
        let mut trace_layouts = vec![render_layout];
        for class in ResourceClass::ALL {
            let layout = descriptors.descriptor_set_layout(class).ok_or_else(|| {
                RhiError::PipelineError(format!("no {class} descriptor set layout"))
            })?;
            trace_layouts.push(layout);
        }
        let trace_pipeline = track(
            created,
            GpuObject::Pipeline,
            device.create_pipeline(&PipelineDesc::ray_tracing(
                &config.shader_dir,
                trace_layouts,
                TracePushConstants::SIZE,
            )),
        )?;
        let display_pipeline = track(
            created,
            GpuObject::Pipeline,
            device.create_pipeline(&PipelineDesc::display(
                &config.shader_dir,
                vec![display_layout],
                DisplayPushConstants::SIZE,
            )),
        )?;

        let frames = (0..frames_in_flight)
            .map(|_| {
                FrameResources::new(
                    device,
                    command_pool,
                    descriptor_pool,
                    render_layout,
                    display_layout,
                    created,
                )
            })
            .collect::<RhiResult<Vec<_>>>()?;

        Ok(FrameContext {
            command_pool,
            render_layout,
            display_layout,
            descriptor_pool,
            trace_pipeline,
            display_pipeline,
            frames,
        })
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn device(&self) -> &DeviceRef {
        &self.device
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn scene(&self) -> &Arc<RwLock<Scene>> {
        &self.scene
    }

    pub fn dirty(&self) -> &Arc<DirtyTracker> {
        &self.dirty
    }

    pub fn commands(&self) -> &Arc<CommandBufferManager> {
        &self.commands
    }

    pub fn descriptors(&self) -> &Arc<DescriptorManager> {
        &self.descriptors
    }

    pub fn resources(&self) -> &Arc<SceneResources> {
        &self.resources
    }

    pub fn frames_in_flight(&self) -> usize {
        self.context.as_ref().map_or(0, |c| c.frames.len())
    }

    /// Slot the next frame renders into.
    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    pub fn accumulated_frames(&self) -> u32 {
        self.accumulated_frames
    }

    /// Extent of the current swapchain, if one exists.
    pub fn swapchain_extent(&self) -> Option<Extent2D> {
        self.targets.as_ref().map(RenderTargets::extent)
    }

    pub fn is_swapchain_stale(&self) -> bool {
        self.swapchain_stale
    }

    // ========================================================================
    // Jobs
    // ========================================================================

    /// Takes the accumulated dirty set and builds this frame's jobs.
    ///
    /// Any scene change restarts accumulation.
    pub fn render_jobs(&mut self) -> JobGraph {
        let dirty = self.dirty.take();
        if !dirty.flags.is_empty() {
            trace!("Scene changed ({:?}); restarting accumulation", dirty.flags);
            self.reset_accumulation();
        }
        JobGraph::render_jobs(&dirty)
    }

    /// Runs `graph` with the configured number of workers, logging failures.
    pub fn run_jobs(&self, graph: &JobGraph) -> JobReport<RendererError> {
        let context = JobContext {
            scene: &self.scene,
            resources: &self.resources,
            commands: &self.commands,
        };
        let report = if self.config.job_workers > 1 {
            graph.run_parallel(self.config.job_workers, |job| context.run(job))
        } else {
            graph.run_sequential(|job| context.run(job))
        };
        for (job, e) in &report.failed {
            error!("Job '{}' failed: {}", job, e);
        }
        report
    }

    /// One timer tick: build and run jobs, then render a frame.
    ///
    /// While the drawable has no area the dirty set is left untouched, so
    /// changes made meanwhile coalesce into one rebuild when drawing resumes.
    pub fn tick(&mut self, surface: &dyn DrawableSurface) -> RendererResult<FrameStatus> {
        if self.context.is_some() && surface.drawable_size().is_empty() {
            return Ok(self.render_frame(surface)?);
        }
        let graph = self.render_jobs();
        self.run_jobs(&graph);
        Ok(self.render_frame(surface)?)
    }

    fn reset_accumulation(&mut self) {
        self.accumulated_frames = 0;
        self.clear_previous = true;
    }

    // ========================================================================
    // Frame
    // ========================================================================

    /// Renders and presents one frame.
    ///
    /// # Errors
    ///
    /// Returns an error if a GPU operation fails. The frame is skipped and
    /// the next call starts over; nothing needs to be reset by the caller.
    pub fn render_frame(&mut self, surface: &dyn DrawableSurface) -> RhiResult<FrameStatus> {
        if self.context.is_none() {
            return Err(RhiError::InvalidHandle(
                "renderer has been shut down".to_string(),
            ));
        }

        let extent = surface.drawable_size();
        if extent.is_empty() {
            trace!("Drawable size is {}; skipping frame", extent);
            // Batches that already executed are still reclaimed
            self.commands.proceed_to_next_frame();
            self.commands.destroy_expired_resources();
            return Ok(FrameStatus::Skipped);
        }
        if self.swapchain_stale || self.swapchain_extent() != Some(extent) {
            self.recreate_swapchain(extent)?;
        }

        let index = self.frame_index;
        let (fence, image_available) = match self.context.as_ref() {
            Some(context) => (
                context.frames[index].fence,
                context.frames[index].image_available,
            ),
            None => return Ok(FrameStatus::Skipped),
        };

        // WaitFence
        self.device.wait_for_fence(fence, DEFAULT_FENCE_TIMEOUT)?;

        // ReclaimRetired
        self.resources.update_retired_resources();
        self.resources.destroy_retired_resources();
        self.commands.proceed_to_next_frame();
        self.commands.destroy_expired_resources();

        // UpdateDescriptor
        let tlas = self.resources.scene_tlas();
        self.bind_scene_tlas(index, tlas)?;

        // FlushDeferred
        self.commands.submit_command_buffers()?;

        let acquired = match self.device.acquire_next_image(image_available) {
            Ok(acquired) => acquired,
            Err(RhiError::SwapchainOutOfDate) => {
                debug!("Swapchain out of date on acquire");
                self.swapchain_stale = true;
                return Ok(FrameStatus::SwapchainStale);
            }
            Err(e) => return Err(e),
        };

        // Record and Submit
        let camera = self.scene.read().active_camera();
        if let Err(e) = self
            .record_frame(index, acquired.index, tlas.is_some(), camera.as_ref())
            .and_then(|()| self.submit_frame(index))
        {
            error!("Frame {} could not be submitted: {}", index, e);
            self.discard_acquired_image(index);
            return Err(e);
        }

        if let Some(targets) = self.targets.as_mut() {
            targets.initialized = true;
        }
        self.clear_previous = false;
        if tlas.is_some() {
            self.accumulated_frames = self.accumulated_frames.saturating_add(1);
        }
        let frame_count = self.frames_in_flight();
        self.frame_index = (index + 1) % frame_count;

        // Present
        let render_finished = match self.context.as_ref() {
            Some(context) => context.frames[index].render_finished,
            None => return Ok(FrameStatus::Skipped),
        };
        match self.device.present(acquired.index, render_finished) {
            Ok(status) if status.needs_recreate() || acquired.suboptimal => {
                debug!("Present returned {:?}; swapchain will be recreated", status);
                self.swapchain_stale = true;
                Ok(FrameStatus::SwapchainStale)
            }
            Ok(_) => Ok(FrameStatus::Presented),
            Err(RhiError::SwapchainOutOfDate) => {
                debug!("Swapchain out of date on present");
                self.swapchain_stale = true;
                Ok(FrameStatus::SwapchainStale)
            }
            Err(e) => {
                error!("Present failed: {}", e);
                Err(e)
            }
        }
    }

    /// Writes `tlas` into the slot's render set if it is not bound yet.
    fn bind_scene_tlas(&mut self, index: usize, tlas: Option<SceneTlas>) -> RhiResult<()> {
        let Some(context) = self.context.as_mut() else {
            return Ok(());
        };
        let frame = &mut context.frames[index];
        if frame.bound_tlas == tlas {
            return Ok(());
        }
        if let Some(tlas) = tlas {
            self.device.write_descriptors(
                frame.render_set,
                &[
                    DescriptorWrite::new(
                        TLAS_BINDING,
                        DescriptorResource::AccelerationStructure(tlas.tlas),
                    ),
                    DescriptorWrite::new(
                        INSTANCE_BINDING,
                        DescriptorResource::StorageBuffer(tlas.geometry_instances),
                    ),
                    DescriptorWrite::new(
                        MATERIAL_BINDING,
                        DescriptorResource::StorageBuffer(tlas.materials),
                    ),
                ],
            )?;
            trace!("Frame {} bound TLAS {:?}", index, tlas.tlas);
        }
        frame.bound_tlas = tlas;
        Ok(())
    }

    fn record_frame(
        &self,
        index: usize,
        image_index: u32,
        trace: bool,
        camera: Option<&CameraView>,
    ) -> RhiResult<()> {
        let (Some(context), Some(targets)) = (self.context.as_ref(), self.targets.as_ref()) else {
            return Err(RhiError::InvalidHandle("no frame resources".to_string()));
        };
        let frame = &context.frames[index];
        let current = targets.images[index];
        let previous = targets.images[previous_frame(index, targets.images.len())];

        self.device.begin_command_buffer(frame.command_buffer)?;
        let encoder = CommandEncoder::new(self.device.as_ref(), frame.command_buffer);

        if !targets.initialized {
            for &image in &targets.images {
                encoder.image_barrier(image, ImageState::Undefined, ImageState::ShaderReadWrite)?;
            }
        }
        if self.clear_previous {
            encoder.clear_image(previous)?;
        }

        if trace {
            let mut sets = vec![frame.render_set];
            sets.extend(self.descriptors.descriptor_sets());
            let push = match camera {
                Some(camera) => TracePushConstants::new(camera, self.accumulated_frames),
                None => TracePushConstants::without_camera(self.accumulated_frames),
            };
            encoder.trace_rays(
                context.trace_pipeline,
                &sets,
                bytemuck::bytes_of(&push),
                targets.extent(),
            )?;
        }

        let lens = camera.map(|c| c.lens).unwrap_or_default();
        encoder.image_barrier(current, ImageState::ShaderReadWrite, ImageState::ShaderRead)?;
        encoder.display(
            context.display_pipeline,
            frame.display_set,
            image_index,
            bytemuck::bytes_of(&DisplayPushConstants::new(&lens)),
        )?;
        encoder.image_barrier(current, ImageState::ShaderRead, ImageState::ShaderReadWrite)?;

        self.device.end_command_buffer(frame.command_buffer)
    }

    fn submit_frame(&self, index: usize) -> RhiResult<()> {
        let Some(context) = self.context.as_ref() else {
            return Err(RhiError::InvalidHandle("no frame resources".to_string()));
        };
        let frame = &context.frames[index];

        // Reset only once work that signals it is about to be submitted.
        self.device.reset_fence(frame.fence)?;

        let command_buffers = [frame.command_buffer];
        let wait = [frame.image_available];
        let signal = [frame.render_finished];
        self.device.submit(&Submission {
            command_buffers: &command_buffers,
            wait_semaphores: &wait,
            signal_semaphores: &signal,
            fence: Some(frame.fence),
        })
    }

    /// Recovers a slot whose acquired image will never be presented.
    ///
    /// Its fence may have been reset without a signaling submission, so it
    /// is replaced with a signaled one, and the swapchain is recreated on the
    /// next frame.
    fn discard_acquired_image(&mut self, index: usize) {
        self.swapchain_stale = true;
        if let Err(e) = self.device.wait_idle() {
            warn!("Waiting for device idle failed: {}", e);
        }
        if let Some(context) = self.context.as_mut()
            && let Err(e) = context.frames[index].renew_fence(self.device.as_ref())
        {
            error!("Cannot replace fence of frame {}: {}", index, e);
        }
    }

    /// Drains the device and rebuilds swapchain-sized resources.
    fn recreate_swapchain(&mut self, extent: Extent2D) -> RhiResult<()> {
        info!(
            "Recreating swapchain: {} -> {}",
            self.swapchain_extent().unwrap_or_default(),
            extent
        );
        self.device.wait_idle()?;

        if let Some(targets) = self.targets.take() {
            targets.destroy(self.device.as_ref());
        }
        let swapchain = self.device.create_swapchain(extent)?;
        let Some(context) = self.context.as_ref() else {
            return Err(RhiError::InvalidHandle(
                "renderer has been shut down".to_string(),
            ));
        };
        self.targets = Some(RenderTargets::new(
            self.device.as_ref(),
            swapchain,
            &context.frames,
        )?);

        self.swapchain_stale = false;
        self.reset_accumulation();
        debug!(
            "Swapchain ready: {} with {} image(s)",
            swapchain.extent, swapchain.image_count
        );
        Ok(())
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    /// Waits for the GPU and destroys every resource. Calling it again is a
    /// no-op.
    pub fn shutdown(&mut self) {
        let Some(context) = self.context.take() else {
            return;
        };
        info!("Shutting down renderer");

        if let Err(e) = self.device.wait_idle() {
            error!("Failed to wait for device idle during shutdown: {}", e);
        }

        if let Some(targets) = self.targets.take() {
            targets.destroy(self.device.as_ref());
        }
        self.device.destroy_swapchain();
        context.destroy(self.device.as_ref());
        self.resources.destroy_all();
        self.commands.shutdown();
        self.descriptors.destroy_all_descriptor_pools();

        info!("Renderer destroyed");
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
