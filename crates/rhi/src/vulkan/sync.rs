//! Fences, semaphores and queue submission.

use ash::vk;
use tracing::debug;

use crate::error::{RhiError, RhiResult};
use crate::vulkan::device::Device;

pub fn create_fence(device: &Device, signaled: bool) -> RhiResult<vk::Fence> {
    let flags = if signaled {
        vk::FenceCreateFlags::SIGNALED
    } else {
        vk::FenceCreateFlags::empty()
    };

    let create_info = vk::FenceCreateInfo::default().flags(flags);
    let fence = unsafe { device.handle().create_fence(&create_info, None)? };

    debug!(
        "Created fence ({})",
        if signaled { "signaled" } else { "unsignaled" }
    );
    Ok(fence)
}

/// Waits for the fence to become signaled.
///
/// # Errors
///
/// Returns [`RhiError::Timeout`] if `timeout` nanoseconds pass first.
pub fn wait_for_fence(device: &Device, fence: vk::Fence, timeout: u64) -> RhiResult<()> {
    let fences = [fence];
    match unsafe { device.handle().wait_for_fences(&fences, true, timeout) } {
        Ok(()) => Ok(()),
        Err(vk::Result::TIMEOUT) => Err(RhiError::Timeout(format!(
            "fence not signaled within {timeout} ns"
        ))),
        Err(e) => Err(e.into()),
    }
}

/// Resets the fence to the unsignaled state.
///
/// The fence must not be in use by any queue operation when this is called.
pub fn reset_fence(device: &Device, fence: vk::Fence) -> RhiResult<()> {
    let fences = [fence];
    unsafe { device.handle().reset_fences(&fences)? };
    Ok(())
}

/// Non-blocking fence status.
pub fn is_fence_signaled(device: &Device, fence: vk::Fence) -> RhiResult<bool> {
    Ok(unsafe { device.handle().get_fence_status(fence)? })
}

pub fn create_semaphore(device: &Device) -> RhiResult<vk::Semaphore> {
    let create_info = vk::SemaphoreCreateInfo::default();
    Ok(unsafe { device.handle().create_semaphore(&create_info, None)? })
}

/// Submits command buffers with synchronization2.
///
/// Waits happen at the color-attachment and ray-tracing stages, which is
/// where swapchain images are first touched.
pub fn submit(
    device: &Device,
    command_buffers: &[vk::CommandBuffer],
    wait: &[vk::Semaphore],
    signal: &[vk::Semaphore],
    fence: vk::Fence,
) -> RhiResult<()> {
    let command_infos: Vec<vk::CommandBufferSubmitInfo> = command_buffers
        .iter()
        .map(|&cb| vk::CommandBufferSubmitInfo::default().command_buffer(cb))
        .collect();
    let wait_infos: Vec<vk::SemaphoreSubmitInfo> = wait
        .iter()
        .map(|&semaphore| {
            vk::SemaphoreSubmitInfo::default()
                .semaphore(semaphore)
                .stage_mask(
                    vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT
                        | vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR,
                )
        })
        .collect();
    let signal_infos: Vec<vk::SemaphoreSubmitInfo> = signal
        .iter()
        .map(|&semaphore| {
            vk::SemaphoreSubmitInfo::default()
                .semaphore(semaphore)
                .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
        })
        .collect();

    let submit_info = vk::SubmitInfo2::default()
        .command_buffer_infos(&command_infos)
        .wait_semaphore_infos(&wait_infos)
        .signal_semaphore_infos(&signal_infos);

    unsafe {
        device
            .handle()
            .queue_submit2(device.queue(), std::slice::from_ref(&submit_info), fence)?;
    }
    Ok(())
}
