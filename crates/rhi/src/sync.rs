//! Queue submission parameters.

use crate::resource::{CommandBufferHandle, FenceHandle, SemaphoreHandle};

/// Default timeout for fence waits (in nanoseconds).
pub const DEFAULT_FENCE_TIMEOUT: u64 = u64::MAX;

/// One submission to the graphics queue.
///
/// Waits happen before any command in the batch reaches the
/// color-attachment-output stage; the fence and signal semaphores are
/// signaled once every command buffer completes.
#[derive(Clone, Copy, Debug, Default)]
pub struct Submission<'a> {
    pub command_buffers: &'a [CommandBufferHandle],
    pub wait_semaphores: &'a [SemaphoreHandle],
    pub signal_semaphores: &'a [SemaphoreHandle],
    pub fence: Option<FenceHandle>,
}

impl<'a> Submission<'a> {
    /// Submission without semaphores.
    pub fn new(command_buffers: &'a [CommandBufferHandle], fence: Option<FenceHandle>) -> Self {
        Self {
            command_buffers,
            fence,
            ..Default::default()
        }
    }
}
