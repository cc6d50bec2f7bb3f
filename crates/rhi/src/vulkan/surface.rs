//! Presentation surface.

use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use tracing::{debug, info};

use crate::error::{RhiError, RhiResult};
use crate::vulkan::instance::Instance;

/// Owner of a `vk::SurfaceKHR`.
///
/// The surface must be destroyed before the instance that created it;
/// [`VulkanDevice`](super::VulkanDevice) guarantees that ordering.
pub struct Surface {
    handle: vk::SurfaceKHR,
    loader: ash::khr::surface::Instance,
}

impl Surface {
    /// Creates a surface for a native window.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::SurfaceError`] if the platform cannot create one.
    ///
    /// # Safety
    ///
    /// The display and window handles must stay valid for the lifetime of the surface.
    pub unsafe fn new(
        instance: &Instance,
        display: RawDisplayHandle,
        window: RawWindowHandle,
    ) -> RhiResult<Self> {
        let handle = unsafe {
            ash_window::create_surface(instance.entry(), instance.handle(), display, window, None)
                .map_err(|e| RhiError::SurfaceError(format!("Failed to create surface: {e}")))?
        };
        let loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());

        info!("Vulkan surface created successfully");
        Ok(Self { handle, loader })
    }

    /// Platform instance extensions needed to create a surface for `display`.
    pub fn required_extensions(display: RawDisplayHandle) -> RhiResult<Vec<*const std::ffi::c_char>> {
        let extensions = ash_window::enumerate_required_extensions(display).map_err(|e| {
            RhiError::SurfaceError(format!("Failed to enumerate required extensions: {e}"))
        })?;
        Ok(extensions.to_vec())
    }

    #[inline]
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    #[inline]
    pub fn loader(&self) -> &ash::khr::surface::Instance {
        &self.loader
    }

    /// Current surface capabilities for `physical_device`.
    pub fn capabilities(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> RhiResult<vk::SurfaceCapabilitiesKHR> {
        Ok(unsafe {
            self.loader
                .get_physical_device_surface_capabilities(physical_device, self.handle)?
        })
    }

    /// Destroys the surface. Called once, before the instance is destroyed.
    pub(crate) fn destroy(&mut self) {
        if self.handle != vk::SurfaceKHR::null() {
            // SAFETY: the swapchain using the surface has already been destroyed.
            unsafe {
                self.loader.destroy_surface(self.handle, None);
            }
            self.handle = vk::SurfaceKHR::null();
            debug!("Vulkan surface destroyed");
        }
    }
}
