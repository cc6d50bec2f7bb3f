//! Presentation contract: surface size, swapchain and present results.

/// Two-dimensional size in pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Extent2D {
    pub width: u32,
    pub height: u32,
}

impl Extent2D {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A zero-sized extent (minimized window) cannot back a swapchain.
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl std::fmt::Display for Extent2D {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Something that can be presented to and reports its current pixel size.
pub trait DrawableSurface {
    fn drawable_size(&self) -> Extent2D;
}

/// Surface capabilities relevant to frame pacing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SurfaceInfo {
    /// Minimum number of swapchain images the surface requires.
    pub min_image_count: u32,
    /// Maximum image count, `None` when unbounded.
    pub max_image_count: Option<u32>,
}

/// A created swapchain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapchainInfo {
    pub extent: Extent2D,
    pub image_count: u32,
}

/// Result of a successful acquire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AcquiredImage {
    pub index: u32,
    /// The image can still be presented but the swapchain should be recreated.
    pub suboptimal: bool,
}

/// Non-error outcomes of a present.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentStatus {
    Optimal,
    Suboptimal,
    OutOfDate,
}

impl PresentStatus {
    /// Whether the swapchain should be recreated before the next frame.
    pub fn needs_recreate(self) -> bool {
        !matches!(self, PresentStatus::Optimal)
    }
}
