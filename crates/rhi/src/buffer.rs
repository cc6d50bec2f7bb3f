//! Buffer descriptions.
//!
//! The core only describes what a buffer is for; the backend maps the
//! usage to concrete flags and a memory location.

/// Buffer usage type.
///
/// Defines the intended use of the buffer, which decides its usage flags
/// and whether the CPU can write it directly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    /// Vertex attributes: read by shaders and by bottom-level builds
    Vertex,
    /// Triangle indices: read by shaders and by bottom-level builds
    Index,
    /// Top-level instance records consumed by acceleration structure builds
    Instance,
    /// General-purpose shader storage (instance and material tables)
    Storage,
    /// CPU-writable source for uploads
    Staging,
    /// Build scratch memory for acceleration structures
    Scratch,
}

impl BufferUsage {
    /// Whether buffers of this usage are mapped and written by the CPU.
    pub fn is_host_visible(self) -> bool {
        matches!(self, BufferUsage::Staging)
    }

    /// Returns a human-readable name for the buffer type.
    pub fn name(self) -> &'static str {
        match self {
            BufferUsage::Vertex => "vertex",
            BufferUsage::Index => "index",
            BufferUsage::Instance => "instance",
            BufferUsage::Storage => "storage",
            BufferUsage::Staging => "staging",
            BufferUsage::Scratch => "scratch",
        }
    }
}

impl std::fmt::Display for BufferUsage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Parameters for [`GpuDevice::create_buffer`](crate::GpuDevice::create_buffer).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferDesc {
    /// Size in bytes; must be non-zero.
    pub size: u64,
    /// Intended usage.
    pub usage: BufferUsage,
}

impl BufferDesc {
    pub fn new(usage: BufferUsage, size: u64) -> Self {
        Self { size, usage }
    }

    /// Staging buffer large enough for `bytes`.
    pub fn staging(bytes: usize) -> Self {
        Self::new(BufferUsage::Staging, bytes as u64)
    }
}
