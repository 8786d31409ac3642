/// Buffer trait and buffer descriptor

use std::any::Any;
use crate::error::Result;

/// Buffer usage flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferUsage {
    /// Vertex buffer
    Vertex,
    /// Index buffer
    Index,
    /// Uniform/constant buffer
    Uniform,
    /// Storage buffer
    Storage,
    /// Staging buffer (transfer source for device-local uploads)
    Staging,
}

/// Memory placement for a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryUsage {
    /// Device-local memory; written only through copy commands
    GpuOnly,
    /// Host-visible memory; writable directly with [`Buffer::update`]
    CpuToGpu,
}

/// Descriptor for creating a buffer
#[derive(Debug, Clone)]
pub struct BufferDesc {
    /// Size in bytes
    pub size: u64,
    /// Buffer usage
    pub usage: BufferUsage,
    /// Memory placement
    pub memory: MemoryUsage,
}

/// Buffer resource trait
///
/// Implemented by backend-specific buffer types (e.g., VulkanBuffer,
/// HeadlessBuffer). The buffer is automatically destroyed when dropped.
pub trait Buffer: Send + Sync {
    /// Size in bytes
    fn size(&self) -> u64;

    /// Usage the buffer was created with
    fn usage(&self) -> BufferUsage;

    /// Whether the buffer lives in host-visible memory
    fn host_visible(&self) -> bool;

    /// Write data directly into host-visible memory
    ///
    /// Fails for device-local buffers; those are filled through the
    /// resource loader's staging path instead.
    ///
    /// # Arguments
    ///
    /// * `offset` - Offset into the buffer in bytes
    /// * `data` - Data to write
    fn update(&self, offset: u64, data: &[u8]) -> Result<()>;

    /// Downcast hook so a backend can recover its concrete type when
    /// executing copy commands against trait-object handles
    fn as_any(&self) -> &dyn Any;
}
