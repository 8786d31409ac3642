/// Copy commands and the fence trait - the transfer surface of a device

use std::sync::Arc;
use bitflags::bitflags;

use crate::error::Result;
use crate::device::{Buffer, Texture};

bitflags! {
    /// GPU resource states a copy destination can be transitioned to once
    /// its upload has executed. Backends translate these into their native
    /// barrier/layout primitives; the headless backend ignores them.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ResourceState: u32 {
        const UNDEFINED                 = 0;
        const COPY_DEST                 = 1 << 0;
        const VERTEX_AND_UNIFORM_BUFFER = 1 << 1;
        const INDEX_BUFFER              = 1 << 2;
        const SHADER_RESOURCE           = 1 << 3;
        const COMMON                    = 1 << 4;
    }
}

/// Row range of one texture subresource targeted by a staged copy
#[derive(Debug, Clone, Copy)]
pub struct TextureCopyRegion {
    /// Destination mip level
    pub mip_level: u32,
    /// Destination array layer
    pub array_layer: u32,
    /// First destination row
    pub row_start: u32,
    /// Number of rows to copy
    pub row_count: u32,
}

/// One staged transfer, recorded by the resource loader and executed by
/// the device in submission order
pub enum CopyCommand {
    /// Copy a byte range from a staging buffer into a destination buffer
    CopyBuffer {
        src: Arc<dyn Buffer>,
        src_offset: u64,
        dst: Arc<dyn Buffer>,
        dst_offset: u64,
        size: u64,
        /// State the destination should be left in after the copy
        dst_final_state: ResourceState,
    },
    /// Copy pitched rows from a staging buffer into a texture subresource
    CopyTexture {
        src: Arc<dyn Buffer>,
        src_offset: u64,
        /// Distance in bytes between the starts of consecutive rows in the
        /// staging buffer (aligned to the device row-pitch requirement)
        src_row_pitch: u64,
        dst: Arc<dyn Texture>,
        region: TextureCopyRegion,
        /// State the destination should be left in after the copy
        dst_final_state: ResourceState,
    },
}

/// Device-side completion primitive for a copy submission
///
/// Returned by `RenderDevice::submit_copies`; signaled by the device once
/// the submission has finished executing.
pub trait Fence: Send + Sync {
    /// Non-blocking completion check
    fn poll(&self) -> Result<bool>;

    /// Block the calling thread until the fence signals
    fn wait(&self) -> Result<()>;
}
