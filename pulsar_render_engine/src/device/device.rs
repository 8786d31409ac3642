/// RenderDevice trait - graphics-device factory and transfer interface

use std::sync::Arc;

use crate::error::Result;
use crate::device::{Buffer, BufferDesc, CopyCommand, Fence, Texture, TextureDesc};

/// Main graphics-device trait
///
/// This is the narrow surface the resource loader consumes: resource
/// creation plus copy submission with fence-based completion. Implemented
/// by backend-specific devices (e.g., VulkanDevice, HeadlessDevice).
///
/// The device executes copy submissions in FIFO order relative to this
/// interface: a later submission never completes before an earlier one.
pub trait RenderDevice: Send + Sync {
    /// Create a buffer
    ///
    /// # Arguments
    ///
    /// * `desc` - Buffer descriptor
    ///
    /// # Returns
    ///
    /// A shared pointer to the created buffer
    fn create_buffer(&self, desc: BufferDesc) -> Result<Arc<dyn Buffer>>;

    /// Create a texture
    ///
    /// # Arguments
    ///
    /// * `desc` - Texture descriptor
    ///
    /// # Returns
    ///
    /// A shared pointer to the created texture
    fn create_texture(&self, desc: TextureDesc) -> Result<Arc<dyn Texture>>;

    /// Submit a batch of copy commands for execution
    ///
    /// # Arguments
    ///
    /// * `commands` - Copies in execution order
    ///
    /// # Returns
    ///
    /// A fence that signals once the whole batch has executed
    fn submit_copies(&self, commands: Vec<CopyCommand>) -> Result<Arc<dyn Fence>>;

    /// Required alignment for staging-buffer offsets used as copy sources
    fn copy_offset_alignment(&self) -> u64;

    /// Required alignment for row pitches of staged texture data
    fn copy_row_pitch_alignment(&self) -> u64;

    /// Wait for all GPU operations to complete
    fn wait_idle(&self) -> Result<()>;
}
