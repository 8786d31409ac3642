/// Upload request descriptors
///
/// Public descriptors mirror the loader API: load (create + fill) and
/// update (overwrite) for buffers and textures. Internally every request
/// becomes one `UploadRequest` variant, exhaustively matched when the
/// request is staged into the pending batch.

use std::sync::Arc;

use crate::device::{Buffer, Texture, TextureDesc};

// ===== RAW IMAGE DATA =====

/// CPU-side pixel format of raw image data
///
/// Distinct from the device texture format: three-channel data has no GPU
/// equivalent and is expanded during staging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(non_camel_case_types)]
pub enum ImageFormat {
    R8,
    R8G8,
    R8G8B8,
    R8G8B8A8,
    B8G8R8A8,
}

impl ImageFormat {
    /// Size of one source texel in bytes
    pub fn bytes_per_pixel(&self) -> u64 {
        match self {
            ImageFormat::R8 => 1,
            ImageFormat::R8G8 => 2,
            ImageFormat::R8G8B8 => 3,
            ImageFormat::R8G8B8A8 | ImageFormat::B8G8R8A8 => 4,
        }
    }
}

/// Raw pixel data for a texture load or update
///
/// Layout: for each array layer, mip levels in descending size, rows
/// tightly packed with no padding.
#[derive(Debug, Clone)]
pub struct RawImageData {
    pub data: Vec<u8>,
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
    pub array_size: u32,
    pub mip_levels: u32,
}

impl RawImageData {
    /// Single-layer, single-mip image
    pub fn new_2d(data: Vec<u8>, format: ImageFormat, width: u32, height: u32) -> Self {
        Self {
            data,
            format,
            width,
            height,
            array_size: 1,
            mip_levels: 1,
        }
    }

    /// Number of bytes `data` must hold for the described geometry
    pub fn expected_data_len(&self) -> u64 {
        let bpp = self.format.bytes_per_pixel();
        let per_layer: u64 = (0..self.mip_levels)
            .map(|mip| {
                let w = (self.width >> mip).max(1) as u64;
                let h = (self.height >> mip).max(1) as u64;
                w * h * bpp
            })
            .sum();
        per_layer * self.array_size as u64
    }
}

// ===== LOAD DESCRIPTORS =====

/// Create a buffer and optionally fill it
#[derive(Clone)]
pub struct BufferLoadDesc {
    /// Descriptor for the buffer to create
    pub desc: crate::device::BufferDesc,
    /// Initial contents; uploaded through staging for device-local buffers
    pub data: Option<Vec<u8>>,
    /// Zero-fill the buffer instead of uploading data
    pub force_reset: bool,
}

/// Create a texture and optionally fill it
///
/// Either `desc` or `raw` must be present. When both are given, `desc`
/// controls creation (and `srgb` is ignored); `raw` supplies the contents.
#[derive(Clone)]
pub struct TextureLoadDesc {
    /// Explicit descriptor; derived from `raw` when absent
    pub desc: Option<TextureDesc>,
    /// Initial contents
    pub raw: Option<RawImageData>,
    /// Create with an sRGB format when derived from `raw`
    pub srgb: bool,
}

// ===== UPDATE DESCRIPTORS =====

/// Overwrite a range of an existing buffer
#[derive(Clone)]
pub struct BufferUpdateDesc {
    pub buffer: Arc<dyn Buffer>,
    pub data: Vec<u8>,
    /// Offset into `data` where the source bytes start
    pub src_offset: u64,
    /// Offset into the destination buffer
    pub dst_offset: u64,
    /// Bytes to copy; 0 means the whole destination buffer
    pub size: u64,
}

impl BufferUpdateDesc {
    /// Update the whole buffer from `data`
    pub fn new(buffer: Arc<dyn Buffer>, data: Vec<u8>) -> Self {
        let size = data.len() as u64;
        Self {
            buffer,
            data,
            src_offset: 0,
            dst_offset: 0,
            size,
        }
    }

    /// Update the whole buffer from a typed slice
    pub fn from_slice<T: bytemuck::NoUninit>(buffer: Arc<dyn Buffer>, elements: &[T]) -> Self {
        Self::new(buffer, bytemuck::cast_slice(elements).to_vec())
    }
}

/// Overwrite the contents of an existing texture
#[derive(Clone)]
pub struct TextureUpdateDesc {
    pub texture: Arc<dyn Texture>,
    pub raw: RawImageData,
}

/// One entry of a multi-resource update
///
/// Entries are applied to their destinations in slice order.
#[derive(Clone)]
pub enum ResourceUpdateDesc {
    Buffer(BufferUpdateDesc),
    Texture(TextureUpdateDesc),
}

// ===== INTERNAL REQUEST =====

/// The tagged form every enqueued request is reduced to before staging
pub(crate) enum UploadRequest {
    BufferLoad {
        buffer: Arc<dyn Buffer>,
        data: Option<Vec<u8>>,
        force_reset: bool,
    },
    TextureLoad {
        texture: Arc<dyn Texture>,
        raw: RawImageData,
    },
    BufferUpdate {
        buffer: Arc<dyn Buffer>,
        data: Vec<u8>,
        src_offset: u64,
        dst_offset: u64,
        size: u64,
    },
    TextureUpdate {
        texture: Arc<dyn Texture>,
        raw: RawImageData,
    },
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "request_tests.rs"]
mod tests;
