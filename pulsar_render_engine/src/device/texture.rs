/// Texture trait, texture descriptor, and texture info

use std::any::Any;

/// Texture format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(non_camel_case_types)]
pub enum TextureFormat {
    R8_UNORM,
    R8G8_UNORM,
    R8G8B8A8_SRGB,
    R8G8B8A8_UNORM,
    B8G8R8A8_SRGB,
    B8G8R8A8_UNORM,
    D16_UNORM,
    D32_FLOAT,
    D24_UNORM_S8_UINT,
    R32_SFLOAT,
    R32G32_SFLOAT,
    R32G32B32A32_SFLOAT,
}

impl TextureFormat {
    /// Size of one texel in bytes
    pub fn bytes_per_pixel(&self) -> u64 {
        match self {
            TextureFormat::R8_UNORM => 1,
            TextureFormat::R8G8_UNORM => 2,
            TextureFormat::R8G8B8A8_SRGB
            | TextureFormat::R8G8B8A8_UNORM
            | TextureFormat::B8G8R8A8_SRGB
            | TextureFormat::B8G8R8A8_UNORM => 4,
            TextureFormat::D16_UNORM => 2,
            TextureFormat::D32_FLOAT => 4,
            TextureFormat::D24_UNORM_S8_UINT => 4,
            TextureFormat::R32_SFLOAT => 4,
            TextureFormat::R32G32_SFLOAT => 8,
            TextureFormat::R32G32B32A32_SFLOAT => 16,
        }
    }

    /// Whether the format stores color data with sRGB encoding
    pub fn is_srgb(&self) -> bool {
        matches!(
            self,
            TextureFormat::R8G8B8A8_SRGB | TextureFormat::B8G8R8A8_SRGB
        )
    }
}

/// Texture usage flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureUsage {
    /// Texture can be sampled in shaders
    Sampled,
    /// Texture can be used as render target
    RenderTarget,
    /// Texture can be used for both
    SampledAndRenderTarget,
    /// Texture can be used as depth/stencil attachment
    DepthStencil,
}

// ===== TEXTURE DESC =====

/// Descriptor for creating a texture
///
/// Textures are created empty; initial contents are uploaded through the
/// resource loader.
#[derive(Debug, Clone)]
pub struct TextureDesc {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Pixel format
    pub format: TextureFormat,
    /// Usage flags
    pub usage: TextureUsage,
    /// Number of array layers (1 = simple 2D texture, >1 = texture array)
    pub array_layers: u32,
    /// Number of mip levels
    pub mip_levels: u32,
}

// ===== TEXTURE INFO =====

/// Read-only properties of a created texture.
///
/// Returned by `Texture::info()` to query texture properties
/// without exposing backend-specific details.
#[derive(Debug, Clone)]
pub struct TextureInfo {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Pixel format
    pub format: TextureFormat,
    /// Usage flags
    pub usage: TextureUsage,
    /// Number of array layers (1 = simple 2D texture, >1 = texture array)
    pub array_layers: u32,
    /// Number of mip levels
    pub mip_levels: u32,
}

impl TextureInfo {
    /// Returns true if this texture is a texture array (array_layers > 1)
    pub fn is_array(&self) -> bool {
        self.array_layers > 1
    }

    /// Extent of the given mip level in pixels
    pub fn mip_extent(&self, mip_level: u32) -> (u32, u32) {
        (
            (self.width >> mip_level).max(1),
            (self.height >> mip_level).max(1),
        )
    }
}

// ===== TEXTURE TRAIT =====

/// Texture resource trait
///
/// Implemented by backend-specific texture types (e.g., VulkanTexture,
/// HeadlessTexture). The texture is automatically destroyed when dropped.
pub trait Texture: Send + Sync {
    /// Get the read-only properties of this texture
    fn info(&self) -> &TextureInfo;

    /// Downcast hook so a backend can recover its concrete type when
    /// executing copy commands against trait-object handles
    fn as_any(&self) -> &dyn Any;
}
