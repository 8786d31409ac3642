/// CPU-side image conversion for texture uploads
///
/// Raw image data arrives tightly packed in a CPU pixel format; the device
/// wants GPU-native texels at a device-aligned row pitch. Conversion runs
/// synchronously on the submitting thread, before staging, so the worker
/// loop never carries variable-latency work.

use crate::{engine_bail, engine_err};
use crate::error::Result;
use crate::device::TextureFormat;
use crate::loader::request::{ImageFormat, RawImageData};

/// GPU format a raw image converts to
pub fn gpu_format(format: ImageFormat, srgb: bool) -> Result<TextureFormat> {
    match (format, srgb) {
        (ImageFormat::R8, false) => Ok(TextureFormat::R8_UNORM),
        (ImageFormat::R8G8, false) => Ok(TextureFormat::R8G8_UNORM),
        (ImageFormat::R8G8B8, false) | (ImageFormat::R8G8B8A8, false) => {
            Ok(TextureFormat::R8G8B8A8_UNORM)
        }
        (ImageFormat::R8G8B8, true) | (ImageFormat::R8G8B8A8, true) => {
            Ok(TextureFormat::R8G8B8A8_SRGB)
        }
        (ImageFormat::B8G8R8A8, false) => Ok(TextureFormat::B8G8R8A8_UNORM),
        (ImageFormat::B8G8R8A8, true) => Ok(TextureFormat::B8G8R8A8_SRGB),
        (format, true) => Err(engine_err!(Configuration, "pulsar::convert",
            "format {:?} has no sRGB variant", format)),
    }
}

/// Bytes per texel after conversion
pub fn staged_bytes_per_pixel(format: ImageFormat) -> u64 {
    match format {
        // Three-channel data is expanded to four channels during staging
        ImageFormat::R8G8B8 => 4,
        other => other.bytes_per_pixel(),
    }
}

/// Convert one tightly packed source row into its staged form
fn convert_row(src: &[u8], format: ImageFormat, dst: &mut [u8]) {
    match format {
        ImageFormat::R8G8B8 => {
            // Expand RGB to RGBA with opaque alpha
            for (texel, out) in src.chunks_exact(3).zip(dst.chunks_exact_mut(4)) {
                out[..3].copy_from_slice(texel);
                out[3] = 0xff;
            }
        }
        _ => dst.copy_from_slice(src),
    }
}

/// Byte offset of a subresource inside `RawImageData::data`
pub(crate) fn subresource_offset(raw: &RawImageData, array_layer: u32, mip_level: u32) -> u64 {
    let bpp = raw.format.bytes_per_pixel();
    let per_layer: u64 = (0..raw.mip_levels)
        .map(|mip| {
            let w = (raw.width >> mip).max(1) as u64;
            let h = (raw.height >> mip).max(1) as u64;
            w * h * bpp
        })
        .sum();
    let before_mip: u64 = (0..mip_level)
        .map(|mip| {
            let w = (raw.width >> mip).max(1) as u64;
            let h = (raw.height >> mip).max(1) as u64;
            w * h * bpp
        })
        .sum();
    array_layer as u64 * per_layer + before_mip
}

/// Convert one subresource into staged layout: GPU texels, rows padded to
/// `row_pitch` bytes
///
/// The returned buffer holds `mip_height * row_pitch` bytes and lives as a
/// temp buffer of the submitting batch until the batch completes.
pub(crate) fn convert_subresource(
    raw: &RawImageData,
    array_layer: u32,
    mip_level: u32,
    row_pitch: u64,
) -> Result<Vec<u8>> {
    let w = (raw.width >> mip_level).max(1) as u64;
    let h = (raw.height >> mip_level).max(1) as u64;
    let src_row_bytes = w * raw.format.bytes_per_pixel();
    let dst_row_bytes = w * staged_bytes_per_pixel(raw.format);
    if dst_row_bytes > row_pitch {
        engine_bail!(Configuration, "pulsar::convert",
            "row pitch {} smaller than staged row of {} bytes", row_pitch, dst_row_bytes);
    }

    let base = subresource_offset(raw, array_layer, mip_level) as usize;
    let src_end = base + (src_row_bytes * h) as usize;
    if src_end > raw.data.len() {
        engine_bail!(InvalidResource, "pulsar::convert",
            "raw image data truncated: subresource ({}, {}) needs {} bytes, have {}",
            array_layer, mip_level, src_end, raw.data.len());
    }

    let mut staged = vec![0u8; (row_pitch * h) as usize];
    for row in 0..h as usize {
        let src_at = base + row * src_row_bytes as usize;
        let dst_at = row * row_pitch as usize;
        convert_row(
            &raw.data[src_at..src_at + src_row_bytes as usize],
            raw.format,
            &mut staged[dst_at..dst_at + dst_row_bytes as usize],
        );
    }
    Ok(staged)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "convert_tests.rs"]
mod tests;
