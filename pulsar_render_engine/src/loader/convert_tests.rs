use super::*;
use crate::error::Error;

// ============================================================================
// Format mapping tests
// ============================================================================

#[test]
fn test_gpu_format_mappings() {
    assert_eq!(gpu_format(ImageFormat::R8, false).unwrap(), TextureFormat::R8_UNORM);
    assert_eq!(gpu_format(ImageFormat::R8G8, false).unwrap(), TextureFormat::R8G8_UNORM);
    assert_eq!(
        gpu_format(ImageFormat::R8G8B8, false).unwrap(),
        TextureFormat::R8G8B8A8_UNORM
    );
    assert_eq!(
        gpu_format(ImageFormat::R8G8B8A8, true).unwrap(),
        TextureFormat::R8G8B8A8_SRGB
    );
    assert_eq!(
        gpu_format(ImageFormat::B8G8R8A8, true).unwrap(),
        TextureFormat::B8G8R8A8_SRGB
    );
}

#[test]
fn test_gpu_format_rejects_srgb_without_variant() {
    assert!(matches!(
        gpu_format(ImageFormat::R8, true),
        Err(Error::Configuration(_))
    ));
    assert!(matches!(
        gpu_format(ImageFormat::R8G8, true),
        Err(Error::Configuration(_))
    ));
}

#[test]
fn test_staged_bytes_per_pixel_expands_rgb() {
    assert_eq!(staged_bytes_per_pixel(ImageFormat::R8G8B8), 4);
    assert_eq!(staged_bytes_per_pixel(ImageFormat::R8G8B8A8), 4);
    assert_eq!(staged_bytes_per_pixel(ImageFormat::R8), 1);
}

// ============================================================================
// Subresource layout tests
// ============================================================================

fn mip_chain_raw() -> RawImageData {
    // 4x4 RGBA with 3 mips and 2 layers; bytes filled sequentially
    let len = ((16 + 4 + 1) * 4) * 2;
    RawImageData {
        data: (0..len).map(|i| i as u8).collect(),
        format: ImageFormat::R8G8B8A8,
        width: 4,
        height: 4,
        array_size: 2,
        mip_levels: 3,
    }
}

#[test]
fn test_subresource_offsets() {
    let raw = mip_chain_raw();
    assert_eq!(subresource_offset(&raw, 0, 0), 0);
    assert_eq!(subresource_offset(&raw, 0, 1), 64);
    assert_eq!(subresource_offset(&raw, 0, 2), 64 + 16);
    // Second layer starts after the first layer's full mip chain.
    assert_eq!(subresource_offset(&raw, 1, 0), 84);
    assert_eq!(subresource_offset(&raw, 1, 1), 84 + 64);
}

// ============================================================================
// Conversion tests
// ============================================================================

#[test]
fn test_passthrough_pads_rows_to_pitch() {
    let raw = RawImageData::new_2d(
        (0..32).collect(),
        ImageFormat::R8G8B8A8,
        2,
        4,
    );
    let staged = convert_subresource(&raw, 0, 0, 16).unwrap();
    assert_eq!(staged.len(), 64);
    // Row data at the start of each pitch stride, zero padding after.
    assert_eq!(&staged[..8], &raw.data[..8]);
    assert_eq!(&staged[8..16], &[0; 8]);
    assert_eq!(&staged[16..24], &raw.data[8..16]);
}

#[test]
fn test_rgb_rows_expand_to_rgba() {
    let raw = RawImageData::new_2d(
        vec![
            1, 2, 3, 4, 5, 6, // row 0: two RGB texels
            7, 8, 9, 10, 11, 12, // row 1
        ],
        ImageFormat::R8G8B8,
        2,
        2,
    );
    let staged = convert_subresource(&raw, 0, 0, 8).unwrap();
    assert_eq!(staged.len(), 16);
    assert_eq!(&staged[..8], &[1, 2, 3, 0xff, 4, 5, 6, 0xff]);
    assert_eq!(&staged[8..], &[7, 8, 9, 0xff, 10, 11, 12, 0xff]);
}

#[test]
fn test_mip_one_converts_from_its_offset() {
    let raw = mip_chain_raw();
    let staged = convert_subresource(&raw, 0, 1, 8).unwrap();
    assert_eq!(staged.len(), 16);
    assert_eq!(&staged[..8], &raw.data[64..72]);
}

#[test]
fn test_pitch_smaller_than_row_rejected() {
    let raw = RawImageData::new_2d(vec![0; 64], ImageFormat::R8G8B8A8, 4, 4);
    assert!(matches!(
        convert_subresource(&raw, 0, 0, 8),
        Err(Error::Configuration(_))
    ));
}

#[test]
fn test_truncated_data_rejected() {
    let raw = RawImageData::new_2d(vec![0; 10], ImageFormat::R8G8B8A8, 4, 4);
    assert!(matches!(
        convert_subresource(&raw, 0, 0, 16),
        Err(Error::InvalidResource(_))
    ));
}
