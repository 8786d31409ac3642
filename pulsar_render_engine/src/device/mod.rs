/// Device module - the graphics-device trait surface consumed by the loader

// Module declarations
pub mod device;
pub mod buffer;
pub mod texture;
pub mod copy;

#[cfg(test)]
pub mod mock_device;

// Re-export everything from device.rs
pub use device::*;

// Re-export from other modules
pub use buffer::*;
pub use texture::*;
pub use copy::*;
