/// Loader module - asynchronous GPU resource streaming
///
/// Upload of buffer and texture data from host memory to device memory
/// through a bounded staging arena, batched into device copy submissions
/// and tracked with sync tokens.

// Module declarations
pub mod token;
pub mod staging;
pub mod request;
pub mod convert;
pub mod resource_loader;

// Re-export the public loader surface
pub use token::*;
pub use staging::*;
pub use request::*;
pub use convert::*;
pub use resource_loader::*;
