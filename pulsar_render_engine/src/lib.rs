/*!
# Pulsar Render Engine

Core traits and types for the Pulsar real-time rendering engine.

This crate provides the platform-agnostic device API for GPU rendering using
trait-based dynamic polymorphism, and the asynchronous resource streaming
subsystem built on top of it. Backend implementations (Vulkan, Direct3D 12,
the headless reference backend, etc.) provide concrete types for the device
traits.

## Architecture

- **RenderDevice**: Factory and submission trait for GPU resources
- **Buffer** / **Texture**: GPU resource traits
- **Fence**: Device-side completion primitive
- **ResourceLoader**: Asynchronous upload of buffer and texture data through
  a bounded staging arena, with token-based completion tracking

The loader owns a background worker thread per instance; any number of
producer threads may submit load/update requests concurrently.
*/

// Internal modules
pub mod error;
pub mod log;
pub mod device;
pub mod loader;

// Main pulsar namespace module
pub mod pulsar {
    // Error types
    pub use crate::error::{Error, Result};

    // Logging sub-module (types only, NOT macros)
    pub mod log {
        pub use crate::log::{
            Logger, LogEntry, LogSeverity, DefaultLogger,
            set_logger, reset_logger, set_min_severity, min_severity,
        };
        // Note: engine_* macros are NOT re-exported here - they are internal only
    }

    // Device sub-module with the backend trait surface
    pub mod device {
        pub use crate::device::*;
    }

    // Loader sub-module
    pub mod loader {
        pub use crate::loader::*;
    }
}
