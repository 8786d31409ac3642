//! Error types for the Pulsar render engine
//!
//! This module defines the error types used throughout the engine,
//! covering loader configuration, resource validation, and the
//! device-submission failure path.

use std::fmt;

/// Result type for Pulsar engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Pulsar engine errors
#[derive(Debug, Clone)]
pub enum Error {
    /// Request can never be satisfied with the current loader configuration
    /// (e.g. a transfer larger than the staging budget)
    Configuration(String),

    /// Invalid resource or descriptor (size/offset/dimension mismatch)
    InvalidResource(String),

    /// Resource is still targeted by an in-flight upload
    ResourceBusy(String),

    /// The device surface rejected a submission or failed a fence wait
    DeviceSubmission(String),

    /// Backend-specific error (Vulkan, Direct3D 12, etc.)
    BackendError(String),

    /// Out of GPU memory
    OutOfMemory,

    /// Initialization failed (engine, loader, subsystems)
    InitializationFailed(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            Error::InvalidResource(msg) => write!(f, "Invalid resource: {}", msg),
            Error::ResourceBusy(msg) => write!(f, "Resource busy: {}", msg),
            Error::DeviceSubmission(msg) => write!(f, "Device submission failed: {}", msg),
            Error::BackendError(msg) => write!(f, "Backend error: {}", msg),
            Error::OutOfMemory => write!(f, "Out of GPU memory"),
            Error::InitializationFailed(msg) => write!(f, "Initialization failed: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

// ===== ERROR MACROS =====

/// Build an [`Error`] of the given variant, logging it at ERROR severity
/// with file:line information.
///
/// # Example
///
/// ```ignore
/// return Err(engine_err!(InvalidResource, "pulsar::Loader",
///     "destination buffer too small: {}", size));
/// ```
#[macro_export]
macro_rules! engine_err {
    ($variant:ident, $source:expr, $($arg:tt)*) => {{
        let message = format!($($arg)*);
        $crate::log::log_detailed(
            $crate::log::LogSeverity::Error,
            $source,
            message.clone(),
            file!(),
            line!(),
        );
        $crate::error::Error::$variant(message)
    }};
}

/// Return early with an [`Error`] of the given variant, logging it at
/// ERROR severity.
///
/// # Example
///
/// ```ignore
/// if desc.size == 0 {
///     engine_bail!(InvalidResource, "pulsar::Loader", "zero-size buffer");
/// }
/// ```
#[macro_export]
macro_rules! engine_bail {
    ($variant:ident, $source:expr, $($arg:tt)*) => {
        return Err($crate::engine_err!($variant, $source, $($arg)*))
    };
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
