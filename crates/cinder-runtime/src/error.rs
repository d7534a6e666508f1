//! Error types for runtime operations

use crate::layout::DataType;
use crate::memory::LockMode;

/// Result type for runtime operations
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Errors raised by memory handles, streams and the kernel cache
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Host data does not match the handle's byte size
    #[error("buffer size mismatch: expected {expected} bytes, got {actual}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    /// Attempt to write through a lock taken for reading
    #[error("cannot write through a {0} lock")]
    ReadOnlyLock(LockMode),

    /// Typed view requested with an element type the buffer does not hold
    #[error("type mismatch: buffer holds {actual}, view requested {requested}")]
    TypeMismatch { requested: &'static str, actual: DataType },

    /// Locked bytes cannot be reinterpreted as the requested element type
    #[error("cannot view buffer as {element}: {reason}")]
    ViewCast { element: &'static str, reason: String },

    /// Memory requested for a layout whose shape is not fully known
    #[error("cannot allocate memory for dynamic layout {0}")]
    DynamicLayout(String),

    /// Work submitted to a stream whose worker has shut down
    #[error("stream {0} is closed")]
    StreamClosed(u64),

    /// Kernel lookup miss in the kernels cache
    #[error("kernel not found: {0}")]
    KernelNotFound(String),

    /// Kernel launch failure reported by the kernel itself
    #[error("kernel {kernel} failed: {reason}")]
    KernelLaunch { kernel: String, reason: String },

    /// Awaited event completed without its work succeeding
    #[error("event {event} failed in {owner}: {reason}")]
    EventFailed { event: u64, owner: String, reason: String },

    /// Invalid configuration value
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl RuntimeError {
    /// Create a buffer size mismatch error
    pub fn size_mismatch(expected: usize, actual: usize) -> Self {
        Self::BufferSizeMismatch { expected, actual }
    }

    /// Create a kernel launch error
    pub fn kernel_launch(kernel: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::KernelLaunch {
            kernel: kernel.into(),
            reason: reason.into(),
        }
    }
}
