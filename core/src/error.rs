//! Error kinds shared by every layer of the provisioning pipeline.
//!
//! Control flow only ever sees a `DiskError`; the human-readable story of
//! what went wrong goes to the [`logger`](crate::logger) ring instead.

use core::fmt;

/// Result type for provisioning operations
pub type Result<T> = core::result::Result<T, DiskError>;

/// Errors that can occur while partitioning, formatting or copying
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskError {
    /// Device, file or directory does not exist
    NotFound,

    /// Rejected up front: bad name, misaligned buffer, bad index
    InvalidArgument,

    /// Underlying device or filesystem reported a failure
    IoError,

    /// Device did not complete a request within the poll bound
    Timeout,

    /// Range outside the usable area, volume full, or allocation failure
    OutOfSpace,

    /// A bounded container (listing, directory, ring) is full
    BufferFull,
}

impl DiskError {
    pub const fn as_str(&self) -> &'static str {
        match self {
            DiskError::NotFound => "Not found",
            DiskError::InvalidArgument => "Invalid argument",
            DiskError::IoError => "I/O error",
            DiskError::Timeout => "Device timeout",
            DiskError::OutOfSpace => "Out of space",
            DiskError::BufferFull => "Buffer full",
        }
    }

    /// Timeouts are handled exactly like I/O failures by callers.
    pub const fn is_io(&self) -> bool {
        matches!(self, DiskError::IoError | DiskError::Timeout)
    }
}

impl fmt::Display for DiskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
