//! Error Module - mheap Error Types
//!
//! Defines all error types used by the heap.
//!
//! # Error Categories
//!
//! ## Fatal (programming errors)
//! - `OutOfMemory` - Backend could not satisfy an allocation
//! - `InvalidLayout` - Zero size or unsupported alignment
//! - `ConstructionUnderflow` - Leave-construction without a matching enter
//! - `ConstructionMismatch` - Leave-construction for an object that is not on top
//! - `DoubleRegistration` / `DoubleDeregistration` - Reference handle bookkeeping broken
//! - `UnknownReference` - A handle outlived its own registration
//! - `ForeignHandle` - Handles from two heaps were combined
//! - `OutstandingAllocations` - Memory still allocated at final teardown
//! - `InvalidFree` - Allocator asked to release memory it does not own
//!
//! ## Setup / runtime
//! - `Configuration` - Invalid configuration
//! - `WorkerSpawn` - Destruction worker thread could not be started
//! - `Io` - Writing a dump failed
//!
//! Fatal errors are never returned to callers. They go through [`fatal`],
//! which logs the diagnostic and aborts: continuing past a corrupted
//! liveness graph risks silent memory corruption elsewhere.

use crate::config::ConfigError;
use thiserror::Error;

/// Main error type for all heap operations
#[derive(Debug, Error)]
pub enum HeapError {
    /// Allocator backend could not satisfy the request
    ///
    /// **When raised:** `enter_construction` after the backend returned null
    #[error("Out of memory: requested {size} bytes aligned to {align}")]
    OutOfMemory { size: usize, align: usize },

    /// Requested layout is not supported
    ///
    /// **When raised:** zero-sized request or alignment above `MAX_ALIGNMENT`
    #[error("Invalid layout: size {size}, align {align}")]
    InvalidLayout { size: usize, align: usize },

    /// Leave-construction called on a thread with no object under construction
    #[error("Construction stack underflow on thread {thread}")]
    ConstructionUnderflow { thread: String },

    /// Leave-construction called for an object that is not on top of the stack
    #[error("Construction mismatch: leaving {actual:#x}, top of stack is {expected:#x}")]
    ConstructionMismatch { expected: usize, actual: usize },

    /// A reference record was registered twice
    #[error("Reference {key} registered twice")]
    DoubleRegistration { key: String },

    /// A reference record was deregistered twice (or never registered)
    #[error("Reference {key} deregistered twice")]
    DoubleDeregistration { key: String },

    /// A handle refers to a reference record that is not registered
    #[error("Reference {key} is not registered")]
    UnknownReference { key: String },

    /// Handles from two different heaps were combined
    #[error("Handle belongs to heap {actual}, expected heap {expected}")]
    ForeignHandle { expected: u64, actual: u64 },

    /// Allocations still outstanding at final heap teardown
    #[error("Outstanding allocations at teardown: {count} allocation(s), {bytes} bytes")]
    OutstandingAllocations { count: usize, bytes: usize },

    /// Backend was asked to release memory it does not own
    #[error("Invalid free of {address:#x} ({reason})")]
    InvalidFree { address: usize, reason: String },

    /// Configuration error
    ///
    /// **Recovery strategy:** Use default configuration or fail fast
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// Destruction worker could not be spawned
    #[error("Failed to spawn destruction worker: {0}")]
    WorkerSpawn(std::io::Error),

    /// I/O error while writing a dump
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HeapError {
    /// Check if this error indicates a caller bug that must abort the process
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            HeapError::OutOfMemory { .. }
                | HeapError::InvalidLayout { .. }
                | HeapError::ConstructionUnderflow { .. }
                | HeapError::ConstructionMismatch { .. }
                | HeapError::DoubleRegistration { .. }
                | HeapError::DoubleDeregistration { .. }
                | HeapError::UnknownReference { .. }
                | HeapError::ForeignHandle { .. }
                | HeapError::OutstandingAllocations { .. }
                | HeapError::InvalidFree { .. }
        )
    }
}

/// Result type alias for heap operations
pub type Result<T> = std::result::Result<T, HeapError>;

/// Report an unrecoverable heap error and abort the process.
#[cold]
#[inline(never)]
pub fn fatal(err: HeapError) -> ! {
    log::error!("mheap fatal error: {}", err);
    eprintln!("mheap fatal error: {}", err);
    std::process::abort()
}

/// Abort with a fatal heap error when a condition does not hold
#[macro_export]
macro_rules! fatal_unless {
    ($cond:expr, $err:expr) => {
        if !$cond {
            $crate::error::fatal($err);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(HeapError::ConstructionUnderflow {
            thread: "main".to_string()
        }
        .is_fatal());
        assert!(HeapError::OutOfMemory { size: 64, align: 8 }.is_fatal());
        assert!(!HeapError::Io(std::io::Error::other("closed")).is_fatal());
    }

    #[test]
    fn test_config_error_converts() {
        let err: HeapError = ConfigError::InvalidThreshold("zero".to_string()).into();
        assert!(matches!(err, HeapError::Configuration(_)));
        assert!(err.to_string().contains("zero"));
    }
}
