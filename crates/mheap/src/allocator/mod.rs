//! Allocator Module - Raw Memory Backends
//!
//! Supplies and releases raw byte ranges for managed objects. Backends know
//! nothing about objects or references; the heap asks for a `Layout` and
//! hands the same `Layout` back when the object is destroyed.
//!
//! ## Backends
//!
//! - **System**: `std::alloc`
//! - **Fast**: fixed power-of-two size classes (16..=512 bytes) carved from
//!   mapped chunks, with per-class free lists
//! - **Debug**: tracking wrapper that fills, records and validates every
//!   allocation of an inner backend

pub mod debug;
pub mod fast;
pub mod system;

pub use debug::DebugAllocator;
pub use fast::FastAllocator;
pub use system::SystemAllocator;

use crate::config::AllocatorKind;
use std::alloc::Layout;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Raw memory source for the heap
///
/// Implementations must be thread-safe: the heap calls them under its lock,
/// but the destruction worker frees from its own thread.
pub trait AllocatorBackend: Send + Sync {
    /// Allocate a block for `layout`, or `None` if the request cannot be met
    fn alloc(&self, layout: Layout) -> Option<NonNull<u8>>;

    /// Release a block
    ///
    /// # Safety
    /// `ptr` must come from `alloc` on this backend with the same `layout`
    /// and must not have been released already.
    unsafe fn free(&self, ptr: NonNull<u8>, layout: Layout);

    /// Short backend name for diagnostics
    fn name(&self) -> &'static str;

    /// Allocation counters
    fn stats(&self) -> AllocatorStats;
}

/// Counters reported by every backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct AllocatorStats {
    /// Total successful allocations
    pub allocations: u64,
    /// Total frees
    pub frees: u64,
    /// Allocations not yet freed
    pub outstanding: usize,
    /// Bytes not yet freed
    pub outstanding_bytes: usize,
}

/// Shared counter block used by the backends
#[derive(Debug, Default)]
pub(crate) struct Counters {
    allocations: AtomicU64,
    frees: AtomicU64,
    outstanding: AtomicUsize,
    outstanding_bytes: AtomicUsize,
}

impl Counters {
    pub(crate) fn record_alloc(&self, size: usize) {
        self.allocations.fetch_add(1, Ordering::Relaxed);
        self.outstanding.fetch_add(1, Ordering::Relaxed);
        self.outstanding_bytes.fetch_add(size, Ordering::Relaxed);
    }

    pub(crate) fn record_free(&self, size: usize) {
        self.frees.fetch_add(1, Ordering::Relaxed);
        self.outstanding.fetch_sub(1, Ordering::Relaxed);
        self.outstanding_bytes.fetch_sub(size, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> AllocatorStats {
        AllocatorStats {
            allocations: self.allocations.load(Ordering::Relaxed),
            frees: self.frees.load(Ordering::Relaxed),
            outstanding: self.outstanding.load(Ordering::Relaxed),
            outstanding_bytes: self.outstanding_bytes.load(Ordering::Relaxed),
        }
    }
}

/// Build the backend selected by the configuration
pub fn create(kind: AllocatorKind) -> Box<dyn AllocatorBackend> {
    match kind {
        AllocatorKind::System => Box::new(SystemAllocator::new()),
        AllocatorKind::Fast => Box::new(FastAllocator::new()),
        AllocatorKind::Debug => Box::new(DebugAllocator::new(SystemAllocator::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_each_kind() {
        for (kind, name) in [
            (AllocatorKind::System, "system"),
            (AllocatorKind::Fast, "fast"),
            (AllocatorKind::Debug, "debug"),
        ] {
            let backend = create(kind);
            assert_eq!(backend.name(), name);

            let layout = Layout::from_size_align(48, 8).unwrap();
            let ptr = backend.alloc(layout).expect("allocation should succeed");
            assert_eq!(backend.stats().outstanding, 1);
            unsafe { backend.free(ptr, layout) };
            assert_eq!(backend.stats().outstanding, 0);
            assert_eq!(backend.stats().frees, 1);
        }
    }
}
