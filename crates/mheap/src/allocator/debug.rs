//! Debug Allocator - Tracking Wrapper
//!
//! Wraps another backend and records every outstanding allocation. Fresh
//! blocks are filled with `DEBUG_ALLOC_FILL` and released blocks with
//! `DEBUG_FREE_FILL`, so reads of uninitialized or destroyed objects show up
//! as recognizable byte patterns. Releasing an address that is not
//! outstanding, or with a layout other than the one it was allocated with,
//! is fatal.

use super::{AllocatorBackend, AllocatorStats};
use crate::error::{fatal, HeapError};
use crate::util::constants::{DEBUG_ALLOC_FILL, DEBUG_FREE_FILL};
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::alloc::Layout;
use std::ptr::NonNull;

/// One outstanding allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationRecord {
    /// Block address
    pub address: usize,
    /// Layout requested
    pub layout: Layout,
    /// Allocation sequence number
    pub sequence: u64,
}

/// DebugAllocator - tracking backend
pub struct DebugAllocator<A: AllocatorBackend> {
    inner: A,
    outstanding: Mutex<IndexMap<usize, AllocationRecord>>,
    sequence: std::sync::atomic::AtomicU64,
}

impl<A: AllocatorBackend> DebugAllocator<A> {
    pub fn new(inner: A) -> Self {
        Self {
            inner,
            outstanding: Mutex::new(IndexMap::new()),
            sequence: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Snapshot of outstanding allocations, oldest first
    pub fn outstanding(&self) -> Vec<AllocationRecord> {
        self.outstanding.lock().values().copied().collect()
    }

    /// Check that `ptr` may be released with `layout`
    ///
    /// # Returns
    /// The tracked record, or `InvalidFree` describing what is wrong
    pub fn check_free(&self, ptr: NonNull<u8>, layout: Layout) -> Result<AllocationRecord, HeapError> {
        let address = ptr.as_ptr() as usize;
        let outstanding = self.outstanding.lock();
        match outstanding.get(&address) {
            None => Err(HeapError::InvalidFree {
                address,
                reason: "address is not outstanding".to_string(),
            }),
            Some(record) if record.layout != layout => Err(HeapError::InvalidFree {
                address,
                reason: format!(
                    "allocated as {}/{}, freed as {}/{}",
                    record.layout.size(),
                    record.layout.align(),
                    layout.size(),
                    layout.align()
                ),
            }),
            Some(record) => Ok(*record),
        }
    }

    /// Log every outstanding allocation at warn level
    pub fn report_leaks(&self) {
        for record in self.outstanding.lock().values() {
            log::warn!(
                "debug allocator: leaked #{} at {:#x} ({} bytes)",
                record.sequence,
                record.address,
                record.layout.size()
            );
        }
    }
}

impl<A: AllocatorBackend> AllocatorBackend for DebugAllocator<A> {
    fn alloc(&self, layout: Layout) -> Option<NonNull<u8>> {
        let ptr = self.inner.alloc(layout)?;

        // SAFETY: the block is freshly allocated with `layout.size()` bytes.
        unsafe { std::ptr::write_bytes(ptr.as_ptr(), DEBUG_ALLOC_FILL, layout.size()) };

        let sequence = self
            .sequence
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let address = ptr.as_ptr() as usize;
        let previous = self.outstanding.lock().insert(
            address,
            AllocationRecord {
                address,
                layout,
                sequence,
            },
        );

        if previous.is_some() {
            fatal(HeapError::InvalidFree {
                address,
                reason: "backend returned a block that is still outstanding".to_string(),
            });
        }

        Some(ptr)
    }

    unsafe fn free(&self, ptr: NonNull<u8>, layout: Layout) {
        if let Err(err) = self.check_free(ptr, layout) {
            fatal(err);
        }

        self.outstanding.lock().shift_remove(&(ptr.as_ptr() as usize));
        std::ptr::write_bytes(ptr.as_ptr(), DEBUG_FREE_FILL, layout.size());
        self.inner.free(ptr, layout);
    }

    fn name(&self) -> &'static str {
        "debug"
    }

    fn stats(&self) -> AllocatorStats {
        let inner = self.inner.stats();
        let outstanding = self.outstanding.lock();
        AllocatorStats {
            allocations: inner.allocations,
            frees: inner.frees,
            outstanding: outstanding.len(),
            outstanding_bytes: outstanding.values().map(|r| r.layout.size()).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::SystemAllocator;

    #[test]
    fn test_fill_pattern() {
        let allocator = DebugAllocator::new(SystemAllocator::new());
        let layout = Layout::from_size_align(32, 8).unwrap();
        let ptr = allocator.alloc(layout).unwrap();

        let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), 32) };
        assert!(bytes.iter().all(|&b| b == DEBUG_ALLOC_FILL));

        unsafe { allocator.free(ptr, layout) };
    }

    #[test]
    fn test_outstanding_tracking() {
        let allocator = DebugAllocator::new(SystemAllocator::new());
        let small = Layout::from_size_align(16, 8).unwrap();
        let big = Layout::from_size_align(100, 8).unwrap();

        let a = allocator.alloc(small).unwrap();
        let b = allocator.alloc(big).unwrap();
        assert_eq!(allocator.stats().outstanding, 2);
        assert_eq!(allocator.stats().outstanding_bytes, 116);
        assert_eq!(allocator.outstanding()[0].sequence, 0);

        unsafe { allocator.free(a, small) };
        assert_eq!(allocator.outstanding().len(), 1);
        assert_eq!(allocator.outstanding()[0].layout, big);

        unsafe { allocator.free(b, big) };
        assert_eq!(allocator.stats().outstanding, 0);
    }

    #[test]
    fn test_invalid_free_detected() {
        let allocator = DebugAllocator::new(SystemAllocator::new());
        let layout = Layout::from_size_align(16, 8).unwrap();
        let ptr = allocator.alloc(layout).unwrap();

        let wrong = Layout::from_size_align(32, 8).unwrap();
        assert!(matches!(
            allocator.check_free(ptr, wrong),
            Err(HeapError::InvalidFree { .. })
        ));

        let mut local = 0u64;
        let foreign = NonNull::from(&mut local).cast::<u8>();
        assert!(allocator.check_free(foreign, layout).is_err());

        assert!(allocator.check_free(ptr, layout).is_ok());
        unsafe { allocator.free(ptr, layout) };
        assert!(allocator.check_free(ptr, layout).is_err());
    }
}
