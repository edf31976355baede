//! System Allocator
//!
//! Thin counting wrapper over `std::alloc`.

use super::{AllocatorBackend, AllocatorStats, Counters};
use std::alloc::Layout;
use std::ptr::NonNull;

/// SystemAllocator - `std::alloc` backend
#[derive(Debug, Default)]
pub struct SystemAllocator {
    counters: Counters,
}

impl SystemAllocator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AllocatorBackend for SystemAllocator {
    fn alloc(&self, layout: Layout) -> Option<NonNull<u8>> {
        if layout.size() == 0 {
            return None;
        }

        // SAFETY: layout has a non-zero size.
        let ptr = NonNull::new(unsafe { std::alloc::alloc(layout) })?;
        self.counters.record_alloc(layout.size());
        Some(ptr)
    }

    unsafe fn free(&self, ptr: NonNull<u8>, layout: Layout) {
        std::alloc::dealloc(ptr.as_ptr(), layout);
        self.counters.record_free(layout.size());
    }

    fn name(&self) -> &'static str {
        "system"
    }

    fn stats(&self) -> AllocatorStats {
        self.counters.snapshot()
    }
}
