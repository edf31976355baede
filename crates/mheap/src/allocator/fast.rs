//! Fast Allocator - Size-Class Pool
//!
//! Serves small requests from fixed power-of-two size classes. Each class
//! carves blocks out of anonymous memory chunks and keeps released blocks
//! on an intrusive free list, so steady-state allocation is a pop and
//! release is a push.
//!
//! ## Size classes
//!
//! ```text
//! 16  32  64  128  256  512
//! ```
//!
//! Requests larger than 512 bytes, or aligned to more than 16 bytes, go to
//! the system allocator. Chunks are never returned to the OS while the
//! allocator lives; they are unmapped when it is dropped.

use super::{AllocatorBackend, AllocatorStats, Counters, SystemAllocator};
use crate::util::constants::{FAST_CHUNK_SIZE, FAST_MAX_ALIGNMENT, MAX_SIZE_CLASS, MIN_SIZE_CLASS};
use crate::util::Alignment;
use memmap2::{MmapMut, MmapOptions};
use parking_lot::Mutex;
use std::alloc::Layout;
use std::ptr::NonNull;

/// Number of size classes between `MIN_SIZE_CLASS` and `MAX_SIZE_CLASS`
const CLASS_COUNT: usize =
    (MAX_SIZE_CLASS.trailing_zeros() - MIN_SIZE_CLASS.trailing_zeros()) as usize + 1;

/// Per-class state
#[derive(Default)]
struct ClassPool {
    /// Head of the intrusive free list (0 = empty)
    free_head: usize,
    /// Next unused byte in the current chunk
    cursor: usize,
    /// End of the current chunk
    limit: usize,
    /// Chunks backing this class
    chunks: Vec<MmapMut>,
    /// Blocks currently on the free list
    free_blocks: usize,
}

impl ClassPool {
    fn pop(&mut self, block_size: usize) -> Option<NonNull<u8>> {
        if self.free_head != 0 {
            let block = self.free_head as *mut usize;
            // SAFETY: free blocks store the address of the next free block
            // in their first word and are at least 16 bytes.
            self.free_head = unsafe { block.read() };
            self.free_blocks -= 1;
            return NonNull::new(block as *mut u8);
        }

        if self.cursor + block_size > self.limit {
            self.grow()?;
        }

        let block = self.cursor;
        self.cursor += block_size;
        NonNull::new(block as *mut u8)
    }

    fn push(&mut self, ptr: NonNull<u8>) {
        let block = ptr.as_ptr() as *mut usize;
        // SAFETY: the block belongs to this class and is no longer in use.
        unsafe { block.write(self.free_head) };
        self.free_head = block as usize;
        self.free_blocks += 1;
    }

    fn grow(&mut self) -> Option<()> {
        let size = Alignment::align_to_page(FAST_CHUNK_SIZE);
        let mut chunk = match MmapOptions::new().len(size).map_anon() {
            Ok(chunk) => chunk,
            Err(e) => {
                log::warn!("fast allocator: failed to map {} byte chunk: {}", size, e);
                return None;
            }
        };

        self.cursor = chunk.as_mut_ptr() as usize;
        self.limit = self.cursor + size;
        self.chunks.push(chunk);
        Some(())
    }
}

/// FastAllocator - size-class pool backend
///
/// Each class has its own lock so allocations of different sizes do not
/// contend.
pub struct FastAllocator {
    classes: [Mutex<ClassPool>; CLASS_COUNT],
    fallback: SystemAllocator,
    counters: Counters,
}

impl FastAllocator {
    pub fn new() -> Self {
        Self {
            classes: std::array::from_fn(|_| Mutex::new(ClassPool::default())),
            fallback: SystemAllocator::new(),
            counters: Counters::default(),
        }
    }

    /// Size class index for a layout, or `None` if it must use the fallback
    fn class_index(layout: Layout) -> Option<usize> {
        if layout.align() > FAST_MAX_ALIGNMENT || layout.size() > MAX_SIZE_CLASS {
            return None;
        }

        let size = layout.size().max(layout.align()).max(MIN_SIZE_CLASS);
        let class = size.next_power_of_two();
        Some((class.trailing_zeros() - MIN_SIZE_CLASS.trailing_zeros()) as usize)
    }

    /// Block size for a class index
    fn class_size(index: usize) -> usize {
        MIN_SIZE_CLASS << index
    }

    /// Number of chunks mapped across all classes
    pub fn chunk_count(&self) -> usize {
        self.classes.iter().map(|c| c.lock().chunks.len()).sum()
    }

    /// Number of released blocks waiting on the free lists
    pub fn free_block_count(&self) -> usize {
        self.classes.iter().map(|c| c.lock().free_blocks).sum()
    }
}

impl Default for FastAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl AllocatorBackend for FastAllocator {
    fn alloc(&self, layout: Layout) -> Option<NonNull<u8>> {
        if layout.size() == 0 {
            return None;
        }

        let Some(index) = Self::class_index(layout) else {
            return self.fallback.alloc(layout);
        };

        let ptr = self.classes[index].lock().pop(Self::class_size(index))?;
        self.counters.record_alloc(layout.size());
        Some(ptr)
    }

    unsafe fn free(&self, ptr: NonNull<u8>, layout: Layout) {
        match Self::class_index(layout) {
            Some(index) => {
                self.classes[index].lock().push(ptr);
                self.counters.record_free(layout.size());
            }
            None => self.fallback.free(ptr, layout),
        }
    }

    fn name(&self) -> &'static str {
        "fast"
    }

    fn stats(&self) -> AllocatorStats {
        let pooled = self.counters.snapshot();
        let large = self.fallback.stats();
        AllocatorStats {
            allocations: pooled.allocations + large.allocations,
            frees: pooled.frees + large.frees,
            outstanding: pooled.outstanding + large.outstanding,
            outstanding_bytes: pooled.outstanding_bytes + large.outstanding_bytes,
        }
    }
}
