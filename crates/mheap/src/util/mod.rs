//! Util Module - Shared Utilities
//!
//! Utilities and helper functions used throughout the heap.

pub mod alignment;

pub use alignment::Alignment;

/// Constants for the heap
pub mod constants {
    /// 1 Kilobyte
    pub const KB: usize = 1024;

    /// Largest alignment `enter_construction` accepts
    pub const MAX_ALIGNMENT: usize = 4096;

    /// Smallest size class of the fast allocator
    pub const MIN_SIZE_CLASS: usize = 16;
    /// Largest size class of the fast allocator
    pub const MAX_SIZE_CLASS: usize = 512;
    /// Largest alignment the fast allocator serves itself
    pub const FAST_MAX_ALIGNMENT: usize = 16;
    /// Bytes mapped per fast allocator chunk (rounded up to pages)
    pub const FAST_CHUNK_SIZE: usize = 64 * KB;

    /// Fill pattern for fresh debug allocations
    pub const DEBUG_ALLOC_FILL: u8 = 0xCD;
    /// Fill pattern for released debug allocations
    pub const DEBUG_FREE_FILL: u8 = 0xDD;
}
