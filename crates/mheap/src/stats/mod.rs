//! Stats Module - Heap Performance Monitoring
//!
//! Collects collector statistics for:
//! - Performance tuning
//! - Production monitoring
//! - Leak hunting
//!
//! Metrics:
//! - Pause time (min, max, mean, percentiles)
//! - Collection frequency
//! - Destruction and resurrection counts
//! - Deferred queue pressure

pub mod histogram;
pub mod timer;

pub use histogram::Histogram;
pub use timer::PassTimer;

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// CollectorStats - running counters kept by the heap
///
/// Counters are atomics so the destruction worker can update them without
/// the heap lock.
pub struct CollectorStats {
    /// Mark-and-sweep passes run
    collections: AtomicU64,
    /// Objects whose destructor has run and memory was released
    objects_destroyed: AtomicU64,
    /// Objects returned to the live set by a re-mark
    resurrections: AtomicU64,
    /// Batches destroyed inline because the deferred queue was full
    inline_fallbacks: AtomicU64,
    /// Mark-and-sweep pause times (nanoseconds)
    pauses: Histogram,
    /// Creation time
    start_time: std::time::Instant,
}

impl CollectorStats {
    pub fn new() -> Self {
        Self {
            collections: AtomicU64::new(0),
            objects_destroyed: AtomicU64::new(0),
            resurrections: AtomicU64::new(0),
            inline_fallbacks: AtomicU64::new(0),
            pauses: Histogram::new(),
            start_time: std::time::Instant::now(),
        }
    }

    /// Record a finished mark-and-sweep pass
    pub fn record_collection(&self, pause: Duration) {
        self.collections.fetch_add(1, Ordering::Relaxed);
        self.pauses
            .record(pause.as_nanos().min(u64::MAX as u128) as u64);
    }

    pub fn record_destroyed(&self, count: u64) {
        self.objects_destroyed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_resurrections(&self, count: u64) {
        self.resurrections.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_inline_fallback(&self) {
        self.inline_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn collections(&self) -> u64 {
        self.collections.load(Ordering::Relaxed)
    }

    pub fn objects_destroyed(&self) -> u64 {
        self.objects_destroyed.load(Ordering::Relaxed)
    }

    pub fn resurrections(&self) -> u64 {
        self.resurrections.load(Ordering::Relaxed)
    }

    pub fn inline_fallbacks(&self) -> u64 {
        self.inline_fallbacks.load(Ordering::Relaxed)
    }

    /// Pause time histogram
    pub fn pauses(&self) -> &Histogram {
        &self.pauses
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }
}

impl Default for CollectorStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time snapshot of heap statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HeapStats {
    /// Promoted objects not yet destroyed (pending destruction included)
    pub live_objects: usize,
    /// Registered reference handles
    pub live_references: usize,
    /// Registered handles not owned by any object
    pub root_references: usize,
    /// Objects between enter and leave construction
    pub under_construction: usize,
    /// Mark-and-sweep passes run
    pub collections: u64,
    /// Objects destroyed
    pub objects_destroyed: u64,
    /// Objects resurrected during batch destruction
    pub resurrections: u64,
    /// Batches destroyed inline because the deferred queue was full
    pub inline_fallbacks: u64,
    /// Batches queued but not yet destroyed
    pub pending_batches: usize,
    /// Mean pause (milliseconds)
    pub mean_pause_ms: f64,
    /// Longest pause (milliseconds)
    pub max_pause_ms: f64,
}

impl HeapStats {
    /// Render as a JSON string
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}
