//! Test Utilities for the mheap Test Suite
//!
//! Shared fixture, payload types and strict assertions. Every helper that
//! asserts is `#[track_caller]`, so a failure points at the test line.
//!
//! ============================================================================
//! Payloads count their own destruction: a test can always tell whether an
//! object was leaked, destroyed once, or destroyed twice.
//! ============================================================================

#![allow(dead_code)]

use mheap::{DestructionMode, Handle, Heap, HeapConfig, Member, MemberArray};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Maximum time a blocking test step may take
pub const TEST_TIMEOUT: Duration = Duration::from_secs(30);

/// ============================================================================
/// CONFIGURATIONS
/// ============================================================================

/// Inline destruction, no grace window, no automatic collections
pub fn inline_config() -> HeapConfig {
    HeapConfig {
        destruction: DestructionMode::Inline,
        grace_window: Duration::ZERO,
        collect_after_allocations: u64::MAX,
        collect_after_removals: u64::MAX,
        ..Default::default()
    }
}

/// Deferred destruction, otherwise like [`inline_config`]
pub fn deferred_config() -> HeapConfig {
    HeapConfig {
        destruction: DestructionMode::Deferred,
        worker_poll_interval: Duration::from_millis(10),
        ..inline_config()
    }
}

/// ============================================================================
/// HEAP FIXTURE
/// ============================================================================

/// Test fixture owning one heap and a shared destruction counter
pub struct HeapFixture {
    pub heap: Heap,
    pub drops: Arc<AtomicUsize>,
}

impl HeapFixture {
    /// **Bug this finds:** configuration or worker startup failures
    pub fn with_config(config: HeapConfig) -> Self {
        let heap = Heap::new(config).expect("heap creation should succeed with a valid config");
        Self {
            heap,
            drops: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn inline() -> Self {
        Self::with_config(inline_config())
    }

    pub fn deferred() -> Self {
        Self::with_config(deferred_config())
    }

    /// Collect and wait for every pending batch
    pub fn collect(&self) {
        self.heap.collect(true);
    }

    /// Destructors run so far on objects built by this fixture
    pub fn dropped(&self) -> usize {
        self.drops.load(Ordering::SeqCst)
    }

    /// Allocate a node with no outgoing references
    pub fn node(&self, value: u64) -> Handle<Node> {
        let drops = Arc::clone(&self.drops);
        self.heap.allocate(move |cx| Node {
            value,
            next: cx.handle(),
            children: cx.handle_array(),
            drops,
        })
    }

    /// Allocate a payload that only counts its destruction
    pub fn tracked(&self) -> Handle<Tracked> {
        let drops = Arc::clone(&self.drops);
        self.heap.allocate(move |_| Tracked { drops })
    }

    #[track_caller]
    pub fn assert_live(&self, expected: usize) {
        assert_eq!(
            self.heap.live_object_count(),
            expected,
            "unexpected live object count"
        );
    }

    #[track_caller]
    pub fn assert_dropped(&self, expected: usize) {
        assert_eq!(self.dropped(), expected, "unexpected destructor count");
    }

    /// Every allocation handed back to the backend
    #[track_caller]
    pub fn assert_no_outstanding(&self) {
        let stats = self.heap.allocator_stats();
        assert_eq!(
            stats.outstanding, 0,
            "backend still holds {} allocations ({} bytes)",
            stats.outstanding, stats.outstanding_bytes
        );
    }
}

/// ============================================================================
/// PAYLOADS
/// ============================================================================

/// Graph node with member references
pub struct Node {
    pub value: u64,
    pub next: Member<Node>,
    pub children: MemberArray<Node>,
    drops: Arc<AtomicUsize>,
}

impl Drop for Node {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Leaf payload counting its destruction
pub struct Tracked {
    drops: Arc<AtomicUsize>,
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Point `from.next` at `to`
pub fn link(from: &Handle<Node>, to: &Handle<Node>) {
    from.get().expect("link source must be alive").next.set(to);
}

/// Append `to` to `from.children`
pub fn adopt_child(from: &Handle<Node>, to: &Handle<Node>) {
    from.get().expect("parent must be alive").children.push(to);
}

/// ============================================================================
/// ASSERTIONS
/// ============================================================================

/// Run `f` and fail if it takes longer than `TEST_TIMEOUT`
#[track_caller]
pub fn assert_completes<R>(what: &str, f: impl FnOnce() -> R) -> R {
    let start = Instant::now();
    let result = f();
    assert!(
        start.elapsed() < TEST_TIMEOUT,
        "{} took {:?}, longer than {:?}",
        what,
        start.elapsed(),
        TEST_TIMEOUT
    );
    result
}
