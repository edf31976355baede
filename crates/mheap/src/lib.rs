//! # mheap - Managed-Object Heap with a Tracing Collector
//!
//! mheap owns a heap of managed objects that refer to each other through
//! registered reference handles. A mark-and-sweep collector reclaims every
//! object no longer reachable from a root handle, cycles included, and runs
//! its destructor either on the collecting thread or on a background worker.
//!
//! ## Overview
//!
//! - **Reference handles**: root [`Handle`], [`HandleArray`] and
//!   [`HandleSet`], plus [`Member`], [`MemberArray`] and [`MemberSet`] for
//!   the edges stored inside objects; every one registers itself with the
//!   heap for its whole lifetime
//! - **Construction safety**: objects under construction sit on a
//!   thread-local construction stack and are never collected
//! - **Grace window**: freshly built objects survive until something
//!   references them or the window elapses
//! - **Resurrection**: a destructor that stores a reference to another
//!   condemned object keeps that object alive
//! - **Pluggable backends**: system, size-class pool or tracking allocator
//!
//! ## Quick Start
//!
//! ```rust
//! use mheap::{DestructionMode, Heap, HeapConfig, Member};
//! use std::time::Duration;
//!
//! fn main() -> mheap::Result<()> {
//!     let heap = Heap::new(HeapConfig {
//!         destruction: DestructionMode::Inline,
//!         grace_window: Duration::ZERO,
//!         ..Default::default()
//!     })?;
//!
//!     struct Node {
//!         next: Member<Node>,
//!     }
//!
//!     // Two nodes referring to each other.
//!     let a = heap.allocate(|cx| Node { next: cx.handle() });
//!     let b = heap.allocate(|cx| Node { next: cx.handle_to(&a) });
//!     a.get().unwrap().next.set(&b);
//!
//!     drop(b);
//!     heap.collect(true);
//!     assert_eq!(heap.live_object_count(), 2);
//!
//!     // Once the last root is gone, the cycle is reclaimed.
//!     drop(a);
//!     heap.collect(true);
//!     assert_eq!(heap.live_object_count(), 0);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    Mutator Threads                       │
//! │   Handle / HandleArray / HandleSet     Construction      │
//! │              │                          stacks           │
//! └──────────────┼─────────────────────────────┼─────────────┘
//!                ▼                             ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │           Heap lock (re-entrant) + HeapState             │
//! │   objects · references · live set · roots · stacks       │
//! │                           │                              │
//! │              mark ──▶ sweep ──▶ batch                    │
//! └───────────────────────────┼──────────────────────────────┘
//!                 ┌───────────┴───────────┐
//!                 ▼                       ▼
//!          inline destroy        destruction worker
//!                 └───────────┬───────────┘
//!                             ▼
//!                    AllocatorBackend::free
//! ```

pub mod allocator;
pub mod arena;
pub mod config;
pub mod error;
pub mod handle;
pub mod logging;
pub mod object;
pub mod stats;
pub mod util;

mod collector;
mod construction;
mod heap;

pub use allocator::{AllocatorBackend, AllocatorStats};
pub use config::{AllocatorKind, ConfigError, DestructionMode, HeapConfig};
pub use construction::Construction;
pub use error::{HeapError, Result};
pub use handle::{Handle, HandleArray, HandleSet, Managed, Member, MemberArray, MemberSet};
pub use heap::{Heap, TypeCensus};
pub use object::ObjectId;
pub use stats::HeapStats;
