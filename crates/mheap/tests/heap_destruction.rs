//! Destruction Tests - Inline and Deferred Batches
//!
//! These tests verify that:
//! - deferred destruction reclaims exactly what inline destruction does
//! - a destructor storing a reference to a condemned object resurrects it
//! - destructors may re-enter the heap, and may even panic
//! - mutators keep using the heap while a destructor is blocked
//! - dropping the heap drains the destruction queue
//!
//! ============================================================================
//! DESTRUCTORS ARE USER CODE: THE HEAP MUST SURVIVE WHATEVER THEY DO
//! ============================================================================

mod common;

use common::{assert_completes, deferred_config, inline_config, link, HeapFixture};
use crossbeam::channel::{self, Sender};
use mheap::{DestructionMode, Handle, Heap, Member};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// ============================================================================
/// DEFERRED MODE
/// ============================================================================

fn reclaim_ring(fx: &HeapFixture, size: u64) -> (usize, usize) {
    let first = fx.node(0);
    let mut previous = first.clone();
    for value in 1..size {
        let node = fx.node(value);
        link(&previous, &node);
        previous = node;
    }
    link(&previous, &first);
    drop(previous);

    fx.collect();
    let survivors = fx.heap.live_object_count();

    drop(first);
    fx.collect();
    (survivors, fx.dropped())
}

/// Deferred destruction reclaims the same objects as inline destruction
///
/// **Bug this finds:** batches lost on the queue, worker skipping objects
#[test]
fn test_deferred_matches_inline() {
    let inline = HeapFixture::inline();
    let deferred = HeapFixture::deferred();

    assert_eq!(reclaim_ring(&inline, 64), (64, 64));
    assert_eq!(reclaim_ring(&deferred, 64), (64, 64));
    inline.assert_live(0);
    deferred.assert_live(0);
    assert_eq!(deferred.heap.stats().pending_batches, 0);
}

/// `collect(true)` returns only after the worker finished the batch
///
/// **Bug this finds:** wait returning while a batch is still queued
#[test]
fn test_deferred_collect_waits_for_worker() {
    let fx = HeapFixture::deferred();
    for _ in 0..10 {
        drop(fx.tracked());
        fx.collect();
        assert_eq!(fx.heap.stats().pending_batches, 0);
    }
    fx.assert_dropped(10);
    fx.assert_no_outstanding();
}

/// Dropping a heap with queued batches destroys everything
///
/// **Bug this finds:** worker exiting with batches still queued, shutdown
/// deadlock against the worker
#[test]
fn test_drop_drains_queue() {
    let drops = {
        let fx = HeapFixture::deferred();
        for _ in 0..20 {
            drop(fx.tracked());
            fx.heap.collect(false);
        }
        let _kept = fx.tracked();
        let drops = Arc::clone(&fx.drops);
        assert_completes("heap shutdown", move || drop(fx));
        drops
    };
    assert_eq!(drops.load(Ordering::SeqCst), 21);
}

/// Announces its destructor, then waits for a lock the test holds
struct Gated {
    entered: Sender<()>,
    gate: Arc<Mutex<()>>,
}

impl Drop for Gated {
    fn drop(&mut self) {
        let _ = self.entered.send(());
        let _open = self.gate.lock();
    }
}

/// A destructor blocked on an application lock does not stall mutators
///
/// The mutator holds the lock the destructor waits for, then uses the heap.
/// If destructors ran under the heap lock this would deadlock.
///
/// **Bug this finds:** heap lock held across destructor calls on the worker
#[test]
fn test_blocked_destructor_does_not_block_mutators() {
    let fx = HeapFixture::deferred();
    let survivor = fx.node(1);
    let gate = Arc::new(Mutex::new(()));
    let (entered_tx, entered_rx) = channel::bounded(1);
    let (done_tx, done_rx) = channel::bounded(1);

    drop(fx.heap.allocate(|_| Gated {
        entered: entered_tx,
        gate: Arc::clone(&gate),
    }));

    thread::scope(|scope| {
        let held = gate.lock();
        fx.heap.collect(false);
        entered_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("worker should start the destructor");

        scope.spawn(|| {
            assert_eq!(survivor.get().map(|node| node.value), Some(1));
            let other = fx.node(2);
            link(&survivor, &other);
            let copy = survivor.clone();
            fx.heap.collect(false);
            drop((other, copy));
            let _ = done_tx.send(());
        });

        let finished = done_rx.recv_timeout(Duration::from_secs(5)).is_ok();
        drop(held);
        assert!(finished, "mutator blocked while a destructor waited on its lock");
    });

    fx.collect();
    fx.assert_live(2);
    drop(survivor);
    fx.collect();
    fx.assert_live(0);
}

/// ============================================================================
/// RESURRECTION
/// ============================================================================

struct Victim(u32);

/// Saves a root to its victim when destroyed
struct Phoenix {
    victim: Member<Victim>,
    saved: Arc<Mutex<Vec<Handle<Victim>>>>,
}

impl Drop for Phoenix {
    fn drop(&mut self) {
        self.saved.lock().push(self.victim.load());
    }
}

fn resurrect(mode: DestructionMode) {
    let heap = Heap::new(match mode {
        DestructionMode::Inline => inline_config(),
        DestructionMode::Deferred => deferred_config(),
    })
    .unwrap();
    let saved = Arc::new(Mutex::new(Vec::new()));

    let phoenix = heap.allocate(|cx| Phoenix {
        victim: cx.handle(),
        saved: Arc::clone(&saved),
    });
    let victim = heap.allocate(|_| Victim(9));
    phoenix.get().unwrap().victim.set(&victim);
    drop(victim);
    drop(phoenix);

    heap.collect(true);

    assert_eq!(heap.live_object_count(), 1, "victim must be resurrected");
    assert_eq!(heap.stats().resurrections, 1);
    let rescued = saved.lock().pop().expect("destructor saved a handle");
    assert_eq!(rescued.get().map(|victim| victim.0), Some(9));

    drop(rescued);
    heap.collect(true);
    assert_eq!(heap.live_object_count(), 0);
}

/// A destructor that stores a reference to a condemned object keeps it alive
///
/// **Bug this finds:** use after free through a handle created in a
/// destructor, resurrection counter ignored
#[test]
fn test_resurrection_inline() {
    resurrect(DestructionMode::Inline);
}

/// **Bug this finds:** worker destroying without re-marking
#[test]
fn test_resurrection_deferred() {
    resurrect(DestructionMode::Deferred);
}

/// ============================================================================
/// RE-ENTRANT DESTRUCTORS
/// ============================================================================

/// Collects and allocates from its destructor
struct Reentrant {
    heap: Arc<Heap>,
    runs: Arc<AtomicUsize>,
}

impl Drop for Reentrant {
    fn drop(&mut self) {
        self.heap.collect(true);
        let scratch = self.heap.allocate(|_| 0u8);
        assert_eq!(scratch.get(), Some(&0));
        self.runs.fetch_add(1, Ordering::SeqCst);
    }
}

fn reenter(mode: DestructionMode) {
    let heap = Arc::new(
        Heap::new(match mode {
            DestructionMode::Inline => inline_config(),
            DestructionMode::Deferred => deferred_config(),
        })
        .unwrap(),
    );
    let runs = Arc::new(AtomicUsize::new(0));

    let inner = Arc::clone(&heap);
    let counter = Arc::clone(&runs);
    drop(heap.allocate(move |_| Reentrant {
        heap: inner,
        runs: counter,
    }));

    assert_completes("collect with re-entrant destructor", || heap.collect(true));
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    // The nested collect was ignored.
    assert_eq!(heap.stats().collections, 1);

    // The scratch object is ordinary garbage.
    heap.collect(true);
    assert_eq!(heap.live_object_count(), 0);
}

/// Destructors may collect and allocate without deadlocking
///
/// **Bug this finds:** non re-entrant heap lock, state borrowed across
/// destructor calls, nested pass corrupting the running batch
#[test]
fn test_reentrant_destructor_inline() {
    reenter(DestructionMode::Inline);
}

/// **Bug this finds:** worker deadlocking on `collect(true)` from a destructor
#[test]
fn test_reentrant_destructor_deferred() {
    reenter(DestructionMode::Deferred);
}

struct Exploding;

impl Drop for Exploding {
    fn drop(&mut self) {
        panic!("destructor failed");
    }
}

/// A panicking destructor does not leak or poison the heap
///
/// **Bug this finds:** batch aborted by an unwinding destructor, memory of
/// the panicking object never released
#[test]
fn test_panicking_destructor_contained() {
    let fx = HeapFixture::inline();
    drop(fx.heap.allocate(|_| Exploding));
    drop(fx.tracked());

    fx.collect();
    fx.assert_live(0);
    fx.assert_dropped(1);
    fx.assert_no_outstanding();
    assert_eq!(fx.heap.stats().objects_destroyed, 2);
}
