//! Fatal Condition Tests
//!
//! Protocol violations abort the process after printing a diagnostic. Each
//! test here re-runs itself in a child process with `FATAL_CHILD_ENV` set:
//! the child commits the violation, the parent checks that the child died
//! abnormally and printed the expected message.
//!
//! Covered:
//! - leaving a construction with an empty stack
//! - leaving a construction that is not on top of the stack
//! - dropping a heap while memory is still allocated
//! - combining handles from two heaps
//! - entering a construction with an unusable layout

mod common;

use common::*;
use mheap::Heap;
use std::alloc::Layout;
use std::env;
use std::process::Command;
use std::ptr::NonNull;

/// Set in the child process that commits the violation
const FATAL_CHILD_ENV: &str = "MHEAP_TEST_FATAL_CHILD";

/// ============================================================================
/// CHILD PROCESS HARNESS
/// ============================================================================

/// Run `violation` in a child copy of this test and expect an abort
///
/// `test_name` must be the name of the calling test. In the child the
/// violation runs and must never return; in the parent the child's exit
/// status and stderr are checked.
#[track_caller]
fn expect_abort(test_name: &str, message: &str, violation: impl FnOnce()) {
    if env::var_os(FATAL_CHILD_ENV).is_some() {
        violation();
        panic!("{} returned instead of aborting", test_name);
    }

    let exe = env::current_exe().expect("test binary path should be known");
    let output = Command::new(exe)
        .args([test_name, "--exact", "--nocapture", "--test-threads=1"])
        .env(FATAL_CHILD_ENV, "1")
        .output()
        .expect("child test process should start");
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(
        !output.status.success(),
        "{} exited cleanly; stderr:\n{}",
        test_name,
        stderr
    );
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        assert!(
            output.status.signal().is_some(),
            "{} exited with {:?} instead of aborting; stderr:\n{}",
            test_name,
            output.status,
            stderr
        );
    }
    assert!(
        stderr.contains("mheap fatal error"),
        "{} printed no fatal diagnostic; stderr:\n{}",
        test_name,
        stderr
    );
    assert!(
        stderr.contains(message),
        "{} stderr lacks {:?}; stderr:\n{}",
        test_name,
        message,
        stderr
    );
}

/// ============================================================================
/// CONSTRUCTION PROTOCOL
/// ============================================================================

/// **Bug this finds:** leaving with nothing under construction silently
/// promoting garbage, or indexing past an empty stack
#[test]
fn test_construction_underflow_aborts() {
    expect_abort(
        "test_construction_underflow_aborts",
        "Construction stack underflow",
        || {
            let fx = HeapFixture::inline();
            unsafe {
                fx.heap.leave_construction::<u64>(NonNull::dangling());
            }
        },
    );
}

/// **Bug this finds:** an out-of-order leave promoting the wrong object
#[test]
fn test_construction_mismatch_aborts() {
    expect_abort(
        "test_construction_mismatch_aborts",
        "Construction mismatch",
        || {
            let fx = HeapFixture::inline();
            let outer = fx.heap.enter_construction(Layout::new::<u64>());
            let _inner = fx.heap.enter_construction(Layout::new::<u32>());
            unsafe {
                outer.cast::<u64>().as_ptr().write(1);
                fx.heap.leave_construction::<u64>(outer);
            }
        },
    );
}

/// **Bug this finds:** zero-sized raw allocations handed to the backend
#[test]
fn test_zero_sized_layout_aborts() {
    expect_abort("test_zero_sized_layout_aborts", "Invalid layout", || {
        let fx = HeapFixture::inline();
        let layout = Layout::from_size_align(0, 1).expect("zero size is a valid layout");
        fx.heap.enter_construction(layout);
    });
}

/// ============================================================================
/// HEAP BOUNDARIES
/// ============================================================================

/// **Bug this finds:** a heap tearing down while an object is still being
/// built, leaking its memory without a word
#[test]
fn test_outstanding_allocation_at_teardown_aborts() {
    expect_abort(
        "test_outstanding_allocation_at_teardown_aborts",
        "Outstanding allocations at teardown",
        || {
            let heap = Heap::new(inline_config()).expect("valid config");
            heap.enter_construction(Layout::new::<u64>());
            drop(heap);
        },
    );
}

/// **Bug this finds:** an edge from one heap into another, which neither
/// heap's collector could trace
#[test]
fn test_foreign_handle_aborts() {
    expect_abort("test_foreign_handle_aborts", "Handle belongs to heap", || {
        let first = HeapFixture::inline();
        let second = HeapFixture::inline();
        let mut local = first.heap.handle::<u64>();
        let foreign = second.heap.allocate(|_| 5u64);
        local.set(&foreign);
    });
}
