//! Destruction - Run Destructors for a Collectable Batch
//!
//! Batch objects are destroyed one at a time. Before each one, the loop
//! checks the heap's resurrection counter under the heap lock: if any
//! reference registered or updated since the last check points at a
//! condemned object, the heap is re-marked first and every batch object the
//! re-mark keeps is returned to the live set.
//!
//! The object is moved to `Destroying` in the same critical section as the
//! counter check, and from then on no handle resolves to it. The destructor
//! itself runs with the heap lock released, so mutators keep working while
//! it runs. A destructor that panics is logged and its memory is still
//! released.

use super::mark;
use super::Batch;
use crate::heap::{HeapShared, HeapState};
use crate::logging::HeapEvent;
use crate::object::{ObjectKey, ObjectState, TypeInfo};
use crate::stats::PassTimer;
use std::cell::RefCell;
use std::collections::{HashSet, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::ptr::NonNull;

thread_local! {
    /// Heaps whose destructors are running on this thread, innermost last
    static RUNNING: RefCell<Vec<u64>> = const { RefCell::new(Vec::new()) };
}

/// Whether this thread is inside a destructor run by heap `heap`
pub(crate) fn in_destructor(heap: u64) -> bool {
    RUNNING
        .try_with(|running| running.borrow().contains(&heap))
        .unwrap_or(false)
}

/// Marks this thread as running a destructor of one heap until dropped
struct DestructorScope {
    heap: u64,
}

impl DestructorScope {
    fn enter(heap: u64) -> Self {
        let _ = RUNNING.try_with(|running| running.borrow_mut().push(heap));
        Self { heap }
    }
}

impl Drop for DestructorScope {
    fn drop(&mut self) {
        let _ = RUNNING.try_with(|running| {
            let mut running = running.borrow_mut();
            if let Some(position) = running.iter().rposition(|&heap| heap == self.heap) {
                running.remove(position);
            }
        });
    }
}

/// An object moved to `Destroying`, waiting for its destructor
pub(crate) struct Doomed {
    key: ObjectKey,
    data: NonNull<u8>,
    type_info: Option<TypeInfo>,
}

/// What happened to one batch
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BatchOutcome {
    pub(crate) destroyed: usize,
    pub(crate) resurrected: usize,
}

/// Destroy every object of `batch` that stays unreachable
///
/// `remarked_at` is the resurrection counter the batch is known to be
/// consistent with, normally the value seen by the sweep that produced it.
/// `None` re-marks before the first destructor runs; deferred batches need
/// this because arbitrary mutator activity may have happened between the
/// sweep and the worker picking the batch up.
pub(crate) fn destroy_batch(shared: &HeapShared, batch: Batch, remarked_at: Option<u64>) -> BatchOutcome {
    let timer = PassTimer::start();
    let mut work: VecDeque<ObjectKey> = batch.into();
    let mut outcome = BatchOutcome::default();
    let mut last_remark = remarked_at;

    loop {
        let doomed = {
            let guard = shared.lock();
            let mut state = guard.borrow_mut();
            if work.is_empty() {
                break;
            }

            if last_remark != Some(state.resurrections) {
                let resurrected =
                    resurrect_reachable(&mut state, &mut work, shared.now_ms(), shared.config.grace_window_ms());
                last_remark = Some(state.resurrections);

                if resurrected > 0 {
                    outcome.resurrected += resurrected;
                    shared.emit(|| HeapEvent::Resurrection {
                        heap: shared.id(),
                        objects: resurrected,
                    });
                }
                continue;
            }

            work.pop_front().and_then(|key| begin_destroy(&mut state, key))
        };

        if let Some(doomed) = doomed {
            finish_destroy(shared, doomed);
            outcome.destroyed += 1;
        }
    }

    shared.stats.record_destroyed(outcome.destroyed as u64);
    shared.stats.record_resurrections(outcome.resurrected as u64);
    shared.emit(|| HeapEvent::BatchDestroyed {
        heap: shared.id(),
        destroyed: outcome.destroyed,
        resurrected: outcome.resurrected,
        duration_ms: timer.elapsed_ms(),
    });
    log::trace!(
        "heap {}: batch destroyed {} objects, resurrected {}",
        shared.id(),
        outcome.destroyed,
        outcome.resurrected
    );

    outcome
}

/// Re-mark the heap and move every kept batch object back to the live set
///
/// References from the objects still condemned into the resurrected ones
/// are nulled, so no destructor can hand out an edge from garbage into the
/// live graph.
///
/// # Returns
/// Number of objects resurrected
pub(crate) fn resurrect_reachable(
    state: &mut HeapState,
    work: &mut VecDeque<ObjectKey>,
    now: u64,
    grace_ms: u64,
) -> usize {
    let table = mark::mark(state, now, grace_ms);

    let mut resurrected = HashSet::new();
    work.retain(|&key| {
        if !table.is_kept(key) {
            return true;
        }
        if let Some(record) = state.objects.get_mut(key) {
            if record.state == ObjectState::Condemned {
                record.state = ObjectState::Live;
                state.live.insert(key);
                resurrected.insert(key);
            }
        }
        false
    });

    if resurrected.is_empty() {
        return 0;
    }

    let HeapState { objects, refs, .. } = state;
    for &key in work.iter() {
        let Some(record) = objects.get(key) else {
            continue;
        };
        for &owned in &record.owned_refs {
            if let Some(reference) = refs.get_mut(owned) {
                reference
                    .targets
                    .invalidate_where(|target| resurrected.contains(&target));
            }
        }
    }

    resurrected.len()
}

/// Move a condemned object to `Destroying`
///
/// Must run under the heap lock, in the same critical section that checked
/// the resurrection counter.
///
/// # Returns
/// `None` if the object is gone or no longer condemned
pub(crate) fn begin_destroy(state: &mut HeapState, key: ObjectKey) -> Option<Doomed> {
    let record = state.objects.get_mut(key)?;
    if record.state != ObjectState::Condemned {
        return None;
    }

    record.state = ObjectState::Destroying;
    Some(Doomed {
        key,
        data: record.data,
        type_info: record.type_info,
    })
}

/// Run the destructor of a `Destroying` object and release its memory
///
/// The caller must not hold the heap lock.
pub(crate) fn finish_destroy(shared: &HeapShared, doomed: Doomed) {
    let Doomed { key, data, type_info } = doomed;

    let result = {
        let _scope = DestructorScope::enter(shared.id());
        // SAFETY: the payload was fully constructed and is dropped exactly
        // once; the Destroying state stops every handle from resolving to it.
        type_info.map(|info| panic::catch_unwind(AssertUnwindSafe(|| unsafe { info.drop_in_place(data) })))
    };

    if let Some(Err(_)) = result {
        log::error!(
            "heap {}: destructor of {} panicked",
            shared.id(),
            type_info.map_or("<unknown>", |info| info.name)
        );
    }

    let record = shared.with_state(|state| {
        let record = state.objects.remove(key)?;
        state.detach_owned(&record);
        Some(record)
    });

    if let Some(record) = record {
        // SAFETY: the block came from this backend with this layout and its
        // value has just been dropped.
        unsafe { shared.backend.free(record.data, record.layout) };
    }
}

/// Destroy one condemned object
///
/// # Returns
/// `false` if the object was not condemned, in which case nothing happens
pub(crate) fn destroy_object(shared: &HeapShared, key: ObjectKey) -> bool {
    match shared.with_state(|state| begin_destroy(state, key)) {
        Some(doomed) => {
            finish_destroy(shared, doomed);
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::{Owner, RefTargets};
    use crate::object::{ObjectRecord, TypeInfo};
    use std::alloc::Layout;
    use std::ptr::NonNull;

    fn condemned(state: &mut HeapState) -> ObjectKey {
        let mut record = ObjectRecord::constructing(NonNull::dangling(), Layout::new::<u8>());
        record.promote(TypeInfo::of::<u8>(), 0);
        record.state = ObjectState::Condemned;
        state.objects.insert(record)
    }

    #[test]
    fn test_resurrect_reachable_only() {
        let mut state = HeapState::new();
        let saved = condemned(&mut state);
        let garbage = condemned(&mut state);
        state.register_reference(Owner::Object(garbage), RefTargets::Single(Some(saved)));
        let root = state.register_reference(Owner::Root, RefTargets::Single(Some(saved)));
        assert_eq!(state.resurrections, 1);

        let mut work: VecDeque<ObjectKey> = vec![saved, garbage].into();
        assert_eq!(resurrect_reachable(&mut state, &mut work, 1000, 0), 1);

        assert_eq!(work, VecDeque::from(vec![garbage]));
        assert_eq!(state.objects.get(saved).unwrap().state, ObjectState::Live);
        assert!(state.live.contains(&saved));
        assert_eq!(state.objects.get(garbage).unwrap().state, ObjectState::Condemned);

        // The edge from the remaining garbage into the survivor is gone.
        let owned = state.objects.get(garbage).unwrap().owned_refs[0];
        assert_eq!(state.refs.get(owned).unwrap().targets.single(), None);
        assert_eq!(state.refs.get(root).unwrap().targets.single(), Some(saved));
    }

    #[test]
    fn test_begin_destroy_only_condemned() {
        let mut state = HeapState::new();
        let key = condemned(&mut state);
        assert!(begin_destroy(&mut state, key).is_some());
        assert_eq!(state.objects.get(key).unwrap().state, ObjectState::Destroying);
        assert!(state.resolve(key).is_none());
        assert!(begin_destroy(&mut state, key).is_none());
    }

    #[test]
    fn test_destructor_scope_nests() {
        assert!(!in_destructor(7));
        {
            let _outer = DestructorScope::enter(7);
            {
                let _inner = DestructorScope::enter(8);
                assert!(in_destructor(7) && in_destructor(8));
            }
            assert!(in_destructor(7));
            assert!(!in_destructor(8));
        }
        assert!(!in_destructor(7));
    }

    #[test]
    fn test_nothing_reachable() {
        let mut state = HeapState::new();
        let a = condemned(&mut state);
        let mut work: VecDeque<ObjectKey> = vec![a].into();
        assert_eq!(resurrect_reachable(&mut state, &mut work, 1000, 0), 0);
        assert_eq!(work.len(), 1);
    }
}
