//! Collector Module - Mark, Sweep and Destruction Dispatch
//!
//! Mark and sweep run under the heap lock; destructors never do:
//!
//! ```text
//! collect()
//!   ├─ mark   trace from construction stacks, young objects and roots
//!   ├─ sweep  condemn every live object the mark did not keep
//!   │         (heap lock released here)
//!   └─ dispatch
//!        ├─ Inline:   destroy the batch before returning
//!        └─ Deferred: queue the batch for the destruction worker,
//!                     destroying inline when the queue is full
//! ```
//!
//! Passes never nest: a collection requested from inside a destructor is
//! ignored.

pub(crate) mod destroy;
pub(crate) mod mark;
pub(crate) mod sweep;
pub(crate) mod worker;

use crate::config::DestructionMode;
use crate::heap::{HeapShared, HeapState};
use crate::logging::HeapEvent;
use crate::object::{ObjectKey, ObjectState};
use crate::stats::PassTimer;
use crossbeam::channel::TrySendError;
use std::any::TypeId;
use std::sync::Arc;

/// Objects condemned by one sweep, in live-set order
pub(crate) type Batch = Vec<ObjectKey>;

/// Why a pass was started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CollectReason {
    /// Requested through [`Heap::collect`](crate::Heap::collect)
    Explicit,
    /// Allocation and removal thresholds both reached
    Threshold,
}

impl CollectReason {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            CollectReason::Explicit => "explicit",
            CollectReason::Threshold => "threshold",
        }
    }
}

impl HeapShared {
    /// Run one mark-and-sweep pass and dispatch its batch
    ///
    /// With `wait`, also blocks until every queued batch is destroyed.
    pub(crate) fn collect(self: &Arc<Self>, reason: CollectReason, wait: bool) {
        if destroy::in_destructor(self.id()) {
            log::trace!("heap {}: collection inside a destructor ignored", self.id());
            return;
        }

        let timer = PassTimer::start();
        let (batch, remarked_at, collection) = {
            let guard = self.lock();
            let mut state = guard.borrow_mut();

            let collection = self.stats.collections() + 1;
            self.emit(|| HeapEvent::CollectionStart {
                heap: self.id(),
                collection,
                reason: reason.as_str().to_string(),
            });

            let batch = self.mark_and_sweep(&mut state, collection);
            state.objects_since_collection = 0;
            state.references_removed_since_collection = 0;
            self.stats.record_collection(timer.elapsed());
            (batch, state.resurrections, collection)
        };

        self.emit(|| HeapEvent::CollectionEnd {
            heap: self.id(),
            collection,
            duration_ms: timer.elapsed_ms(),
        });
        log::debug!(
            "heap {}: collection {} ({}) condemned {} objects",
            self.id(),
            collection,
            reason.as_str(),
            batch.len()
        );

        if !batch.is_empty() {
            self.dispatch(batch, remarked_at);
        }

        if wait {
            self.wait_idle();
        }
    }

    fn mark_and_sweep(&self, state: &mut HeapState, collection: u64) -> Batch {
        let timer = PassTimer::start();
        let table = mark::mark(state, self.now_ms(), self.config.grace_window_ms());
        self.emit(|| HeapEvent::Mark {
            heap: self.id(),
            collection,
            marked: table.len(),
            duration_us: timer.elapsed_us(),
        });

        let batch = sweep::sweep(state, &table);
        self.emit(|| HeapEvent::Sweep {
            heap: self.id(),
            collection,
            survivors: state.live.len(),
            collectable: batch.len(),
        });

        batch
    }

    /// Hand `batch` to its destroyer
    ///
    /// `remarked_at` is the resurrection counter seen by the sweep.
    fn dispatch(&self, batch: Batch, remarked_at: u64) {
        if self.config.destruction == DestructionMode::Inline {
            destroy::destroy_batch(self, batch, Some(remarked_at));
            return;
        }

        let objects = batch.len();
        self.begin_batch();
        let rejected = match self.queue.lock().as_ref() {
            Some(sender) => match sender.try_send(batch) {
                Ok(()) => None,
                Err(TrySendError::Full(batch)) | Err(TrySendError::Disconnected(batch)) => Some(batch),
            },
            None => Some(batch),
        };

        match rejected {
            None => self.emit(|| HeapEvent::BatchQueued {
                heap: self.id(),
                objects,
            }),
            Some(batch) => {
                self.finish_batch();
                self.stats.record_inline_fallback();
                self.emit(|| HeapEvent::QueueFull {
                    heap: self.id(),
                    objects,
                });
                log::debug!(
                    "heap {}: destruction queue unavailable, destroying {} objects inline",
                    self.id(),
                    objects
                );
                destroy::destroy_batch(self, batch, Some(remarked_at));
            }
        }
    }

    /// Destroy every object whose runtime type is `type_id`, or every object
    ///
    /// Matching references are nulled first, then the matching objects are
    /// destroyed regardless of reachability. Destructors may allocate more
    /// matching objects, so this repeats until none remain.
    ///
    /// # Safety
    /// No reference to a matching object may be in use on any thread.
    pub(crate) unsafe fn collect_all_matching(&self, type_id: Option<TypeId>) {
        let selected = |record_type: Option<TypeId>| type_id.is_none() || record_type == type_id;
        let mut destroyed = 0u64;

        loop {
            let batch: Batch = self.with_state(|state| {
                let HeapState {
                    objects, refs, live, ..
                } = state;

                for (_, reference) in refs.iter_mut() {
                    match type_id {
                        None => reference.targets.invalidate_all(),
                        Some(_) => {
                            reference.targets.invalidate_where(|target| {
                                objects
                                    .get(target)
                                    .is_some_and(|record| selected(record.type_id()))
                            });
                        }
                    }
                }

                let batch: Batch = objects
                    .iter_mut()
                    .filter(|(_, record)| {
                        matches!(record.state, ObjectState::Live | ObjectState::Condemned)
                            && selected(record.type_id())
                    })
                    .map(|(key, record)| {
                        record.state = ObjectState::Condemned;
                        key
                    })
                    .collect();

                live.retain(|&key| {
                    objects
                        .get(key)
                        .is_some_and(|record| record.state == ObjectState::Live)
                });
                batch
            });

            if batch.is_empty() {
                break;
            }
            for key in batch {
                if destroy::destroy_object(self, key) {
                    destroyed += 1;
                }
            }
        }

        self.stats.record_destroyed(destroyed);
        log::debug!(
            "heap {}: destroyed {} objects unconditionally",
            self.id(),
            destroyed
        );
    }
}
