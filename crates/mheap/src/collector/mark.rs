//! Mark Phase - Reachability Trace
//!
//! Worklist trace over the object graph. Seeds, in order:
//!
//! 1. every object on every construction stack
//! 2. every live object never reached through a reference whose promotion
//!    is younger than the grace window
//! 3. the targets of every root reference
//!
//! Kept objects are traced through their owned references. Following a
//! reference edge sets the target's sticky `referenced` flag; grace seeds
//! do not. Keep and visited state lives only in the returned [`MarkTable`].

use crate::arena::Arena;
use crate::heap::HeapState;
use crate::object::{ObjectKey, ObjectRecord, ObjectState};
use std::collections::HashSet;

/// Per-pass mark state
///
/// An object is visited exactly when it is kept, so one set holds both.
#[derive(Debug, Default)]
pub(crate) struct MarkTable {
    kept: HashSet<ObjectKey>,
}

impl MarkTable {
    pub(crate) fn is_kept(&self, key: ObjectKey) -> bool {
        self.kept.contains(&key)
    }

    pub(crate) fn len(&self) -> usize {
        self.kept.len()
    }

    /// Keep `key`, queueing it for tracing the first time it is seen
    fn keep(&mut self, key: ObjectKey, worklist: &mut Vec<ObjectKey>) {
        if self.kept.insert(key) {
            worklist.push(key);
        }
    }
}

/// Follow a reference edge into `key`
fn reach(
    objects: &mut Arena<ObjectRecord>,
    table: &mut MarkTable,
    worklist: &mut Vec<ObjectKey>,
    key: ObjectKey,
) {
    let Some(record) = objects.get_mut(key) else {
        return;
    };
    if record.state == ObjectState::Destroying {
        return;
    }

    record.referenced = true;
    table.keep(key, worklist);
}

/// Trace the heap at collector time `now`
pub(crate) fn mark(state: &mut HeapState, now: u64, grace_ms: u64) -> MarkTable {
    let HeapState {
        objects,
        refs,
        live,
        roots,
        stacks,
        ..
    } = state;

    let mut table = MarkTable::default();
    let mut worklist = Vec::new();

    for stack in stacks.iter() {
        for key in stack.snapshot() {
            if objects.contains(key) {
                table.keep(key, &mut worklist);
            }
        }
    }

    for &key in live.iter() {
        if objects.get(key).is_some_and(|record| record.in_grace(now, grace_ms)) {
            table.keep(key, &mut worklist);
        }
    }

    let mut edges = Vec::new();
    for &key in roots.iter() {
        if let Some(reference) = refs.get(key) {
            reference.targets.visit(|target| edges.push(target));
        }
    }
    for target in edges.drain(..) {
        reach(objects, &mut table, &mut worklist, target);
    }

    while let Some(key) = worklist.pop() {
        let Some(record) = objects.get(key) else {
            continue;
        };

        for &owned in &record.owned_refs {
            if let Some(reference) = refs.get(owned) {
                reference.targets.visit(|target| edges.push(target));
            }
        }
        for target in edges.drain(..) {
            reach(objects, &mut table, &mut worklist, target);
        }
    }

    table
}
