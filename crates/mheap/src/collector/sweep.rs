//! Sweep Phase - Partition the Live Set
//!
//! Every live object is inspected once. Kept objects stay in the live set;
//! the rest are condemned and returned as the collectable batch.

use super::mark::MarkTable;
use crate::heap::HeapState;
use crate::object::{ObjectKey, ObjectState};

/// Condemn every live object the mark left unkept
///
/// # Returns
/// The collectable batch, in live-set order
pub(crate) fn sweep(state: &mut HeapState, table: &MarkTable) -> Vec<ObjectKey> {
    let HeapState { objects, live, .. } = state;
    let mut batch = Vec::new();

    live.retain(|&key| {
        if table.is_kept(key) {
            return true;
        }

        if let Some(record) = objects.get_mut(key) {
            record.state = ObjectState::Condemned;
        }
        batch.push(key);
        false
    });

    batch
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::mark::mark;
    use crate::handle::{Owner, RefTargets};
    use crate::object::{ObjectRecord, TypeInfo};
    use std::alloc::Layout;
    use std::ptr::NonNull;

    #[test]
    fn test_unkept_objects_condemned() {
        let mut state = HeapState::new();
        let keys: Vec<ObjectKey> = (0..4)
            .map(|_| {
                let mut record = ObjectRecord::constructing(NonNull::dangling(), Layout::new::<u8>());
                record.promote(TypeInfo::of::<u8>(), 0);
                let key = state.objects.insert(record);
                state.live.insert(key);
                key
            })
            .collect();
        state.register_reference(Owner::Root, RefTargets::Single(Some(keys[1])));

        let table = mark(&mut state, 1000, 100);
        let batch = sweep(&mut state, &table);

        assert_eq!(batch, vec![keys[0], keys[2], keys[3]]);
        assert_eq!(state.live.len(), 1);
        assert!(state.live.contains(&keys[1]));
        for key in batch {
            assert_eq!(state.objects.get(key).unwrap().state, ObjectState::Condemned);
        }

        // A second sweep over the same marks condemns nothing new.
        let table = mark(&mut state, 1000, 100);
        assert!(sweep(&mut state, &table).is_empty());
    }
}
