//! Set reference handle

use super::{Handle, Managed, Owner, RefSlot, RefTargets};
use crate::heap::HeapShared;
use crate::object::{ObjectId, ObjectKey};
use indexmap::IndexSet;
use std::fmt;
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::sync::Arc;

/// HandleSet - distinct root references to managed `T`
///
/// Null handles are never stored. Iteration follows insertion order, with
/// removals shifting later members down.
pub struct HandleSet<T> {
    slot: RefSlot,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Managed> HandleSet<T> {
    pub(crate) fn root(heap: &Arc<HeapShared>, members: IndexSet<ObjectKey>) -> Self {
        Self {
            slot: RefSlot::register(heap, Owner::Root, RefTargets::Set(members)),
            _marker: PhantomData,
        }
    }

    fn members(&self) -> IndexSet<ObjectKey> {
        self.slot
            .read(|_, targets| targets.as_set().cloned().unwrap_or_default())
    }

    /// Number of members
    pub fn len(&self) -> usize {
        self.slot
            .read(|_, targets| targets.as_set().map_or(0, IndexSet::len))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Add the target of `target`
    ///
    /// # Returns
    /// `false` if `target` is null or already a member
    pub fn insert(&mut self, target: &Handle<T>) -> bool {
        self.slot.check_same_heap(&target.slot);
        let _guard = self.slot.heap().lock();
        if target.is_null() {
            return false;
        }
        match target.target() {
            Some(key) => self.slot.update(|targets| targets.as_set_mut().insert(key)),
            None => false,
        }
    }

    /// Remove the target of `target`
    ///
    /// # Returns
    /// Whether it was a member
    pub fn remove(&mut self, target: &Handle<T>) -> bool {
        self.slot.check_same_heap(&target.slot);
        let _guard = self.slot.heap().lock();
        match target.target() {
            Some(key) => self
                .slot
                .update(|targets| targets.as_set_mut().shift_remove(&key)),
            None => false,
        }
    }

    pub fn contains(&self, target: &Handle<T>) -> bool {
        let _guard = self.slot.heap().lock();
        match target.target() {
            Some(key) => !target.is_null() && self.members().contains(&key),
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.slot.update(|targets| targets.as_set_mut().clear());
    }

    /// Identities of the members that are still alive
    pub fn ids(&self) -> Vec<ObjectId> {
        self.slot.read(|state, targets| {
            targets
                .as_set()
                .into_iter()
                .flatten()
                .copied()
                .filter(|&key| state.resolve(key).is_some())
                .map(ObjectId)
                .collect()
        })
    }

    /// Iterate over the members that are still alive
    ///
    /// Members are resolved when the iterator is created.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        let resolved: Vec<NonNull<u8>> = self.slot.read(|state, targets| {
            targets
                .as_set()
                .into_iter()
                .flatten()
                .filter_map(|&key| state.resolve(key))
                .collect()
        });

        // SAFETY: see `Handle::get`.
        resolved
            .into_iter()
            .map(|data| unsafe { data.cast::<T>().as_ref() })
    }
}

impl<T: Managed> Clone for HandleSet<T> {
    fn clone(&self) -> Self {
        let _guard = self.slot.heap().lock();
        HandleSet::root(self.slot.heap(), self.members())
    }
}

impl<T: Managed> fmt::Debug for HandleSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("HandleSet").field(&self.ids()).finish()
    }
}
