//! Array reference handle

use super::{Handle, Managed, Owner, RefSlot, RefTargets};
use crate::heap::HeapShared;
use crate::object::{ObjectId, ObjectKey};
use std::fmt;
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::sync::Arc;

/// HandleArray - ordered root references to managed `T`
///
/// Entries may be null: pushing a null [`Handle`] stores a null entry, and
/// entries whose target is collected become null without changing the
/// length. Operations taking an index panic when it is out of bounds, the
/// way `Vec` does.
pub struct HandleArray<T> {
    slot: RefSlot,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Managed> HandleArray<T> {
    pub(crate) fn root(heap: &Arc<HeapShared>, entries: Vec<Option<ObjectKey>>) -> Self {
        Self {
            slot: RefSlot::register(heap, Owner::Root, RefTargets::Array(entries)),
            _marker: PhantomData,
        }
    }

    fn entries(&self) -> Vec<Option<ObjectKey>> {
        self.slot.read(|_, targets| targets.as_array().to_vec())
    }

    fn resolve_at(&self, index: Option<usize>) -> Option<&T> {
        let data = self.slot.read(|state, targets| {
            let entries = targets.as_array();
            let index = index?;
            entries.get(index).copied().flatten().and_then(|key| state.resolve(key))
        })?;

        // SAFETY: see `Handle::get`.
        Some(unsafe { data.cast::<T>().as_ref() })
    }

    /// Root handle for a key taken out of this array
    fn detach(&self, key: Option<ObjectKey>) -> Handle<T> {
        Handle::root(self.slot.heap(), key)
    }

    pub fn len(&self) -> usize {
        self.slot.read(|_, targets| targets.as_array().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Borrow the object at `index`
    ///
    /// # Returns
    /// `None` when out of bounds, null, or destroyed
    pub fn get(&self, index: usize) -> Option<&T> {
        self.resolve_at(Some(index))
    }

    /// Identity of the object at `index`, if it is still alive
    pub fn id(&self, index: usize) -> Option<ObjectId> {
        self.slot.read(|state, targets| {
            targets
                .as_array()
                .get(index)
                .copied()
                .flatten()
                .filter(|&key| state.resolve(key).is_some())
                .map(ObjectId)
        })
    }

    pub fn front(&self) -> Option<&T> {
        self.resolve_at(Some(0))
    }

    pub fn back(&self) -> Option<&T> {
        let len = self.len();
        self.resolve_at(len.checked_sub(1))
    }

    /// Replace the entry at `index`
    ///
    /// # Panics
    /// If `index >= len`
    pub fn set(&mut self, index: usize, target: &Handle<T>) {
        self.slot.check_same_heap(&target.slot);
        let _guard = self.slot.heap().lock();
        let key = target.target();
        self.slot
            .update(|targets| targets.as_array_mut()[index] = key);
    }

    pub fn push(&mut self, target: &Handle<T>) {
        self.slot.check_same_heap(&target.slot);
        let _guard = self.slot.heap().lock();
        let key = target.target();
        self.slot.update(|targets| targets.as_array_mut().push(key));
    }

    /// Remove the last entry as a new root handle
    ///
    /// A null entry comes back as a null handle.
    pub fn pop(&mut self) -> Option<Handle<T>> {
        let _guard = self.slot.heap().lock();
        let key = self.slot.update(|targets| targets.as_array_mut().pop())?;
        Some(self.detach(key))
    }

    /// # Panics
    /// If `index > len`
    pub fn insert(&mut self, index: usize, target: &Handle<T>) {
        self.slot.check_same_heap(&target.slot);
        let _guard = self.slot.heap().lock();
        let key = target.target();
        self.slot
            .update(|targets| targets.as_array_mut().insert(index, key));
    }

    /// Remove the entry at `index` as a new root handle, shifting later entries
    ///
    /// # Panics
    /// If `index >= len`
    pub fn remove(&mut self, index: usize) -> Handle<T> {
        let _guard = self.slot.heap().lock();
        let key = self
            .slot
            .update(|targets| targets.as_array_mut().remove(index));
        self.detach(key)
    }

    /// Remove the first entry referring to the same object as `target`
    ///
    /// # Returns
    /// Whether an entry was removed
    pub fn remove_item(&mut self, target: &Handle<T>) -> bool {
        self.slot.check_same_heap(&target.slot);
        let _guard = self.slot.heap().lock();
        let key = target.target();
        self.slot.update(|targets| {
            let entries = targets.as_array_mut();
            match entries.iter().position(|entry| *entry == key) {
                Some(position) => {
                    entries.remove(position);
                    true
                }
                None => false,
            }
        })
    }

    /// # Panics
    /// If either index is out of bounds
    pub fn swap(&mut self, a: usize, b: usize) {
        self.slot.update(|targets| targets.as_array_mut().swap(a, b));
    }

    /// Truncate, or extend with null entries
    pub fn resize(&mut self, len: usize) {
        self.slot
            .update(|targets| targets.as_array_mut().resize(len, None));
    }

    pub fn clear(&mut self) {
        self.slot.update(|targets| targets.as_array_mut().clear());
    }

    /// Whether any entry refers to the same live object as `target`
    pub fn contains(&self, target: &Handle<T>) -> bool {
        let _guard = self.slot.heap().lock();
        match target.target() {
            Some(key) => self.entries().contains(&Some(key)) && !target.is_null(),
            None => false,
        }
    }

    /// Iterate over entries; null and destroyed entries yield `None`
    ///
    /// Entries are resolved when the iterator is created.
    pub fn iter(&self) -> impl Iterator<Item = Option<&T>> + '_ {
        let resolved: Vec<Option<NonNull<u8>>> = self.slot.read(|state, targets| {
            targets
                .as_array()
                .iter()
                .map(|entry| entry.and_then(|key| state.resolve(key)))
                .collect()
        });

        // SAFETY: see `Handle::get`.
        resolved
            .into_iter()
            .map(|data| data.map(|data| unsafe { data.cast::<T>().as_ref() }))
    }
}

impl<T: Managed> Clone for HandleArray<T> {
    fn clone(&self) -> Self {
        let _guard = self.slot.heap().lock();
        HandleArray::root(self.slot.heap(), self.entries())
    }
}

impl<T: Managed> fmt::Debug for HandleArray<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<Option<ObjectId>> = (0..self.len()).map(|i| self.id(i)).collect();
        f.debug_tuple("HandleArray").field(&ids).finish()
    }
}
