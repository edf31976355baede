//! Member reference handles
//!
//! Members are the outgoing edges of a managed object. They are created
//! only through a [`Construction`](crate::Construction) context and stay
//! attributed to that object for their whole lifetime, wherever the value
//! ends up living.
//!
//! A member never lends out a `&T`. Reading one registers a fresh root
//! [`Handle`], so the target stays alive for as long as the caller uses it,
//! even if the member is rewired or its owner becomes garbage meanwhile.
//! Mutators take `&self`: the targets live in the heap, not in the member,
//! so payloads hold members directly without a lock around them.

use super::{Handle, Managed, Owner, RefSlot, RefTargets};
use crate::heap::HeapShared;
use crate::object::{ObjectId, ObjectKey};
use indexmap::IndexSet;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Member - edge from a managed object to zero or one `T`
///
/// # Examples
///
/// ```rust
/// use mheap::{Heap, Member};
///
/// struct Node {
///     value: u32,
///     next: Member<Node>,
/// }
///
/// let heap = Heap::with_defaults().unwrap();
/// let tail = heap.allocate(|cx| Node { value: 2, next: cx.handle() });
/// let head = heap.allocate(|cx| Node { value: 1, next: cx.handle_to(&tail) });
///
/// let next = head.get().unwrap().next.load();
/// assert_eq!(next.get().map(|node| node.value), Some(2));
///
/// head.get().unwrap().next.clear();
/// assert!(head.get().unwrap().next.is_null());
/// ```
pub struct Member<T> {
    slot: RefSlot,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Managed> Member<T> {
    pub(crate) fn register(heap: &Arc<HeapShared>, owner: ObjectKey, target: Option<ObjectKey>) -> Self {
        Self {
            slot: RefSlot::register(heap, Owner::Object(owner), RefTargets::Single(target)),
            _marker: PhantomData,
        }
    }

    /// New root handle to the current target
    ///
    /// The handle is null if the member is null or its target is gone.
    pub fn load(&self) -> Handle<T> {
        let _guard = self.slot.heap().lock();
        let key = self.slot.read(|state, targets| {
            targets.single().filter(|&key| state.resolve(key).is_some())
        });
        Handle::root(self.slot.heap(), key)
    }

    /// Run `f` on the target while a temporary root keeps it alive
    ///
    /// # Returns
    /// `None` if the member is null or its target is gone
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        let root = self.load();
        root.get().map(f)
    }

    /// Point this member at the target of `target`
    pub fn set(&self, target: &Handle<T>) {
        self.slot.check_same_heap(&target.slot);
        let _guard = self.slot.heap().lock();
        let key = target.target();
        self.slot
            .update(|targets| *targets = RefTargets::Single(key));
    }

    pub fn clear(&self) {
        self.slot
            .update(|targets| *targets = RefTargets::Single(None));
    }

    /// Move the target into a new root handle, leaving this member null
    pub fn take(&self) -> Handle<T> {
        let _guard = self.slot.heap().lock();
        let key = self
            .slot
            .update(|targets| std::mem::replace(targets, RefTargets::Single(None)).single());
        Handle::root(self.slot.heap(), key)
    }

    pub fn is_null(&self) -> bool {
        self.id().is_none()
    }

    /// Identity of the target, if it is still alive
    pub fn id(&self) -> Option<ObjectId> {
        self.slot.read(|state, targets| {
            targets
                .single()
                .filter(|&key| state.resolve(key).is_some())
                .map(ObjectId)
        })
    }

    /// Whether this member and `target` refer to the same live object
    pub fn points_to(&self, target: &Handle<T>) -> bool {
        match (self.id(), target.id()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

impl<T: Managed> fmt::Debug for Member<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Member").field(&self.id()).finish()
    }
}

/// MemberArray - ordered edges from a managed object
///
/// Entries may be null. Operations taking an index panic when it is out of
/// bounds, the way `Vec` does.
pub struct MemberArray<T> {
    slot: RefSlot,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Managed> MemberArray<T> {
    pub(crate) fn register(heap: &Arc<HeapShared>, owner: ObjectKey) -> Self {
        Self {
            slot: RefSlot::register(heap, Owner::Object(owner), RefTargets::Array(Vec::new())),
            _marker: PhantomData,
        }
    }

    fn root_at(&self, index: Option<usize>) -> Option<Handle<T>> {
        let _guard = self.slot.heap().lock();
        let key = self.slot.read(|state, targets| {
            let entry = targets.as_array().get(index?).copied().flatten()?;
            state.resolve(entry).map(|_| entry)
        })?;
        Some(Handle::root(self.slot.heap(), Some(key)))
    }

    pub fn len(&self) -> usize {
        self.slot.read(|_, targets| targets.as_array().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Root handle to the object at `index`
    ///
    /// # Returns
    /// `None` when out of bounds, null, or destroyed
    pub fn get(&self, index: usize) -> Option<Handle<T>> {
        self.root_at(Some(index))
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

    pub fn front(&self) -> Option<Handle<T>> {
        self.root_at(Some(0))
    }

    pub fn back(&self) -> Option<Handle<T>> {
        let _guard = self.slot.heap().lock();
        self.root_at(self.len().checked_sub(1))
    }

    /// # Panics
    /// If `index >= len`
    pub fn set(&self, index: usize, target: &Handle<T>) {
        self.slot.check_same_heap(&target.slot);
        let _guard = self.slot.heap().lock();
        let key = target.target();
        self.slot
            .update(|targets| targets.as_array_mut()[index] = key);
    }

    pub fn push(&self, target: &Handle<T>) {
        self.slot.check_same_heap(&target.slot);
        let _guard = self.slot.heap().lock();
        let key = target.target();
        self.slot.update(|targets| targets.as_array_mut().push(key));
    }

    /// Remove the last entry as a root handle
    pub fn pop(&self) -> Option<Handle<T>> {
        let _guard = self.slot.heap().lock();
        let key = self.slot.update(|targets| targets.as_array_mut().pop())?;
        Some(Handle::root(self.slot.heap(), key))
    }

    /// # Panics
    /// If `index > len`
    pub fn insert(&self, index: usize, target: &Handle<T>) {
        self.slot.check_same_heap(&target.slot);
        let _guard = self.slot.heap().lock();
        let key = target.target();
        self.slot
            .update(|targets| targets.as_array_mut().insert(index, key));
    }

    /// Remove the entry at `index` as a root handle, shifting later entries
    ///
    /// # Panics
    /// If `index >= len`
    pub fn remove(&self, index: usize) -> Handle<T> {
        let _guard = self.slot.heap().lock();
        let key = self
            .slot
            .update(|targets| targets.as_array_mut().remove(index));
        Handle::root(self.slot.heap(), key)
    }

    /// Remove the first entry referring to the same object as `target`
    pub fn remove_item(&self, target: &Handle<T>) -> bool {
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
    pub fn swap(&self, a: usize, b: usize) {
        self.slot.update(|targets| targets.as_array_mut().swap(a, b));
    }

    /// Truncate, or extend with null entries
    pub fn resize(&self, len: usize) {
        self.slot
            .update(|targets| targets.as_array_mut().resize(len, None));
    }

    pub fn clear(&self) {
        self.slot.update(|targets| targets.as_array_mut().clear());
    }

    /// Whether any entry refers to the same live object as `target`
    pub fn contains(&self, target: &Handle<T>) -> bool {
        let _guard = self.slot.heap().lock();
        match target.id() {
            Some(id) => self
                .slot
                .read(|_, targets| targets.as_array().contains(&Some(id.0))),
            None => false,
        }
    }

    /// Root handles to every entry, in order
    ///
    /// Null and destroyed entries come back as null handles.
    pub fn handles(&self) -> Vec<Handle<T>> {
        let _guard = self.slot.heap().lock();
        let keys: Vec<Option<ObjectKey>> = self.slot.read(|state, targets| {
            targets
                .as_array()
                .iter()
                .map(|entry| entry.filter(|&key| state.resolve(key).is_some()))
                .collect()
        });
        keys.into_iter()
            .map(|key| Handle::root(self.slot.heap(), key))
            .collect()
    }
}

impl<T: Managed> fmt::Debug for MemberArray<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<Option<ObjectId>> = (0..self.len()).map(|i| self.id(i)).collect();
        f.debug_tuple("MemberArray").field(&ids).finish()
    }
}

/// MemberSet - distinct edges from a managed object
///
/// Null handles are never stored. Iteration follows insertion order.
pub struct MemberSet<T> {
    slot: RefSlot,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Managed> MemberSet<T> {
    pub(crate) fn register(heap: &Arc<HeapShared>, owner: ObjectKey) -> Self {
        Self {
            slot: RefSlot::register(heap, Owner::Object(owner), RefTargets::Set(IndexSet::new())),
            _marker: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.slot
            .read(|_, targets| targets.as_set().map_or(0, IndexSet::len))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// # Returns
    /// `false` if `target` is null or already a member
    pub fn insert(&self, target: &Handle<T>) -> bool {
        self.slot.check_same_heap(&target.slot);
        let _guard = self.slot.heap().lock();
        match target.id() {
            Some(id) => self.slot.update(|targets| targets.as_set_mut().insert(id.0)),
            None => false,
        }
    }

    pub fn remove(&self, target: &Handle<T>) -> bool {
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
        match target.id() {
            Some(id) => self
                .slot
                .read(|_, targets| targets.as_set().is_some_and(|set| set.contains(&id.0))),
            None => false,
        }
    }

    pub fn clear(&self) {
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

    /// Root handles to the members that are still alive
    pub fn handles(&self) -> Vec<Handle<T>> {
        let _guard = self.slot.heap().lock();
        self.ids()
            .into_iter()
            .map(|id| Handle::root(self.slot.heap(), Some(id.0)))
            .collect()
    }
}

impl<T: Managed> fmt::Debug for MemberSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MemberSet").field(&self.ids()).finish()
    }
}
