//! Single-object reference handle

use super::{Managed, Owner, RefSlot, RefTargets};
use crate::heap::HeapShared;
use crate::object::{ObjectId, ObjectKey};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Handle - root reference to zero or one managed `T`
///
/// A handle is a root wherever it lives: the target stays alive for as
/// long as the handle points at it. Dereferencing goes through
/// [`get`](Handle::get), which returns `None` once the target has been
/// cleared or destroyed. Cloning creates a new root to the same object.
///
/// # Examples
///
/// ```rust
/// use mheap::Heap;
///
/// let heap = Heap::with_defaults().unwrap();
/// let value = heap.allocate(|_| 42u32);
/// assert_eq!(value.get(), Some(&42));
///
/// let mut other = heap.handle::<u32>();
/// assert!(other.is_null());
/// other.set(&value);
/// assert!(other.ptr_eq(&value));
/// ```
pub struct Handle<T> {
    pub(crate) slot: RefSlot,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Managed> Handle<T> {
    pub(crate) fn root(heap: &Arc<HeapShared>, target: Option<ObjectKey>) -> Self {
        Self {
            slot: RefSlot::register(heap, Owner::Root, RefTargets::Single(target)),
            _marker: PhantomData,
        }
    }

    /// Raw target key, even if the object is gone
    pub(crate) fn target(&self) -> Option<ObjectKey> {
        self.slot.read(|_, targets| targets.single())
    }

    /// Borrow the referenced object
    ///
    /// # Returns
    /// `None` if the handle is null or its target has been destroyed
    pub fn get(&self) -> Option<&T> {
        let data = self
            .slot
            .read(|state, targets| targets.single().and_then(|key| state.resolve(key)))?;

        // SAFETY: a handle's targets always carry its own payload type. The
        // handle is a root, and it cannot be retargeted while `self` is
        // borrowed, so the target stays allocated for the borrow.
        Some(unsafe { data.cast::<T>().as_ref() })
    }

    /// Point this handle at the target of `target`
    pub fn set(&mut self, target: &Handle<T>) {
        self.slot.check_same_heap(&target.slot);
        let _guard = self.slot.heap().lock();
        let key = target.target();
        self.slot
            .update(|targets| *targets = RefTargets::Single(key));
    }

    /// Make this handle null
    pub fn clear(&mut self) {
        self.slot
            .update(|targets| *targets = RefTargets::Single(None));
    }

    /// Move the target into a new root handle, leaving this one null
    pub fn take(&mut self) -> Handle<T> {
        let _guard = self.slot.heap().lock();
        let key = self
            .slot
            .update(|targets| std::mem::replace(targets, RefTargets::Single(None)).single());
        Handle::root(self.slot.heap(), key)
    }

    pub fn is_null(&self) -> bool {
        self.id().is_none()
    }

    /// Identity of the referenced object, if it is still alive
    pub fn id(&self) -> Option<ObjectId> {
        self.slot.read(|state, targets| {
            targets
                .single()
                .filter(|&key| state.resolve(key).is_some())
                .map(ObjectId)
        })
    }

    /// Whether both handles refer to the same live object
    pub fn ptr_eq(&self, other: &Handle<T>) -> bool {
        match (self.id(), other.id()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

impl<T: Managed> Clone for Handle<T> {
    fn clone(&self) -> Self {
        let _guard = self.slot.heap().lock();
        Handle::root(self.slot.heap(), self.target())
    }
}

impl<T: Managed> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Handle").field(&self.id()).finish()
    }
}
