//! Handle Module - Reference Handles
//!
//! Reference handles are the only way to hold a managed object. Every handle
//! owns one [`RefRecord`] in the heap's reference arena for its whole
//! lifetime: creating a handle registers the record, dropping it
//! deregisters it. The record holds the handle's targets, so the collector
//! can trace and invalidate them without touching the handle itself.
//!
//! ## Roots
//!
//! - [`Handle<T>`]: zero or one target
//! - [`HandleArray<T>`]: ordered targets, entries may be null
//! - [`HandleSet<T>`]: unordered, distinct targets
//!
//! Root handles are traced as roots wherever they live, so they may lend
//! out `&T` for as long as they are borrowed.
//!
//! ## Members
//!
//! - [`Member<T>`], [`MemberArray<T>`], [`MemberSet<T>`]
//!
//! Members are created through a [`Construction`](crate::Construction)
//! context and are traced as outgoing edges of the object being built.
//! Reading a member yields a new root [`Handle`] rather than a borrow.

pub mod array;
pub mod member;
pub mod set;
pub mod single;

pub use array::HandleArray;
pub use member::{Member, MemberArray, MemberSet};
pub use set::HandleSet;
pub use single::Handle;

use crate::arena::Key;
use crate::error::{fatal, HeapError};
use crate::heap::{HeapShared, HeapState};
use crate::object::ObjectKey;
use indexmap::IndexSet;
use std::sync::Arc;

/// Arena key of a reference record
pub type RefKey = Key<RefRecord>;

/// Payload types the heap can manage
pub trait Managed: Send + Sync + 'static {}

impl<T: Send + Sync + 'static> Managed for T {}

/// Who a reference belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    /// Not a member of any object; traced as a root
    Root,
    /// Member of a managed object; traced through that object
    Object(ObjectKey),
    /// Member of an object that has since been destroyed; not traced
    Detached,
}

/// Targets of one reference handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefTargets {
    Single(Option<ObjectKey>),
    Array(Vec<Option<ObjectKey>>),
    Set(IndexSet<ObjectKey>),
}

impl RefTargets {
    /// Call `f` for every non-null target
    pub fn visit(&self, mut f: impl FnMut(ObjectKey)) {
        match self {
            RefTargets::Single(target) => target.iter().copied().for_each(f),
            RefTargets::Array(entries) => entries.iter().flatten().copied().for_each(f),
            RefTargets::Set(members) => members.iter().copied().for_each(&mut f),
        }
    }

    /// Null every occurrence of `key`
    ///
    /// # Returns
    /// Whether anything was cleared
    pub fn invalidate(&mut self, key: ObjectKey) -> bool {
        self.invalidate_where(|target| target == key) > 0
    }

    /// Null every target matching `pred`, returning how many were cleared
    pub fn invalidate_where(&mut self, mut pred: impl FnMut(ObjectKey) -> bool) -> usize {
        match self {
            RefTargets::Single(target) => match *target {
                Some(key) if pred(key) => {
                    *target = None;
                    1
                }
                _ => 0,
            },
            RefTargets::Array(entries) => {
                let mut cleared = 0;
                for entry in entries.iter_mut() {
                    if matches!(*entry, Some(key) if pred(key)) {
                        *entry = None;
                        cleared += 1;
                    }
                }
                cleared
            }
            RefTargets::Set(members) => {
                let before = members.len();
                members.retain(|&key| !pred(key));
                before - members.len()
            }
        }
    }

    /// Null every target
    ///
    /// Arrays keep their length; their entries become null.
    pub fn invalidate_all(&mut self) {
        self.invalidate_where(|_| true);
    }

    pub fn single(&self) -> Option<ObjectKey> {
        match self {
            RefTargets::Single(target) => *target,
            _ => None,
        }
    }

    pub(crate) fn as_array(&self) -> &[Option<ObjectKey>] {
        match self {
            RefTargets::Array(entries) => entries,
            _ => &[],
        }
    }

    /// Array entries; a record of another shape is reset to an empty array
    pub(crate) fn as_array_mut(&mut self) -> &mut Vec<Option<ObjectKey>> {
        if !matches!(self, RefTargets::Array(_)) {
            *self = RefTargets::Array(Vec::new());
        }
        match self {
            RefTargets::Array(entries) => entries,
            _ => unreachable!("reference targets were just reset to an array"),
        }
    }

    pub(crate) fn as_set(&self) -> Option<&IndexSet<ObjectKey>> {
        match self {
            RefTargets::Set(members) => Some(members),
            _ => None,
        }
    }

    /// Set members; a record of another shape is reset to an empty set
    pub(crate) fn as_set_mut(&mut self) -> &mut IndexSet<ObjectKey> {
        if !matches!(self, RefTargets::Set(_)) {
            *self = RefTargets::Set(IndexSet::new());
        }
        match self {
            RefTargets::Set(members) => members,
            _ => unreachable!("reference targets were just reset to a set"),
        }
    }
}

/// RefRecord - registration of one reference handle
#[derive(Debug, Clone)]
pub struct RefRecord {
    pub owner: Owner,
    pub targets: RefTargets,
}

/// Registration shared by every handle variant
///
/// Deregisters its record when dropped.
pub(crate) struct RefSlot {
    heap: Arc<HeapShared>,
    key: RefKey,
}

impl RefSlot {
    pub(crate) fn register(heap: &Arc<HeapShared>, owner: Owner, targets: RefTargets) -> Self {
        let key = heap.with_state(|state| state.register_reference(owner, targets));
        Self {
            heap: Arc::clone(heap),
            key,
        }
    }

    pub(crate) fn heap(&self) -> &Arc<HeapShared> {
        &self.heap
    }

    /// Read the targets together with the heap state
    pub(crate) fn read<R>(&self, f: impl FnOnce(&HeapState, &RefTargets) -> R) -> R {
        self.heap.with_state(|state| match state.refs.get(self.key) {
            Some(record) => f(state, &record.targets),
            None => fatal(HeapError::UnknownReference {
                key: format!("{:?}", self.key),
            }),
        })
    }

    /// Mutate the targets
    ///
    /// Targets that are pending destruction count as resurrected.
    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut RefTargets) -> R) -> R {
        self.heap
            .with_state(|state| state.update_reference(self.key, f))
    }

    /// Abort unless `other` belongs to the same heap
    pub(crate) fn check_same_heap(&self, other: &RefSlot) {
        if !Arc::ptr_eq(&self.heap, &other.heap) {
            fatal(HeapError::ForeignHandle {
                expected: self.heap.id(),
                actual: other.heap.id(),
            });
        }
    }
}

impl Drop for RefSlot {
    fn drop(&mut self) {
        self.heap.with_state(|state| state.deregister_reference(self.key));
    }
}
