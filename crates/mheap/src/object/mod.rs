//! Object Module - Managed Object Records
//!
//! Every managed allocation has one [`ObjectRecord`] in the heap's object
//! arena. The record carries what a header prefix would: the payload
//! location and layout, the object's runtime type, its owned references,
//! the construction-size or promotion-time stamp and the sticky
//! `referenced` flag. Membership in the construction stacks, the live set
//! or a collectable batch is expressed by [`ObjectState`].
//!
//! ```text
//!   enter_construction         leave_construction
//!  ───────────────────▶ Constructing ───────────▶ Live
//!                                                  │ ▲
//!                                   sweep (unkept) │ │ re-mark (resurrected)
//!                                                  ▼ │
//!                                               Condemned
//!                                                  │
//!                                                  ▼
//!                                              Destroying ──▶ (freed)
//! ```

use crate::arena::Key;
use crate::handle::RefKey;
use indexmap::IndexSet;
use std::alloc::Layout;
use std::any::TypeId;
use std::fmt;
use std::ptr::NonNull;

/// Arena key of an object record
pub type ObjectKey = Key<ObjectRecord>;

/// Public identity of a managed object
///
/// Stays unique for the lifetime of the heap: once the object is destroyed
/// the id never resolves again, even if its slot is reused.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub(crate) ObjectKey);

impl ObjectId {
    /// Packed representation, stable for logging
    pub fn to_bits(self) -> u64 {
        self.0.to_bits()
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({:?})", self.0)
    }
}

/// Where an object is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectState {
    /// On a thread's construction stack
    Constructing,
    /// In the heap's live set
    Live,
    /// Swept into a collectable batch, destructor not yet run
    Condemned,
    /// Destructor running
    Destroying,
}

/// Runtime type of a managed payload
#[derive(Clone, Copy)]
pub struct TypeInfo {
    pub id: TypeId,
    pub name: &'static str,
    drop: unsafe fn(NonNull<u8>),
}

impl TypeInfo {
    pub fn of<T: 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
            drop: drop_value::<T>,
        }
    }

    /// Run the payload's destructor in place
    ///
    /// # Safety
    /// `data` must hold a valid, not yet dropped value of this type.
    pub unsafe fn drop_in_place(&self, data: NonNull<u8>) {
        (self.drop)(data)
    }
}

impl fmt::Debug for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeInfo").field("name", &self.name).finish()
    }
}

unsafe fn drop_value<T>(data: NonNull<u8>) {
    std::ptr::drop_in_place(data.cast::<T>().as_ptr())
}

/// ObjectRecord - per-object bookkeeping
pub struct ObjectRecord {
    /// Payload address from the allocator backend
    pub data: NonNull<u8>,

    /// Payload layout, handed back to the backend on release
    pub layout: Layout,

    /// Runtime type, known once construction has completed
    pub type_info: Option<TypeInfo>,

    /// Reference handles that are members of this object
    pub owned_refs: IndexSet<RefKey>,

    /// Byte size while constructing, promotion time (collector ms) once live
    pub stamp: u64,

    /// Set once the object has been reached through a reference edge
    pub referenced: bool,

    pub state: ObjectState,
}

// SAFETY: `data` is only dereferenced by the thread holding the heap lock
// or through a handle whose payload type is Send + Sync.
unsafe impl Send for ObjectRecord {}

impl ObjectRecord {
    /// Record for an object entering construction
    pub fn constructing(data: NonNull<u8>, layout: Layout) -> Self {
        Self {
            data,
            layout,
            type_info: None,
            owned_refs: IndexSet::new(),
            stamp: layout.size() as u64,
            referenced: false,
            state: ObjectState::Constructing,
        }
    }

    /// Move to the live set at collector time `now`
    pub fn promote(&mut self, type_info: TypeInfo, now: u64) {
        self.type_info = Some(type_info);
        self.stamp = now;
        self.state = ObjectState::Live;
    }

    /// Whether handles may resolve to the payload
    pub fn is_resolvable(&self) -> bool {
        matches!(self.state, ObjectState::Live | ObjectState::Condemned)
    }

    /// Whether the grace window still protects this object at time `now`
    pub fn in_grace(&self, now: u64, grace_ms: u64) -> bool {
        self.state == ObjectState::Live && !self.referenced && now.saturating_sub(self.stamp) < grace_ms
    }

    pub fn type_id(&self) -> Option<TypeId> {
        self.type_info.map(|info| info.id)
    }

    pub fn type_name(&self) -> &'static str {
        self.type_info.map_or("<constructing>", |info| info.name)
    }
}
