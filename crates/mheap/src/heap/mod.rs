//! Heap Module - Managed Object Heap
//!
//! The heap owns every managed object and every reference registration.
//! All state sits behind one re-entrant lock. Constructors and destructors
//! run without it, so they may create, read and drop handles freely while
//! other threads keep using the heap.
//!
//! ## Structure
//!
//! ```text
//! Heap (owner facade, joins the worker and tears down on drop)
//!  └─ Arc<HeapShared> (shared with every handle and the worker)
//!      ├─ ReentrantMutex<RefCell<HeapState>>
//!      │   ├─ objects: Arena<ObjectRecord>
//!      │   ├─ refs:    Arena<RefRecord>
//!      │   ├─ live:    IndexSet<ObjectKey>
//!      │   ├─ roots:   IndexSet<RefKey>
//!      │   └─ stacks:  Vec<Arc<ConstructionStack>>
//!      ├─ backend: Box<dyn AllocatorBackend>
//!      └─ destruction queue + pending-batch counter
//! ```
//!
//! The lock, and with it the `RefCell` borrow, is only ever held for
//! bookkeeping and for mark and sweep.

use crate::allocator::{self, AllocatorBackend, AllocatorStats};
use crate::arena::Arena;
use crate::collector::destroy;
use crate::collector::worker::DestructionWorker;
use crate::collector::{Batch, CollectReason};
use crate::config::{DestructionMode, HeapConfig};
use crate::construction::{self, Construction, ConstructionGuard, ConstructionStack};
use crate::error::{fatal, HeapError, Result};
use crate::handle::{Handle, HandleArray, HandleSet, Managed, Owner, RefKey, RefRecord, RefTargets};
use crate::logging::{self, HeapEvent};
use crate::object::{ObjectId, ObjectKey, ObjectRecord, ObjectState, TypeInfo};
use crate::stats::{CollectorStats, HeapStats};
use crate::util::constants::MAX_ALIGNMENT;
use crossbeam::channel::Sender;
use indexmap::IndexSet;
use parking_lot::{Condvar, Mutex, ReentrantMutex, ReentrantMutexGuard};
use serde::Serialize;
use std::alloc::Layout;
use std::any::TypeId;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::io::Write;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

static NEXT_HEAP_ID: AtomicU64 = AtomicU64::new(1);

/// HeapState - everything guarded by the heap lock
pub(crate) struct HeapState {
    pub(crate) objects: Arena<ObjectRecord>,
    pub(crate) refs: Arena<RefRecord>,
    pub(crate) live: IndexSet<ObjectKey>,
    pub(crate) roots: IndexSet<RefKey>,
    pub(crate) stacks: Vec<Arc<ConstructionStack>>,

    /// Objects between enter and leave construction
    pub(crate) constructing: usize,

    /// Objects entered since the last pass
    pub(crate) objects_since_collection: u64,

    /// References deregistered since the last pass
    pub(crate) references_removed_since_collection: u64,

    /// Bumped whenever a target pending destruction gains a reference from
    /// outside its batch
    pub(crate) resurrections: u64,
}

impl HeapState {
    pub(crate) fn new() -> Self {
        Self {
            objects: Arena::new(),
            refs: Arena::new(),
            live: IndexSet::new(),
            roots: IndexSet::new(),
            stacks: Vec::new(),
            constructing: 0,
            objects_since_collection: 0,
            references_removed_since_collection: 0,
            resurrections: 0,
        }
    }

    /// Payload address if handles may resolve to `key`
    pub(crate) fn resolve(&self, key: ObjectKey) -> Option<NonNull<u8>> {
        self.objects
            .get(key)
            .filter(|record| record.is_resolvable())
            .map(|record| record.data)
    }

    pub(crate) fn register_stack(&mut self, stack: Arc<ConstructionStack>) {
        self.stacks
            .retain(|stack| Arc::strong_count(stack) > 1 || !stack.is_empty());
        self.stacks.push(stack);
    }

    /// Promoted objects not yet destroyed
    pub(crate) fn live_object_count(&self) -> usize {
        self.objects.len() - self.constructing
    }

    pub(crate) fn register_reference(&mut self, owner: Owner, targets: RefTargets) -> RefKey {
        let owner = match owner {
            Owner::Object(object) if !self.objects.contains(object) => Owner::Detached,
            owner => owner,
        };

        self.resurrections += pending_targets(&self.objects, owner, &targets);
        let key = self.refs.insert(RefRecord { owner, targets });

        let fresh = match owner {
            Owner::Root => self.roots.insert(key),
            Owner::Object(object) => self
                .objects
                .get_mut(object)
                .is_some_and(|record| record.owned_refs.insert(key)),
            Owner::Detached => true,
        };

        if !fresh {
            fatal(HeapError::DoubleRegistration {
                key: format!("{:?}", key),
            });
        }

        key
    }

    pub(crate) fn update_reference<R>(&mut self, key: RefKey, f: impl FnOnce(&mut RefTargets) -> R) -> R {
        let Some(record) = self.refs.get_mut(key) else {
            fatal(HeapError::UnknownReference {
                key: format!("{:?}", key),
            });
        };

        let result = f(&mut record.targets);
        self.resurrections += pending_targets(&self.objects, record.owner, &record.targets);
        result
    }

    pub(crate) fn deregister_reference(&mut self, key: RefKey) {
        let Some(record) = self.refs.remove(key) else {
            fatal(HeapError::DoubleDeregistration {
                key: format!("{:?}", key),
            });
        };

        match record.owner {
            Owner::Root => {
                self.roots.swap_remove(&key);
            }
            Owner::Object(object) => {
                if let Some(owner) = self.objects.get_mut(object) {
                    owner.owned_refs.swap_remove(&key);
                }
            }
            Owner::Detached => {}
        }

        self.references_removed_since_collection += 1;
    }

    /// Detach the owned references of a record that is leaving the arena
    pub(crate) fn detach_owned(&mut self, record: &ObjectRecord) {
        for &key in &record.owned_refs {
            if let Some(reference) = self.refs.get_mut(key) {
                reference.owner = Owner::Detached;
            }
        }
    }
}

/// Targets pending destruction that a reference from `owner` would keep alive
///
/// References owned by condemned or destroying objects belong to a batch
/// and never resurrect anything; detached references are not traced.
fn pending_targets(objects: &Arena<ObjectRecord>, owner: Owner, targets: &RefTargets) -> u64 {
    match owner {
        Owner::Detached => return 0,
        Owner::Object(object) => {
            let owner_pending = objects.get(object).is_some_and(|record| {
                matches!(record.state, ObjectState::Condemned | ObjectState::Destroying)
            });
            if owner_pending {
                return 0;
            }
        }
        Owner::Root => {}
    }

    let mut count = 0;
    targets.visit(|key| {
        if objects
            .get(key)
            .is_some_and(|record| record.state == ObjectState::Condemned)
        {
            count += 1;
        }
    });
    count
}

/// HeapShared - state shared by the heap, its handles and its worker
pub(crate) struct HeapShared {
    id: u64,
    pub(crate) config: HeapConfig,
    state: ReentrantMutex<RefCell<HeapState>>,
    pub(crate) backend: Box<dyn AllocatorBackend>,
    epoch: Instant,
    pub(crate) stats: CollectorStats,
    pub(crate) queue: Mutex<Option<Sender<Batch>>>,
    pending: Mutex<usize>,
    idle: Condvar,
}

impl HeapShared {
    pub(crate) fn new(config: HeapConfig, queue: Option<Sender<Batch>>) -> Self {
        Self {
            id: NEXT_HEAP_ID.fetch_add(1, Ordering::Relaxed),
            backend: allocator::create(config.allocator),
            config,
            state: ReentrantMutex::new(RefCell::new(HeapState::new())),
            epoch: Instant::now(),
            stats: CollectorStats::new(),
            queue: Mutex::new(queue),
            pending: Mutex::new(0),
            idle: Condvar::new(),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Take the heap lock
    ///
    /// Holding the guard keeps other threads out while several bookkeeping
    /// steps run; `with_state` re-enters it.
    pub(crate) fn lock(&self) -> ReentrantMutexGuard<'_, RefCell<HeapState>> {
        self.state.lock()
    }

    /// Run `f` on the heap state under the heap lock
    ///
    /// `f` must not run user code: a nested `with_state` on the same thread
    /// would find the state already borrowed.
    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut HeapState) -> R) -> R {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        f(&mut state)
    }

    /// Collector clock in milliseconds since the heap was created
    pub(crate) fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis().min(u64::MAX as u128) as u64
    }

    /// Emit a structured event when verbose logging is on
    pub(crate) fn emit(&self, event: impl FnOnce() -> HeapEvent) {
        if self.config.verbose {
            logging::log_event(event());
        }
    }

    pub(crate) fn begin_batch(&self) {
        *self.pending.lock() += 1;
    }

    pub(crate) fn finish_batch(&self) {
        let mut pending = self.pending.lock();
        *pending = pending.saturating_sub(1);
        if *pending == 0 {
            self.idle.notify_all();
        }
    }

    pub(crate) fn pending_batches(&self) -> usize {
        *self.pending.lock()
    }

    /// Block until every queued batch has been destroyed
    pub(crate) fn wait_idle(&self) {
        let mut pending = self.pending.lock();
        while *pending > 0 {
            self.idle.wait(&mut pending);
        }
    }

    /// Allocate payload memory and push a constructing record
    pub(crate) fn enter_construction(
        self: &Arc<Self>,
        layout: Layout,
    ) -> (ObjectKey, NonNull<u8>, Arc<ConstructionStack>) {
        if layout.size() == 0 || layout.align() > MAX_ALIGNMENT {
            fatal(HeapError::InvalidLayout {
                size: layout.size(),
                align: layout.align(),
            });
        }

        self.maybe_collect();

        let Some(data) = self.backend.alloc(layout) else {
            fatal(HeapError::OutOfMemory {
                size: layout.size(),
                align: layout.align(),
            });
        };

        let stack = construction::current_stack(self);
        let key = self.with_state(|state| {
            let key = state.objects.insert(ObjectRecord::constructing(data, layout));
            state.constructing += 1;
            state.objects_since_collection += 1;
            stack.push(key);
            key
        });

        (key, data, stack)
    }

    /// Pop `key` off `stack` and move it to the live set
    pub(crate) fn leave_construction(&self, stack: &ConstructionStack, key: ObjectKey, type_info: TypeInfo) {
        let now = self.now_ms();
        self.with_state(|state| {
            match stack.top() {
                None => fatal(HeapError::ConstructionUnderflow {
                    thread: stack.thread().to_string(),
                }),
                Some(top) if top != key => fatal(HeapError::ConstructionMismatch {
                    expected: top.to_bits() as usize,
                    actual: key.to_bits() as usize,
                }),
                Some(_) => {
                    stack.pop();
                }
            }

            if let Some(record) = state.objects.get_mut(key) {
                record.promote(type_info, now);
                state.live.insert(key);
                state.constructing -= 1;
            }
        });
    }

    /// Drop a construction whose constructor did not complete
    pub(crate) fn abandon_construction(&self, stack: &ConstructionStack, key: ObjectKey) {
        let record = self.with_state(|state| {
            stack.remove(key);
            let record = state.objects.remove(key)?;
            state.constructing -= 1;
            state.detach_owned(&record);
            Some(record)
        });

        if let Some(record) = record {
            // SAFETY: the block came from this backend with this layout and
            // no value was written into it.
            unsafe { self.backend.free(record.data, record.layout) };
        }
    }

    /// Run a pass if both scheduling thresholds have been reached
    fn maybe_collect(self: &Arc<Self>) {
        if destroy::in_destructor(self.id()) {
            return;
        }

        let due = self.with_state(|state| {
            state.objects_since_collection >= self.config.collect_after_allocations
                && state.references_removed_since_collection >= self.config.collect_after_removals
        });

        if due {
            self.collect(CollectReason::Threshold, false);
        }
    }

    pub(crate) fn allocate<T: Managed>(
        self: &Arc<Self>,
        ctor: impl FnOnce(&mut Construction<'_>) -> T,
    ) -> Handle<T> {
        let layout = payload_layout::<T>();
        let (key, data, stack) = self.enter_construction(layout);
        let guard = ConstructionGuard::new(self, &stack, key);

        let value = ctor(&mut Construction::new(self, key));

        // SAFETY: `data` is a fresh block sized and aligned for `T`.
        unsafe { data.cast::<T>().as_ptr().write(value) };

        let handle = Handle::root(self, Some(key));
        guard.disarm();
        self.leave_construction(&stack, key, TypeInfo::of::<T>());
        handle
    }

    pub(crate) fn adopt<T: Managed>(self: &Arc<Self>, id: ObjectId) -> Option<Handle<T>> {
        let _guard = self.lock();
        let matches = self.with_state(|state| {
            state.objects.get(id.0).is_some_and(|record| {
                record.is_resolvable() && record.type_id() == Some(TypeId::of::<T>())
            })
        });

        matches.then(|| Handle::root(self, Some(id.0)))
    }

    pub(crate) fn stats_snapshot(&self) -> HeapStats {
        let (live_objects, live_references, root_references, under_construction) =
            self.with_state(|state| {
                (
                    state.live_object_count(),
                    state.refs.len(),
                    state.roots.len(),
                    state.constructing,
                )
            });

        HeapStats {
            live_objects,
            live_references,
            root_references,
            under_construction,
            collections: self.stats.collections(),
            objects_destroyed: self.stats.objects_destroyed(),
            resurrections: self.stats.resurrections(),
            inline_fallbacks: self.stats.inline_fallbacks(),
            pending_batches: self.pending_batches(),
            mean_pause_ms: self.stats.pauses().mean() as f64 / 1_000_000.0,
            max_pause_ms: self.stats.pauses().max() as f64 / 1_000_000.0,
        }
    }

    pub(crate) fn census(&self) -> Vec<TypeCensus> {
        let mut by_type: BTreeMap<&'static str, TypeCensus> = BTreeMap::new();
        self.with_state(|state| {
            for (_, record) in state.objects.iter() {
                if record.state == ObjectState::Constructing {
                    continue;
                }
                let entry = by_type.entry(record.type_name()).or_insert_with(|| TypeCensus {
                    type_name: record.type_name(),
                    count: 0,
                    bytes: 0,
                });
                entry.count += 1;
                entry.bytes += record.layout.size();
            }
        });
        by_type.into_values().collect()
    }
}

/// Layout used for a payload of type `T`
///
/// Zero-sized payloads still get one byte so every object has a distinct
/// address.
fn payload_layout<T>() -> Layout {
    let layout = Layout::new::<T>();
    Layout::from_size_align(layout.size().max(1), layout.align()).unwrap_or(layout)
}

/// Census line for one runtime type
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeCensus {
    pub type_name: &'static str,
    pub count: usize,
    pub bytes: usize,
}

/// Heap - owner of a managed-object heap
///
/// Dropping the heap stops the destruction worker, destroys every remaining
/// object regardless of reachability and aborts if the allocator still has
/// outstanding allocations.
///
/// # Examples
///
/// ```rust
/// use mheap::{DestructionMode, Heap, HeapConfig};
/// use std::time::Duration;
///
/// let heap = Heap::new(HeapConfig {
///     destruction: DestructionMode::Inline,
///     grace_window: Duration::ZERO,
///     ..Default::default()
/// })
/// .unwrap();
///
/// let greeting = heap.allocate(|_| String::from("hello"));
/// heap.collect(true);
/// assert_eq!(heap.live_object_count(), 1);
///
/// drop(greeting);
/// heap.collect(true);
/// assert_eq!(heap.live_object_count(), 0);
/// ```
pub struct Heap {
    shared: Arc<HeapShared>,
    worker: Option<DestructionWorker>,
}

impl Heap {
    /// Create a heap
    ///
    /// # Returns
    /// `Configuration` if the config is invalid, `WorkerSpawn` if the
    /// deferred destruction worker cannot be started
    pub fn new(config: HeapConfig) -> Result<Self> {
        config.validate()?;

        let (sender, receiver) = match config.destruction {
            DestructionMode::Deferred => {
                let (sender, receiver) =
                    crossbeam::channel::bounded(config.destruction_queue_capacity);
                (Some(sender), Some(receiver))
            }
            DestructionMode::Inline => (None, None),
        };

        let shared = Arc::new(HeapShared::new(config, sender));
        let worker = match receiver {
            Some(receiver) => Some(DestructionWorker::spawn(Arc::clone(&shared), receiver)?),
            None => None,
        };

        log::debug!(
            "heap {} created ({:?} destruction, {} allocator)",
            shared.id(),
            shared.config.destruction,
            shared.backend.name()
        );

        Ok(Self { shared, worker })
    }

    /// Create a heap with the default configuration
    pub fn with_defaults() -> Result<Self> {
        Self::new(HeapConfig::default())
    }

    /// Create a heap configured from `MHEAP_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::new(HeapConfig::from_env())
    }

    /// Process-unique heap id, as used in logged events
    pub fn id(&self) -> u64 {
        self.shared.id()
    }

    pub fn config(&self) -> &HeapConfig {
        &self.shared.config
    }

    /// Allocate and construct a managed object
    ///
    /// `ctor` runs while the object sits on this thread's construction
    /// stack; handles it creates through the context are members of the
    /// new object. A panicking constructor releases the memory without
    /// running any destructor.
    pub fn allocate<T: Managed>(&self, ctor: impl FnOnce(&mut Construction<'_>) -> T) -> Handle<T> {
        self.shared.allocate(ctor)
    }

    /// Start a raw construction
    ///
    /// Returns memory for `layout` that stays protected from collection
    /// until [`leave_construction`](Heap::leave_construction). Aborts on a
    /// zero-sized layout, an alignment above `MAX_ALIGNMENT` or when the
    /// backend is out of memory.
    ///
    /// Member handles for the new object come from
    /// [`construction`](Heap::construction); any other handle created while
    /// building it is a root.
    pub fn enter_construction(&self, layout: Layout) -> NonNull<u8> {
        let (_, data, _) = self.shared.enter_construction(layout);
        data
    }

    /// Finish the construction on top of this thread's stack
    ///
    /// Aborts if this thread has nothing under construction, or if `data`
    /// is not the object on top of its stack.
    ///
    /// # Safety
    /// `data` must hold a fully initialized `T` written into memory from
    /// [`enter_construction`](Heap::enter_construction) with
    /// `Layout::new::<T>()`.
    pub unsafe fn leave_construction<T: Managed>(&self, data: NonNull<u8>) -> ObjectId {
        let stack = construction::current_stack(&self.shared);
        let Some(top) = stack.top() else {
            fatal(HeapError::ConstructionUnderflow {
                thread: stack.thread().to_string(),
            });
        };

        let top_data = self
            .shared
            .with_state(|state| state.objects.get(top).map(|record| record.data));
        if top_data != Some(data) {
            fatal(HeapError::ConstructionMismatch {
                expected: top_data.map_or(0, |top| top.as_ptr() as usize),
                actual: data.as_ptr() as usize,
            });
        }

        self.shared
            .leave_construction(&stack, top, TypeInfo::of::<T>());
        ObjectId(top)
    }

    /// Construction context for a raw construction on this thread
    ///
    /// `data` is the pointer returned by
    /// [`enter_construction`](Heap::enter_construction). The object does
    /// not have to be on top of the stack.
    ///
    /// # Returns
    /// `None` if `data` is not under construction on the calling thread
    ///
    /// # Examples
    ///
    /// ```rust
    /// use mheap::{Heap, Member};
    /// use std::alloc::Layout;
    ///
    /// struct Link {
    ///     next: Member<Link>,
    /// }
    ///
    /// let heap = Heap::with_defaults().unwrap();
    /// let data = heap.enter_construction(Layout::new::<Link>());
    /// let link = Link {
    ///     next: heap.construction(data).unwrap().handle(),
    /// };
    /// let id = unsafe {
    ///     data.cast::<Link>().as_ptr().write(link);
    ///     heap.leave_construction::<Link>(data)
    /// };
    /// assert!(heap.adopt::<Link>(id).is_some());
    /// ```
    pub fn construction(&self, data: NonNull<u8>) -> Option<Construction<'_>> {
        let stack = construction::current_stack(&self.shared);
        let frames = stack.snapshot();
        let key = self.shared.with_state(|state| {
            frames.iter().rev().copied().find(|&key| {
                state
                    .objects
                    .get(key)
                    .is_some_and(|record| record.data == data)
            })
        })?;
        Some(Construction::new(&self.shared, key))
    }

    /// Root handle to an object known by id
    ///
    /// # Returns
    /// `None` if the object is gone or is not a `T`
    pub fn adopt<T: Managed>(&self, id: ObjectId) -> Option<Handle<T>> {
        self.shared.adopt(id)
    }

    /// Null root handle
    pub fn handle<T: Managed>(&self) -> Handle<T> {
        Handle::root(&self.shared, None)
    }

    /// Empty root array
    pub fn handle_array<T: Managed>(&self) -> HandleArray<T> {
        HandleArray::root(&self.shared, Vec::new())
    }

    /// Empty root set
    pub fn handle_set<T: Managed>(&self) -> HandleSet<T> {
        HandleSet::root(&self.shared, IndexSet::new())
    }

    /// Run a mark-and-sweep pass
    ///
    /// With `wait`, blocks until the pass and every queued destruction
    /// batch have completed. Calls from inside a destructor are ignored.
    pub fn collect(&self, wait: bool) {
        self.shared.collect(CollectReason::Explicit, wait);
    }

    /// Destroy every object regardless of reachability
    ///
    /// Every reference is nulled first, roots included.
    ///
    /// # Safety
    /// No reference obtained from a handle of this heap may be in use, on
    /// any thread, while this runs or afterwards.
    pub unsafe fn collect_all(&self) {
        self.shared.collect_all_matching(None);
    }

    /// Destroy every object of runtime type `type_id` regardless of reachability
    ///
    /// References to objects of that type are nulled first.
    ///
    /// # Safety
    /// No reference to an object of that type, obtained from a handle of
    /// this heap, may be in use while this runs or afterwards.
    pub unsafe fn collect_all_of(&self, type_id: TypeId) {
        self.shared.collect_all_matching(Some(type_id));
    }

    /// Promoted objects that have not been destroyed, pending ones included
    pub fn live_object_count(&self) -> usize {
        self.shared.with_state(|state| state.live_object_count())
    }

    /// Registered reference handles
    pub fn live_reference_count(&self) -> usize {
        self.shared.with_state(|state| state.refs.len())
    }

    /// Registered handles that are not members of any object
    pub fn root_reference_count(&self) -> usize {
        self.shared.with_state(|state| state.roots.len())
    }

    pub fn stats(&self) -> HeapStats {
        self.shared.stats_snapshot()
    }

    pub fn allocator_stats(&self) -> AllocatorStats {
        self.shared.backend.stats()
    }

    /// Objects grouped by runtime type, sorted by type name
    pub fn census(&self) -> Vec<TypeCensus> {
        self.shared.census()
    }

    /// Write a census of objects by runtime type
    pub fn dump<W: Write>(&self, writer: &mut W) -> Result<()> {
        let census = self.census();
        let objects: usize = census.iter().map(|line| line.count).sum();
        let bytes: usize = census.iter().map(|line| line.bytes).sum();

        writeln!(writer, "heap {}: {} objects, {} bytes", self.id(), objects, bytes)?;
        for line in &census {
            writeln!(writer, "{:>8} {:>12}  {}", line.count, line.bytes, line.type_name)?;
        }
        Ok(())
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.shutdown(&self.shared);
        }

        // SAFETY: the heap is going away; handles that outlive it only
        // ever observe null.
        unsafe { self.shared.collect_all_matching(None) };

        let remaining = self.live_object_count();
        let backend = self.shared.backend.stats();
        if remaining != 0 || backend.outstanding != 0 {
            fatal(HeapError::OutstandingAllocations {
                count: backend.outstanding,
                bytes: backend.outstanding_bytes,
            });
        }

        self.shared.emit(|| HeapEvent::Shutdown {
            heap: self.shared.id(),
            collections: self.shared.stats.collections(),
            objects_destroyed: self.shared.stats.objects_destroyed(),
        });
        log::debug!("heap {} shut down", self.shared.id());
    }
}
