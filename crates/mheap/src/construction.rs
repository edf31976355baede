//! Construction Module - Thread-Local Construction Stacks
//!
//! Objects between enter and leave construction live on the calling
//! thread's construction stack. The collector traces every registered
//! stack, so a half-built object and everything its member handles point to
//! survive any pass that runs while its constructor is still executing.
//!
//! Each thread finds its stack for a given heap through thread-local
//! storage, without taking the heap lock. The heap keeps a registry of all
//! stacks for tracing. Lock order is heap lock first, then stack.

use crate::handle::{Handle, Managed, Member, MemberArray, MemberSet};
use crate::heap::HeapShared;
use crate::object::{ObjectId, ObjectKey};
use parking_lot::Mutex;
use std::cell::RefCell;
use std::sync::Arc;

thread_local! {
    static STACKS: RefCell<Vec<(u64, Arc<ConstructionStack>)>> = const { RefCell::new(Vec::new()) };
}

/// ConstructionStack - objects under construction on one thread
pub(crate) struct ConstructionStack {
    thread: String,
    frames: Mutex<Vec<ObjectKey>>,
}

impl ConstructionStack {
    fn new() -> Self {
        let current = std::thread::current();
        let thread = match current.name() {
            Some(name) => name.to_string(),
            None => format!("{:?}", current.id()),
        };

        Self {
            thread,
            frames: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn thread(&self) -> &str {
        &self.thread
    }

    pub(crate) fn push(&self, key: ObjectKey) {
        self.frames.lock().push(key);
    }

    pub(crate) fn top(&self) -> Option<ObjectKey> {
        self.frames.lock().last().copied()
    }

    pub(crate) fn pop(&self) -> Option<ObjectKey> {
        self.frames.lock().pop()
    }

    /// Remove `key` wherever it sits
    pub(crate) fn remove(&self, key: ObjectKey) -> bool {
        let mut frames = self.frames.lock();
        match frames.iter().rposition(|&frame| frame == key) {
            Some(position) => {
                frames.remove(position);
                true
            }
            None => false,
        }
    }

    pub(crate) fn snapshot(&self) -> Vec<ObjectKey> {
        self.frames.lock().clone()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.frames.lock().is_empty()
    }
}

/// The calling thread's construction stack for `heap`, created on first use
pub(crate) fn current_stack(heap: &HeapShared) -> Arc<ConstructionStack> {
    let found = STACKS
        .try_with(|stacks| {
            stacks
                .borrow()
                .iter()
                .find(|(id, _)| *id == heap.id())
                .map(|(_, stack)| Arc::clone(stack))
        })
        .ok()
        .flatten();

    if let Some(stack) = found {
        return stack;
    }

    let stack = Arc::new(ConstructionStack::new());
    let _ = STACKS.try_with(|stacks| {
        let mut stacks = stacks.borrow_mut();
        // Entries whose heap has dropped its registry are dead.
        stacks.retain(|(_, stack)| Arc::strong_count(stack) > 1);
        stacks.push((heap.id(), Arc::clone(&stack)));
    });

    heap.with_state(|state| state.register_stack(Arc::clone(&stack)));
    stack
}

/// Context handed to a constructor running under [`Heap::allocate`](crate::Heap::allocate)
///
/// Handles created through the context are [`Member`]s of the object being
/// constructed, so the collector traces them through that object instead
/// of treating them as roots. Raw constructions get one from
/// [`Heap::construction`](crate::Heap::construction).
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
/// let next = head.get().unwrap().next.with(|node| node.value);
/// assert_eq!(next, Some(2));
/// ```
pub struct Construction<'h> {
    heap: &'h Arc<HeapShared>,
    object: ObjectKey,
}

impl<'h> Construction<'h> {
    pub(crate) fn new(heap: &'h Arc<HeapShared>, object: ObjectKey) -> Self {
        Self { heap, object }
    }

    /// Identity of the object under construction
    pub fn id(&self) -> ObjectId {
        ObjectId(self.object)
    }

    /// Null member
    pub fn handle<T: Managed>(&self) -> Member<T> {
        Member::register(self.heap, self.object, None)
    }

    /// Member pointing at the target of `target`
    pub fn handle_to<T: Managed>(&self, target: &Handle<T>) -> Member<T> {
        let _guard = self.heap.lock();
        Member::register(self.heap, self.object, target.target())
    }

    /// Empty member array
    pub fn handle_array<T: Managed>(&self) -> MemberArray<T> {
        MemberArray::register(self.heap, self.object)
    }

    /// Empty member set
    pub fn handle_set<T: Managed>(&self) -> MemberSet<T> {
        MemberSet::register(self.heap, self.object)
    }

    /// Allocate another object, returning a root handle to it
    pub fn allocate<U: Managed>(&self, ctor: impl FnOnce(&mut Construction<'_>) -> U) -> Handle<U> {
        self.heap.allocate(ctor)
    }

    /// Allocate another object and return a member pointing at it
    pub fn allocate_member<U: Managed>(
        &self,
        ctor: impl FnOnce(&mut Construction<'_>) -> U,
    ) -> Member<U> {
        let root = self.heap.allocate(ctor);
        self.handle_to(&root)
    }
}

/// Unwinds a construction whose constructor panicked
///
/// Dropping an armed guard pops the frame, removes the record and returns
/// the memory without running any destructor.
pub(crate) struct ConstructionGuard<'a> {
    heap: &'a HeapShared,
    stack: &'a ConstructionStack,
    key: ObjectKey,
    armed: bool,
}

impl<'a> ConstructionGuard<'a> {
    pub(crate) fn new(heap: &'a HeapShared, stack: &'a ConstructionStack, key: ObjectKey) -> Self {
        Self {
            heap,
            stack,
            key,
            armed: true,
        }
    }

    pub(crate) fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ConstructionGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.heap.abandon_construction(self.stack, self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Arena;
    use crate::object::ObjectRecord;

    fn keys(n: usize) -> Vec<ObjectKey> {
        let mut arena = Arena::new();
        (0..n)
            .map(|_| {
                arena.insert(ObjectRecord::constructing(
                    std::ptr::NonNull::dangling(),
                    std::alloc::Layout::new::<u8>(),
                ))
            })
            .collect()
    }

    #[test]
    fn test_stack_order() {
        let stack = ConstructionStack::new();
        let k = keys(3);
        for &key in &k {
            stack.push(key);
        }

        assert_eq!(stack.top(), Some(k[2]));
        assert!(stack.remove(k[1]));
        assert_eq!(stack.snapshot(), vec![k[0], k[2]]);
        assert_eq!(stack.pop(), Some(k[2]));
        assert_eq!(stack.pop(), Some(k[0]));
        assert!(stack.is_empty());
        assert_eq!(stack.pop(), None);
    }

    #[test]
    fn test_thread_name_recorded() {
        let stack = std::thread::Builder::new()
            .name("builder".to_string())
            .spawn(ConstructionStack::new)
            .unwrap()
            .join()
            .unwrap();
        assert_eq!(stack.thread(), "builder");
    }
}
