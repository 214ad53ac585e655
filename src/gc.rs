//! Mark-and-sweep collector for heap cells.
//!
//! This is the allocator/tracer the storage engine is written against:
//! [`Guard::alloc`] hands out a default-initialized, collector-registered cell,
//! [`Heap::report_extra_memory_cost`] records out-of-band memory (butterflies,
//! flattened rope buffers) that should bring the next collection forward, and
//! [`Traceable::trace`] is the single hook each cell type implements to
//! enumerate the references it owns.
//!
//! Cells are kept alive by `Gc` handles (reference counted) and by guards.
//! Cells whose count drops to zero are reset and pooled for reuse. A
//! collection also reclaims cycles: handles held only by unreachable cells
//! do not make a root.

use std::cell::{Cell, Ref, RefCell, RefMut};
use std::ptr::NonNull;
use std::rc::{Rc, Weak};

/// Cells per chunk; one `u64` mark word covers 64 of them.
const CHUNK_CAPACITY: usize = 256;
const MARK_WORDS: usize = CHUNK_CAPACITY / 64;

/// Net allocations between automatic collections
pub const DEFAULT_GC_THRESHOLD: usize = 100;

/// Reported extra bytes between automatic collections
pub const DEFAULT_EXTRA_MEMORY_THRESHOLD: usize = 8 * 1024 * 1024;

// ============================================================================
// MarkBits
// ============================================================================

/// Mark bits for one chunk
#[derive(Clone, Copy, Default)]
struct MarkBits {
    words: [u64; MARK_WORDS],
}

impl MarkBits {
    #[inline]
    fn set(&mut self, slot: usize) {
        if let Some(word) = self.words.get_mut(slot / 64) {
            *word |= 1 << (slot % 64);
        }
    }

    #[inline]
    fn is_set(&self, slot: usize) -> bool {
        self.words
            .get(slot / 64)
            .is_some_and(|word| word & (1 << (slot % 64)) != 0)
    }

    #[inline]
    fn clear(&mut self) {
        self.words = [0; MARK_WORDS];
    }
}

// ============================================================================
// Gc - counted handle to a cell
// ============================================================================

/// A handle to a collector-managed cell.
///
/// Cloning bumps the cell's handle count, dropping lowers it. A cell whose
/// count reaches zero is reset and returned to the pool.
pub struct Gc<T: Traceable> {
    id: usize,
    ptr: NonNull<GcBox<T>>,
    /// Checked before every dereference so handles that outlive the heap
    /// never touch freed chunks.
    space: Weak<RefCell<Space<T>>>,
}

#[cold]
fn heap_dropped() -> ! {
    #[allow(clippy::panic)]
    {
        panic!("GC handle used after its heap was dropped")
    }
}

impl<T: Traceable> PartialEq for Gc<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T: Traceable> Eq for Gc<T> {}

impl<T: Traceable> std::hash::Hash for Gc<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<T: Traceable> Gc<T> {
    /// The box, or `None` once the heap that owns it is gone
    fn live_box(&self) -> Option<&GcBox<T>> {
        if self.space.strong_count() == 0 {
            return None;
        }
        // SAFETY: chunks never move or shrink while the space is alive, and a
        // live handle keeps its box out of the free list.
        Some(unsafe { self.ptr.as_ref() })
    }

    /// Panics if the owning heap has been dropped
    pub fn borrow(&self) -> Ref<'_, T> {
        match self.live_box() {
            Some(gc_box) => gc_box.data.borrow(),
            None => heap_dropped(),
        }
    }

    /// Panics if the owning heap has been dropped
    pub fn borrow_mut(&self) -> RefMut<'_, T> {
        match self.live_box() {
            Some(gc_box) => gc_box.data.borrow_mut(),
            None => heap_dropped(),
        }
    }

    /// `None` while the cell is mutably borrowed or after the heap is gone
    pub fn try_borrow(&self) -> Option<Ref<'_, T>> {
        self.live_box()?.data.try_borrow().ok()
    }

    pub fn is_heap_alive(&self) -> bool {
        self.space.strong_count() > 0
    }

    /// Unique identity of the cell (stable while the cell is alive)
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn ptr_eq(a: &Gc<T>, b: &Gc<T>) -> bool {
        a.id == b.id
    }

    /// An uncounted pointer for the tracer
    pub fn copy_ref(&self) -> GcPtr<T> {
        GcPtr {
            id: self.id,
            ptr: self.ptr,
        }
    }
}

impl<T: Traceable> Clone for Gc<T> {
    fn clone(&self) -> Self {
        if self.space.strong_count() > 0 {
            // SAFETY: the space is alive, so the box is too.
            let gc_box = unsafe { self.ptr.as_ref() };
            if !gc_box.pooled.get() {
                gc_box.handles.set(gc_box.handles.get() + 1);
            }
        }
        Self {
            id: self.id,
            ptr: self.ptr,
            space: self.space.clone(),
        }
    }
}

impl<T: Traceable> Drop for Gc<T> {
    fn drop(&mut self) {
        if let Some(space) = self.space.upgrade() {
            release(&space, self.ptr);
        }
    }
}

/// Drop one handle count; a cell left with none is reset and pooled.
fn release<T: Traceable>(space: &RefCell<Space<T>>, ptr: NonNull<GcBox<T>>) {
    // SAFETY: the caller holds the space alive, so the box is too.
    let gc_box = unsafe { ptr.as_ref() };
    if gc_box.pooled.get() {
        return;
    }
    let handles = gc_box.handles.get().saturating_sub(1);
    gc_box.handles.set(handles);
    if handles == 0 {
        // While a collection or a reset already holds the space, the
        // sweep picks this cell up instead.
        if let Ok(mut space) = space.try_borrow_mut() {
            gc_box.data.borrow_mut().reset();
            space.pool(ptr);
        }
    }
}

fn retain<T: Traceable>(ptr: NonNull<GcBox<T>>) -> bool {
    // SAFETY: the caller holds the space alive, so the box is too.
    let gc_box = unsafe { ptr.as_ref() };
    if gc_box.pooled.get() {
        return false;
    }
    gc_box.handles.set(gc_box.handles.get() + 1);
    true
}

impl<T: Traceable> std::fmt::Debug for Gc<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gc").field("id", &self.id).finish()
    }
}

// ============================================================================
// GcPtr - uncounted pointer handed to the tracer
// ============================================================================

/// Copyable pointer without a destructor, valid only during tracing
pub struct GcPtr<T: Traceable> {
    pub(crate) id: usize,
    pub(crate) ptr: NonNull<GcBox<T>>,
}

impl<T: Traceable> Copy for GcPtr<T> {}

impl<T: Traceable> Clone for GcPtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: Traceable> GcPtr<T> {
    pub fn id(&self) -> usize {
        self.id
    }
}

// ============================================================================
// Traceable / Reset
// ============================================================================

/// The one "enumerate owned references" capability a cell type implements.
///
/// The collector never looks at a cell's fields itself; an implementation
/// that reports every `Gc` it stores is all the marking phase needs.
pub trait Traceable: Sized + Default + Reset {
    fn trace<F: FnMut(GcPtr<Self>)>(&self, visitor: F);
}

/// In-place return to the default state, used when a cell is pooled.
pub trait Reset: Default {
    fn reset(&mut self);
}

// ============================================================================
// GcBox / Space
// ============================================================================

pub struct GcBox<T: Traceable> {
    /// chunk * CHUNK_CAPACITY + slot
    index: usize,
    data: RefCell<T>,
    handles: Cell<usize>,
    pooled: Cell<bool>,
}

struct Space<T: Traceable> {
    /// Each chunk is allocated with `CHUNK_CAPACITY` up front and never
    /// reallocates, so box addresses are stable.
    chunks: Vec<Vec<GcBox<T>>>,
    marks: Vec<MarkBits>,
    free_list: Vec<NonNull<GcBox<T>>>,
    /// Kept between cycles to reuse its capacity
    mark_stack: Vec<NonNull<GcBox<T>>>,
    /// Handles held by other cells, per box index
    internal_refs: Vec<u32>,
    guard_pool: Vec<Vec<NonNull<GcBox<T>>>>,
    net_allocs: isize,
    gc_threshold: isize,
    extra_bytes: usize,
    extra_bytes_total: usize,
    extra_threshold: usize,
    collections: usize,
    self_weak: Weak<RefCell<Space<T>>>,
}

impl<T: Traceable> Space<T> {
    fn new() -> Self {
        Self {
            chunks: Vec::new(),
            marks: Vec::new(),
            free_list: Vec::new(),
            mark_stack: Vec::new(),
            internal_refs: Vec::new(),
            guard_pool: Vec::new(),
            net_allocs: 0,
            gc_threshold: DEFAULT_GC_THRESHOLD as isize,
            extra_bytes: 0,
            extra_bytes_total: 0,
            extra_threshold: DEFAULT_EXTRA_MEMORY_THRESHOLD,
            collections: 0,
            self_weak: Weak::new(),
        }
    }

    fn create_guard(&mut self) -> Guard<T> {
        let roots = self.guard_pool.pop().unwrap_or_default();
        Guard {
            space: self.self_weak.clone(),
            roots: RefCell::new(roots),
        }
    }

    fn recycle_guard_storage(&mut self, mut roots: Vec<NonNull<GcBox<T>>>) {
        if self.guard_pool.len() < 16 {
            roots.clear();
            self.guard_pool.push(roots);
        }
    }

    fn alloc(&mut self) -> Result<Gc<T>, crate::error::JsError> {
        let ptr = match self.free_list.pop() {
            Some(ptr) => {
                // SAFETY: free-list entries point into live chunks.
                let gc_box = unsafe { ptr.as_ref() };
                gc_box.data.borrow_mut().reset();
                gc_box.pooled.set(false);
                gc_box.handles.set(1);
                ptr
            }
            None => self.push_box()?,
        };

        self.net_allocs += 1;
        if self.gc_threshold > 0 && self.net_allocs >= self.gc_threshold {
            self.collect();
        }

        // SAFETY: `ptr` was just taken from a live chunk.
        let id = unsafe { ptr.as_ref().index };
        Ok(Gc {
            id,
            ptr,
            space: self.self_weak.clone(),
        })
    }

    fn push_box(&mut self) -> Result<NonNull<GcBox<T>>, crate::error::JsError> {
        if self.chunks.last().is_none_or(|c| c.len() >= CHUNK_CAPACITY) {
            let mut chunk = Vec::new();
            chunk
                .try_reserve_exact(CHUNK_CAPACITY)
                .map_err(|_| crate::error::JsError::out_of_memory())?;
            self.chunks.push(chunk);
            self.marks.push(MarkBits::default());
        }
        let chunk_index = self.chunks.len() - 1;
        let chunk = self
            .chunks
            .last_mut()
            .ok_or_else(|| crate::error::JsError::internal_error("no chunk after growth"))?;
        let index = chunk_index * CHUNK_CAPACITY + chunk.len();
        chunk.push(GcBox {
            index,
            data: RefCell::new(T::default()),
            handles: Cell::new(1),
            pooled: Cell::new(false),
        });
        chunk
            .last()
            .map(NonNull::from)
            .ok_or_else(|| crate::error::JsError::internal_error("chunk empty after push"))
    }

    fn pool(&mut self, ptr: NonNull<GcBox<T>>) {
        // SAFETY: callers only pool boxes from live chunks.
        let gc_box = unsafe { ptr.as_ref() };
        if gc_box.pooled.replace(true) {
            return;
        }
        self.net_allocs -= 1;
        self.free_list.push(ptr);
    }

    /// Handles held by other traceable cells, per box index
    fn count_internal_refs(&self, internal: &mut Vec<u32>) {
        let total: usize = self.chunks.iter().map(Vec::len).sum();
        internal.clear();
        internal.resize(total, 0);
        for chunk in &self.chunks {
            for gc_box in chunk {
                if gc_box.pooled.get() {
                    continue;
                }
                // A mutably borrowed cell cannot be traced; its children
                // then look externally held, which keeps them alive.
                if let Ok(data) = gc_box.data.try_borrow() {
                    data.trace(|child: GcPtr<T>| {
                        // SAFETY: a traced pointer comes from a live handle.
                        let index = unsafe { child.ptr.as_ref() }.index;
                        if let Some(count) = internal.get_mut(index) {
                            *count = count.saturating_add(1);
                        }
                    });
                }
            }
        }
    }

    /// Some cell is still held from outside the heap
    fn has_external_handles(&self) -> bool {
        let mut internal = Vec::new();
        self.count_internal_refs(&mut internal);
        self.chunks.iter().flatten().any(|gc_box| {
            let held = internal.get(gc_box.index).copied().unwrap_or(0) as usize;
            !gc_box.pooled.get() && gc_box.handles.get() > held
        })
    }

    fn mark(&mut self) {
        for bits in &mut self.marks {
            bits.clear();
        }

        // A cell is a root when something other than a traceable cell holds
        // a handle to it: a guard, a local, a native closure.
        let mut internal = std::mem::take(&mut self.internal_refs);
        self.count_internal_refs(&mut internal);

        let mut stack = std::mem::take(&mut self.mark_stack);
        stack.clear();
        for chunk in &self.chunks {
            for gc_box in chunk {
                let held = internal.get(gc_box.index).copied().unwrap_or(0) as usize;
                if !gc_box.pooled.get() && gc_box.handles.get() > held {
                    stack.push(NonNull::from(gc_box));
                }
            }
        }
        self.internal_refs = internal;

        let marks = &mut self.marks;
        while let Some(ptr) = stack.pop() {
            // SAFETY: only live chunk entries are pushed.
            let gc_box = unsafe { ptr.as_ref() };
            let Some(bits) = marks.get_mut(gc_box.index / CHUNK_CAPACITY) else {
                continue;
            };
            let slot = gc_box.index % CHUNK_CAPACITY;
            if bits.is_set(slot) {
                continue;
            }
            bits.set(slot);

            let Ok(data) = gc_box.data.try_borrow() else {
                // Borrowed mutably by the mutator; its references are
                // counted handles and therefore roots already.
                continue;
            };
            let marks_view: &[MarkBits] = marks;
            data.trace(|child: GcPtr<T>| {
                // SAFETY: a traced pointer comes from a live handle.
                let child_box = unsafe { child.ptr.as_ref() };
                let already = marks_view
                    .get(child_box.index / CHUNK_CAPACITY)
                    .is_none_or(|b| b.is_set(child_box.index % CHUNK_CAPACITY));
                if !already && !child_box.pooled.get() {
                    stack.push(child.ptr);
                }
            });
        }
        self.mark_stack = stack;
    }

    fn sweep(&mut self) -> usize {
        let mut dead = Vec::new();
        // Reset every unmarked cell before pooling any of them: a reset drops
        // handles and may be what brings a neighbour's count to zero.
        for (chunk, bits) in self.chunks.iter().zip(self.marks.iter()) {
            for (slot, gc_box) in chunk.iter().enumerate() {
                if bits.is_set(slot) || gc_box.pooled.get() {
                    continue;
                }
                if let Ok(mut data) = gc_box.data.try_borrow_mut() {
                    data.reset();
                    dead.push(NonNull::from(gc_box));
                }
            }
        }
        let mut collected = 0;
        for ptr in dead {
            // SAFETY: pointers were collected from live chunks above.
            if unsafe { ptr.as_ref() }.handles.get() == 0 {
                self.pool(ptr);
                collected += 1;
            }
        }
        collected
    }

    fn collect(&mut self) {
        tracing::debug!(
            target: "jscell::gc",
            net_allocs = self.net_allocs,
            extra_bytes = self.extra_bytes,
            "collection starting"
        );
        self.mark();
        let collected = self.sweep();
        self.net_allocs = 0;
        self.extra_bytes = 0;
        self.collections += 1;
        tracing::debug!(
            target: "jscell::gc",
            collected,
            collection = self.collections,
            "collection finished"
        );
    }

    fn report_extra_memory_cost(&mut self, bytes: usize) {
        self.extra_bytes = self.extra_bytes.saturating_add(bytes);
        self.extra_bytes_total = self.extra_bytes_total.saturating_add(bytes);
        if self.extra_threshold > 0 && self.extra_bytes >= self.extra_threshold {
            tracing::trace!(
                target: "jscell::gc",
                extra_bytes = self.extra_bytes,
                "extra memory cost triggers collection"
            );
            self.collect();
        }
    }

    fn stats(&self) -> GcStats {
        let total_objects: usize = self.chunks.iter().map(Vec::len).sum();
        GcStats {
            total_objects,
            pooled_objects: self.free_list.len(),
            live_objects: total_objects - self.free_list.len(),
            extra_memory_bytes: self.extra_bytes_total,
            collections: self.collections,
        }
    }
}

impl<T: Traceable> Drop for Space<T> {
    fn drop(&mut self) {
        // Outstanding handles may still be dereferenced (or hold a borrow),
        // so their chunks are leaked rather than freed.
        let leak = self.has_external_handles();
        // Handles still alive after this point see `pooled` and back off.
        for chunk in &self.chunks {
            for gc_box in chunk {
                gc_box.pooled.set(true);
            }
        }
        if leak {
            tracing::debug!(target: "jscell::gc", chunks = self.chunks.len(), "heap dropped with live handles");
            std::mem::forget(std::mem::take(&mut self.chunks));
        }
    }
}

// ============================================================================
// Heap
// ============================================================================

/// Public entry point to the collector
pub struct Heap<T: Traceable> {
    inner: Rc<RefCell<Space<T>>>,
}

impl<T: Traceable> Heap<T> {
    pub fn new() -> Self {
        let inner = Rc::new(RefCell::new(Space::new()));
        inner.borrow_mut().self_weak = Rc::downgrade(&inner);
        Self { inner }
    }

    pub fn create_guard(&self) -> Guard<T> {
        self.inner.borrow_mut().create_guard()
    }

    pub fn stats(&self) -> GcStats {
        self.inner.borrow().stats()
    }

    /// Run a full mark/sweep cycle now
    pub fn collect(&self) {
        self.inner.borrow_mut().collect();
    }

    /// Net allocations between collections (0 disables automatic collection)
    pub fn set_gc_threshold(&self, threshold: usize) {
        self.inner.borrow_mut().gc_threshold = threshold as isize;
    }

    /// Extra bytes between collections (0 disables extra-memory triggers)
    pub fn set_extra_memory_threshold(&self, bytes: usize) {
        self.inner.borrow_mut().extra_threshold = bytes;
    }

    /// Tell the collector about memory owned by cells but allocated outside
    /// the heap. Does nothing while a collection is running.
    pub fn report_extra_memory_cost(&self, bytes: usize) {
        if let Ok(mut space) = self.inner.try_borrow_mut() {
            space.report_extra_memory_cost(bytes);
        }
    }
}

impl<T: Traceable> Default for Heap<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Traceable> Clone for Heap<T> {
    fn clone(&self) -> Self {
        Heap {
            inner: self.inner.clone(),
        }
    }
}

// ============================================================================
// Guard
// ============================================================================

/// A root set. Cells allocated or guarded through a guard stay alive until
/// the guard is dropped or they are unguarded, even with no `Gc` left.
pub struct Guard<T: Traceable> {
    space: Weak<RefCell<Space<T>>>,
    roots: RefCell<Vec<NonNull<GcBox<T>>>>,
}

impl<T: Traceable> Guard<T> {
    /// Allocate a default-initialized cell rooted in this guard
    pub fn alloc(&self) -> Result<Gc<T>, crate::error::JsError> {
        let space = self
            .space
            .upgrade()
            .ok_or_else(|| crate::error::JsError::internal_error("heap dropped before guard"))?;
        let cell = space.borrow_mut().alloc()?;
        if retain(cell.ptr) {
            self.roots.borrow_mut().push(cell.ptr);
        }
        Ok(cell)
    }

    pub fn guard(&self, cell: &Gc<T>) {
        if self.space.strong_count() > 0 && retain(cell.ptr) {
            self.roots.borrow_mut().push(cell.ptr);
        }
    }

    /// Returns true if the cell was rooted here
    pub fn unguard(&self, cell: &Gc<T>) -> bool {
        let removed = {
            let mut roots = self.roots.borrow_mut();
            roots
                .iter()
                .position(|p| *p == cell.ptr)
                .map(|pos| roots.swap_remove(pos))
        };
        match (removed, self.space.upgrade()) {
            (Some(ptr), Some(space)) => {
                release(&space, ptr);
                true
            }
            (removed, _) => removed.is_some(),
        }
    }

    pub fn len(&self) -> usize {
        self.roots.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.borrow().is_empty()
    }
}

impl<T: Traceable> Drop for Guard<T> {
    fn drop(&mut self) {
        if let Some(space) = self.space.upgrade() {
            let mut roots = std::mem::take(&mut *self.roots.borrow_mut());
            for ptr in roots.drain(..) {
                release(&space, ptr);
            }
            if let Ok(mut space) = space.try_borrow_mut() {
                space.recycle_guard_storage(roots);
            }
        }
    }
}

// ============================================================================
// GcStats
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GcStats {
    /// All boxes ever created, including pooled ones
    pub total_objects: usize,
    pub pooled_objects: usize,
    pub live_objects: usize,
    /// Sum of every `report_extra_memory_cost` call
    pub extra_memory_bytes: usize,
    pub collections: usize,
}
