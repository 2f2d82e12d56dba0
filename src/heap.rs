use crate::allocator::{
    vtable_of, BlockAllocator, BlockMeta, CellAllocator, CellHeader, SweepTally, BLOCK_SIZE,
    CELL_HEADER_SIZE, CELL_SIZE_CLASSES,
};
use crate::config::HeapConfig;
use crate::error::BlockError;
use crate::defer::DeferGc;
use crate::metrics::HeapMetrics;
use crate::roots::{ConservativeSet, RootCensusEntry, RootKind, RootSet};
use crate::trace::{Trace, Tracer};
use crate::weak::{LiveSet, WeakContainer, WeakRegistration, WeakSet};
use log::debug;
use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::marker::PhantomData;
use std::ops::Deref;
use std::panic::Location;
use std::ptr::NonNull;
use std::rc::Rc;
use std::time::Instant;

/// A reference to a live cell of type `T`.
///
/// `Ref` is a bare pointer with no liveness of its own: holding one does
/// not keep the cell alive. Any `Ref` kept across a point that may
/// collect (an allocation, or an explicit [`Heap::collect_garbage`])
/// must be reachable from a registered root, or it dangles.
pub struct Ref<T: Trace> {
    ptr: NonNull<T>,
    _no_send: PhantomData<*const T>,
}

impl<T: Trace> Copy for Ref<T> {}

impl<T: Trace> Clone for Ref<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: Trace> Deref for Ref<T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { self.ptr.as_ref() }
    }
}

impl<T: Trace> Ref<T> {
    pub(crate) fn from_non_null(ptr: NonNull<T>) -> Self {
        Self {
            ptr,
            _no_send: PhantomData,
        }
    }

    pub fn as_ptr(&self) -> *const T {
        self.ptr.as_ptr()
    }

    pub(crate) fn as_non_null(&self) -> NonNull<T> {
        self.ptr
    }

    /// Identity comparison: do both references name the same cell?
    pub fn ptr_eq(&self, other: &Ref<T>) -> bool {
        self.ptr == other.ptr
    }

    /// Erases the payload type, keeping only the cell identity.
    pub fn erased(&self) -> CellPtr {
        CellPtr {
            header: CellHeader::from_payload(self.ptr),
            _no_send: PhantomData,
        }
    }
}

unsafe impl<T: Trace> Trace for Ref<T> {
    fn trace(&self, tracer: &mut Tracer<'_>) {
        tracer.trace(*self)
    }
}

/// A type-erased cell identity, used by containers and diagnostics that
/// do not care about the payload type.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct CellPtr {
    header: NonNull<CellHeader>,
    _no_send: PhantomData<*const ()>,
}

impl CellPtr {
    pub(crate) fn header(&self) -> NonNull<CellHeader> {
        self.header
    }

    /// The payload type's name, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        (unsafe { self.header.as_ref() }.vtable().type_name)()
    }

    /// Restores the typed reference.
    ///
    /// # Safety
    /// The cell's payload must actually be a `T`.
    pub unsafe fn downcast<T: Trace>(&self) -> Ref<T> {
        Ref::from_non_null(self.header.as_ref().payload().cast::<T>())
    }
}

impl std::fmt::Debug for CellPtr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CellPtr({:?})", self.header.as_ptr())
    }
}

unsafe impl Trace for CellPtr {
    fn trace(&self, tracer: &mut Tracer<'_>) {
        tracer.trace_cell(*self)
    }
}

/// Where the collector currently is.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HeapState {
    Idle,
    Marking,
    Sweeping,
    /// A collection was requested while a [`DeferGc`] guard is alive; it
    /// runs when the last guard drops.
    Deferred,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Phase {
    Idle,
    Marking,
    Sweeping,
}

/// The managed heap: owner of all blocks and the authoritative registry
/// of roots. One heap per execution context; a heap never migrates
/// between threads.
pub struct Heap {
    inner: Box<HeapInner>,
}

impl Heap {
    pub fn new() -> Self {
        Self::with_config(HeapConfig::default())
    }

    pub fn with_config(config: HeapConfig) -> Self {
        let block_allocator = BlockAllocator::new(config.block_cache_size);
        let allocators = CELL_SIZE_CLASSES
            .iter()
            .map(|&size| CellAllocator::new(size))
            .collect();

        Heap {
            inner: Box::new(HeapInner {
                config,
                block_allocator,
                allocators,
                live_blocks: RefCell::new(HashSet::new()),
                roots: RefCell::new(RootSet::new()),
                conservative: RefCell::new(ConservativeSet::new()),
                weak: RefCell::new(WeakSet::new()),
                phase: Cell::new(Phase::Idle),
                defer_count: Cell::new(0),
                pending_collection: Cell::new(false),
                bytes_since_gc: Cell::new(0),
                gc_bytes_threshold: Cell::new(config.gc_min_bytes_threshold),
                live_cells: Cell::new(0),
                live_bytes: Cell::new(0),
                collections: Cell::new(0),
                last_collected_cells: Cell::new(0),
                last_collected_bytes: Cell::new(0),
                last_mark_micros: Cell::new(0),
                last_sweep_micros: Cell::new(0),
            }),
        }
    }

    /// Allocates and constructs a cell holding `value`.
    ///
    /// May run a collection first when allocation pressure demands it
    /// (and no [`DeferGc`] guard is alive). Fatal if called while a
    /// collection is running.
    pub fn allocate<T: Trace>(&self, value: T) -> Ref<T> {
        self.inner.allocate(value)
    }

    /// Explicitly requests a collection cycle.
    ///
    /// While deferred, the request is recorded and honored when the last
    /// [`DeferGc`] guard drops. Fatal if a collection is already running.
    pub fn collect_garbage(&self) {
        self.inner.collect_garbage();
    }

    pub fn state(&self) -> HeapState {
        self.inner.state()
    }

    /// Suppresses collection triggers for the guard's lifetime. Guards
    /// nest; a request made while any guard is alive runs when the last
    /// one drops.
    pub fn defer_gc(&self) -> DeferGc<'_> {
        DeferGc::new(&self.inner)
    }

    /// Registers a container whose cell references must be invalidated,
    /// not kept alive. The registry holds the container weakly; dropping
    /// the `Rc` elsewhere is as good as deregistering.
    pub fn register_weak_container(
        &self,
        container: Rc<dyn WeakContainer>,
    ) -> WeakRegistration<'_> {
        self.inner.register_weak_container(container)
    }

    pub fn live_cell_count(&self) -> usize {
        self.inner.live_cells.get()
    }

    pub fn root_count(&self) -> usize {
        self.inner.roots.borrow().len()
    }

    /// One entry per registered exact root and conservative vector, for
    /// leak and imbalance reporting.
    pub fn root_census(&self) -> Vec<RootCensusEntry> {
        self.inner.root_census()
    }

    /// Occupied registered roots of one kind.
    pub fn root_count_of_kind(&self, kind: RootKind) -> usize {
        self.inner
            .root_census()
            .iter()
            .filter(|entry| entry.kind == kind && entry.occupied)
            .count()
    }

    pub fn metrics(&self) -> HeapMetrics {
        self.inner.metrics()
    }

    pub fn config(&self) -> &HeapConfig {
        &self.inner.config
    }

    pub(crate) fn inner(&self) -> &HeapInner {
        &self.inner
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) struct HeapInner {
    config: HeapConfig,
    block_allocator: BlockAllocator,
    allocators: Vec<CellAllocator>,
    /// Base addresses of every block currently carved into cells. The
    /// conservative scanner consults this before it dereferences
    /// anything derived from a candidate word.
    live_blocks: RefCell<HashSet<usize>>,
    roots: RefCell<RootSet>,
    conservative: RefCell<ConservativeSet>,
    weak: RefCell<WeakSet>,
    phase: Cell<Phase>,
    defer_count: Cell<usize>,
    pending_collection: Cell<bool>,
    bytes_since_gc: Cell<usize>,
    gc_bytes_threshold: Cell<usize>,
    live_cells: Cell<usize>,
    live_bytes: Cell<usize>,
    collections: Cell<u64>,
    last_collected_cells: Cell<usize>,
    last_collected_bytes: Cell<usize>,
    last_mark_micros: Cell<u64>,
    last_sweep_micros: Cell<u64>,
}

impl HeapInner {
    // ------------------------------------------------------------------
    // Allocation
    // ------------------------------------------------------------------

    fn allocate<T: Trace>(&self, value: T) -> Ref<T> {
        assert!(
            std::mem::align_of::<T>() <= CELL_HEADER_SIZE,
            "cell payloads with alignment above {} are not supported",
            CELL_HEADER_SIZE,
        );

        let size = CELL_HEADER_SIZE + std::mem::size_of::<T>();
        self.will_allocate(size);

        let class = CELL_SIZE_CLASSES
            .iter()
            .position(|&slot| size <= slot)
            .ok_or(BlockError::BadRequest)
            .unwrap_or_else(|err| panic!("cell of {size} bytes rejected: {err}"));

        let header = self.allocators[class]
            .allocate_cell(
                &self.block_allocator,
                &self.live_blocks,
                self as *const HeapInner,
            )
            .unwrap_or_else(|err| panic!("heap block allocation failed: {err}"));

        unsafe {
            let header = header.as_ref();
            let payload = header.payload().cast::<T>();

            std::ptr::write(payload.as_ptr(), value);
            header.set_live(vtable_of::<T>());

            self.live_cells.set(self.live_cells.get() + 1);

            Ref::from_non_null(payload)
        }
    }

    fn will_allocate(&self, size: usize) {
        assert!(
            self.phase.get() == Phase::Idle,
            "allocation attempted while the heap is collecting"
        );

        if self.config.collect_on_every_allocation {
            self.collect_garbage();
        } else if self.bytes_since_gc.get() + size > self.gc_bytes_threshold.get() {
            self.collect_garbage();
        }

        self.bytes_since_gc.set(self.bytes_since_gc.get() + size);
    }

    // ------------------------------------------------------------------
    // Collection
    // ------------------------------------------------------------------

    pub(crate) fn collect_garbage(&self) {
        assert!(
            self.phase.get() == Phase::Idle,
            "collection requested while a collection is already running"
        );

        if self.defer_count.get() > 0 {
            self.pending_collection.set(true);
            return;
        }

        self.run_collection();
    }

    fn run_collection(&self) {
        self.pending_collection.set(false);
        self.bytes_since_gc.set(0);

        self.phase.set(Phase::Marking);
        let mark_start = Instant::now();

        let mut tracer = Tracer::new(self);
        self.gather_roots(&mut tracer);
        tracer.drain();
        let marked = tracer.mark_count();
        drop(tracer);

        self.last_mark_micros
            .set(mark_start.elapsed().as_micros() as u64);

        self.phase.set(Phase::Sweeping);
        let sweep_start = Instant::now();

        self.prune_weak_containers();

        let mut tally = SweepTally::default();
        for allocator in &self.allocators {
            tally.absorb(allocator.sweep(&self.block_allocator, &self.live_blocks));
        }

        self.last_sweep_micros
            .set(sweep_start.elapsed().as_micros() as u64);
        self.phase.set(Phase::Idle);

        debug_assert_eq!(marked, tally.live_cells);

        self.live_cells.set(tally.live_cells);
        self.live_bytes.set(tally.live_bytes);
        self.last_collected_cells.set(tally.collected_cells);
        self.last_collected_bytes.set(tally.collected_bytes);
        self.collections.set(self.collections.get() + 1);
        self.gc_bytes_threshold.set(
            tally
                .live_bytes
                .max(self.config.gc_min_bytes_threshold),
        );

        debug!(
            "collection #{}: {} live cells ({} bytes), {} collected ({} bytes), {} blocks freed",
            self.collections.get(),
            tally.live_cells,
            tally.live_bytes,
            tally.collected_cells,
            tally.collected_bytes,
            tally.freed_blocks,
        );
    }

    fn gather_roots(&self, tracer: &mut Tracer<'_>) {
        debug!("gathering roots");

        {
            let roots = self.roots.borrow();
            for entry in roots.iter() {
                if let Some(cell) = entry.cell {
                    tracer.trace_cell(cell);
                }
            }
        }

        {
            let conservative = self.conservative.borrow();
            for entry in conservative.iter() {
                if entry.len == 0 {
                    continue;
                }
                let bytes = unsafe { std::slice::from_raw_parts(entry.data, entry.len) };
                tracer.trace_bytes(bytes);
            }
        }
    }

    fn prune_weak_containers(&self) {
        // Upgrade outside the registry borrow so a container may
        // deregister itself from inside prune_dead_cells.
        let containers = self.weak.borrow().upgrade_all();

        let live = LiveSet::new(self);
        for container in containers {
            container.prune_dead_cells(&live);
        }
    }

    // ------------------------------------------------------------------
    // State and bookkeeping
    // ------------------------------------------------------------------

    pub(crate) fn state(&self) -> HeapState {
        match self.phase.get() {
            Phase::Marking => HeapState::Marking,
            Phase::Sweeping => HeapState::Sweeping,
            Phase::Idle => {
                if self.defer_count.get() > 0 && self.pending_collection.get() {
                    HeapState::Deferred
                } else {
                    HeapState::Idle
                }
            }
        }
    }

    pub(crate) fn is_live_block(&self, base: usize) -> bool {
        self.live_blocks.borrow().contains(&base)
    }

    pub(crate) fn block_address_bounds(&self) -> (usize, usize) {
        let blocks = self.live_blocks.borrow();
        let min = blocks.iter().copied().min().unwrap_or(usize::MAX);
        let max = blocks
            .iter()
            .copied()
            .max()
            .map(|base| base + BLOCK_SIZE)
            .unwrap_or(0);
        (min, max)
    }

    /// Checks a cell's mark bit. Only meaningful while sweeping, which
    /// is the only time [`LiveSet`] hands it out.
    pub(crate) fn cell_is_marked(&self, cell: CellPtr) -> bool {
        unsafe { cell.header().as_ref() }.is_marked()
    }

    /// The heap a cell belongs to, recovered from its containing block.
    pub(crate) fn of_cell(cell: CellPtr) -> *const HeapInner {
        let meta = unsafe { BlockMeta::from_addr(cell.header().as_ptr() as usize) };
        unsafe { meta.as_ref() }.heap()
    }

    fn assert_roots_mutable(&self, what: &str) {
        assert!(
            self.phase.get() == Phase::Idle,
            "{what} while the heap is collecting"
        );
    }

    // ------------------------------------------------------------------
    // Root registry (used by the guard types)
    // ------------------------------------------------------------------

    pub(crate) fn register_root(
        &self,
        cell: Option<CellPtr>,
        kind: RootKind,
        location: &'static Location<'static>,
    ) -> usize {
        self.assert_roots_mutable("root registered");
        self.roots.borrow_mut().insert(cell, kind, location)
    }

    pub(crate) fn update_root(&self, slot: usize, cell: Option<CellPtr>) {
        self.assert_roots_mutable("root reassigned");
        self.roots.borrow_mut().update(slot, cell);
    }

    pub(crate) fn deregister_root(&self, slot: usize) {
        self.assert_roots_mutable("root released");
        self.roots.borrow_mut().remove(slot);
    }

    pub(crate) fn register_conservative(
        &self,
        data: *const u8,
        len: usize,
        location: &'static Location<'static>,
    ) -> usize {
        self.assert_roots_mutable("conservative vector registered");
        self.conservative.borrow_mut().insert(data, len, location)
    }

    pub(crate) fn update_conservative(&self, slot: usize, data: *const u8, len: usize) {
        self.assert_roots_mutable("conservative vector resized");
        self.conservative.borrow_mut().update(slot, data, len);
    }

    pub(crate) fn deregister_conservative(&self, slot: usize) {
        self.assert_roots_mutable("conservative vector released");
        self.conservative.borrow_mut().remove(slot);
    }

    fn register_weak_container(&self, container: Rc<dyn WeakContainer>) -> WeakRegistration<'_> {
        let slot = self.weak.borrow_mut().insert(Rc::downgrade(&container));
        WeakRegistration::new(self, slot)
    }

    pub(crate) fn deregister_weak(&self, slot: usize) {
        self.weak.borrow_mut().remove(slot);
    }

    // ------------------------------------------------------------------
    // Defer counter
    // ------------------------------------------------------------------

    pub(crate) fn defer(&self) {
        self.defer_count.set(self.defer_count.get() + 1);
    }

    pub(crate) fn undefer(&self) {
        let count = self.defer_count.get();
        assert!(count > 0, "GC defer counter underflow");
        self.defer_count.set(count - 1);

        if count == 1 && self.pending_collection.get() {
            self.run_collection();
        }
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    fn root_census(&self) -> Vec<RootCensusEntry> {
        let mut census = vec![];

        for entry in self.roots.borrow().iter() {
            census.push(RootCensusEntry {
                kind: entry.kind,
                location: entry.location,
                occupied: entry.cell.is_some(),
            });
        }

        for entry in self.conservative.borrow().iter() {
            census.push(RootCensusEntry {
                kind: RootKind::ConservativeVector,
                location: entry.location,
                occupied: entry.len > 0,
            });
        }

        census
    }

    fn metrics(&self) -> HeapMetrics {
        HeapMetrics {
            collections: self.collections.get(),
            live_cells: self.live_cells.get(),
            live_bytes: self.live_bytes.get(),
            last_collected_cells: self.last_collected_cells.get(),
            last_collected_bytes: self.last_collected_bytes.get(),
            last_mark_micros: self.last_mark_micros.get(),
            last_sweep_micros: self.last_sweep_micros.get(),
            blocks_in_use: self.block_allocator.blocks_in_use(),
            blocks_cached: self.block_allocator.cached_blocks(),
            gc_bytes_threshold: self.gc_bytes_threshold.get(),
            registered_roots: self.roots.borrow().len(),
            registered_conservative_vectors: self.conservative.borrow().len(),
            registered_weak_containers: self.weak.borrow().len(),
        }
    }
}

impl Drop for HeapInner {
    fn drop(&mut self) {
        // Tear-down collection: nothing is marked, so every weak
        // reference clears and every remaining cell is finalized,
        // regardless of roots still registered.
        self.phase.set(Phase::Sweeping);
        self.prune_weak_containers();

        for allocator in &self.allocators {
            allocator.finalize_all();
        }

        let leftover = self.roots.borrow().len();
        if leftover > 0 {
            debug!("heap torn down with {leftover} roots still registered");
        }
    }
}
