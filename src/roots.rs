use crate::heap::{CellPtr, HeapInner, Ref};
use crate::trace::Trace;
use std::cell::Cell;
use std::marker::PhantomData;
use std::panic::Location;

/// Why a root was registered. Purely diagnostic: every kind pins its
/// cell the same way, but a census that says *what* is pinning memory
/// is worth far more than a bare count when hunting leaks.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RootKind {
    Root,
    Handle,
    RootVector,
    RootHashMap,
    ConservativeVector,
    StackPointer,
    RegisterPointer,
    Vm,
    HeapFunctionCapturedPointer,
    MustSurviveGc,
}

/// One line of [`crate::Heap::root_census`] output.
#[derive(Copy, Clone, Debug)]
pub struct RootCensusEntry {
    pub kind: RootKind,
    pub location: &'static Location<'static>,
    /// False for an empty root slot, or a conservative vector with no
    /// elements.
    pub occupied: bool,
}

pub(crate) struct RootEntry {
    pub(crate) cell: Option<CellPtr>,
    pub(crate) kind: RootKind,
    pub(crate) location: &'static Location<'static>,
}

/// Slab of exact root slots. Slots are reused through a free list so
/// that guard registration stays O(1) and slot indices stay stable for
/// the guard's lifetime.
pub(crate) struct RootSet {
    slots: Vec<Option<RootEntry>>,
    free: Vec<usize>,
}

impl RootSet {
    pub(crate) fn new() -> Self {
        Self {
            slots: vec![],
            free: vec![],
        }
    }

    pub(crate) fn insert(
        &mut self,
        cell: Option<CellPtr>,
        kind: RootKind,
        location: &'static Location<'static>,
    ) -> usize {
        let entry = RootEntry {
            cell,
            kind,
            location,
        };

        match self.free.pop() {
            Some(slot) => {
                debug_assert!(self.slots[slot].is_none());
                self.slots[slot] = Some(entry);
                slot
            }
            None => {
                self.slots.push(Some(entry));
                self.slots.len() - 1
            }
        }
    }

    pub(crate) fn update(&mut self, slot: usize, cell: Option<CellPtr>) {
        self.slots[slot]
            .as_mut()
            .expect("root slot updated after release")
            .cell = cell;
    }

    pub(crate) fn remove(&mut self, slot: usize) {
        assert!(
            self.slots[slot].take().is_some(),
            "root slot released twice"
        );
        self.free.push(slot);
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &RootEntry> {
        self.slots.iter().filter_map(|slot| slot.as_ref())
    }
}

pub(crate) struct ConservativeEntry {
    pub(crate) data: *const u8,
    pub(crate) len: usize,
    pub(crate) location: &'static Location<'static>,
}

/// Registry of byte ranges to scan conservatively at the start of every
/// mark phase. Same slab shape as [`RootSet`].
pub(crate) struct ConservativeSet {
    slots: Vec<Option<ConservativeEntry>>,
    free: Vec<usize>,
}

impl ConservativeSet {
    pub(crate) fn new() -> Self {
        Self {
            slots: vec![],
            free: vec![],
        }
    }

    pub(crate) fn insert(
        &mut self,
        data: *const u8,
        len: usize,
        location: &'static Location<'static>,
    ) -> usize {
        let entry = ConservativeEntry {
            data,
            len,
            location,
        };

        match self.free.pop() {
            Some(slot) => {
                debug_assert!(self.slots[slot].is_none());
                self.slots[slot] = Some(entry);
                slot
            }
            None => {
                self.slots.push(Some(entry));
                self.slots.len() - 1
            }
        }
    }

    pub(crate) fn update(&mut self, slot: usize, data: *const u8, len: usize) {
        let entry = self.slots[slot]
            .as_mut()
            .expect("conservative slot updated after release");
        entry.data = data;
        entry.len = len;
    }

    pub(crate) fn remove(&mut self, slot: usize) {
        assert!(
            self.slots[slot].take().is_some(),
            "conservative slot released twice"
        );
        self.free.push(slot);
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &ConservativeEntry> {
        self.slots.iter().filter_map(|slot| slot.as_ref())
    }
}

/// Shared core of [`Root`] and [`Handle`]: a registered slot plus a
/// local cache of the current cell, so reads never touch the registry.
struct Pin<T: Trace> {
    heap: *const HeapInner,
    slot: usize,
    cell: Cell<Option<Ref<T>>>,
}

impl<T: Trace> Pin<T> {
    fn register(
        heap: *const HeapInner,
        cell: Option<Ref<T>>,
        kind: RootKind,
        location: &'static Location<'static>,
    ) -> Self {
        let slot = unsafe { &*heap }.register_root(cell.map(|c| c.erased()), kind, location);
        Pin {
            heap,
            slot,
            cell: Cell::new(cell),
        }
    }

    fn get(&self) -> Option<Ref<T>> {
        self.cell.get()
    }

    fn set(&self, cell: Option<Ref<T>>) {
        unsafe { &*self.heap }.update_root(self.slot, cell.map(|c| c.erased()));
        self.cell.set(cell);
    }
}

impl<T: Trace> Drop for Pin<T> {
    fn drop(&mut self) {
        unsafe { &*self.heap }.deregister_root(self.slot);
    }
}

/// A strong, owning pin: the referenced cell survives every collection
/// for as long as the `Root` lives. Registration records the caller's
/// source location so `root_census` can say who forgot to release one.
pub struct Root<T: Trace> {
    pin: Pin<T>,
    _no_send: PhantomData<*const T>,
}

impl<T: Trace> Root<T> {
    #[track_caller]
    pub fn new(cell: Ref<T>) -> Self {
        let heap = HeapInner::of_cell(cell.erased());
        Root {
            pin: Pin::register(heap, Some(cell), RootKind::Root, Location::caller()),
            _no_send: PhantomData,
        }
    }

    #[track_caller]
    pub fn with_kind(cell: Ref<T>, kind: RootKind) -> Self {
        let heap = HeapInner::of_cell(cell.erased());
        Root {
            pin: Pin::register(heap, Some(cell), kind, Location::caller()),
            _no_send: PhantomData,
        }
    }

    pub fn get(&self) -> Ref<T> {
        self.pin.get().expect("occupied root slot")
    }

    /// Repoints the root at a different cell of the same heap.
    pub fn set(&self, cell: Ref<T>) {
        debug_assert_eq!(self.pin.heap, HeapInner::of_cell(cell.erased()));
        self.pin.set(Some(cell));
    }
}

impl<T: Trace> std::ops::Deref for Root<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // The pin keeps the cell alive, so the Ref is always valid.
        unsafe { &*self.get().as_ptr() }
    }
}

/// A nullable pin: like [`Root`] but may be empty, and may be created
/// before there is anything to pin.
pub struct Handle<T: Trace> {
    pin: Pin<T>,
    _no_send: PhantomData<*const T>,
}

impl<T: Trace> Handle<T> {
    /// An empty handle tied to `heap`, to be filled in later.
    #[track_caller]
    pub fn empty(heap: &crate::Heap) -> Self {
        Handle {
            pin: Pin::register(
                heap.inner() as *const HeapInner,
                None,
                RootKind::Handle,
                Location::caller(),
            ),
            _no_send: PhantomData,
        }
    }

    #[track_caller]
    pub fn new(cell: Ref<T>) -> Self {
        let heap = HeapInner::of_cell(cell.erased());
        Handle {
            pin: Pin::register(heap, Some(cell), RootKind::Handle, Location::caller()),
            _no_send: PhantomData,
        }
    }

    pub fn get(&self) -> Option<Ref<T>> {
        self.pin.get()
    }

    pub fn set(&self, cell: Option<Ref<T>>) {
        self.pin.set(cell);
    }

    pub fn is_empty(&self) -> bool {
        self.pin.get().is_none()
    }
}
