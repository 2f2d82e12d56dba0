use crate::heap::{CellPtr, HeapInner};
use std::cell::Cell;
use std::rc::{Rc, Weak};

/// A container holding cell references that must *not* keep their cells
/// alive. After marking, and before any dead cell is finalized, every
/// registered container is asked to drop its references to unmarked
/// cells, so an invalidated entry is never observed dangling.
pub trait WeakContainer {
    /// Remove or null out every held reference whose cell fails
    /// `live.is_live`. Runs during the sweep phase; the container must
    /// not allocate or register roots from inside this call.
    fn prune_dead_cells(&self, live: &LiveSet);
}

/// Read-only view of the mark results, handed to weak containers during
/// pruning.
pub struct LiveSet<'h> {
    heap: &'h HeapInner,
}

impl<'h> LiveSet<'h> {
    pub(crate) fn new(heap: &'h HeapInner) -> Self {
        LiveSet { heap }
    }

    /// Did this cell survive the mark phase just completed?
    pub fn is_live(&self, cell: CellPtr) -> bool {
        self.heap.cell_is_marked(cell)
    }
}

/// Slab of weakly-held container registrations.
///
/// Entries hold `rc::Weak`, so a container dropped without explicit
/// deregistration simply fails to upgrade and is skipped; the slot is
/// reclaimed lazily on the next prune.
pub(crate) struct WeakSet {
    slots: Vec<Option<Weak<dyn WeakContainer>>>,
    free: Vec<usize>,
}

impl WeakSet {
    pub(crate) fn new() -> Self {
        Self {
            slots: vec![],
            free: vec![],
        }
    }

    pub(crate) fn insert(&mut self, container: Weak<dyn WeakContainer>) -> usize {
        match self.free.pop() {
            Some(slot) => {
                debug_assert!(self.slots[slot].is_none());
                self.slots[slot] = Some(container);
                slot
            }
            None => {
                self.slots.push(Some(container));
                self.slots.len() - 1
            }
        }
    }

    pub(crate) fn remove(&mut self, slot: usize) {
        if self.slots[slot].take().is_some() {
            self.free.push(slot);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Upgrades every registration that is still alive. Collecting into
    /// a Vec releases the registry borrow before any container code
    /// runs.
    pub(crate) fn upgrade_all(&self) -> Vec<Rc<dyn WeakContainer>> {
        self.slots
            .iter()
            .filter_map(|slot| slot.as_ref().and_then(Weak::upgrade))
            .collect()
    }
}

/// Guard returned by [`crate::Heap::register_weak_container`].
///
/// Borrows the heap for its lifetime. Deregistration is idempotent:
/// dropping the guard after an explicit
/// [`deregister`](WeakRegistration::deregister) call is a no-op.
pub struct WeakRegistration<'h> {
    heap: &'h HeapInner,
    slot: usize,
    released: Cell<bool>,
}

impl<'h> WeakRegistration<'h> {
    pub(crate) fn new(heap: &'h HeapInner, slot: usize) -> Self {
        WeakRegistration {
            heap,
            slot,
            released: Cell::new(false),
        }
    }

    pub fn deregister(&self) {
        if self.released.replace(true) {
            return;
        }
        self.heap.deregister_weak(self.slot);
    }
}

impl Drop for WeakRegistration<'_> {
    fn drop(&mut self) {
        self.deregister();
    }
}
