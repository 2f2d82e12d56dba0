use crate::heap::{Heap, HeapInner};
use std::panic::Location;

/// A growable vector whose element storage is scanned conservatively
/// during every mark phase.
///
/// Useful for element types that *may* contain cell addresses but are
/// not `Trace` themselves, such as register snapshots or raw interpreter
/// stack slots. Any word in the buffer that looks like a live cell
/// address pins that cell, interior pointers included; false positives
/// only over-retain, never corrupt.
///
/// Borrows the heap for its lifetime, so it cannot outlive the registry
/// it is recorded in.
pub struct ConservativeVector<'h, T: Copy> {
    heap: &'h HeapInner,
    slot: usize,
    items: Vec<T>,
}

impl<'h, T: Copy> ConservativeVector<'h, T> {
    #[track_caller]
    pub fn new(heap: &'h Heap) -> Self {
        let inner = heap.inner();
        let slot = inner.register_conservative(std::ptr::null(), 0, Location::caller());

        ConservativeVector {
            heap: inner,
            slot,
            items: vec![],
        }
    }

    /// Re-publishes the buffer address and length after any operation
    /// that may have reallocated or resized the storage.
    fn sync_registration(&self) {
        let data = self.items.as_ptr() as *const u8;
        let len = self.items.len() * std::mem::size_of::<T>();
        self.heap.update_conservative(self.slot, data, len);
    }

    pub fn push(&mut self, item: T) {
        self.items.push(item);
        self.sync_registration();
    }

    pub fn pop(&mut self) -> Option<T> {
        let item = self.items.pop();
        self.sync_registration();
        item
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.sync_registration();
    }

    pub fn truncate(&mut self, len: usize) {
        self.items.truncate(len);
        self.sync_registration();
    }

    pub fn extend_from_slice(&mut self, items: &[T]) {
        self.items.extend_from_slice(items);
        self.sync_registration();
    }

    pub fn get(&self, index: usize) -> Option<T> {
        self.items.get(index).copied()
    }

    pub fn set(&mut self, index: usize, item: T) {
        self.items[index] = item;
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.items
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }
}

impl<T: Copy> Drop for ConservativeVector<'_, T> {
    fn drop(&mut self) {
        self.heap.deregister_conservative(self.slot);
    }
}
