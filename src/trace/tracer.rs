use crate::allocator::{block_base, BlockMeta, CellHeader};
use crate::heap::{CellPtr, HeapInner, Ref};
use crate::value::Value;
use log::debug;
use std::ptr::NonNull;

use super::trace::Trace;

/// The marking visitor handed to every [`Trace::trace`] call.
///
/// Marks each cell at most once and queues it for edge traversal, so
/// cyclic graphs terminate. Also hosts the conservative word scan used
/// for untyped storage.
pub struct Tracer<'h> {
    heap: &'h HeapInner,
    work: Vec<NonNull<CellHeader>>,
    min_addr: usize,
    max_addr: usize,
    mark_count: usize,
}

impl<'h> Tracer<'h> {
    pub(crate) fn new(heap: &'h HeapInner) -> Self {
        let (min_addr, max_addr) = heap.block_address_bounds();

        Self {
            heap,
            work: vec![],
            min_addr,
            max_addr,
            mark_count: 0,
        }
    }

    /// Reports a typed cell reference.
    pub fn trace<T: Trace>(&mut self, cell: Ref<T>) {
        self.mark(CellHeader::from_payload(cell.as_non_null()));
    }

    /// Reports an erased cell reference.
    pub fn trace_cell(&mut self, cell: CellPtr) {
        self.mark(cell.header());
    }

    /// Reports a tagged value. Primitive payloads are ignored here; this
    /// is the single gate keeping them from being read as cell pointers.
    pub fn trace_value(&mut self, value: &Value) {
        if let Some(cell) = value.as_cell() {
            self.trace_cell(cell);
        }
    }

    /// Conservatively scans raw storage: every machine-word-aligned value
    /// in `bytes` that could be an address into a live cell retains that
    /// cell. False positives only cost memory; a stored pointer is never
    /// missed.
    pub fn trace_bytes(&mut self, bytes: &[u8]) {
        for chunk in bytes.chunks_exact(std::mem::size_of::<usize>()) {
            let word = usize::from_ne_bytes(chunk.try_into().unwrap());
            self.trace_possible_pointer(word);
        }
    }

    pub(crate) fn trace_possible_pointer(&mut self, addr: usize) {
        if addr < self.min_addr || addr >= self.max_addr {
            return;
        }

        if !self.heap.is_live_block(block_base(addr)) {
            return;
        }

        // The block is owned by this heap, so its meta is initialized.
        let meta = unsafe { BlockMeta::from_addr(addr).as_ref() };
        if let Some(header) = meta.cell_from_possible_pointer(addr) {
            self.mark(header);
        }
    }

    pub(crate) fn mark_count(&self) -> usize {
        self.mark_count
    }

    /// Traverses edges until no freshly marked cell remains.
    pub(crate) fn drain(&mut self) {
        while let Some(header) = self.work.pop() {
            let header = unsafe { header.as_ref() };
            let vtable = header.vtable();

            debug!(
                "tracing {} at {:?}",
                (vtable.type_name)(),
                header as *const CellHeader
            );
            unsafe { (vtable.trace)(header.payload(), self) };
        }
    }

    fn mark(&mut self, header: NonNull<CellHeader>) {
        let header_ref = unsafe { header.as_ref() };

        debug_assert!(header_ref.is_live());

        if header_ref.is_marked() {
            return;
        }

        header_ref.set_marked(true);
        self.mark_count += 1;
        self.work.push(header);
    }
}
