use super::block::Block;
use super::constants::{BLOCK_SIZE, CELLS_OFFSET};
use super::header::{CellHeader, CELL_HEADER_SIZE};
use crate::heap::HeapInner;
use std::cell::Cell;
use std::ptr::NonNull;

/// Per-block bookkeeping, written in place at the block base.
///
/// Slots past `cursor` have never been handed out and hold uninitialized
/// memory; everything below it carries a valid [`CellHeader`]. Freed
/// slots are chained through their payload area into a free list.
#[repr(C)]
pub struct BlockMeta {
    heap: *const HeapInner,
    cell_size: usize,
    cursor: Cell<usize>,
    free_head: Cell<*mut CellHeader>,
}

const _: () = assert!(std::mem::size_of::<BlockMeta>() <= CELLS_OFFSET);

impl BlockMeta {
    /// Adopts a raw block for cells of `cell_size` bytes.
    pub fn init(block: &Block, cell_size: usize, heap: *const HeapInner) -> NonNull<BlockMeta> {
        debug_assert!(block.base_addr() % BLOCK_SIZE == 0);
        debug_assert!(cell_size >= CELL_HEADER_SIZE + std::mem::size_of::<*mut u8>());

        let meta = block.as_ptr().cast::<BlockMeta>();

        unsafe {
            std::ptr::write(
                meta,
                BlockMeta {
                    heap,
                    cell_size,
                    cursor: Cell::new(0),
                    free_head: Cell::new(std::ptr::null_mut()),
                },
            );

            NonNull::new_unchecked(meta)
        }
    }

    /// The meta living at the base of the block containing `addr`.
    ///
    /// # Safety
    /// `addr` must point inside a block previously adopted via `init`.
    pub unsafe fn from_addr(addr: usize) -> NonNull<BlockMeta> {
        NonNull::new_unchecked(super::constants::block_base(addr) as *mut BlockMeta)
    }

    pub fn heap(&self) -> *const HeapInner {
        self.heap
    }

    pub fn cell_size(&self) -> usize {
        self.cell_size
    }

    pub fn base_addr(&self) -> usize {
        self as *const BlockMeta as usize
    }

    pub fn capacity(&self) -> usize {
        (BLOCK_SIZE - CELLS_OFFSET) / self.cell_size
    }

    pub fn is_full(&self) -> bool {
        self.cursor.get() == self.capacity() && self.free_head.get().is_null()
    }

    fn slot_addr(&self, index: usize) -> usize {
        self.base_addr() + CELLS_OFFSET + index * self.cell_size
    }

    /// Hands out a dead slot with an initialized header, free list first,
    /// bump second. Returns `None` when the block is full.
    pub fn alloc_cell(&self) -> Option<NonNull<CellHeader>> {
        let head = self.free_head.get();
        if !head.is_null() {
            unsafe {
                let next = *Self::free_link(head);
                self.free_head.set(next);
                return Some(NonNull::new_unchecked(head));
            }
        }

        let index = self.cursor.get();
        if index == self.capacity() {
            return None;
        }
        self.cursor.set(index + 1);

        let slot = unsafe { NonNull::new_unchecked(self.slot_addr(index) as *mut u8) };
        Some(CellHeader::init_dead(slot))
    }

    /// Pushes a finalized slot onto the free list.
    pub fn free_cell(&self, header: NonNull<CellHeader>) {
        debug_assert!(!unsafe { header.as_ref() }.is_live());

        unsafe {
            *Self::free_link(header.as_ptr()) = self.free_head.get();
        }
        self.free_head.set(header.as_ptr());
    }

    // The free list link is stored in the dead slot's payload area.
    unsafe fn free_link(header: *mut CellHeader) -> *mut *mut CellHeader {
        (header as *mut u8).add(CELL_HEADER_SIZE) as *mut *mut CellHeader
    }

    /// Visits the header of every slot that has ever been handed out.
    pub fn for_each_cell(&self, mut f: impl FnMut(&CellHeader)) {
        for index in 0..self.cursor.get() {
            let header = unsafe { &*(self.slot_addr(index) as *const CellHeader) };
            f(header);
        }
    }

    /// The narrow conservative-scanning boundary: decides whether `addr`
    /// could be a reference into this block, over-approximating on
    /// purpose. Any address landing anywhere inside a live slot counts;
    /// addresses in the meta area, in never-used slots, or in dead slots
    /// do not.
    pub fn cell_from_possible_pointer(&self, addr: usize) -> Option<NonNull<CellHeader>> {
        let base = self.base_addr();
        if addr < base + CELLS_OFFSET || addr >= base + BLOCK_SIZE {
            return None;
        }

        let index = (addr - base - CELLS_OFFSET) / self.cell_size;
        if index >= self.cursor.get() {
            return None;
        }

        let header = unsafe { &*(self.slot_addr(index) as *const CellHeader) };
        if !header.is_live() {
            return None;
        }

        Some(NonNull::from(header))
    }
}
