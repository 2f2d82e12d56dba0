use crate::trace::{Trace, Tracer};
use std::cell::Cell;
use std::marker::PhantomData;
use std::ptr::NonNull;

/// Bytes between the start of a cell slot and the start of its payload.
/// Payloads are therefore 16-byte aligned (slots are 32-byte aligned).
pub const CELL_HEADER_SIZE: usize = 16;

/// Lifecycle state of a cell slot whose header has been initialized.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CellState {
    /// Slot is free: never used, or its payload was finalized.
    Dead = 0,
    /// Slot holds a constructed payload.
    Live = 1,
}

/// Erased operations on a cell payload, one static table per payload type.
///
/// `type_name` is a function pointer rather than a `&'static str` because
/// resolving the name is not a `const` operation on stable Rust.
pub struct CellVTable {
    pub trace: unsafe fn(NonNull<()>, &mut Tracer<'_>),
    pub drop: unsafe fn(NonNull<()>),
    pub type_name: fn() -> &'static str,
}

unsafe fn trace_erased<T: Trace>(payload: NonNull<()>, tracer: &mut Tracer<'_>) {
    payload.cast::<T>().as_ref().trace(tracer)
}

unsafe fn drop_erased<T>(payload: NonNull<()>) {
    std::ptr::drop_in_place(payload.cast::<T>().as_ptr())
}

struct VTableFor<T>(PhantomData<T>);

impl<T: Trace> VTableFor<T> {
    const TABLE: CellVTable = CellVTable {
        trace: trace_erased::<T>,
        drop: drop_erased::<T>,
        type_name: std::any::type_name::<T>,
    };
}

pub fn vtable_of<T: Trace>() -> &'static CellVTable {
    &VTableFor::<T>::TABLE
}

/// Prefix of every cell slot. Written when the slot is first handed out
/// and kept valid for the life of the block.
#[repr(C)]
pub struct CellHeader {
    state: Cell<CellState>,
    marked: Cell<bool>,
    vtable: Cell<Option<&'static CellVTable>>,
}

// The payload offset is baked into pointer arithmetic all over the
// allocator, so the header must actually fit in it.
const _: () = assert!(std::mem::size_of::<CellHeader>() <= CELL_HEADER_SIZE);

impl CellHeader {
    pub fn init_dead(slot: NonNull<u8>) -> NonNull<CellHeader> {
        let header = slot.cast::<CellHeader>();

        unsafe {
            std::ptr::write(
                header.as_ptr(),
                CellHeader {
                    state: Cell::new(CellState::Dead),
                    marked: Cell::new(false),
                    vtable: Cell::new(None),
                },
            );
        }

        header
    }

    pub fn state(&self) -> CellState {
        self.state.get()
    }

    pub fn is_live(&self) -> bool {
        self.state.get() == CellState::Live
    }

    pub fn is_marked(&self) -> bool {
        self.marked.get()
    }

    pub fn set_marked(&self, marked: bool) {
        self.marked.set(marked)
    }

    pub fn set_live(&self, vtable: &'static CellVTable) {
        self.state.set(CellState::Live);
        self.marked.set(false);
        self.vtable.set(Some(vtable));
    }

    pub fn vtable(&self) -> &'static CellVTable {
        self.vtable.get().expect("dead cell has no vtable")
    }

    pub fn payload(&self) -> NonNull<()> {
        unsafe {
            NonNull::new_unchecked((self as *const CellHeader as *mut u8).add(CELL_HEADER_SIZE))
                .cast()
        }
    }

    pub fn from_payload<T>(payload: NonNull<T>) -> NonNull<CellHeader> {
        unsafe {
            NonNull::new_unchecked(payload.as_ptr().cast::<u8>().sub(CELL_HEADER_SIZE)).cast()
        }
    }

    /// Drops the payload in place and frees the slot's identity.
    /// Must be called at most once per live payload.
    pub unsafe fn finalize(&self) {
        debug_assert!(self.is_live());

        let vtable = self.vtable();
        (vtable.drop)(self.payload());

        self.state.set(CellState::Dead);
        self.marked.set(false);
        self.vtable.set(None);
    }
}
