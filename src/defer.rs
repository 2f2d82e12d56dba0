use crate::heap::HeapInner;
use std::marker::PhantomData;

/// RAII guard that suppresses collection while alive.
///
/// Guards nest: the heap counts them, and a collection requested while
/// any guard exists (explicitly, or by the allocation-pressure trigger)
/// is recorded and run when the last guard drops. Useful around code
/// that holds bare [`crate::Ref`]s without roots, such as a cell
/// mid-construction.
pub struct DeferGc<'h> {
    heap: &'h HeapInner,
    _no_send: PhantomData<*const ()>,
}

impl<'h> DeferGc<'h> {
    pub(crate) fn new(heap: &'h HeapInner) -> Self {
        heap.defer();
        DeferGc {
            heap,
            _no_send: PhantomData,
        }
    }
}

impl Drop for DeferGc<'_> {
    fn drop(&mut self) {
        self.heap.undefer();
    }
}
