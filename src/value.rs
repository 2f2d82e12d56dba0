use crate::heap::{CellPtr, Ref};
use crate::trace::{Trace, Tracer};

/// A compact primitive-or-cell union.
///
/// The original encoding for this kind of value is a NaN-boxed 64-bit
/// word; here the discriminant is explicit and the compiler keeps the
/// same size through niche packing. What matters is the contract, not
/// the bit layout: [`is_cell`](Value::is_cell) is the sole gate, and a
/// number payload is never interpreted as object identity.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Value {
    Number(f64),
    Cell(CellPtr),
}

impl Value {
    pub fn number(n: f64) -> Self {
        Value::Number(n)
    }

    pub fn cell<T: Trace>(cell: Ref<T>) -> Self {
        Value::Cell(cell.erased())
    }

    pub fn is_cell(&self) -> bool {
        matches!(self, Value::Cell(_))
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::Number(_))
    }

    pub fn as_cell(&self) -> Option<CellPtr> {
        match self {
            Value::Cell(cell) => Some(*cell),
            Value::Number(_) => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Cell(_) => None,
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl<T: Trace> From<Ref<T>> for Value {
    fn from(cell: Ref<T>) -> Self {
        Value::cell(cell)
    }
}

unsafe impl Trace for Value {
    fn trace(&self, tracer: &mut Tracer<'_>) {
        tracer.trace_value(self)
    }
}
