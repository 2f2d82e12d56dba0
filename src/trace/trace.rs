use super::tracer::Tracer;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};

/// The visitation contract every heap-allocated type must implement.
///
/// `trace` must report every heap edge the value owns to the tracer:
/// every [`crate::Ref`], [`crate::Value`], or nested `Trace` field. The trait is
/// unsafe because a missed edge causes the collector to sweep a cell that
/// is still reachable; prefer `#[derive(Trace)]`, which is field-complete
/// by construction.
pub unsafe trait Trace {
    fn trace(&self, tracer: &mut Tracer<'_>);
}

/// Marker for types that contain no heap edges at all.
///
/// `TraceLeaf` types get trivially empty `trace` impls, and only leaves
/// may appear in places the collector never scans.
pub unsafe trait TraceLeaf: Trace {
    #[doc(hidden)]
    fn __assert_trace_leaf() {}
}

macro_rules! impl_trace_leaf {
    ($($t:ty),* $(,)?) => {
        $(
            unsafe impl Trace for $t {
                fn trace(&self, _: &mut Tracer<'_>) {}
            }

            unsafe impl TraceLeaf for $t {}
        )*
    };
}

impl_trace_leaf!(
    (),
    bool,
    char,
    u8,
    u16,
    u32,
    u64,
    u128,
    usize,
    i8,
    i16,
    i32,
    i64,
    i128,
    isize,
    f32,
    f64,
    String,
    &'static str,
);

unsafe impl<T: Trace> Trace for Option<T> {
    fn trace(&self, tracer: &mut Tracer<'_>) {
        if let Some(value) = self.as_ref() {
            value.trace(tracer)
        }
    }
}

unsafe impl<const N: usize, T: Trace> Trace for [T; N] {
    fn trace(&self, tracer: &mut Tracer<'_>) {
        for item in self.iter() {
            item.trace(tracer)
        }
    }
}

unsafe impl<T: Trace> Trace for [T] {
    fn trace(&self, tracer: &mut Tracer<'_>) {
        for item in self.iter() {
            item.trace(tracer)
        }
    }
}

unsafe impl<T: Trace> Trace for Vec<T> {
    fn trace(&self, tracer: &mut Tracer<'_>) {
        for item in self.iter() {
            item.trace(tracer)
        }
    }
}

unsafe impl<T: Trace> Trace for Box<T> {
    fn trace(&self, tracer: &mut Tracer<'_>) {
        (**self).trace(tracer)
    }
}

unsafe impl<A: Trace, B: Trace> Trace for (A, B) {
    fn trace(&self, tracer: &mut Tracer<'_>) {
        self.0.trace(tracer);
        self.1.trace(tracer);
    }
}

unsafe impl<A: Trace, B: Trace, C: Trace> Trace for (A, B, C) {
    fn trace(&self, tracer: &mut Tracer<'_>) {
        self.0.trace(tracer);
        self.1.trace(tracer);
        self.2.trace(tracer);
    }
}

unsafe impl<T: Trace + Copy> Trace for Cell<T> {
    fn trace(&self, tracer: &mut Tracer<'_>) {
        self.get().trace(tracer)
    }
}

unsafe impl<T: TraceLeaf + Copy> TraceLeaf for Cell<T> {}

unsafe impl<T: Trace> Trace for RefCell<T> {
    fn trace(&self, tracer: &mut Tracer<'_>) {
        self.borrow().trace(tracer)
    }
}

unsafe impl<K: Trace, V: Trace, S> Trace for HashMap<K, V, S> {
    fn trace(&self, tracer: &mut Tracer<'_>) {
        for (key, value) in self.iter() {
            key.trace(tracer);
            value.trace(tracer);
        }
    }
}

unsafe impl<T: Trace, S> Trace for HashSet<T, S> {
    fn trace(&self, tracer: &mut Tracer<'_>) {
        for item in self.iter() {
            item.trace(tracer)
        }
    }
}
