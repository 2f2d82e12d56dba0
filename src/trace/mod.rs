mod trace;
mod tracer;

pub use trace::{Trace, TraceLeaf};
pub use tracer::Tracer;
