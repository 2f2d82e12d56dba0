use std::fmt;

/// Failure to obtain backing memory for a block.
///
/// Running out of memory is fatal by contract: the heap panics when the
/// block allocator reports `Oom`. The error type exists so the allocator
/// internals stay `Result`-shaped and unit-testable.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BlockError {
    /// The backing environment could not supply memory.
    Oom,
    /// The requested allocation cannot be served by any cell size class.
    BadRequest,
}

impl fmt::Display for BlockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockError::Oom => write!(f, "out of memory acquiring a heap block"),
            BlockError::BadRequest => write!(f, "allocation does not fit any cell size class"),
        }
    }
}

impl std::error::Error for BlockError {}
