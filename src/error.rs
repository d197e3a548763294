use thiserror::Error;

/// Errors that can surface from a mutating table operation.
///
/// A lookup miss is not an error (`get`/`delete` just return `None`), and a
/// corrupted invariant (e.g. `findprobe` failing to find a match, or an
/// unrecognized `ms4b`) is treated as fatal and panics rather than returning
/// an `Err`, see the crate-level docs under "Error handling".
#[derive(Error, Debug)]
pub enum TableError {
    /// The resize controller could not obtain a new bucket slab.
    ///
    /// The table is left installed in its pre-resize shape; no data is lost.
    #[error("failed to allocate a bucket slab of {requested_capacity} buckets")]
    AllocationFailure { requested_capacity: usize },
}

pub type Result<T> = std::result::Result<T, TableError>;
