//! Error type.
//!
//! This is the shared error type for the whole crate.

use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum Error {
    /// Index, generation or kind of a handle does not match any live resource.
    #[error("invalid resource handle")]
    InvalidHandle,
    /// No free slot left in a fixed-capacity pool.
    #[error("resource pool overflow")]
    PoolOverflow,
    /// The driver rejected a create request, or the description failed validation.
    #[error("unsupported resource description")]
    UnsupportedDescription,
    /// Two nodes of the same frame declared the same output resource.
    #[error("duplicate writer for an output resource")]
    DuplicateWriter,
    /// Node kind is not admissible on the requested queue.
    #[error("node not admissible on the requested queue")]
    QueueMismatch,
    /// Terminal device error; subsequent calls keep failing.
    #[error("device lost")]
    DriverLost,
    /// A wait elapsed before all batches signaled.
    #[error("wait timed out")]
    Timeout,
    /// A pack stream declared the same name twice.
    #[error("duplicate name in pack: {0}")]
    DuplicateName(String),
    /// Malformed pack stream.
    #[error("invalid pack stream: {0}")]
    InvalidPack(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;
