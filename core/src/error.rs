use std::fmt::Debug;

use flash_device::Driver;
use thiserror::Error;

/// Surface error kinds for the public queue API.
///
/// There is no `Success` variant — successful operations return `Ok(())` or
/// `Ok(value)`, as is idiomatic in Rust.
#[derive(Debug, Error)]
pub enum Error<D: Driver + Debug> {
    /// The underlying device reported an I/O error that could not be locally
    /// recovered (a read error, or an erase/write failure with no free block left
    /// to retry against).
    #[error("flash I/O error: {0:?}")]
    Flash(D::Error),

    /// A structural/invariant violation in the store or device: SID mismatch,
    /// header validation failure, deletion reaching the end of a block with
    /// bytes still owed, or a dequeue/retrieve attempted while the stage is
    /// already locked.
    #[error("structural invariant violated")]
    FailedStore,

    /// The store does not have enough free pages (or the object exceeds the
    /// store's configured maximum size) to hold the requested object.
    #[error("store is full")]
    StoreFull,

    /// `dequeue` was called on an empty store.
    #[error("operation would time out (store is empty)")]
    Timeout,

    /// Host allocation failed (staging buffers, block registry).
    #[error("allocation failed")]
    FailedMem,

    /// A host OS primitive (the process-wide lock) could not be acquired.
    #[error("OS primitive unavailable")]
    FailedOs,

    /// `create` was called with attributes the device cannot satisfy, or a
    /// store handle was used that does not name an in-use store.
    #[error("invalid store handle or attributes")]
    InvalidHandle,
}

pub type Result<T, D> = core::result::Result<T, Error<D>>;
