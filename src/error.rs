//! Error kinds shared by every module in this crate.
//!
//! Invariant violations are not represented here: they abort the process.
//! This enum is only for the recoverable error kinds.

/// A recoverable failure from one of this crate's operations.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Allocation failed (a chunk, a hazard record, a wrapper, ...).
    #[error("allocation failed")]
    OutOfMemory,

    /// Capacity arithmetic would overflow (chunk growth, index range).
    #[error("capacity arithmetic overflowed")]
    Overflow,

    /// A caller passed an argument that can never be valid (e.g. a `set`
    /// with nothing to publish).
    #[error("invalid argument")]
    InvalidArgument,

    /// `get` was called with `GetMode::RequireSet` on an index beyond the
    /// in-use prefix.
    #[error("index not set")]
    NotFound,

    /// A descriptor's verifier did not match.
    #[error("descriptor verifier mismatch")]
    BadHandle,

    /// An index would exceed the reserved range (`INT_MAX / 16`-equivalent).
    #[error("index would exceed the reserved range")]
    TooMany,

    /// A `Mutex`/`Condvar` was poisoned by a panicking holder.
    #[error("synchronization primitive poisoned")]
    Poisoned,
}

pub type Result<T> = std::result::Result<T, Error>;
