//! Crate-wide error type.
//!
//! Mirrors the small errno set the core actually produces: per-request
//! failures are returned to the caller, fatal boot conditions panic
//! instead (there is no way to continue without a kworker or module
//! context memory).

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    /// Invalid argument or malformed device-tree resource.
    #[error("invalid argument")]
    Inval,

    /// Out of memory.
    #[error("out of memory")]
    NoMem,

    /// Named object does not exist.
    #[error("no such entry")]
    NoEnt,

    /// Device not present; the caller proceeds without it.
    #[error("no such device")]
    NoDev,

    /// I/O failure, e.g. a full console ring.
    #[error("i/o error")]
    Io,

    /// Resource temporarily unavailable.
    #[error("try again")]
    Again,

    /// A wait ran out before the condition was met.
    #[error("timed out")]
    TimedOut,
}

pub type Result<T> = core::result::Result<T, Error>;
