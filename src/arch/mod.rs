//! Architecture shims used by the core.
//!
//! The aarch64 backend issues the real instructions (DAIF masking, WFI,
//! SGI-based resched IPIs, data barriers). Every other target gets the
//! host backend, which models the same operations with atomics so the
//! core logic builds and runs under the host test harness.

#[cfg(target_arch = "aarch64")]
mod aarch64;
#[cfg(target_arch = "aarch64")]
pub use aarch64::*;

#[cfg(not(target_arch = "aarch64"))]
mod host;
#[cfg(not(target_arch = "aarch64"))]
pub use host::*;
