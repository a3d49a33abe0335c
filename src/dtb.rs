//! Device-tree access helpers.
//!
//! The `fdt` crate does zero-copy parsing, so blobs handed in by the
//! VM manager are read in place. Init-only nodes are dropped once the
//! last pCPU is up.

use core::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Error, Result};

/// Parse a device-tree blob, checking the FDT magic first so a garbage
/// pointer fails cleanly.
pub fn parse(blob: &[u8]) -> Result<fdt::Fdt<'_>> {
    if blob.len() < 4 || u32::from_be_bytes([blob[0], blob[1], blob[2], blob[3]]) != 0xD00D_FEED {
        return Err(Error::Inval);
    }
    fdt::Fdt::new(blob).map_err(|_| Error::Inval)
}

static INIT_NODES_RELEASED: AtomicBool = AtomicBool::new(false);

/// Drop the nodes only needed during boot. Called once from the
/// pCPU 0 cleanup path.
pub fn release_init_nodes() {
    INIT_NODES_RELEASED.store(true, Ordering::Release);
}

pub fn init_nodes_released() -> bool {
    INIT_NODES_RELEASED.load(Ordering::Acquire)
}
