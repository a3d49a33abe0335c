//! Memory shims for the core.
//!
//! The real allocator lives outside this crate; the core only needs
//! page-aligned blocks for shared rings and the slab-return hook the
//! boot path uses when it reclaims init-only memory.

use core::alloc::Layout;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use log::info;

use crate::platform::PAGE_SIZE;

/// Allocate `nr` zeroed, page-aligned pages suitable for sharing with a
/// guest. Returns `None` when the allocator is exhausted.
pub fn alloc_io_pages(nr: usize) -> Option<NonNull<u8>> {
    if nr == 0 {
        return None;
    }
    let layout = Layout::from_size_align(nr * PAGE_SIZE, PAGE_SIZE).ok()?;
    // Safety: layout has nonzero size.
    let ptr = unsafe { alloc::alloc::alloc_zeroed(layout) };
    NonNull::new(ptr)
}

/// Release pages from [`alloc_io_pages`].
///
/// # Safety
/// `ptr` must come from `alloc_io_pages(nr)` with the same `nr`, and must
/// not be used afterwards.
pub unsafe fn free_io_pages(ptr: NonNull<u8>, nr: usize) {
    let layout = Layout::from_size_align_unchecked(nr * PAGE_SIZE, PAGE_SIZE);
    alloc::alloc::dealloc(ptr.as_ptr(), layout);
}

// ── Init-memory reclaim ──────────────────────────────────────────────
// The boot path declares the init-only region (on bare metal, the
// __init section bounds); pCPU 0 hands it back to the slab allocator
// once every CPU is up.

static INIT_REGION: AtomicU64 = AtomicU64::new(0);
static INIT_SIZE: AtomicUsize = AtomicUsize::new(0);
static SLAB_RECLAIMED: AtomicUsize = AtomicUsize::new(0);

/// Record the init-only memory region for later reclaim.
pub fn declare_init_region(base: u64, size: usize) {
    INIT_REGION.store(base, Ordering::Release);
    INIT_SIZE.store(size, Ordering::Release);
}

pub fn init_region() -> (u64, usize) {
    (
        INIT_REGION.load(Ordering::Acquire),
        INIT_SIZE.load(Ordering::Acquire),
    )
}

/// Return a memory range to the slab allocator.
pub fn add_slab_mem(base: u64, size: usize) {
    if size == 0 {
        return;
    }
    info!("release unused memory [0x{:x} 0x{:x}]", base, size);
    SLAB_RECLAIMED.fetch_add(size, Ordering::AcqRel);
}

/// Total bytes handed back through [`add_slab_mem`].
pub fn slab_mem_reclaimed() -> usize {
    SLAB_RECLAIMED.load(Ordering::Acquire)
}
