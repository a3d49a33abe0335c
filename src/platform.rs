//! Platform constants and board operations.
//!
//! Compile-time capacities live here so they can be changed in one place
//! when targeting a different board; the actual CPU count is discovered
//! at boot (device tree) and published through [`set_num_cpus`].

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicUsize, Ordering};

// ── CPU topology ─────────────────────────────────────────────────────

/// Maximum CPUs supported (compile-time capacity for array sizing).
pub const MAX_CPU_NR: usize = 8;

/// Default CPU count (used when nothing is discovered at boot).
pub const DEFAULT_CPU_NR: usize = 1;

static NUM_CPUS: AtomicUsize = AtomicUsize::new(DEFAULT_CPU_NR);

/// Runtime CPU count, capped at [`MAX_CPU_NR`].
pub fn num_cpus() -> usize {
    NUM_CPUS.load(Ordering::Acquire)
}

/// Publish the discovered CPU count. Called once by the boot path.
pub fn set_num_cpus(nr: usize) {
    NUM_CPUS.store(nr.clamp(1, MAX_CPU_NR), Ordering::Release);
}

// ── Pages ────────────────────────────────────────────────────────────

pub const PAGE_SHIFT: usize = 12;
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;
pub const PAGE_MASK: u64 = (PAGE_SIZE - 1) as u64;

/// Number of pages covering `size` bytes.
pub const fn page_nr(size: usize) -> usize {
    (size + PAGE_SIZE - 1) >> PAGE_SHIFT
}

// ── Guest layout ─────────────────────────────────────────────────────

/// Base of the region VM dynamic device areas are carved from.
pub const VM_DYN_AREA_BASE: u64 = 0x0C00_0000;

// ── Board operations ─────────────────────────────────────────────────

/// Hooks a board port installs for power control. Each op is expected to
/// not return; the callers in [`crate::idle`] panic if one does.
#[derive(Clone, Copy, Default)]
pub struct PlatformOps {
    pub name: Option<&'static str>,
    pub system_reboot: Option<fn(flags: u32, argv: &[&str])>,
    pub system_shutdown: Option<fn()>,
    pub system_suspend: Option<fn()>,
}

struct PlatformCell(UnsafeCell<PlatformOps>);

// Safety: written once during single-threaded boot, read-only after.
unsafe impl Sync for PlatformCell {}

static PLATFORM: PlatformCell = PlatformCell(UnsafeCell::new(PlatformOps {
    name: None,
    system_reboot: None,
    system_shutdown: None,
    system_suspend: None,
}));

/// Install the board operations. Boot-path only.
pub fn set_platform(ops: PlatformOps) {
    unsafe { *PLATFORM.0.get() = ops };
}

/// Current board operations.
pub fn platform() -> &'static PlatformOps {
    unsafe { &*PLATFORM.0.get() }
}
