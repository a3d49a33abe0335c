//! Host backend: models the privileged operations with atomics.
//!
//! `current_cpu_id` reads a settable register so a single host thread can
//! stand in for any pCPU; IPIs and WFIs are recorded instead of issued so
//! callers can observe them.

use core::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

static CURRENT_CPU: AtomicUsize = AtomicUsize::new(0);
static IRQ_MASKED: AtomicBool = AtomicBool::new(true);
static WFI_COUNT: AtomicU64 = AtomicU64::new(0);
static RESCHED_IPIS: AtomicU64 = AtomicU64::new(0);

#[inline]
pub fn current_cpu_id() -> usize {
    CURRENT_CPU.load(Ordering::Relaxed)
}

/// Select which pCPU the calling context models.
pub fn set_current_cpu_id(cpu: usize) {
    CURRENT_CPU.store(cpu, Ordering::Relaxed);
}

#[inline]
pub fn local_irq_enable() {
    IRQ_MASKED.store(false, Ordering::Release);
}

#[inline]
pub fn local_irq_disable() {
    IRQ_MASKED.store(true, Ordering::Release);
}

#[inline]
pub fn local_irq_save() -> usize {
    IRQ_MASKED.swap(true, Ordering::AcqRel) as usize
}

#[inline]
pub fn local_irq_restore(flags: usize) {
    IRQ_MASKED.store(flags != 0, Ordering::Release);
}

/// True while IRQs are masked. Host-only observer.
pub fn irqs_masked() -> bool {
    IRQ_MASKED.load(Ordering::Acquire)
}

/// Recorded wait-for-interrupt: counts the sleep and returns, as if an
/// interrupt were already pending.
#[inline]
pub fn wfi() {
    WFI_COUNT.fetch_add(1, Ordering::Relaxed);
    core::hint::spin_loop();
}

/// Number of [`wfi`] calls so far. Host-only observer.
pub fn wfi_count() -> u64 {
    WFI_COUNT.load(Ordering::Relaxed)
}

#[inline]
pub fn nop() {}

#[inline]
pub fn cpu_relax() {
    core::hint::spin_loop();
}

#[inline]
pub fn mb() {
    core::sync::atomic::fence(Ordering::SeqCst);
}

#[inline]
pub fn wmb() {
    core::sync::atomic::fence(Ordering::Release);
}

#[inline]
pub fn send_resched_ipi(cpu: usize) {
    RESCHED_IPIS.fetch_or(1u64 << (cpu & 0x3F), Ordering::AcqRel);
}

/// Drain the recorded IPI mask. Host-only observer.
pub fn take_resched_ipis() -> u64 {
    RESCHED_IPIS.swap(0, Ordering::AcqRel)
}
