//! AArch64 backend: EL2 privileged instructions behind plain functions.

use core::arch::asm;

/// Read current physical CPU ID from MPIDR_EL1.Aff0.
#[inline(always)]
pub fn current_cpu_id() -> usize {
    let mpidr: u64;
    unsafe { asm!("mrs {}, MPIDR_EL1", out(reg) mpidr) };
    (mpidr & 0xFF) as usize
}

#[inline(always)]
pub fn local_irq_enable() {
    unsafe { asm!("msr daifclr, #2", options(nostack, nomem)) };
}

#[inline(always)]
pub fn local_irq_disable() {
    unsafe { asm!("msr daifset, #2", options(nostack, nomem)) };
}

/// Mask IRQs and return the previous DAIF state for [`local_irq_restore`].
#[inline(always)]
pub fn local_irq_save() -> usize {
    let daif: u64;
    unsafe {
        asm!(
            "mrs {}, daif",
            "msr daifset, #2",
            out(reg) daif,
            options(nostack, nomem),
        );
    }
    daif as usize
}

#[inline(always)]
pub fn local_irq_restore(flags: usize) {
    unsafe { asm!("msr daif, {}", in(reg) flags as u64, options(nostack, nomem)) };
}

/// Wait for interrupt. Returns when an interrupt is pending, even if
/// IRQs are masked at the PSTATE level.
#[inline(always)]
pub fn wfi() {
    unsafe { asm!("wfi", options(nostack, nomem)) };
}

#[inline(always)]
pub fn nop() {
    unsafe { asm!("nop", options(nostack, nomem)) };
}

/// Relaxation hint for spin loops.
#[inline(always)]
pub fn cpu_relax() {
    core::hint::spin_loop();
}

/// Full data memory barrier.
#[inline(always)]
pub fn mb() {
    unsafe { asm!("dmb ish", options(nostack, nomem)) };
}

/// Store-ordering barrier: prior writes visible before later writes.
#[inline(always)]
pub fn wmb() {
    unsafe { asm!("dmb ishst", options(nostack, nomem)) };
}

/// Kick `cpu` with a reschedule IPI (SGI 0 through ICC_SGI1R_EL1).
#[inline]
pub fn send_resched_ipi(cpu: usize) {
    // TargetList bit only, Aff* zero, INTID 0: matches the QEMU virt
    // topology where Aff0 is the core number.
    let val: u64 = 1u64 << (cpu & 0xF);
    unsafe {
        asm!(
            "msr icc_sgi1r_el1, {val}",
            "isb",
            val = in(reg) val,
            options(nostack, nomem),
        );
    }
}
