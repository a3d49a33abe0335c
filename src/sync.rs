//! Ticket spinlock with an interrupt-saving variant.
//!
//! `lock()` is for thread context only. Any state an interrupt handler
//! can also touch (event waiters, pCPU stop lists) must use
//! `lock_irqsave()`, which masks IRQs for the critical section and
//! restores the previous state on drop.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicU32, Ordering};

use crate::arch;

pub struct SpinLock<T> {
    next_ticket: AtomicU32,
    now_serving: AtomicU32,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Sync for SpinLock<T> {}
unsafe impl<T: Send> Send for SpinLock<T> {}

impl<T> SpinLock<T> {
    pub const fn new(data: T) -> Self {
        Self {
            next_ticket: AtomicU32::new(0),
            now_serving: AtomicU32::new(0),
            data: UnsafeCell::new(data),
        }
    }

    fn take_ticket(&self) -> u32 {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        while self.now_serving.load(Ordering::Acquire) != ticket {
            arch::cpu_relax();
        }
        ticket
    }

    fn serve_next(&self, ticket: u32) {
        self.now_serving.store(ticket + 1, Ordering::Release);
        // SEV wakes cores spinning in WFE-based spin loops.
        #[cfg(target_arch = "aarch64")]
        unsafe {
            core::arch::asm!("sev", options(nostack, nomem))
        };
    }

    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        let ticket = self.take_ticket();
        SpinLockGuard { lock: self, ticket }
    }

    /// Take the lock with IRQs masked; the guard restores the previous
    /// mask state after releasing.
    pub fn lock_irqsave(&self) -> SpinLockIrqGuard<'_, T> {
        let flags = arch::local_irq_save();
        let ticket = self.take_ticket();
        SpinLockIrqGuard {
            lock: self,
            ticket,
            flags,
        }
    }
}

pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
    ticket: u32,
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.serve_next(self.ticket);
    }
}

pub struct SpinLockIrqGuard<'a, T> {
    lock: &'a SpinLock<T>,
    ticket: u32,
    flags: usize,
}

impl<T> Deref for SpinLockIrqGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for SpinLockIrqGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for SpinLockIrqGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.serve_next(self.ticket);
        arch::local_irq_restore(self.flags);
    }
}
