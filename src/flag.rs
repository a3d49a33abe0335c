//! Flag groups: a bitmap of condition bits a task can block on.
//!
//! Only the set-any/consume shape the per-CPU kworkers depend on is
//! carried here; waiting is a relaxed spin since the caller is a
//! dedicated worker with nothing else to do.

use bitflags::bitflags;

use crate::arch;
use crate::sync::SpinLock;

pub type Flags = u32;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FlagOpts: u32 {
        /// Wake when any bit of the mask is set.
        const WAIT_SET_ANY = 0x01;
        /// Clear the matched bits on wake.
        const CONSUME      = 0x80;
    }
}

pub struct FlagGroup {
    bits: SpinLock<Flags>,
}

impl FlagGroup {
    pub const fn new() -> Self {
        Self {
            bits: SpinLock::new(0),
        }
    }

    pub fn init(&self, flags: Flags) {
        *self.bits.lock_irqsave() = flags;
    }

    /// Set bits and make any pender runnable.
    pub fn post(&self, flags: Flags) {
        *self.bits.lock_irqsave() |= flags;
    }

    /// Block until a bit of `mask` is set, then return the matched bits.
    ///
    /// `to` bounds the wait in relaxation rounds; 0 waits forever. On
    /// timeout the return value is 0.
    pub fn pend(&self, mask: Flags, opts: FlagOpts, to: u32) -> Flags {
        let mut waited = 0u32;
        loop {
            {
                let mut bits = self.bits.lock_irqsave();
                let matched = *bits & mask;
                if matched != 0 {
                    if opts.contains(FlagOpts::CONSUME) {
                        *bits &= !matched;
                    }
                    return matched;
                }
            }
            if to != 0 {
                waited += 1;
                if waited >= to {
                    return 0;
                }
            }
            arch::cpu_relax();
        }
    }

    /// Current bits, without consuming.
    pub fn peek(&self) -> Flags {
        *self.bits.lock_irqsave()
    }
}

impl Default for FlagGroup {
    fn default() -> Self {
        Self::new()
    }
}
