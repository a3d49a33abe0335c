//! The scheduler-facing per-CPU table.
//!
//! One entry per physical core, fixed at build time. Each pCPU owns its
//! entry; the stop list is the only part other contexts touch, always
//! under the entry's lock.

use alloc::collections::VecDeque;

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::arch;
use crate::flag::FlagGroup;
use crate::platform::MAX_CPU_NR;
use crate::sync::SpinLock;
use crate::task::{self, TaskRef};

/// Kworker wake reason: terminated tasks are queued for recycling.
pub const KWORKER_TASK_RECYCLE: u32 = 1 << 0;
/// All bits a kworker pends on.
pub const KWORKER_FLAG_MASK: u32 = KWORKER_TASK_RECYCLE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum PcpuState {
    Running = 0,
    Idle = 1,
}

pub struct Pcpu {
    pub id: usize,
    state: AtomicU32,
    need_resched: AtomicBool,
    stop_list: SpinLock<VecDeque<TaskRef>>,
    kworker: SpinLock<Option<TaskRef>>,
    /// Condition bits the pCPU kworker blocks on.
    pub fg: FlagGroup,
}

impl Pcpu {
    const fn new(id: usize) -> Self {
        Self {
            id,
            state: AtomicU32::new(PcpuState::Running as u32),
            need_resched: AtomicBool::new(false),
            stop_list: SpinLock::new(VecDeque::new()),
            kworker: SpinLock::new(None),
            fg: FlagGroup::new(),
        }
    }

    pub fn state(&self) -> PcpuState {
        match self.state.load(Ordering::Acquire) {
            0 => PcpuState::Running,
            _ => PcpuState::Idle,
        }
    }

    pub fn set_state(&self, state: PcpuState) {
        self.state.store(state as u32, Ordering::Release);
    }

    pub fn need_resched(&self) -> bool {
        self.need_resched.load(Ordering::Acquire)
    }

    pub fn set_need_resched(&self) {
        self.need_resched.store(true, Ordering::Release);
    }

    pub fn clear_need_resched(&self) {
        self.need_resched.store(false, Ordering::Release);
    }

    pub fn kworker(&self) -> Option<TaskRef> {
        self.kworker.lock_irqsave().clone()
    }

    pub fn set_kworker(&self, task: TaskRef) {
        *self.kworker.lock_irqsave() = Some(task);
    }

    /// Hand a terminated task over for recycling. Ownership of the task
    /// transfers to this pCPU's kworker.
    pub fn add_stop_task(&self, task: TaskRef) {
        self.stop_list.lock_irqsave().push_back(task);
        self.fg.post(KWORKER_TASK_RECYCLE);
    }

    pub fn stop_list_len(&self) -> usize {
        self.stop_list.lock_irqsave().len()
    }

    /// Drain the stop list. The lock is dropped around each release:
    /// `do_release_task` may take allocator locks of its own.
    pub fn release_stop_tasks(&self) {
        loop {
            let task = self.stop_list.lock_irqsave().pop_front();
            match task {
                Some(task) => task::do_release_task(&task),
                None => break,
            }
        }
    }
}

static PCPUS: [Pcpu; MAX_CPU_NR] = [
    Pcpu::new(0),
    Pcpu::new(1),
    Pcpu::new(2),
    Pcpu::new(3),
    Pcpu::new(4),
    Pcpu::new(5),
    Pcpu::new(6),
    Pcpu::new(7),
];

pub fn get_pcpu(id: usize) -> &'static Pcpu {
    &PCPUS[id]
}

pub fn this_pcpu() -> &'static Pcpu {
    &PCPUS[arch::current_cpu_id()]
}

/// Reset every entry. Boot-path only.
pub fn percpu_init() {
    for pcpu in PCPUS.iter() {
        pcpu.set_state(PcpuState::Running);
        pcpu.clear_need_resched();
        pcpu.stop_list.lock_irqsave().clear();
        *pcpu.kworker.lock_irqsave() = None;
        pcpu.fg.init(0);
    }
}

// ── Resched plumbing ─────────────────────────────────────────────────
// The real context switch lives in the scheduler outside this crate;
// these entry points carry the flag and IPI protocol the idle loop and
// the event layer depend on.

pub fn need_resched() -> bool {
    this_pcpu().need_resched()
}

pub fn set_need_resched() {
    this_pcpu().set_need_resched()
}

/// Run the scheduler on this CPU. Suspension point.
pub fn sched() {
    this_pcpu().clear_need_resched();
}

/// Ask `cpu` to reschedule.
pub fn pcpu_resched(cpu: usize) {
    get_pcpu(cpu).set_need_resched();
    arch::send_resched_ipi(cpu);
}
