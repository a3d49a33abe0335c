//! Per-CPU boot sequence, idle loop and the recycle kworker.
//!
//! Every pCPU runs [`cpu_idle`] after the early boot code hands over:
//! it instantiates the statically declared tasks, spawns the pCPU's
//! kworker, joins the boot barrier and then settles into the
//! run-until-idle / wait-for-interrupt loop.

use alloc::vec::Vec;

use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use log::error;

use crate::arch;
use crate::dtb;
use crate::flag::FlagOpts;
use crate::mm;
use crate::percpu::{self, get_pcpu, Pcpu, PcpuState, KWORKER_FLAG_MASK, KWORKER_TASK_RECYCLE};
use crate::platform::{self, platform};
use crate::sync::SpinLock;
use crate::task::{
    create_migrating_task, create_realtime_task, create_task, TaskFlags, TaskFn,
    OS_LOWEST_REALTIME_PRIO, OS_PRIO_DEFAULT_0,
};

// ── Static task descriptors ──────────────────────────────────────────

/// Placement class of a statically declared task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskAff {
    /// Instantiated once per pCPU.
    PerCpu,
    /// Instantiated exactly once, on pCPU 0.
    Any,
}

#[derive(Clone, Copy)]
pub struct TaskDesc {
    pub name: &'static str,
    pub entry: TaskFn,
    pub arg: usize,
    pub prio: u8,
    pub stack_size: u32,
    pub flags: TaskFlags,
    pub aff: TaskAff,
}

static TASK_DESCS: SpinLock<Vec<TaskDesc>> = SpinLock::new(Vec::new());

/// Declare a static task. Module initializers call this before the
/// pCPUs enter [`cpu_idle`]; enumeration order is registration order.
pub fn register_task_desc(desc: TaskDesc) {
    TASK_DESCS.lock().push(desc);
}

fn create_static_tasks(cpu: usize) {
    for desc in TASK_DESCS.lock().iter() {
        let created = match desc.aff {
            TaskAff::PerCpu => create_task(
                desc.name,
                desc.entry,
                desc.arg,
                desc.prio,
                cpu,
                desc.stack_size,
                desc.flags,
            ),
            TaskAff::Any if cpu == 0 => {
                if desc.prio <= OS_LOWEST_REALTIME_PRIO {
                    create_realtime_task(
                        desc.name,
                        desc.entry,
                        desc.arg,
                        desc.prio,
                        desc.stack_size,
                        desc.flags,
                    )
                } else {
                    create_migrating_task(
                        desc.name,
                        desc.entry,
                        desc.arg,
                        desc.prio,
                        desc.stack_size,
                        desc.flags,
                    )
                }
            }
            TaskAff::Any => continue,
        };
        if created.is_err() {
            error!("create [{}] fail on cpu{}", desc.name, cpu);
        }
    }
}

// ── Boot state ───────────────────────────────────────────────────────

static KERNEL_REF: AtomicUsize = AtomicUsize::new(0);
static OS_RUNNING: AtomicBool = AtomicBool::new(false);
static CLEAN_DONE: AtomicBool = AtomicBool::new(false);

/// Reset boot bookkeeping. Called from [`crate::kernel_init`].
pub fn boot_state_init() {
    KERNEL_REF.store(0, Ordering::Release);
    OS_RUNNING.store(false, Ordering::Release);
    CLEAN_DONE.store(false, Ordering::Release);
    TASK_DESCS.lock().clear();
}

/// Number of pCPUs that reached the running state.
pub fn kernel_ref() -> usize {
    KERNEL_REF.load(Ordering::Acquire)
}

pub fn os_is_running() -> bool {
    OS_RUNNING.load(Ordering::Acquire)
}

/// One-shot cleanup after every pCPU is up: init-only memory goes back
/// to the slab allocator and init-only device-tree nodes are dropped.
fn os_clean() {
    if CLEAN_DONE.swap(true, Ordering::AcqRel) {
        return;
    }
    dtb::release_init_nodes();
    let (base, size) = mm::init_region();
    mm::add_slab_mem(base, size);
}

pub fn os_clean_done() -> bool {
    CLEAN_DONE.load(Ordering::Acquire)
}

// ── Boot and idle ────────────────────────────────────────────────────

/// Per-CPU bring-up, steps shared by every pCPU. pCPU 0 additionally
/// waits for the others and reclaims init memory.
pub fn cpu_boot(pcpu_id: usize) {
    let pcpu = get_pcpu(pcpu_id);

    create_static_tasks(pcpu_id);

    let kworker = create_task(
        "pcpu_kworker",
        pcpu_kworker_task,
        pcpu_id,
        OS_PRIO_DEFAULT_0,
        pcpu_id,
        4096,
        TaskFlags::KERNEL,
    )
    .unwrap_or_else(|_| panic!("create kworker fail on pcpu{}", pcpu_id));
    pcpu.set_kworker(kworker);

    pcpu.fg.init(0);

    OS_RUNNING.store(true, Ordering::Release);
    KERNEL_REF.fetch_add(1, Ordering::AcqRel);

    arch::local_irq_enable();

    if pcpu_id == 0 {
        while kernel_ref() != platform::num_cpus() {
            arch::cpu_relax();
        }
        os_clean();
    }

    // Kick ourselves so the fresh per-cpu tasks get scheduled.
    percpu::pcpu_resched(pcpu_id);
}

/// Whether this pCPU may enter low-power wait right now.
pub fn pcpu_can_idle(_pcpu: &Pcpu) -> bool {
    true
}

/// One pass of the low-power wait. The idle condition is re-checked
/// with IRQs masked: an interrupt arriving between the outer check and
/// `wfi` would otherwise be a lost wakeup.
pub fn idle_wait(pcpu: &'static Pcpu) {
    arch::local_irq_disable();
    if !pcpu.need_resched() && pcpu_can_idle(pcpu) {
        pcpu.set_state(PcpuState::Idle);
        arch::wfi();
        arch::nop();
        pcpu.set_state(PcpuState::Running);
    }
    arch::local_irq_enable();
}

/// The per-CPU main loop: boot, then alternate between the scheduler
/// and low-power wait forever.
pub fn cpu_idle(pcpu_id: usize) -> ! {
    cpu_boot(pcpu_id);
    let pcpu = get_pcpu(pcpu_id);

    loop {
        while !pcpu.need_resched() && pcpu_can_idle(pcpu) {
            idle_wait(pcpu);
        }
        pcpu.set_need_resched();
        percpu::sched();
    }
}

/// Kworker body: blocks on the pCPU flag group and recycles terminated
/// tasks. Runs at priority 0, pinned to its pCPU.
pub fn pcpu_kworker_task(pcpu_id: usize) {
    let pcpu = get_pcpu(pcpu_id);
    loop {
        let flag = pcpu.fg.pend(
            KWORKER_FLAG_MASK,
            FlagOpts::WAIT_SET_ANY | FlagOpts::CONSUME,
            0,
        );
        if flag & KWORKER_TASK_RECYCLE != 0 {
            pcpu.release_stop_tasks();
        }
    }
}

// ── Power control ────────────────────────────────────────────────────

pub fn system_reboot(flags: u32, argv: &[&str]) -> ! {
    if let Some(op) = platform().system_reboot {
        op(flags, argv);
    }
    panic!("can not reboot system now");
}

pub fn system_shutdown() -> ! {
    if let Some(op) = platform().system_shutdown {
        op();
    }
    panic!("can not shutdown system now");
}

pub fn system_suspend() -> i32 {
    if let Some(op) = platform().system_suspend {
        op();
    }
    arch::wfi();
    0
}
