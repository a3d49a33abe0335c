//! Task handles and the thin task factory.
//!
//! The real scheduler and stack management live outside this crate; the
//! core only needs a handle carrying the identity, priority class and
//! pend bookkeeping the event layer and the pCPU recycle path operate on.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use core::sync::atomic::{AtomicU32, Ordering};

use bitflags::bitflags;
use log::debug;

use crate::error::Result;
use crate::event::EventMsg;
use crate::sync::SpinLock;

// ── Priority classes ─────────────────────────────────────────────────

/// Tasks at or below this priority are realtime: they wait on events
/// through the ready bitmap instead of the FIFO list.
pub const OS_LOWEST_REALTIME_PRIO: u8 = 63;

/// Priority of per-CPU kernel workers.
pub const OS_PRIO_DEFAULT_0: u8 = 0;

/// Affinity value for tasks not pinned to a pCPU.
pub const TASK_AFF_ANY: u32 = u32::MAX;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TaskFlags: u32 {
        const KERNEL    = 1 << 0;
        const REALTIME  = 1 << 1;
        const MIGRATING = 1 << 2;
    }
}

// Pend-status bits a task carries while blocked on an object.
pub const TASK_STAT_RDY: u32 = 0;
pub const TASK_STAT_SEM: u32 = 0x01;
pub const TASK_STAT_MBOX: u32 = 0x02;
pub const TASK_STAT_Q: u32 = 0x04;
pub const TASK_STAT_SUSPEND: u32 = 0x08;
pub const TASK_STAT_MUTEX: u32 = 0x10;
pub const TASK_STAT_FLAG: u32 = 0x20;

/// Outcome of a pend, written by whoever wakes the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum PendStat {
    Ok = 0,
    TimedOut = 1,
    Abort = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum TaskState {
    Ready = 0,
    Running = 1,
    Wait = 2,
    Stopped = 3,
}

pub type TaskFn = fn(usize);

pub struct Task {
    pub name: String,
    pub pid: u32,
    pub prio: u8,
    pub affinity: u32,
    pub stack_size: u32,
    pub flags: TaskFlags,
    pub entry: TaskFn,
    pub arg: usize,
    state: AtomicU32,
    stat: AtomicU32,
    pend_stat: AtomicU32,
    delay: AtomicU32,
    msg: SpinLock<Option<EventMsg>>,
}

pub type TaskRef = Arc<Task>;

impl Task {
    pub fn is_realtime(&self) -> bool {
        self.prio <= OS_LOWEST_REALTIME_PRIO
    }

    pub fn state(&self) -> TaskState {
        match self.state.load(Ordering::Acquire) {
            0 => TaskState::Ready,
            1 => TaskState::Running,
            2 => TaskState::Wait,
            _ => TaskState::Stopped,
        }
    }

    pub fn set_state(&self, state: TaskState) {
        self.state.store(state as u32, Ordering::Release);
    }

    /// Pend-status bits (`TASK_STAT_*`) currently set on the task.
    pub fn stat(&self) -> u32 {
        self.stat.load(Ordering::Acquire)
    }

    pub fn set_stat_bits(&self, bits: u32) {
        self.stat.fetch_or(bits, Ordering::AcqRel);
    }

    pub fn clear_stat_bits(&self, msk: u32) {
        self.stat.fetch_and(!msk, Ordering::AcqRel);
    }

    pub fn pend_stat(&self) -> PendStat {
        match self.pend_stat.load(Ordering::Acquire) {
            0 => PendStat::Ok,
            1 => PendStat::TimedOut,
            _ => PendStat::Abort,
        }
    }

    pub fn set_pend_stat(&self, stat: PendStat) {
        self.pend_stat.store(stat as u32, Ordering::Release);
    }

    /// Remaining wait time in ticks; 0 means wait forever.
    pub fn delay(&self) -> u32 {
        self.delay.load(Ordering::Acquire)
    }

    pub fn set_delay(&self, ticks: u32) {
        self.delay.store(ticks, Ordering::Release);
    }

    pub fn set_msg(&self, msg: Option<EventMsg>) {
        *self.msg.lock() = msg;
    }

    pub fn take_msg(&self) -> Option<EventMsg> {
        self.msg.lock().take()
    }
}

// ── Task table ───────────────────────────────────────────────────────

static NEXT_PID: AtomicU32 = AtomicU32::new(1);
static TASK_TABLE: SpinLock<Vec<TaskRef>> = SpinLock::new(Vec::new());

/// Reset the task table. Boot-path only.
pub fn task_table_init() {
    TASK_TABLE.lock().clear();
    NEXT_PID.store(1, Ordering::Release);
}

fn insert_task(
    name: &str,
    entry: TaskFn,
    arg: usize,
    prio: u8,
    affinity: u32,
    stack_size: u32,
    flags: TaskFlags,
) -> TaskRef {
    let task = Arc::new(Task {
        name: String::from(name),
        pid: NEXT_PID.fetch_add(1, Ordering::AcqRel),
        prio,
        affinity,
        stack_size,
        flags,
        entry,
        arg,
        state: AtomicU32::new(TaskState::Ready as u32),
        stat: AtomicU32::new(TASK_STAT_RDY),
        pend_stat: AtomicU32::new(PendStat::Ok as u32),
        delay: AtomicU32::new(0),
        msg: SpinLock::new(None),
    });
    TASK_TABLE.lock().push(task.clone());
    task
}

/// Create a task pinned to pCPU `cpu`.
pub fn create_task(
    name: &str,
    entry: TaskFn,
    arg: usize,
    prio: u8,
    cpu: usize,
    stack_size: u32,
    flags: TaskFlags,
) -> Result<TaskRef> {
    Ok(insert_task(
        name,
        entry,
        arg,
        prio,
        cpu as u32,
        stack_size,
        flags,
    ))
}

/// Create a global realtime task. The priority must be in the realtime
/// class.
pub fn create_realtime_task(
    name: &str,
    entry: TaskFn,
    arg: usize,
    prio: u8,
    stack_size: u32,
    flags: TaskFlags,
) -> Result<TaskRef> {
    if prio > OS_LOWEST_REALTIME_PRIO {
        return Err(crate::Error::Inval);
    }
    Ok(insert_task(
        name,
        entry,
        arg,
        prio,
        TASK_AFF_ANY,
        stack_size,
        flags | TaskFlags::REALTIME,
    ))
}

/// Create a best-effort task eligible for load balancing.
pub fn create_migrating_task(
    name: &str,
    entry: TaskFn,
    arg: usize,
    prio: u8,
    stack_size: u32,
    flags: TaskFlags,
) -> Result<TaskRef> {
    Ok(insert_task(
        name,
        entry,
        arg,
        prio,
        TASK_AFF_ANY,
        stack_size,
        flags | TaskFlags::MIGRATING,
    ))
}

/// Final release of a terminated task. Runs in kworker context only,
/// never in scheduler context.
pub fn do_release_task(task: &TaskRef) {
    task.set_state(TaskState::Stopped);
    TASK_TABLE.lock().retain(|t| !Arc::ptr_eq(t, task));
    debug!("released task {} (pid {})", task.name, task.pid);
}

pub fn task_count() -> usize {
    TASK_TABLE.lock().len()
}

pub fn find_task(name: &str) -> Option<TaskRef> {
    TASK_TABLE.lock().iter().find(|t| t.name == name).cloned()
}
