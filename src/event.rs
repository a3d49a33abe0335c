//! The unified wait/post primitive.
//!
//! Mailboxes, queues, semaphores, mutexes and flag groups are all built
//! on one structure: an [`Event`] tracks who is waiting and carries the
//! payload being handed over. Realtime waiters are indexed by an 8x8
//! priority bitmap so the highest-priority waiter is found in constant
//! time; everyone else queues FIFO and is served strictly after the
//! realtime class.
//!
//! # Priority bitmap
//!
//! A waiter at priority `p` occupies group `p >> 3` and slot `p & 7`.
//! `wait_grp` has bit `g` set while any slot of `wait_tbl[g]` is set, so
//! the lookup is two table indexes: lowest set bit of `wait_grp` gives
//! the group, lowest set bit of that group's byte gives the slot, and
//! the winner is `(g << 3) | slot`. Numerically smaller priority wins.

use alloc::collections::VecDeque;
use alloc::sync::Arc;

use bitflags::bitflags;

use crate::arch;
use crate::platform::MAX_CPU_NR;
use crate::sync::SpinLock;
use crate::task::{self, PendStat, TaskRef, TaskState};

/// Groups in the ready table; 8 groups of 8 slots cover every realtime
/// priority.
pub const OS_RDY_TBL_SIZE: usize = 8;

const NR_RT_PRIOS: usize = OS_RDY_TBL_SIZE * 8;

/// Opaque register-sized message word handed from poster to waiter.
pub type EventMsg = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Unused,
    Mbox,
    Queue,
    Sem,
    Mutex,
    Flag,
}

/// Payload storage for posts that arrive with no waiter present.
pub enum EventData {
    None,
    Mbox(Option<EventMsg>),
    Queue(VecDeque<EventMsg>),
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PostOpts: u32 {
        /// Wake every waiter instead of only the best one.
        const BROADCAST = 0x01;
        /// Queue-type events: prepend the message (LIFO for this post).
        const FRONT     = 0x02;
        /// Suppress the reschedule IPI so batch posts can amortize it.
        const NO_SCHED  = 0x04;
    }
}

/// Lowest set bit of a byte; index 0 is unused.
static LOWEST_BIT: [u8; 256] = {
    let mut tbl = [0u8; 256];
    let mut i = 1usize;
    while i < 256 {
        let mut bit = 0u8;
        while (i >> bit) & 1 == 0 {
            bit += 1;
        }
        tbl[i] = bit;
        i += 1;
    }
    tbl
};

struct EventInner {
    etype: EventType,
    owner: u32,
    cnt: u32,
    data: EventData,
    wait_grp: u8,
    wait_tbl: [u8; OS_RDY_TBL_SIZE],
    rt_wait: [VecDeque<TaskRef>; NR_RT_PRIOS],
    wait_list: VecDeque<TaskRef>,
}

impl EventInner {
    fn has_waiter(&self) -> bool {
        self.wait_grp != 0 || !self.wait_list.is_empty()
    }

    /// Priority of the best realtime waiter, if any.
    fn highest_rt_prio(&self) -> Option<usize> {
        if self.wait_grp == 0 {
            return None;
        }
        let grp = LOWEST_BIT[self.wait_grp as usize] as usize;
        let slot = LOWEST_BIT[self.wait_tbl[grp] as usize] as usize;
        Some((grp << 3) | slot)
    }

    fn set_rt_bit(&mut self, prio: usize) {
        self.wait_tbl[prio >> 3] |= 1 << (prio & 7);
        self.wait_grp |= 1 << (prio >> 3);
    }

    fn clear_rt_bit(&mut self, prio: usize) {
        self.wait_tbl[prio >> 3] &= !(1 << (prio & 7));
        if self.wait_tbl[prio >> 3] == 0 {
            self.wait_grp &= !(1 << (prio >> 3));
        }
    }
}

pub struct Event {
    inner: SpinLock<EventInner>,
}

impl Event {
    pub fn new(etype: EventType, data: EventData) -> Self {
        Self {
            inner: SpinLock::new(EventInner {
                etype,
                owner: 0,
                cnt: 0,
                data,
                wait_grp: 0,
                wait_tbl: [0; OS_RDY_TBL_SIZE],
                rt_wait: core::array::from_fn(|_| VecDeque::new()),
                wait_list: VecDeque::new(),
            }),
        }
    }

    /// Re-initialize an embedded event for a new role. The caller must
    /// have drained all waiters first.
    pub fn init(&self, etype: EventType, data: EventData) {
        let mut inner = self.inner.lock_irqsave();
        debug_assert!(!inner.has_waiter());
        inner.etype = etype;
        inner.cnt = 0;
        inner.data = data;
        inner.wait_grp = 0;
        inner.wait_tbl = [0; OS_RDY_TBL_SIZE];
    }

    pub fn event_type(&self) -> EventType {
        self.inner.lock_irqsave().etype
    }

    pub fn owner(&self) -> u32 {
        self.inner.lock_irqsave().owner
    }

    pub fn set_owner(&self, pid: u32) {
        self.inner.lock_irqsave().owner = pid;
    }

    /// Semaphore-style counter.
    pub fn cnt(&self) -> u32 {
        self.inner.lock_irqsave().cnt
    }

    pub fn has_waiter(&self) -> bool {
        self.inner.lock_irqsave().has_waiter()
    }

    /// Register `task` as a waiter and yield. Realtime tasks go into the
    /// priority bitmap, everyone else onto the FIFO list. `stat` is the
    /// `TASK_STAT_*` bit describing what the task pends on; `to` arms the
    /// wait timeout in ticks (0 = forever). On expiry the tick path takes
    /// the task back out through [`Event::task_remove`].
    pub fn task_wait(&self, task: &TaskRef, stat: u32, to: u32) {
        {
            let mut inner = self.inner.lock_irqsave();
            debug_assert!(inner.etype != EventType::Unused);
            if task.is_realtime() {
                let prio = task.prio as usize;
                inner.rt_wait[prio].push_back(task.clone());
                inner.set_rt_bit(prio);
            } else {
                inner.wait_list.push_back(task.clone());
            }
            task.set_stat_bits(stat);
            task.set_pend_stat(PendStat::Ok);
            task.set_delay(to);
            task.set_state(TaskState::Wait);
        }
        // Suspension point: no event lock may be held across this.
        crate::percpu::sched();
    }

    /// Take `task` back out of whichever structure holds it. Idempotent:
    /// a task found in neither place is left alone.
    pub fn task_remove(&self, task: &TaskRef, msk: u32) {
        let mut inner = self.inner.lock_irqsave();
        if task.is_realtime() {
            let prio = task.prio as usize;
            if let Some(pos) = inner.rt_wait[prio].iter().position(|t| Arc::ptr_eq(t, task)) {
                inner.rt_wait[prio].remove(pos);
                if inner.rt_wait[prio].is_empty() {
                    inner.clear_rt_bit(prio);
                }
            }
        } else if let Some(pos) = inner.wait_list.iter().position(|t| Arc::ptr_eq(t, task)) {
            inner.wait_list.remove(pos);
        }
        task.clear_stat_bits(msk);
        task.set_delay(0);
        task.set_state(TaskState::Ready);
    }

    /// Peek at the waiter the next post would pick, without removing it.
    pub fn get_waiter(&self) -> Option<TaskRef> {
        let inner = self.inner.lock_irqsave();
        if let Some(prio) = inner.highest_rt_prio() {
            return inner.rt_wait[prio].front().cloned();
        }
        inner.wait_list.front().cloned()
    }

    /// Pick the best waiter, hand it `msg`, clear the `msk` status bits
    /// and stamp `pend_stat`. Realtime waiters win over the FIFO list;
    /// within a group byte the lowest set bit wins. Returns the woken
    /// task, made ready but not yet scheduled.
    pub fn highest_task_ready(
        &self,
        msg: Option<EventMsg>,
        msk: u32,
        pend_stat: PendStat,
    ) -> Option<TaskRef> {
        let task = {
            let mut inner = self.inner.lock_irqsave();
            if let Some(prio) = inner.highest_rt_prio() {
                let task = inner.rt_wait[prio].pop_front();
                if inner.rt_wait[prio].is_empty() {
                    inner.clear_rt_bit(prio);
                }
                task
            } else {
                inner.wait_list.pop_front()
            }
        }?;

        task.set_msg(msg);
        task.clear_stat_bits(msk);
        task.set_pend_stat(pend_stat);
        task.set_delay(0);
        task.set_state(TaskState::Ready);
        Some(task)
    }

    /// Post to the event. Wakes the best waiter (all of them with
    /// [`PostOpts::BROADCAST`]); with no waiter present the message is
    /// deposited into the event payload instead. Returns the number of
    /// tasks woken.
    pub fn post(&self, msg: Option<EventMsg>, opts: PostOpts) -> usize {
        let msk = self.pend_stat_mask();
        let mut woken = 0usize;
        let mut kick = 0u64;

        while let Some(task) = self.highest_task_ready(msg, msk, PendStat::Ok) {
            woken += 1;
            let mut cpu = task.affinity as usize;
            if cpu >= MAX_CPU_NR {
                cpu = arch::current_cpu_id();
            }
            kick |= 1 << cpu;
            if !opts.contains(PostOpts::BROADCAST) {
                break;
            }
        }

        if woken == 0 {
            self.deposit(msg, opts);
        } else if !opts.contains(PostOpts::NO_SCHED) {
            for cpu in 0..MAX_CPU_NR {
                if kick & (1 << cpu) != 0 {
                    arch::send_resched_ipi(cpu);
                }
            }
        }
        woken
    }

    fn pend_stat_mask(&self) -> u32 {
        match self.event_type() {
            EventType::Mbox => task::TASK_STAT_MBOX,
            EventType::Queue => task::TASK_STAT_Q,
            EventType::Sem => task::TASK_STAT_SEM,
            EventType::Mutex => task::TASK_STAT_MUTEX,
            EventType::Flag => task::TASK_STAT_FLAG,
            EventType::Unused => 0,
        }
    }

    fn deposit(&self, msg: Option<EventMsg>, opts: PostOpts) {
        let mut inner = self.inner.lock_irqsave();
        match inner.etype {
            EventType::Sem => inner.cnt = inner.cnt.saturating_add(1),
            _ => match &mut inner.data {
                EventData::Mbox(slot) => *slot = msg,
                EventData::Queue(queue) => {
                    if let Some(msg) = msg {
                        if opts.contains(PostOpts::FRONT) {
                            queue.push_front(msg);
                        } else {
                            queue.push_back(msg);
                        }
                    }
                }
                EventData::None => {}
            },
        }
    }

    /// Take a deposited message back out (mailbox slot or queue head).
    pub fn fetch(&self) -> Option<EventMsg> {
        let mut inner = self.inner.lock_irqsave();
        match &mut inner.data {
            EventData::Mbox(slot) => slot.take(),
            EventData::Queue(queue) => queue.pop_front(),
            EventData::None => None,
        }
    }

    // ── Invariant observers ──────────────────────────────────────────

    pub fn wait_grp(&self) -> u8 {
        self.inner.lock_irqsave().wait_grp
    }

    pub fn wait_tbl(&self) -> [u8; OS_RDY_TBL_SIZE] {
        self.inner.lock_irqsave().wait_tbl
    }

    pub fn wait_list_len(&self) -> usize {
        self.inner.lock_irqsave().wait_list.len()
    }
}
