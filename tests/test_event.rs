//! Event primitive tests: bitmap invariants, wake ordering, post options.

use std::sync::Mutex;

use mvisor::event::{Event, EventData, EventMsg, EventType, PostOpts, OS_RDY_TBL_SIZE};
use mvisor::task::{self, PendStat, TaskFlags, TaskRef, TaskState};

static LOCK: Mutex<()> = Mutex::new(());

fn serialize() -> std::sync::MutexGuard<'static, ()> {
    LOCK.lock().unwrap_or_else(|e| e.into_inner())
}

fn dummy_entry(_arg: usize) {}

fn rt_task(name: &str, prio: u8) -> TaskRef {
    task::create_task(name, dummy_entry, 0, prio, 0, 4096, TaskFlags::KERNEL).unwrap()
}

fn fifo_task(name: &str) -> TaskRef {
    // Priority above the realtime class lands on the FIFO list.
    task::create_task(name, dummy_entry, 0, 100, 0, 4096, TaskFlags::KERNEL).unwrap()
}

/// Bit g of wait_grp must be set exactly when wait_tbl[g] is nonzero.
fn assert_bitmap_consistent(ev: &Event) {
    let grp = ev.wait_grp();
    let tbl = ev.wait_tbl();
    for g in 0..OS_RDY_TBL_SIZE {
        assert_eq!(
            grp & (1 << g) != 0,
            tbl[g] != 0,
            "group {} out of sync with its table byte",
            g
        );
    }
}

#[test]
fn realtime_wake_order_with_priority_tie() {
    let _g = serialize();
    let ev = Event::new(EventType::Mbox, EventData::Mbox(None));

    let t5 = rt_task("t5", 5);
    let t3a = rt_task("t3a", 3);
    let t7 = rt_task("t7", 7);
    let t3b = rt_task("t3b", 3);

    for t in [&t5, &t3a, &t7, &t3b] {
        ev.task_wait(t, task::TASK_STAT_MBOX, 0);
        assert_bitmap_consistent(&ev);
    }

    let msg: EventMsg = 0xdead;
    let w1 = ev
        .highest_task_ready(Some(msg), task::TASK_STAT_MBOX, PendStat::Ok)
        .unwrap();
    assert!(std::sync::Arc::ptr_eq(&w1, &t3a));
    assert_eq!(w1.take_msg(), Some(msg));
    assert_eq!(w1.state(), TaskState::Ready);
    assert_eq!(w1.stat(), task::TASK_STAT_RDY);
    assert_bitmap_consistent(&ev);

    // The tied priority wakes in arrival order.
    let w2 = ev
        .highest_task_ready(None, task::TASK_STAT_MBOX, PendStat::Ok)
        .unwrap();
    assert!(std::sync::Arc::ptr_eq(&w2, &t3b));

    let w3 = ev
        .highest_task_ready(None, task::TASK_STAT_MBOX, PendStat::Ok)
        .unwrap();
    assert!(std::sync::Arc::ptr_eq(&w3, &t5));

    let w4 = ev
        .highest_task_ready(None, task::TASK_STAT_MBOX, PendStat::Ok)
        .unwrap();
    assert!(std::sync::Arc::ptr_eq(&w4, &t7));

    assert!(!ev.has_waiter());
    assert!(ev
        .highest_task_ready(None, task::TASK_STAT_MBOX, PendStat::Ok)
        .is_none());
    assert_bitmap_consistent(&ev);
}

#[test]
fn non_realtime_waiters_are_fifo() {
    let _g = serialize();
    let ev = Event::new(EventType::Queue, EventData::Queue(Default::default()));

    let tasks: Vec<TaskRef> = ["a", "b", "c", "d"].into_iter().map(fifo_task).collect();
    for t in &tasks {
        ev.task_wait(t, task::TASK_STAT_Q, 0);
    }
    assert_eq!(ev.wait_list_len(), 4);
    assert_eq!(ev.wait_grp(), 0);

    for expected in &tasks {
        let woken = ev
            .highest_task_ready(None, task::TASK_STAT_Q, PendStat::Ok)
            .unwrap();
        assert!(std::sync::Arc::ptr_eq(&woken, expected));
    }
    assert!(!ev.has_waiter());
}

#[test]
fn realtime_waiters_win_over_fifo() {
    let _g = serialize();
    let ev = Event::new(EventType::Sem, EventData::None);

    let slow = fifo_task("slow");
    let fast = rt_task("fast", 40);
    ev.task_wait(&slow, task::TASK_STAT_SEM, 0);
    ev.task_wait(&fast, task::TASK_STAT_SEM, 0);

    let first = ev.get_waiter().unwrap();
    assert!(std::sync::Arc::ptr_eq(&first, &fast));

    let woken = ev
        .highest_task_ready(None, task::TASK_STAT_SEM, PendStat::Ok)
        .unwrap();
    assert!(std::sync::Arc::ptr_eq(&woken, &fast));

    let woken = ev
        .highest_task_ready(None, task::TASK_STAT_SEM, PendStat::Ok)
        .unwrap();
    assert!(std::sync::Arc::ptr_eq(&woken, &slow));
}

#[test]
fn task_remove_clears_either_structure() {
    let _g = serialize();
    let ev = Event::new(EventType::Mutex, EventData::None);

    let rt = rt_task("rt", 12);
    let be = fifo_task("be");
    ev.task_wait(&rt, task::TASK_STAT_MUTEX, 7);
    ev.task_wait(&be, task::TASK_STAT_MUTEX, 7);
    assert_eq!(rt.delay(), 7);

    ev.task_remove(&rt, task::TASK_STAT_MUTEX);
    assert_bitmap_consistent(&ev);
    assert_eq!(ev.wait_grp(), 0);
    assert_eq!(rt.state(), TaskState::Ready);
    assert_eq!(rt.delay(), 0);

    ev.task_remove(&be, task::TASK_STAT_MUTEX);
    assert_eq!(ev.wait_list_len(), 0);
    assert!(!ev.has_waiter());

    // Nothing left that references either task.
    assert!(ev
        .highest_task_ready(None, task::TASK_STAT_MUTEX, PendStat::Ok)
        .is_none());

    // Removal is idempotent.
    ev.task_remove(&rt, task::TASK_STAT_MUTEX);
    ev.task_remove(&be, task::TASK_STAT_MUTEX);
}

#[test]
fn broadcast_post_drains_every_waiter() {
    let _g = serialize();
    let ev = Event::new(EventType::Sem, EventData::None);

    let a = rt_task("ba", 10);
    let b = rt_task("bb", 20);
    let c = fifo_task("bc");
    ev.task_wait(&a, task::TASK_STAT_SEM, 0);
    ev.task_wait(&b, task::TASK_STAT_SEM, 0);
    ev.task_wait(&c, task::TASK_STAT_SEM, 0);

    let woken = ev.post(Some(1), PostOpts::BROADCAST);
    assert_eq!(woken, 3);
    assert!(!ev.has_waiter());
    for t in [&a, &b, &c] {
        assert_eq!(t.state(), TaskState::Ready);
        assert_eq!(t.pend_stat(), PendStat::Ok);
    }
}

#[test]
fn no_sched_suppresses_resched_ipi() {
    let _g = serialize();
    let ev = Event::new(EventType::Mbox, EventData::Mbox(None));

    // Waiter pinned to pCPU 2: the wake IPI must target it.
    let pinned = task::create_task("pin2", dummy_entry, 0, 30, 2, 4096, TaskFlags::KERNEL).unwrap();
    ev.task_wait(&pinned, task::TASK_STAT_MBOX, 0);

    mvisor::arch::take_resched_ipis();
    assert_eq!(ev.post(Some(7), PostOpts::empty()), 1);
    assert_ne!(mvisor::arch::take_resched_ipis() & (1 << 2), 0);

    ev.task_wait(&pinned, task::TASK_STAT_MBOX, 0);
    mvisor::arch::take_resched_ipis();
    assert_eq!(ev.post(Some(8), PostOpts::NO_SCHED), 1);
    assert_eq!(mvisor::arch::take_resched_ipis(), 0);
}

#[test]
fn queue_front_post_prepends() {
    let _g = serialize();
    let ev = Event::new(EventType::Queue, EventData::Queue(Default::default()));

    ev.post(Some(1), PostOpts::empty());
    ev.post(Some(2), PostOpts::empty());
    ev.post(Some(3), PostOpts::FRONT);

    assert_eq!(ev.fetch(), Some(3));
    assert_eq!(ev.fetch(), Some(1));
    assert_eq!(ev.fetch(), Some(2));
    assert_eq!(ev.fetch(), None);
}

#[test]
fn posts_without_waiters_deposit() {
    let _g = serialize();

    let mbox = Event::new(EventType::Mbox, EventData::Mbox(None));
    assert_eq!(mbox.post(Some(0x55), PostOpts::empty()), 0);
    assert_eq!(mbox.fetch(), Some(0x55));
    assert_eq!(mbox.fetch(), None);

    let sem = Event::new(EventType::Sem, EventData::None);
    sem.post(None, PostOpts::empty());
    sem.post(None, PostOpts::empty());
    assert_eq!(sem.cnt(), 2);
}

#[test]
fn fifo_list_holds_only_non_realtime() {
    let _g = serialize();
    let ev = Event::new(EventType::Sem, EventData::None);

    let rt = rt_task("rtx", 63);
    let be = fifo_task("bex");
    ev.task_wait(&rt, task::TASK_STAT_SEM, 0);
    ev.task_wait(&be, task::TASK_STAT_SEM, 0);

    // Priority 63 is still realtime; only the other task queues FIFO.
    assert_eq!(ev.wait_list_len(), 1);
    assert_ne!(ev.wait_grp(), 0);
    assert_bitmap_consistent(&ev);

    ev.task_remove(&rt, task::TASK_STAT_SEM);
    ev.task_remove(&be, task::TASK_STAT_SEM);
}
