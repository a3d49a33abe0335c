//! The kworker loop run for real: a host thread stands in for the pCPU
//! and drains the stop list when the recycle flag fires.

use mvisor::idle::pcpu_kworker_task;
use mvisor::percpu::get_pcpu;
use mvisor::task::{self, TaskFlags};

fn dummy_entry(_arg: usize) {}

#[test]
fn kworker_task_drains_from_its_own_loop() {
    mvisor::kernel_init();

    // The worker blocks on the flag group until the stop list fills.
    std::thread::spawn(|| pcpu_kworker_task(3));

    let pcpu = get_pcpu(3);
    let doomed =
        task::create_task("doomed", dummy_entry, 0, 91, 3, 4096, TaskFlags::KERNEL).unwrap();
    pcpu.add_stop_task(doomed);

    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
    while task::find_task("doomed").is_some() {
        assert!(
            std::time::Instant::now() < deadline,
            "kworker never recycled the task"
        );
        std::thread::yield_now();
    }
    assert_eq!(pcpu.stop_list_len(), 0);
}
